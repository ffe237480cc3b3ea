use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::{constants::gas::MAX_GAS_LIMIT, BlockSelector, CallType, OpcodeTracerOptions};

/// A call to simulate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParameters {
    /// Point of the ledger history the call runs against.
    pub block: BlockSelector,
    /// Account sending the call.
    pub sender: Address,
    /// Called account. `None` deploys `call_data` as init code.
    pub receiver: Option<Address>,
    /// Native value sent along.
    pub value: U256,
    /// Call data, or init code for creations.
    pub call_data: Bytes,
    /// Gas limit.
    pub gas_limit: u64,
    /// Whether the call is a gas estimation.
    pub is_estimate: bool,
    /// Tracer options. An opcode trace is recorded iff set.
    pub tracer_options: Option<OpcodeTracerOptions>,
}

impl CallParameters {
    /// A call from `sender` to `receiver` at the latest block with the maximum gas limit.
    pub const fn call(sender: Address, receiver: Address) -> Self {
        Self::new(sender, Some(receiver), Bytes::new())
    }

    /// A deployment of `init_code` by `sender`.
    pub const fn create(sender: Address, init_code: Bytes) -> Self {
        Self::new(sender, None, init_code)
    }

    const fn new(sender: Address, receiver: Option<Address>, call_data: Bytes) -> Self {
        Self {
            block: BlockSelector::Latest,
            sender,
            receiver,
            value: U256::ZERO,
            call_data,
            gas_limit: MAX_GAS_LIMIT,
            is_estimate: false,
            tracer_options: None,
        }
    }

    /// Runs the call at `block`.
    pub fn with_block(mut self, block: BlockSelector) -> Self {
        self.block = block;
        self
    }

    /// Sends `value` along.
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Sets the call data.
    pub fn with_data(mut self, call_data: impl Into<Bytes>) -> Self {
        self.call_data = call_data.into();
        self
    }

    /// Sets the gas limit.
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Marks the call as a gas estimation.
    pub fn estimate(mut self) -> Self {
        self.is_estimate = true;
        self
    }

    /// Requests an opcode trace.
    pub fn with_tracer(mut self, options: OpcodeTracerOptions) -> Self {
        self.tracer_options = Some(options);
        self
    }

    /// Whether the call deploys a contract.
    pub const fn is_create(&self) -> bool {
        self.receiver.is_none()
    }

    /// Whether an opcode trace is requested.
    pub const fn want_trace(&self) -> bool {
        self.tracer_options.is_some()
    }

    /// What the call is run for.
    pub const fn call_type(&self) -> CallType {
        if self.is_estimate {
            CallType::EstimateGas
        } else if self.want_trace() {
            CallType::DebugTrace
        } else {
            CallType::EthCall
        }
    }
}

//! The seam to the black-box EVM interpreter.

use alloy_primitives::{Address, Bytes, U256};
use auto_impl::auto_impl;
use revm::context::result::HaltReason;

use crate::{FrameError, WorldState};

/// One EVM call frame: the top-level call or a nested message call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmFrame {
    /// Account that sent the message.
    pub caller: Address,
    /// Account whose code runs and whose storage is used.
    pub address: Address,
    /// Native value sent along.
    pub value: U256,
    /// Call data. Empty for creations.
    pub input: Bytes,
    /// Init code to run instead of the code stored at `address`, for creations.
    pub init_code: Option<Bytes>,
    /// Gas available to the frame.
    pub gas_limit: u64,
    /// Nesting depth. The top-level call is `0`.
    pub depth: usize,
    /// Whether state changes are forbidden.
    pub is_static: bool,
}

impl EvmFrame {
    /// A top-level message call.
    pub const fn call(
        caller: Address,
        address: Address,
        value: U256,
        input: Bytes,
        gas_limit: u64,
    ) -> Self {
        Self {
            caller,
            address,
            value,
            input,
            init_code: None,
            gas_limit,
            depth: 0,
            is_static: false,
        }
    }

    /// A top-level contract creation deploying to `address`.
    pub fn create(
        caller: Address,
        address: Address,
        value: U256,
        init_code: Bytes,
        gas_limit: u64,
    ) -> Self {
        Self {
            caller,
            address,
            value,
            input: Bytes::new(),
            init_code: Some(init_code),
            gas_limit,
            depth: 0,
            is_static: false,
        }
    }

    /// Whether the frame deploys a contract.
    pub const fn is_create(&self) -> bool {
        self.init_code.is_some()
    }
}

/// How a frame ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmStatus {
    /// Ran to `STOP` or `RETURN`.
    Success,
    /// Ran to `REVERT`. The output holds the revert payload.
    Revert,
    /// Stopped abnormally. All gas of the frame is consumed.
    Halt(HaltReason),
}

/// What the EVM reports for a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmOutcome {
    /// How the frame ended.
    pub status: EvmStatus,
    /// Gas consumed, before refunds.
    pub gas_used: u64,
    /// Gas refunded at the end of the transaction.
    pub gas_refunded: u64,
    /// Return data, revert payload, or deployed runtime code for creations.
    pub output: Bytes,
}

impl EvmOutcome {
    /// A successful outcome.
    pub const fn success(gas_used: u64, output: Bytes) -> Self {
        Self { status: EvmStatus::Success, gas_used, gas_refunded: 0, output }
    }

    /// A reverted outcome.
    pub const fn revert(gas_used: u64, output: Bytes) -> Self {
        Self { status: EvmStatus::Revert, gas_used, gas_refunded: 0, output }
    }

    /// A halted outcome.
    pub const fn halt(reason: HaltReason, gas_used: u64) -> Self {
        Self { status: EvmStatus::Halt(reason), gas_used, gas_refunded: 0, output: Bytes::new() }
    }

    /// Sets the gas refund.
    pub fn with_refund(mut self, gas_refunded: u64) -> Self {
        self.gas_refunded = gas_refunded;
        self
    }

    /// Whether the frame succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, EvmStatus::Success)
    }
}

/// Failure of the EVM itself, as opposed to a revert or halt of the executed code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvmError {
    /// The world state failed underneath the EVM.
    #[error(transparent)]
    State(#[from] FrameError),
    /// The interpreter failed.
    #[error("evm failure: {0}")]
    Internal(String),
}

/// The state of the interpreter right before an instruction executes.
#[derive(Debug, Clone, Copy)]
pub struct InstructionStep<'a> {
    /// Program counter.
    pub pc: usize,
    /// The opcode.
    pub opcode: u8,
    /// Nesting depth of the executing frame.
    pub depth: usize,
    /// Gas left in the frame before the instruction.
    pub gas_remaining: u64,
    /// Gas the instruction costs.
    pub gas_cost: u64,
    /// Operand stack, bottom first.
    pub stack: &'a [U256],
    /// Frame memory.
    pub memory: &'a [u8],
    /// Account whose code runs.
    pub address: Address,
}

/// Observer the EVM notifies while executing.
#[auto_impl(&mut, Box)]
pub trait InstructionHook {
    /// Called before every instruction.
    fn on_step(&mut self, step: &InstructionStep<'_>, state: &dyn WorldState);

    /// Called when a frame starts, including the top-level one.
    fn on_call_enter(&mut self, _frame: &EvmFrame) {}

    /// Called when a frame ends, including the top-level one.
    fn on_call_exit(&mut self, _frame: &EvmFrame, _outcome: &EvmOutcome) {}
}

/// The black-box EVM interpreter.
///
/// Executes one frame, and every frame it spawns, against `state`. Nested frames must be
/// bracketed with [`WorldState::enter_call`] and [`WorldState::exit_call`] so that reverted
/// sub-calls leave no trace. The top-level frame is not bracketed: the caller owns it.
#[auto_impl(&, Box, Arc)]
pub trait Evm {
    /// Executes `frame` to completion.
    fn execute(
        &self,
        frame: EvmFrame,
        state: &mut dyn WorldState,
        hook: Option<&mut dyn InstructionHook>,
    ) -> Result<EvmOutcome, EvmError>;
}

use std::time::Instant;

use delegate::delegate;
use tracing::debug;

use crate::{CallError, OpcodeTracerOptions, StackedStateFrames, ValidityInterval};

/// What a call is run for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CallType {
    /// A plain read-only call.
    #[default]
    #[display("eth_call")]
    EthCall,
    /// One probe of a gas estimation.
    #[display("eth_estimateGas")]
    EstimateGas,
    /// A traced call.
    #[display("debug_traceCall")]
    DebugTrace,
}

/// Everything one simulated call carries: its overlay bound to the resolved interval, its
/// tracer options and its gas accounting.
///
/// Created when a call starts and dropped when it ends. Gas estimation creates a new one for
/// every probe.
#[derive(Debug)]
pub struct ExecutionContext<L> {
    call_type: CallType,
    frames: StackedStateFrames<L>,
    tracer_options: Option<OpcodeTracerOptions>,
    gas_used_so_far: u64,
}

impl<L> ExecutionContext<L> {
    /// Creates a context running a `call_type` call over `frames`.
    pub const fn new(call_type: CallType, frames: StackedStateFrames<L>) -> Self {
        Self { call_type, frames, tracer_options: None, gas_used_so_far: 0 }
    }

    /// Requests an opcode trace of the call.
    pub fn with_tracer(mut self, options: OpcodeTracerOptions) -> Self {
        self.tracer_options = Some(options);
        self
    }

    /// Fails the call once `deadline` has passed, before it starts or at its next nested
    /// call or ledger read.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.frames.set_deadline(deadline);
        self
    }

    /// What the call is run for.
    pub const fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Tracer options, when a trace was requested.
    pub const fn tracer_options(&self) -> Option<&OpcodeTracerOptions> {
        self.tracer_options.as_ref()
    }

    /// The state overlay.
    pub const fn frames(&self) -> &StackedStateFrames<L> {
        &self.frames
    }

    /// Mutable access to the state overlay.
    pub fn frames_mut(&mut self) -> &mut StackedStateFrames<L> {
        &mut self.frames
    }

    delegate! {
        to self.frames {
            /// The interval ledger reads are bound to.
            pub fn interval(&self) -> &ValidityInterval;
            /// Number of layers of the overlay, including the root.
            pub fn depth(&self) -> usize;
        }
    }

    /// Gas used by the call so far.
    pub const fn gas_used_so_far(&self) -> u64 {
        self.gas_used_so_far
    }

    /// Adds `gas` to the gas used by the call.
    pub fn record_gas(&mut self, gas: u64) {
        self.gas_used_so_far = self.gas_used_so_far.saturating_add(gas);
    }

    /// Fails with [`CallError::DeadlineExceeded`] once the deadline has passed.
    pub fn check_deadline(&self) -> Result<(), CallError> {
        Ok(self.frames.check_deadline()?)
    }

    /// Drops every write of the call, including those of the root layer.
    pub fn abort(&mut self) {
        let dropped = self.frames.discard_above_root();
        self.frames.reset();
        debug!(call_type = %self.call_type, dropped, "Aborted execution context");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{test_utils::MemoryLedger, AccountBalances};
    use alloy_primitives::{Address, U256};

    fn context() -> ExecutionContext<MemoryLedger> {
        let interval = ValidityInterval::open_ended(0);
        let frames = StackedStateFrames::new(MemoryLedger::default(), interval);
        ExecutionContext::new(CallType::EthCall, frames)
    }

    #[test]
    fn test_abort_discards_all_layers() {
        let mut ctx = context();
        ctx.frames_mut().set::<AccountBalances>(Address::ZERO, U256::from(1));
        ctx.frames_mut().push().unwrap();
        ctx.frames_mut().set::<AccountBalances>(Address::ZERO, U256::from(2));

        ctx.abort();
        assert_eq!(ctx.depth(), 1);
        assert!(ctx.frames().top().is_empty());
    }

    #[test]
    fn test_deadline() {
        let ctx = context().with_deadline(Instant::now() + Duration::from_secs(60));
        assert_eq!(ctx.check_deadline(), Ok(()));

        let ctx = context().with_deadline(Instant::now());
        assert_eq!(ctx.check_deadline(), Err(CallError::DeadlineExceeded));
    }

    #[test]
    fn test_gas_accounting_and_call_type() {
        let mut ctx = context();
        ctx.record_gas(21_000);
        ctx.record_gas(u64::MAX);
        assert_eq!(ctx.gas_used_so_far(), u64::MAX);
        assert_eq!(ctx.call_type().to_string(), "eth_call");
        assert!(ctx.tracer_options().is_none());
    }
}

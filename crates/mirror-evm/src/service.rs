use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    Backend, BackendKind, BackendRouter, BlockResolver, CallError, CallParameters, CallType,
    ConfigError, Evm, EvmConfig, ExecutionContext, Executor, GasEstimator, HistoricalLedgerSource,
    OpcodeTracerOptions, ProcessingResult, StackedStateFrames, ValidityInterval,
};

/// Entry point of call simulation.
///
/// Resolves the block of every call, builds a fresh [`ExecutionContext`] for it, picks a
/// back-end and runs the [`Evm`]. The ledger and the EVM are shared read-only across calls,
/// so one service can serve calls from many threads.
#[derive(Debug)]
pub struct ContractCallService<L, E> {
    ledger: Arc<L>,
    evm: Arc<E>,
    config: EvmConfig,
    resolver: BlockResolver<Arc<L>>,
    router: BackendRouter,
    timeout: Option<Duration>,
}

impl<L: HistoricalLedgerSource, E: Evm> ContractCallService<L, E> {
    /// Creates a service over `ledger` and `evm`. Fails if `config` is invalid.
    pub fn new(ledger: Arc<L>, evm: Arc<E>, config: EvmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            resolver: BlockResolver::new(Arc::clone(&ledger)),
            router: BackendRouter::from(&config),
            ledger,
            evm,
            config,
            timeout: None,
        })
    }

    /// Fails calls, and whole gas estimations, that have not finished within `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The configuration.
    pub const fn config(&self) -> &EvmConfig {
        &self.config
    }

    /// The backing ledger.
    pub const fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// The block resolver.
    pub const fn resolver(&self) -> &BlockResolver<Arc<L>> {
        &self.resolver
    }

    /// The back-end router.
    pub const fn router(&self) -> &BackendRouter {
        &self.router
    }

    /// Executes a call. Reverts and halts are returned as [`CallError::Revert`] and
    /// [`CallError::Halt`].
    pub fn call(&self, params: &CallParameters) -> Result<ProcessingResult, CallError> {
        self.execute_with(self.router.route(params), params)?.into_result()
    }

    /// Executes a call with an opcode trace. Reverted and halted calls still return their
    /// trace.
    pub fn trace(
        &self,
        params: &CallParameters,
        options: OpcodeTracerOptions,
    ) -> Result<ProcessingResult, CallError> {
        let params = params.clone().with_tracer(options);
        self.execute_with(self.router.route(&params), &params)
    }

    /// Estimates the smallest gas limit the call succeeds with, searching up to the call's gas
    /// limit capped at the configured maximum.
    pub fn estimate_gas(&self, params: &CallParameters) -> Result<u64, CallError> {
        let deadline = self.deadline();
        let params = params.clone().estimate();
        let interval = self.resolver.resolve(params.block)?;
        let backend = self.backend(self.router.route(&params));
        let max_gas = params.gas_limit.min(self.config.max_gas_limit);
        debug!(backend = %backend.kind(), max_gas, %interval, "Estimating gas");

        GasEstimator::from(&self.config).estimate(max_gas, |gas_limit| {
            let probe = CallParameters { gas_limit, ..params.clone() };
            let call_type = CallType::EstimateGas;
            let mut ctx = self.context(backend.kind(), call_type, interval, None, deadline);
            backend.execute(&mut ctx, &probe)
        })
    }

    /// Executes a call on the given back-end without converting failures into errors.
    pub fn execute_with(
        &self,
        kind: BackendKind,
        params: &CallParameters,
    ) -> Result<ProcessingResult, CallError> {
        let deadline = self.deadline();
        let interval = self.resolver.resolve(params.block)?;
        let call_type = params.call_type();
        let mut ctx = self.context(kind, call_type, interval, params.tracer_options, deadline);
        let result = self.backend(kind).execute(&mut ctx, params);
        if let Err(error) = &result {
            if error.is_client_error() {
                debug!(%kind, %error, "Call failed");
            } else {
                warn!(%kind, %error, "Call failed");
            }
        }
        result
    }

    fn context(
        &self,
        kind: BackendKind,
        call_type: CallType,
        interval: ValidityInterval,
        tracer_options: Option<OpcodeTracerOptions>,
        deadline: Option<Instant>,
    ) -> ExecutionContext<Arc<L>> {
        // The modularized executor runs the whole call inside one extra savepoint layer.
        let savepoints = usize::from(kind == BackendKind::Modularized);
        let frames = StackedStateFrames::with_max_call_depth(
            Arc::clone(&self.ledger),
            interval,
            self.config.max_call_depth + savepoints,
        );
        let mut ctx = ExecutionContext::new(call_type, frames);
        if let Some(options) = tracer_options {
            ctx = ctx.with_tracer(options);
        }
        if let Some(deadline) = deadline {
            ctx = ctx.with_deadline(deadline);
        }
        ctx
    }

    /// The deadline of a request starting now.
    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| Instant::now() + timeout)
    }

    fn backend(&self, kind: BackendKind) -> Backend<&E> {
        Backend::new(kind, &*self.evm, self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{BytecodeBuilder, MemoryLedger, MiniEvm},
        BackendError, BlockSelector,
    };
    use alloy_primitives::{Address, U256};

    const SENDER: Address = Address::repeat_byte(0xa0);
    const CONTRACT: Address = Address::repeat_byte(0xc0);

    fn service(ledger: MemoryLedger) -> ContractCallService<MemoryLedger, MiniEvm> {
        ContractCallService::new(Arc::new(ledger), Arc::new(MiniEvm), EvmConfig::default())
            .unwrap()
    }

    fn ledger() -> MemoryLedger {
        let code = BytecodeBuilder::default().sload(1).return_top().build();
        MemoryLedger::default()
            .with_block(0, 99)
            .with_block(100, 199)
            .with_account(SENDER, U256::from(1_000))
            .with_contract(CONTRACT, code)
            .with_storage_at(CONTRACT, U256::from(1), 0, U256::from(7))
            .with_storage_at(CONTRACT, U256::from(1), 150, U256::from(8))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EvmConfig::default().with_max_call_depth(0);
        let result = ContractCallService::new(Arc::new(ledger()), Arc::new(MiniEvm), config);
        assert!(matches!(result, Err(ConfigError::CallDepth)));
    }

    #[test]
    fn test_call_reads_state_at_selected_block() {
        let service = service(ledger());
        let params = CallParameters::call(SENDER, CONTRACT);
        let latest = service.call(&params).unwrap();
        assert_eq!(U256::from_be_slice(&latest.output), U256::from(8));

        let historical = service.call(&params.with_block(BlockSelector::ByIndex(0))).unwrap();
        assert_eq!(U256::from_be_slice(&historical.output), U256::from(7));
    }

    #[test]
    fn test_unknown_block() {
        let service = service(ledger());
        let params = CallParameters::call(SENDER, CONTRACT).with_block(BlockSelector::ByIndex(9));
        assert_eq!(service.call(&params), Err(CallError::BlockNotFound(BlockSelector::ByIndex(9))));
    }

    #[test]
    fn test_ledger_failure_is_a_backend_error() {
        let service = service(ledger().unavailable());
        let result = service.call(&CallParameters::call(SENDER, CONTRACT));
        assert!(matches!(result, Err(CallError::Backend(BackendError::Ledger(_)))));
    }

    #[test]
    fn test_expired_deadline() {
        let service = service(ledger()).with_timeout(Duration::ZERO);
        let result = service.call(&CallParameters::call(SENDER, CONTRACT));
        assert_eq!(result, Err(CallError::DeadlineExceeded));
    }

    #[test]
    fn test_trace_keeps_failed_calls() {
        let reverting = Address::repeat_byte(0xde);
        let code = BytecodeBuilder::default().revert_with_message("no").build();
        let service = service(ledger().with_contract(reverting, code));

        let params = CallParameters::call(SENDER, reverting);
        let result = service.trace(&params, OpcodeTracerOptions::default()).unwrap();
        assert!(!result.success);
        let opcodes = result.opcodes.unwrap();
        assert_eq!(opcodes.last().unwrap().op, "REVERT");
        assert_eq!(opcodes.last().unwrap().reason.as_deref(), Some("no"));
        assert!(matches!(service.call(&params), Err(CallError::Revert { .. })));
    }
}

use tracing::{debug, trace};

use super::{
    attach_trace, tracer_for,
    validation::{
        check_gas_limit, check_payload, check_receiver, check_sender, deploy, intrinsic_gas,
        target_address, top_level_frame, total_gas_used,
    },
    BackendKind, Executor,
};
use crate::{
    CallError, CallParameters, Evm, EvmConfig, ExecutionContext, HistoricalLedgerSource,
    InstructionHook, PreCheckReason, ProcessingResult, WorldState,
};

/// The monolithic in-process processor.
///
/// Runs every check and the EVM in one procedure directly on the root layer of the overlay.
/// Intrinsic gas follows the pre-Shanghai schedule.
#[derive(Debug, Clone)]
pub struct LegacyProcessor<E> {
    evm: E,
    config: EvmConfig,
}

impl<E> LegacyProcessor<E> {
    /// Creates a processor driving `evm`.
    pub const fn new(evm: E, config: EvmConfig) -> Self {
        Self { evm, config }
    }

    /// The configuration the checks run against.
    pub const fn config(&self) -> &EvmConfig {
        &self.config
    }
}

impl<E: Evm> LegacyProcessor<E> {
    fn process<L: HistoricalLedgerSource>(
        &self,
        ctx: &mut ExecutionContext<L>,
        params: &CallParameters,
    ) -> Result<ProcessingResult, CallError> {
        ctx.check_deadline()?;
        check_payload(params, &self.config)?;
        let intrinsic = intrinsic_gas(&params.call_data, params.is_create());
        check_gas_limit(params, &self.config, intrinsic)?;

        let mut tracer = tracer_for(ctx);
        let state: &mut dyn WorldState = ctx.frames_mut();
        check_sender(state, params)?;
        check_receiver(state, params)?;

        let address = target_address(state, params)?;
        if !state.transfer(params.sender, address, params.value)? {
            let available = state.balance(params.sender)?;
            let reason = PreCheckReason::InsufficientBalance { required: params.value, available };
            return Err(reason.into());
        }

        let frame = top_level_frame(params, address, params.gas_limit - intrinsic);
        trace!(%address, gas_limit = frame.gas_limit, "Executing call");
        let hook = tracer.as_mut().map(|tracer| tracer as &mut dyn InstructionHook);
        let outcome = self.evm.execute(frame, state, hook)?;

        if outcome.is_success() {
            if params.is_create() {
                deploy(state, address, outcome.output.clone())?;
            }
        } else {
            // The top-level call writes straight into the root layer.
            ctx.frames_mut().reset();
        }

        let gas_used = total_gas_used(intrinsic, &outcome);
        ctx.record_gas(gas_used);
        debug!(
            call_type = %ctx.call_type(),
            success = outcome.is_success(),
            gas_used,
            "Processed call"
        );
        let result = ProcessingResult::from_outcome(outcome, gas_used, BackendKind::Legacy);
        Ok(attach_trace(result, tracer))
    }
}

impl<E: Evm> Executor for LegacyProcessor<E> {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn execute<L: HistoricalLedgerSource>(
        &self,
        ctx: &mut ExecutionContext<L>,
        params: &CallParameters,
    ) -> Result<ProcessingResult, CallError> {
        let result = self.process(ctx, params);
        if result.is_err() {
            ctx.abort();
        }
        result
    }
}

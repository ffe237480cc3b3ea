use alloy_primitives::{Address, U256};
use tracing::{debug, trace};

use super::{
    attach_trace, tracer_for,
    validation::{
        deploy, init_code_cost, intrinsic_gas, target_address, top_level_frame, total_gas_used,
    },
    BackendKind, Executor,
};
use crate::{
    CallError, CallParameters, Evm, EvmConfig, EvmFrame, EvmOutcome, ExecutionContext,
    HistoricalLedgerSource, InstructionHook, OpcodeTracer, PreCheckReason, ProcessingResult,
    WorldState,
};

/// Ledger-style status codes the pipeline stages reject a call with.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ResponseCode {
    /// The call data is larger than allowed.
    #[display("TRANSACTION_OVERSIZE")]
    TransactionOversize {
        /// Size of the call data.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The gas limit is above the configured maximum.
    #[display("MAX_GAS_LIMIT_EXCEEDED")]
    MaxGasLimitExceeded {
        /// Gas limit of the call.
        limit: u64,
        /// Configured maximum.
        max: u64,
    },
    /// The gas limit does not cover intrinsic gas.
    #[display("INSUFFICIENT_GAS")]
    InsufficientGas {
        /// Intrinsic gas of the call.
        required: u64,
        /// Gas limit of the call.
        provided: u64,
    },
    /// The paying account has been deleted.
    #[display("PAYER_ACCOUNT_DELETED")]
    PayerAccountDeleted(Address),
    /// The paying account cannot cover the value.
    #[display("INSUFFICIENT_PAYER_BALANCE")]
    InsufficientPayerBalance {
        /// Value of the call.
        required: U256,
        /// Balance of the payer.
        available: U256,
    },
    /// The receiving account has been deleted.
    #[display("ACCOUNT_DELETED")]
    AccountDeleted(Address),
}

impl From<ResponseCode> for CallError {
    fn from(code: ResponseCode) -> Self {
        match code {
            ResponseCode::TransactionOversize { size, max } => Self::PayloadTooLarge { size, max },
            ResponseCode::MaxGasLimitExceeded { limit, max } => {
                PreCheckReason::GasLimitTooHigh { limit, max }.into()
            }
            ResponseCode::InsufficientGas { required, provided } => {
                PreCheckReason::IntrinsicGasTooLow { required, provided }.into()
            }
            ResponseCode::PayerAccountDeleted(address) => Self::InvalidSender(address),
            ResponseCode::InsufficientPayerBalance { required, available } => {
                PreCheckReason::InsufficientBalance { required, available }.into()
            }
            ResponseCode::AccountDeleted(address) => {
                PreCheckReason::ReceiverDeleted(address).into()
            }
        }
    }
}

/// The staged transaction executor.
///
/// Runs a call through a pipeline: ingest checks, intrinsic gas, payer validation, a savepoint
/// with the value transfer, the EVM, and finalization. Rejections come in the same order as
/// the legacy processor's. The whole call runs inside a savepoint layer that is committed or
/// discarded with the top-level outcome. Intrinsic gas also charges the init code word cost
/// on creations.
#[derive(Debug, Clone)]
pub struct ModularizedExecutor<E> {
    evm: E,
    config: EvmConfig,
}

impl<E> ModularizedExecutor<E> {
    /// Creates an executor driving `evm`.
    pub const fn new(evm: E, config: EvmConfig) -> Self {
        Self { evm, config }
    }

    /// The configuration the stages run against.
    pub const fn config(&self) -> &EvmConfig {
        &self.config
    }

    /// Size and gas limit checks that need no state.
    fn ingest(&self, params: &CallParameters) -> Result<(), ResponseCode> {
        let size = params.call_data.len();
        if size > self.config.max_data_size {
            let max = self.config.max_data_size;
            return Err(ResponseCode::TransactionOversize { size, max });
        }
        if params.gas_limit > self.config.max_gas_limit {
            return Err(ResponseCode::MaxGasLimitExceeded {
                limit: params.gas_limit,
                max: self.config.max_gas_limit,
            });
        }
        Ok(())
    }

    /// Checks that the payer can pay and the receiver can receive.
    fn validate_payer(
        state: &mut dyn WorldState,
        params: &CallParameters,
    ) -> Result<(), CallError> {
        if state.is_deleted(params.sender)? {
            return Err(ResponseCode::PayerAccountDeleted(params.sender).into());
        }
        let available = state.balance(params.sender)?;
        if available < params.value {
            return Err(
                ResponseCode::InsufficientPayerBalance { required: params.value, available }.into()
            );
        }
        if let Some(receiver) = params.receiver {
            if state.is_deleted(receiver)? {
                return Err(ResponseCode::AccountDeleted(receiver).into());
            }
        }
        Ok(())
    }

    /// Intrinsic gas of the call, init code words included.
    fn charge_intrinsic(params: &CallParameters) -> Result<u64, ResponseCode> {
        let mut required = intrinsic_gas(&params.call_data, params.is_create());
        if params.is_create() {
            required += init_code_cost(params.call_data.len());
        }
        if params.gas_limit < required {
            return Err(ResponseCode::InsufficientGas { required, provided: params.gas_limit });
        }
        Ok(required)
    }

    /// Opens the savepoint, derives the target and moves the value.
    fn open_savepoint(
        state: &mut dyn WorldState,
        params: &CallParameters,
        intrinsic: u64,
    ) -> Result<EvmFrame, CallError> {
        state.enter_call()?;
        let address = target_address(state, params)?;
        if !state.transfer(params.sender, address, params.value)? {
            let available = state.balance(params.sender)?;
            return Err(
                ResponseCode::InsufficientPayerBalance { required: params.value, available }.into()
            );
        }
        Ok(top_level_frame(params, address, params.gas_limit - intrinsic))
    }

    /// Closes the savepoint, keeping its writes only if the call succeeded.
    fn finalize(
        state: &mut dyn WorldState,
        frame: &EvmFrame,
        outcome: &EvmOutcome,
    ) -> Result<(), CallError> {
        if outcome.is_success() && frame.is_create() {
            deploy(state, frame.address, outcome.output.clone())?;
        }
        state.exit_call(outcome.is_success())?;
        Ok(())
    }
}

impl<E: Evm> ModularizedExecutor<E> {
    fn run<L: HistoricalLedgerSource>(
        &self,
        ctx: &mut ExecutionContext<L>,
        params: &CallParameters,
    ) -> Result<ProcessingResult, CallError> {
        ctx.check_deadline()?;
        self.ingest(params).inspect_err(|code| debug!(%code, "Rejected at ingest"))?;

        let intrinsic = Self::charge_intrinsic(params)
            .inspect_err(|code| debug!(%code, "Rejected at intrinsic gas"))?;

        let mut tracer = tracer_for(ctx);
        let state: &mut dyn WorldState = ctx.frames_mut();
        Self::validate_payer(state, params)?;

        let frame = Self::open_savepoint(state, params, intrinsic)?;
        trace!(address = %frame.address, gas_limit = frame.gas_limit, "Executing call");
        let outcome = self.execute_evm(frame.clone(), state, tracer.as_mut())?;
        Self::finalize(state, &frame, &outcome)?;

        let gas_used = total_gas_used(intrinsic, &outcome);
        ctx.record_gas(gas_used);
        debug!(
            call_type = %ctx.call_type(),
            success = outcome.is_success(),
            gas_used,
            "Executed call"
        );
        let result = ProcessingResult::from_outcome(outcome, gas_used, BackendKind::Modularized);
        Ok(attach_trace(result, tracer))
    }

    fn execute_evm(
        &self,
        frame: EvmFrame,
        state: &mut dyn WorldState,
        tracer: Option<&mut OpcodeTracer>,
    ) -> Result<EvmOutcome, CallError> {
        let hook = tracer.map(|tracer| tracer as &mut dyn InstructionHook);
        Ok(self.evm.execute(frame, state, hook)?)
    }
}

impl<E: Evm> Executor for ModularizedExecutor<E> {
    fn kind(&self) -> BackendKind {
        BackendKind::Modularized
    }

    fn execute<L: HistoricalLedgerSource>(
        &self,
        ctx: &mut ExecutionContext<L>,
        params: &CallParameters,
    ) -> Result<ProcessingResult, CallError> {
        let result = self.run(ctx, params);
        if result.is_err() {
            ctx.abort();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_codes_map_to_call_errors() {
        let error: CallError = ResponseCode::PayerAccountDeleted(Address::ZERO).into();
        assert_eq!(error, CallError::InvalidSender(Address::ZERO));

        let error: CallError = ResponseCode::InsufficientGas { required: 2, provided: 1 }.into();
        assert_eq!(
            error,
            CallError::PreCheck(PreCheckReason::IntrinsicGasTooLow { required: 2, provided: 1 })
        );
        assert_eq!(ResponseCode::AccountDeleted(Address::ZERO).to_string(), "ACCOUNT_DELETED");
    }

    #[test]
    fn test_intrinsic_charges_init_code_words() {
        let params = CallParameters::create(Address::ZERO, vec![1u8; 64].into()).with_gas_limit(1);
        assert_eq!(
            ModularizedExecutor::<()>::charge_intrinsic(&params),
            Err(ResponseCode::InsufficientGas { required: 53_000 + 64 * 16 + 4, provided: 1 })
        );

        let params = params.with_gas_limit(100_000);
        assert_eq!(ModularizedExecutor::<()>::charge_intrinsic(&params), Ok(54_028));
    }
}

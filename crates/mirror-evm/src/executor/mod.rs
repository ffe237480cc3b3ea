//! The two interchangeable back-ends that drive the EVM for a call.

mod legacy;
mod modularized;
mod validation;

pub use legacy::*;
pub use modularized::*;
pub use validation::{init_code_cost, intrinsic_gas};

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};

use crate::{
    CallError, CallParameters, Evm, EvmConfig, ExecutionContext, HistoricalLedgerSource,
    OpcodeTracer, ProcessingResult,
};

/// Which back-end executes a call.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
    /// The monolithic in-process processor.
    #[default]
    #[display("legacy")]
    Legacy,
    /// The staged transaction executor.
    #[display("modularized")]
    Modularized,
}

/// A strategy for executing one call against an [`ExecutionContext`].
///
/// Implementations run the pre-checks, drive the [`Evm`] and build the [`ProcessingResult`].
/// Reverts and halts are reported through [`ProcessingResult::success`]; an `Err` means the
/// call never completed, and the context has been aborted.
pub trait Executor {
    /// Which back-end this is.
    fn kind(&self) -> BackendKind;

    /// Executes `params` in `ctx`.
    fn execute<L: HistoricalLedgerSource>(
        &self,
        ctx: &mut ExecutionContext<L>,
        params: &CallParameters,
    ) -> Result<ProcessingResult, CallError>;
}

/// One of the two back-ends, chosen per call.
#[derive(Debug, Clone)]
pub enum Backend<E> {
    /// The legacy processor.
    Legacy(LegacyProcessor<E>),
    /// The modularized executor.
    Modularized(ModularizedExecutor<E>),
}

impl<E: Evm> Backend<E> {
    /// Creates the back-end of the given kind.
    pub fn new(kind: BackendKind, evm: E, config: EvmConfig) -> Self {
        match kind {
            BackendKind::Legacy => Self::Legacy(LegacyProcessor::new(evm, config)),
            BackendKind::Modularized => Self::Modularized(ModularizedExecutor::new(evm, config)),
        }
    }
}

impl<E: Evm> Executor for Backend<E> {
    fn kind(&self) -> BackendKind {
        match self {
            Self::Legacy(processor) => processor.kind(),
            Self::Modularized(executor) => executor.kind(),
        }
    }

    fn execute<L: HistoricalLedgerSource>(
        &self,
        ctx: &mut ExecutionContext<L>,
        params: &CallParameters,
    ) -> Result<ProcessingResult, CallError> {
        match self {
            Self::Legacy(processor) => processor.execute(ctx, params),
            Self::Modularized(executor) => executor.execute(ctx, params),
        }
    }
}

/// Routes a share of the calls to the modularized executor.
///
/// The choice is a pure function of the call's identifying fields, gas limit excluded, so
/// every probe of one gas estimation lands on the same back-end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendRouter {
    modularized_percent: f64,
}

impl BackendRouter {
    /// Routes `modularized_percent` percent of the calls to the modularized executor.
    pub const fn new(modularized_percent: f64) -> Self {
        Self { modularized_percent }
    }

    /// Picks the back-end for `params`.
    pub fn route(&self, params: &CallParameters) -> BackendKind {
        if self.modularized_percent <= 0.0 {
            return BackendKind::Legacy;
        }
        if self.modularized_percent >= 100.0 {
            return BackendKind::Modularized;
        }
        let bucket = Self::bucket(params);
        if (bucket as f64) < self.modularized_percent * 100.0 {
            BackendKind::Modularized
        } else {
            BackendKind::Legacy
        }
    }

    /// Maps a call to one of 10 000 buckets.
    fn bucket(params: &CallParameters) -> u64 {
        let mut preimage = Vec::with_capacity(80 + params.call_data.len());
        preimage.extend_from_slice(params.block.to_string().as_bytes());
        preimage.extend_from_slice(params.sender.as_slice());
        match params.receiver {
            Some(receiver) => preimage.extend_from_slice(receiver.as_slice()),
            None => preimage.push(0),
        }
        preimage.extend_from_slice(&params.value.to_be_bytes::<32>());
        preimage.extend_from_slice(&params.call_data);
        let hash = keccak256(&preimage);
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash[..8]);
        u64::from_be_bytes(head) % 10_000
    }
}

impl From<&EvmConfig> for BackendRouter {
    fn from(config: &EvmConfig) -> Self {
        Self::new(config.modularized_traffic_percent)
    }
}

/// Creates the tracer requested by `ctx`, if any.
fn tracer_for<L>(ctx: &ExecutionContext<L>) -> Option<OpcodeTracer> {
    ctx.tracer_options().copied().map(OpcodeTracer::new)
}

/// Attaches the trace to `result`, making sure a failed call's last instruction carries the
/// failure reason.
fn attach_trace(result: ProcessingResult, tracer: Option<OpcodeTracer>) -> ProcessingResult {
    let Some(mut tracer) = tracer else {
        return result;
    };
    if let Some(reason) = result.failure_reason() {
        tracer.ensure_reason(reason);
    }
    result.with_opcodes(tracer.into_traces())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};

    #[test]
    fn test_route_extremes() {
        let params = CallParameters::call(Address::ZERO, Address::repeat_byte(1));
        assert_eq!(BackendRouter::new(0.0).route(&params), BackendKind::Legacy);
        assert_eq!(BackendRouter::new(100.0).route(&params), BackendKind::Modularized);
    }

    #[test]
    fn test_route_ignores_gas_limit() {
        let router = BackendRouter::new(50.0);
        for seed in 0u8..32 {
            let params = CallParameters::call(Address::repeat_byte(seed), Address::repeat_byte(1))
                .with_value(U256::from(seed));
            let kind = router.route(&params);
            for gas_limit in [21_000, 50_000, 1_000_000] {
                assert_eq!(router.route(&params.clone().with_gas_limit(gas_limit)), kind);
            }
        }
    }

    #[test]
    fn test_route_splits_traffic() {
        let router = BackendRouter::new(50.0);
        let modularized = (0u8..=255)
            .map(|seed| CallParameters::call(Address::repeat_byte(seed), Address::ZERO))
            .filter(|params| router.route(params) == BackendKind::Modularized)
            .count();
        assert!((64..=192).contains(&modularized), "modularized: {modularized}");
    }
}

use tracing::{debug, trace};

use crate::{CallError, EvmConfig, ProcessingResult};

/// Binary search for the smallest gas limit a call succeeds with.
///
/// Every probe is an independent execution of the call, with a fresh
/// [`ExecutionContext`](crate::ExecutionContext), at one gas limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasEstimator {
    min_gas: u64,
    max_iterations: u32,
    threshold_percent: f64,
}

impl GasEstimator {
    /// Creates an estimator that never returns less than `min_gas`, probes at most
    /// `max_iterations` times after the first probe, and stops early once the search window
    /// is narrower than `threshold_percent` of its lower bound. A zero threshold searches to
    /// the exact gas limit.
    pub const fn new(min_gas: u64, max_iterations: u32, threshold_percent: f64) -> Self {
        Self { min_gas, max_iterations, threshold_percent }
    }

    /// Estimates the gas `probe` needs, searching up to `max_gas`.
    ///
    /// A `max_gas` below the minimum fails without probing. Otherwise the result lies between
    /// the two.
    ///
    /// `probe` executes the call at the given gas limit. The first probe runs at `max_gas`;
    /// if it fails the estimate fails with [`CallError::EstimationFailed`]. Afterwards, reverts,
    /// halts and intrinsic gas rejections count as "not enough gas", while any other error
    /// ends the search and is returned as is.
    pub fn estimate<F>(&self, max_gas: u64, mut probe: F) -> Result<u64, CallError>
    where
        F: FnMut(u64) -> Result<ProcessingResult, CallError>,
    {
        if max_gas < self.min_gas {
            let reason = format!("gas limit {max_gas} is below the minimum of {}", self.min_gas);
            return Err(CallError::EstimationFailed { reason });
        }
        let gas_used = match probe(max_gas) {
            Ok(result) if result.success => result.gas_used,
            Ok(result) => {
                let reason = result.failure_reason().unwrap_or_else(|| "execution failed".into());
                return Err(CallError::EstimationFailed { reason });
            }
            Err(error) if error.is_gas_failure() => {
                return Err(CallError::EstimationFailed { reason: error.to_string() });
            }
            Err(error) => return Err(error),
        };

        // `hi` always succeeds, `lo` is known or assumed to fail.
        let mut hi = max_gas;
        let mut lo = self.min_gas.max(gas_used).saturating_sub(1).min(hi.saturating_sub(1));
        let mut iterations = 0;
        while lo + 1 < hi && iterations < self.max_iterations {
            if self.is_close_enough(lo, hi) {
                trace!(lo, hi, "Search window within threshold");
                break;
            }
            let mid = lo + (hi - lo) / 2;
            iterations += 1;
            match probe(mid) {
                Ok(result) if result.success => hi = mid,
                Ok(_) => lo = mid,
                Err(error) if error.is_gas_failure() => lo = mid,
                Err(error) => return Err(error),
            }
            trace!(iteration = iterations, mid, lo, hi, "Probed gas limit");
        }

        debug!(gas_used, estimate = hi, iterations, "Estimated gas");
        Ok(hi)
    }

    fn is_close_enough(&self, lo: u64, hi: u64) -> bool {
        self.threshold_percent > 0.0 &&
            lo > 0 &&
            (hi - lo) as f64 * 100.0 / (lo as f64) < self.threshold_percent
    }
}

impl From<&EvmConfig> for GasEstimator {
    fn from(config: &EvmConfig) -> Self {
        Self::new(
            config.min_gas_limit,
            config.max_gas_estimate_retries,
            config.estimate_gas_iteration_threshold_percent,
        )
    }
}

use serde::{Deserialize, Serialize};

use crate::constants::{estimate, gas, limits};

/// Errors reported by [`EvmConfig::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The minimum gas limit is above the maximum.
    #[error("minimum gas limit {min} exceeds maximum gas limit {max}")]
    GasBounds {
        /// Configured minimum.
        min: u64,
        /// Configured maximum.
        max: u64,
    },
    /// A percentage is outside of its accepted range.
    #[error("{name} must be within [0, {upper}], got {value}")]
    Percent {
        /// Name of the setting.
        name: &'static str,
        /// Configured value.
        value: f64,
        /// Inclusive upper bound.
        upper: f64,
    },
    /// The call depth limit is zero.
    #[error("max call depth must be positive")]
    CallDepth,
}

/// Configuration of the call simulation subsystem.
///
/// Deserializes from camelCase keys; any missing key takes its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvmConfig {
    /// Largest gas limit a call may request. Also the default upper bound of gas estimation.
    pub max_gas_limit: u64,
    /// Smallest gas limit the estimator will return.
    pub min_gas_limit: u64,
    /// Maximum call data size in bytes.
    pub max_data_size: usize,
    /// Maximum nesting depth of EVM calls.
    pub max_call_depth: usize,
    /// Share of calls, in percent, routed to the modularized executor.
    pub modularized_traffic_percent: f64,
    /// Cap on binary search probes during gas estimation.
    pub max_gas_estimate_retries: u32,
    /// Stop refining the estimate once two successive probes are closer than this share of
    /// the lower bound, in percent. Zero disables the early exit.
    pub estimate_gas_iteration_threshold_percent: f64,
    /// Accepted relative gas difference between back-ends, in percent.
    pub gas_tolerance_percent: f64,
}

impl Default for EvmConfig {
    fn default() -> Self {
        Self {
            max_gas_limit: gas::MAX_GAS_LIMIT,
            min_gas_limit: gas::MIN_GAS_LIMIT,
            max_data_size: limits::MAX_DATA_SIZE,
            max_call_depth: limits::MAX_CALL_DEPTH,
            modularized_traffic_percent: 0.0,
            max_gas_estimate_retries: estimate::MAX_GAS_ESTIMATE_RETRIES,
            estimate_gas_iteration_threshold_percent: estimate::ITERATION_THRESHOLD_PERCENT,
            gas_tolerance_percent: estimate::GAS_TOLERANCE_PERCENT,
        }
    }
}

impl EvmConfig {
    /// Sets the maximum gas limit.
    pub const fn with_max_gas_limit(mut self, max_gas_limit: u64) -> Self {
        self.max_gas_limit = max_gas_limit;
        self
    }

    /// Sets the minimum gas limit.
    pub const fn with_min_gas_limit(mut self, min_gas_limit: u64) -> Self {
        self.min_gas_limit = min_gas_limit;
        self
    }

    /// Sets the maximum call data size.
    pub const fn with_max_data_size(mut self, max_data_size: usize) -> Self {
        self.max_data_size = max_data_size;
        self
    }

    /// Sets the maximum call depth.
    pub const fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    /// Sets the share of calls routed to the modularized executor.
    pub const fn with_modularized_traffic_percent(mut self, percent: f64) -> Self {
        self.modularized_traffic_percent = percent;
        self
    }

    /// Sets the cap on estimation probes.
    pub const fn with_max_gas_estimate_retries(mut self, retries: u32) -> Self {
        self.max_gas_estimate_retries = retries;
        self
    }

    /// Sets the estimation early-exit threshold.
    pub const fn with_estimate_gas_iteration_threshold_percent(mut self, percent: f64) -> Self {
        self.estimate_gas_iteration_threshold_percent = percent;
        self
    }

    /// Sets the cross back-end gas tolerance.
    pub const fn with_gas_tolerance_percent(mut self, percent: f64) -> Self {
        self.gas_tolerance_percent = percent;
        self
    }

    /// Checks that every setting is within its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_gas_limit > self.max_gas_limit {
            return Err(ConfigError::GasBounds { min: self.min_gas_limit, max: self.max_gas_limit });
        }
        if self.max_call_depth == 0 {
            return Err(ConfigError::CallDepth);
        }
        check_percent("modularizedTrafficPercent", self.modularized_traffic_percent, 100.0)?;
        check_percent(
            "estimateGasIterationThresholdPercent",
            self.estimate_gas_iteration_threshold_percent,
            100.0,
        )?;
        check_percent("gasTolerancePercent", self.gas_tolerance_percent, 100.0)?;
        Ok(())
    }
}

fn check_percent(name: &'static str, value: f64, upper: f64) -> Result<(), ConfigError> {
    if !(0.0..=upper).contains(&value) {
        return Err(ConfigError::Percent { name, value, upper });
    }
    Ok(())
}

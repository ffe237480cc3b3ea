//! Constants shared by the executors, the estimator and the default configuration.

/// Gas limits and intrinsic gas schedule.
pub mod gas {
    /// Largest gas limit a simulated call may request.
    pub const MAX_GAS_LIMIT: u64 = 15_000_000;
    /// Smallest gas limit the estimator will return.
    pub const MIN_GAS_LIMIT: u64 = 21_000;
    /// Base cost of every transaction.
    pub const TX_BASE_COST: u64 = 21_000;
    /// Additional base cost of a contract creation.
    pub const TX_CREATE_COST: u64 = 32_000;
    /// Cost per zero byte of call data.
    pub const TX_DATA_ZERO_GAS: u64 = 4;
    /// Cost per non-zero byte of call data.
    pub const TX_DATA_NON_ZERO_GAS: u64 = 16;
    /// Cost per 32-byte word of init code (EIP-3860).
    pub const INIT_CODE_WORD_COST: u64 = 2;
}

/// Limits applied before a call reaches the EVM.
pub mod limits {
    /// Maximum call data size in bytes.
    pub const MAX_DATA_SIZE: usize = 128 * 1024;
    /// Maximum nesting depth of EVM calls.
    pub const MAX_CALL_DEPTH: usize = 1024;
}

/// Gas estimation defaults.
pub mod estimate {
    /// Number of binary search probes after the initial probe at the upper bound.
    pub const MAX_GAS_ESTIMATE_RETRIES: u32 = 32;
    /// Early-exit threshold, as a percentage of the lower bound. Zero means exact search.
    pub const ITERATION_THRESHOLD_PERCENT: f64 = 0.0;
    /// Accepted relative gas difference between the two back-ends, in percent.
    pub const GAS_TOLERANCE_PERCENT: f64 = 10.0;
}

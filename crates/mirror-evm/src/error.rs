use alloy_primitives::{Address, Bytes, U256};

use crate::{BlockSelector, EvmError, FrameError, LedgerError, ResolveError};

/// Why a call was rejected before reaching the EVM.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreCheckReason {
    /// The gas limit does not cover the intrinsic cost of the call.
    #[error("intrinsic gas too low: required {required}, provided {provided}")]
    IntrinsicGasTooLow {
        /// Intrinsic gas of the call.
        required: u64,
        /// Gas limit of the call.
        provided: u64,
    },
    /// The gas limit is above the configured maximum.
    #[error("gas limit {limit} exceeds maximum {max}")]
    GasLimitTooHigh {
        /// Gas limit of the call.
        limit: u64,
        /// Configured maximum.
        max: u64,
    },
    /// The sender cannot cover the value sent.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Value of the call.
        required: U256,
        /// Balance of the sender.
        available: U256,
    },
    /// The receiver has been deleted.
    #[error("receiver {0} has been deleted")]
    ReceiverDeleted(Address),
    /// A creation cannot bump the sender's nonce any further.
    #[error("nonce of {0} cannot be incremented")]
    NonceOverflow(Address),
    /// The call is not well formed.
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),
}

/// Failures of the infrastructure a call runs on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The state overlay failed.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The EVM failed.
    #[error(transparent)]
    Evm(#[from] EvmError),
}

/// Errors returned to the caller of a simulated call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The block selector does not address a known block.
    #[error("block not found: {0}")]
    BlockNotFound(BlockSelector),
    /// The sender does not exist or has been deleted.
    #[error("invalid sender {0}")]
    InvalidSender(Address),
    /// The call data is larger than allowed.
    #[error("payload of {size} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge {
        /// Size of the call data.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The call was rejected before execution.
    #[error("pre-check failed: {0}")]
    PreCheck(PreCheckReason),
    /// The EVM reverted.
    #[error("execution reverted: {reason}")]
    Revert {
        /// Decoded revert reason.
        reason: String,
        /// Raw revert payload.
        data: Bytes,
        /// Gas used up to the revert.
        gas_used: u64,
    },
    /// The EVM halted.
    #[error("execution halted: {reason}")]
    Halt {
        /// Description of the halt.
        reason: String,
        /// Gas used, which is the whole gas limit.
        gas_used: u64,
    },
    /// Gas estimation could not find a succeeding gas limit.
    #[error("gas estimation failed: {reason}")]
    EstimationFailed {
        /// Why the call fails at the largest allowed gas limit.
        reason: String,
    },
    /// The call ran past its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The infrastructure failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CallError {
    /// Whether the error is caused by the request rather than by the system.
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Backend(_) | Self::DeadlineExceeded)
    }

    /// Whether the call failed for lack of gas, or for a reason more gas could fix.
    pub(crate) const fn is_gas_failure(&self) -> bool {
        matches!(
            self,
            Self::Revert { .. } |
                Self::Halt { .. } |
                Self::PreCheck(PreCheckReason::IntrinsicGasTooLow { .. })
        )
    }
}

impl From<PreCheckReason> for CallError {
    fn from(reason: PreCheckReason) -> Self {
        Self::PreCheck(reason)
    }
}

impl From<ResolveError> for CallError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::BlockNotFound(selector) => Self::BlockNotFound(selector),
            ResolveError::Ledger(error) => error.into(),
        }
    }
}

impl From<LedgerError> for CallError {
    fn from(error: LedgerError) -> Self {
        Self::Backend(error.into())
    }
}

impl From<FrameError> for CallError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Ledger(error) => error.into(),
            FrameError::DeadlineExceeded => Self::DeadlineExceeded,
            error => Self::Backend(error.into()),
        }
    }
}

impl From<EvmError> for CallError {
    fn from(error: EvmError) -> Self {
        match error {
            EvmError::State(error) => error.into(),
            error => Self::Backend(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_conversion() {
        let error: CallError = ResolveError::BlockNotFound(BlockSelector::ByIndex(7)).into();
        assert_eq!(error, CallError::BlockNotFound(BlockSelector::ByIndex(7)));
        assert!(error.is_client_error());

        let error: CallError = ResolveError::Ledger(LedgerError::Unavailable("down".into())).into();
        assert!(matches!(error, CallError::Backend(BackendError::Ledger(_))));
        assert!(!error.is_client_error());
    }

    #[test]
    fn test_ledger_failures_unwrap_to_backend_ledger() {
        let ledger = LedgerError::Unavailable("timeout".into());
        let error: CallError = EvmError::State(FrameError::Ledger(ledger.clone())).into();
        assert_eq!(error, CallError::Backend(BackendError::Ledger(ledger)));

        let error: CallError = FrameError::DepthExceeded { max: 4 }.into();
        assert!(matches!(error, CallError::Backend(BackendError::Frame(_))));
    }

    #[test]
    fn test_deadline_surfaces_from_any_layer() {
        let error: CallError = FrameError::DeadlineExceeded.into();
        assert_eq!(error, CallError::DeadlineExceeded);
        let error: CallError = EvmError::State(FrameError::DeadlineExceeded).into();
        assert_eq!(error, CallError::DeadlineExceeded);
        assert!(!error.is_gas_failure());
    }

    #[test]
    fn test_gas_failures() {
        let revert =
            CallError::Revert { reason: "nope".into(), data: Bytes::new(), gas_used: 21_000 };
        assert!(revert.is_gas_failure());
        assert!(CallError::from(PreCheckReason::IntrinsicGasTooLow {
            required: 21_000,
            provided: 20_000
        })
        .is_gas_failure());
        assert!(!CallError::InvalidSender(Address::ZERO).is_gas_failure());
        assert_eq!(revert.to_string(), "execution reverted: nope");
    }
}

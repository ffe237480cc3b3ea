use alloy_primitives::{hex, Bytes};
use alloy_sol_types::{Panic, Revert, SolError};
use revm::context::result::{HaltReason, OutOfGasError};

use crate::{BackendKind, CallError, EvmOutcome, EvmStatus, OpcodeTrace};

/// The outcome of a simulated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    /// Whether the call succeeded.
    pub success: bool,
    /// Gas used, intrinsic gas included.
    pub gas_used: u64,
    /// Return data of a successful call, or the deployed code of a creation.
    pub output: Bytes,
    /// Raw revert payload, set when the call reverted.
    pub revert_reason: Option<Bytes>,
    /// Description of the halt, set when the call halted.
    pub halt_reason: Option<String>,
    /// The instruction log, set when a trace was requested.
    pub opcodes: Option<Vec<OpcodeTrace>>,
    /// The back-end that executed the call.
    pub backend: BackendKind,
}

impl ProcessingResult {
    /// Builds the result of an EVM outcome, with `gas_used` covering the whole call.
    pub fn from_outcome(outcome: EvmOutcome, gas_used: u64, backend: BackendKind) -> Self {
        let (success, output, revert_reason, halt_reason) = match outcome.status {
            EvmStatus::Success => (true, outcome.output, None, None),
            EvmStatus::Revert => (false, Bytes::new(), Some(outcome.output), None),
            EvmStatus::Halt(reason) => {
                (false, Bytes::new(), None, Some(halt_description(&reason)))
            }
        };
        Self { success, gas_used, output, revert_reason, halt_reason, opcodes: None, backend }
    }

    /// Attaches the instruction log.
    pub fn with_opcodes(mut self, opcodes: Vec<OpcodeTrace>) -> Self {
        self.opcodes = Some(opcodes);
        self
    }

    /// The revert payload decoded into a readable message.
    pub fn revert_reason_message(&self) -> Option<String> {
        self.revert_reason.as_ref().map(decode_revert_reason)
    }

    /// The failure description of an unsuccessful call: the decoded revert reason or the halt
    /// description.
    pub fn failure_reason(&self) -> Option<String> {
        self.revert_reason_message().or_else(|| self.halt_reason.clone())
    }

    /// Turns an unsuccessful result into the matching [`CallError`].
    pub fn into_result(self) -> Result<Self, CallError> {
        if self.success {
            return Ok(self);
        }
        match (self.revert_reason, self.halt_reason) {
            (Some(data), _) => Err(CallError::Revert {
                reason: decode_revert_reason(&data),
                data,
                gas_used: self.gas_used,
            }),
            (None, reason) => Err(CallError::Halt {
                reason: reason.unwrap_or_default(),
                gas_used: self.gas_used,
            }),
        }
    }

    /// Whether `other` reports the same outcome, with gas used differing by at most
    /// `tolerance_percent` of the larger of the two.
    pub fn is_equivalent(&self, other: &Self, tolerance_percent: f64) -> bool {
        self.success == other.success &&
            self.output == other.output &&
            self.revert_reason == other.revert_reason &&
            self.halt_reason == other.halt_reason &&
            gas_within_tolerance(self.gas_used, other.gas_used, tolerance_percent)
    }
}

fn gas_within_tolerance(a: u64, b: u64, tolerance_percent: f64) -> bool {
    let difference = a.abs_diff(b) as f64;
    difference <= a.max(b) as f64 * tolerance_percent / 100.0
}

/// Decodes a revert payload using alloy's built-in decoders.
///
/// Supports:
/// - `Error(string)` via `alloy_sol_types::Revert`, yielding the message itself
/// - `Panic(uint256)` via `alloy_sol_types::Panic`
/// - Raw hex fallback
pub fn decode_revert_reason(output: &Bytes) -> String {
    if output.is_empty() {
        return "(empty)".to_string();
    }

    if let Ok(revert) = Revert::abi_decode(output) {
        return revert.reason().to_string();
    }

    if let Ok(panic) = Panic::abi_decode(output) {
        return if let Some(kind) = panic.kind() {
            format!("Panic: {kind}")
        } else {
            format!("Panic(0x{:x})", panic.code)
        };
    }

    format!("0x{}", hex::encode(output))
}

/// Describes why the EVM halted.
pub fn halt_description(reason: &HaltReason) -> String {
    match reason {
        HaltReason::OutOfGas(OutOfGasError::Basic) => "out of gas".to_string(),
        HaltReason::OutOfGas(error) => format!("out of gas: {error:?}"),
        HaltReason::OpcodeNotFound | HaltReason::InvalidFEOpcode => "invalid opcode".to_string(),
        HaltReason::StackUnderflow => "stack underflow".to_string(),
        HaltReason::StackOverflow => "stack overflow".to_string(),
        HaltReason::CallTooDeep => "call depth limit reached".to_string(),
        reason => format!("{reason:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn reverted(payload: Bytes) -> ProcessingResult {
        ProcessingResult::from_outcome(
            EvmOutcome::revert(30_000, payload),
            51_000,
            BackendKind::Legacy,
        )
    }

    #[test]
    fn test_decode_error_string() {
        let payload = Bytes::from(Revert { reason: "insufficient funds".into() }.abi_encode());
        assert_eq!(decode_revert_reason(&payload), "insufficient funds");
        let message = reverted(payload).revert_reason_message();
        assert_eq!(message.as_deref(), Some("insufficient funds"));
    }

    #[test]
    fn test_decode_panic_and_raw() {
        let payload = Bytes::from(Panic { code: U256::from(0x11) }.abi_encode());
        assert!(decode_revert_reason(&payload).starts_with("Panic: "));
        assert_eq!(decode_revert_reason(&Bytes::from_static(&[0xde, 0xad])), "0xdead");
        assert_eq!(decode_revert_reason(&Bytes::new()), "(empty)");
    }

    #[test]
    fn test_into_result_maps_failures() {
        let payload = Bytes::from(Revert { reason: "nope".into() }.abi_encode());
        assert_eq!(
            reverted(payload.clone()).into_result(),
            Err(CallError::Revert { reason: "nope".into(), data: payload, gas_used: 51_000 })
        );

        let halted = ProcessingResult::from_outcome(
            EvmOutcome::halt(HaltReason::OutOfGas(OutOfGasError::Basic), 100),
            100,
            BackendKind::Modularized,
        );
        assert_eq!(halted.failure_reason().as_deref(), Some("out of gas"));
        assert!(matches!(halted.into_result(), Err(CallError::Halt { gas_used: 100, .. })));
    }

    #[test]
    fn test_equivalence_tolerates_gas_drift() {
        let a = ProcessingResult::from_outcome(
            EvmOutcome::success(0, Bytes::from_static(&[1])),
            100_000,
            BackendKind::Legacy,
        );
        let b =
            ProcessingResult { gas_used: 109_000, backend: BackendKind::Modularized, ..a.clone() };
        assert!(a.is_equivalent(&b, 10.0));
        assert!(!a.is_equivalent(&b, 5.0));

        let c = ProcessingResult { output: Bytes::from_static(&[2]), ..a.clone() };
        assert!(!a.is_equivalent(&c, 100.0));
    }
}

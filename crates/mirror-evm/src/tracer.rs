//! Instruction-level tracing of a simulated call.

use std::collections::BTreeMap;

use alloy_primitives::B256;
use revm::bytecode::OpCode;
use serde::{Deserialize, Serialize};

use crate::{
    decode_revert_reason, halt_description, EvmFrame, EvmOutcome, EvmStatus, InstructionHook,
    InstructionStep, WorldState,
};

/// Which snapshots an [`OpcodeTracer`] captures besides pc, opcode and gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpcodeTracerOptions {
    /// Capture the operand stack.
    pub stack: bool,
    /// Capture frame memory.
    pub memory: bool,
    /// Capture the storage slots written so far by the executing contract.
    pub storage: bool,
}

impl Default for OpcodeTracerOptions {
    fn default() -> Self {
        Self { stack: true, memory: false, storage: false }
    }
}

impl OpcodeTracerOptions {
    /// Captures every snapshot.
    pub const fn all() -> Self {
        Self { stack: true, memory: true, storage: true }
    }
}

/// One executed instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpcodeTrace {
    /// Program counter.
    pub pc: usize,
    /// Opcode mnemonic.
    pub op: String,
    /// Nesting depth of the executing frame.
    pub depth: usize,
    /// Gas left before the instruction.
    pub gas: u64,
    /// Gas the instruction costs.
    pub gas_cost: u64,
    /// Operand stack, bottom first.
    pub stack: Vec<B256>,
    /// Frame memory in 32-byte words.
    pub memory: Vec<B256>,
    /// Storage slots written so far by the executing contract.
    pub storage_diff: BTreeMap<B256, B256>,
    /// Why the frame failed, set on the last instruction of a reverted or halted frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Records a flat, depth-annotated log of every instruction of a call and its sub-calls.
#[derive(Debug, Clone, Default)]
pub struct OpcodeTracer {
    options: OpcodeTracerOptions,
    traces: Vec<OpcodeTrace>,
}

impl OpcodeTracer {
    /// Creates a tracer capturing the snapshots selected by `options`.
    pub const fn new(options: OpcodeTracerOptions) -> Self {
        Self { options, traces: Vec::new() }
    }

    /// The snapshots captured.
    pub const fn options(&self) -> &OpcodeTracerOptions {
        &self.options
    }

    /// Instructions recorded so far, in execution order.
    pub fn traces(&self) -> &[OpcodeTrace] {
        &self.traces
    }

    /// Consumes the tracer, returning the recorded instructions.
    pub fn into_traces(self) -> Vec<OpcodeTrace> {
        self.traces
    }

    /// Sets the failure reason of the last recorded instruction unless it already has one.
    pub fn ensure_reason(&mut self, reason: impl Into<String>) {
        if let Some(last) = self.traces.last_mut() {
            last.reason.get_or_insert_with(|| reason.into());
        }
    }
}

impl InstructionHook for OpcodeTracer {
    fn on_step(&mut self, step: &InstructionStep<'_>, state: &dyn WorldState) {
        let op = OpCode::new(step.opcode)
            .map_or_else(|| format!("0x{:02x}", step.opcode), |op| op.as_str().to_string());
        let stack = if self.options.stack {
            step.stack.iter().map(|word| B256::from(word.to_be_bytes::<32>())).collect()
        } else {
            Vec::new()
        };
        let memory = if self.options.memory {
            step.memory.chunks(32).map(B256::right_padding_from).collect()
        } else {
            Vec::new()
        };
        let storage_diff = if self.options.storage {
            state
                .storage_changes(step.address)
                .into_iter()
                .map(|(slot, value)| {
                    (B256::from(slot.to_be_bytes::<32>()), B256::from(value.to_be_bytes::<32>()))
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        self.traces.push(OpcodeTrace {
            pc: step.pc,
            op,
            depth: step.depth,
            gas: step.gas_remaining,
            gas_cost: step.gas_cost,
            stack,
            memory,
            storage_diff,
            reason: None,
        });
    }

    fn on_call_exit(&mut self, frame: &EvmFrame, outcome: &EvmOutcome) {
        let reason = match &outcome.status {
            EvmStatus::Success => return,
            EvmStatus::Revert => decode_revert_reason(&outcome.output),
            EvmStatus::Halt(reason) => halt_description(reason),
        };
        if let Some(last) = self.traces.last_mut().filter(|last| last.depth == frame.depth) {
            last.reason.get_or_insert(reason);
        }
    }
}

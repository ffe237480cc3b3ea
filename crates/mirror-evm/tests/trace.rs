//! Tests for opcode traces of calls with nested sub-calls.

mod common;

use alloy_primitives::{Address, B256, U256};
use common::{funded_ledger, latest_context, service, SENDER};
use mirror_evm::{
    revm::bytecode::opcode::SSTORE,
    test_utils::{BytecodeBuilder, MemoryLedger, MiniEvm},
    Backend, BackendKind, CallParameters, CallType, EvmConfig, Executor, OpcodeTrace,
    OpcodeTracerOptions, WorldState,
};

const X: Address = Address::repeat_byte(0x0a);
const Y: Address = Address::repeat_byte(0x0b);

/// X calls Y, stores the success flag of the call in slot 1 and 42 in slot 2. Y writes slot
/// 5 and reverts with a message.
fn ledger() -> MemoryLedger {
    let x = BytecodeBuilder::default()
        .call(Y, 100_000, 0u64)
        .push(1u64)
        .append(SSTORE)
        .sstore(2, 42u64)
        .stop()
        .build();
    let y = BytecodeBuilder::default().sstore(5, 99u64).revert_with_message("Y failed").build();
    funded_ledger().with_contract(X, x).with_contract(Y, y)
}

fn nested_range(opcodes: &[OpcodeTrace]) -> (usize, usize) {
    let first = opcodes.iter().position(|trace| trace.depth == 1).unwrap();
    let last = opcodes.iter().rposition(|trace| trace.depth == 1).unwrap();
    (first, last)
}

#[test]
fn test_reverted_sub_call_is_caught() {
    for kind in [BackendKind::Legacy, BackendKind::Modularized] {
        let mut ctx = latest_context(ledger(), CallType::DebugTrace)
            .with_tracer(OpcodeTracerOptions::all());
        let backend = Backend::new(kind, MiniEvm, EvmConfig::default());
        let result = backend.execute(&mut ctx, &CallParameters::call(SENDER, X)).unwrap();
        assert!(result.success, "{kind}");

        let state = ctx.frames_mut();
        assert_eq!(state.storage(Y, U256::from(5)).unwrap(), U256::ZERO, "{kind}");
        assert_eq!(state.storage(X, U256::from(1)).unwrap(), U256::ZERO, "{kind}");
        assert_eq!(state.storage(X, U256::from(2)).unwrap(), U256::from(42), "{kind}");

        let opcodes = result.opcodes.unwrap();
        let (first, last) = nested_range(&opcodes);
        assert_eq!(opcodes[0].depth, 0);
        assert_eq!(opcodes[first - 1].op, "CALL");
        assert!(opcodes[first..=last].iter().all(|trace| trace.depth == 1));
        assert_eq!(opcodes[last].op, "REVERT");
        assert_eq!(opcodes[last].reason.as_deref(), Some("Y failed"));
        assert_eq!(opcodes[last + 1].depth, 0);
        let mut outer = opcodes.iter().filter(|trace| trace.depth == 0);
        assert!(outer.all(|trace| trace.reason.is_none()));
    }
}

#[test]
fn test_storage_snapshots_follow_the_executing_contract() {
    let mut ctx =
        latest_context(ledger(), CallType::DebugTrace).with_tracer(OpcodeTracerOptions::all());
    let backend = Backend::new(BackendKind::Legacy, MiniEvm, EvmConfig::default());
    let result = backend.execute(&mut ctx, &CallParameters::call(SENDER, X)).unwrap();
    let opcodes = result.opcodes.unwrap();
    let (_, last) = nested_range(&opcodes);

    let slot = |n: u8| B256::with_last_byte(n);
    assert_eq!(opcodes[last].storage_diff.get(&slot(5)), Some(&slot(99)));
    assert!(opcodes[last + 1].storage_diff.is_empty());
    assert_eq!(opcodes.last().unwrap().storage_diff.get(&slot(2)), Some(&slot(42)));
}

#[test]
fn test_both_back_ends_record_the_same_trace() {
    let service = service(ledger(), EvmConfig::default());
    let params = CallParameters::call(SENDER, X).with_tracer(OpcodeTracerOptions::default());
    let legacy = service.execute_with(BackendKind::Legacy, &params).unwrap();
    let modularized = service.execute_with(BackendKind::Modularized, &params).unwrap();
    assert_eq!(legacy.opcodes, modularized.opcodes);
    assert!(legacy.is_equivalent(&modularized, 0.0));
}

#[test]
fn test_untraced_call_has_no_opcodes() {
    let service = service(ledger(), EvmConfig::default());
    let result = service.call(&CallParameters::call(SENDER, X)).unwrap();
    assert!(result.opcodes.is_none());
}

#[test]
fn test_top_level_halt_reason_lands_on_last_instruction() {
    let halting = Address::repeat_byte(0x0c);
    let code = BytecodeBuilder::default().push(1u64).invalid().build();
    let service = service(funded_ledger().with_contract(halting, code), EvmConfig::default());

    let params = CallParameters::call(SENDER, halting);
    let result = service.trace(&params, OpcodeTracerOptions::default()).unwrap();
    assert!(!result.success);
    let opcodes = result.opcodes.unwrap();
    assert_eq!(opcodes.len(), 2);
    assert_eq!(opcodes[1].op, "INVALID");
    assert_eq!(opcodes[1].reason.as_deref(), Some("invalid opcode"));
    assert_eq!(opcodes[1].stack, vec![B256::with_last_byte(1)]);
}

//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use mirror_evm::{
    test_utils::{BytecodeBuilder, MemoryLedger, MiniEvm},
    BlockResolver, BlockSelector, CallType, ContractCallService, EvmConfig, ExecutionContext,
    StackedStateFrames,
};
use tracing_subscriber::EnvFilter;

/// Account sending every call, funded with [`SENDER_BALANCE`].
pub const SENDER: Address = Address::repeat_byte(0xa0);
/// Balance of [`SENDER`].
pub const SENDER_BALANCE: u64 = 1_000;

/// Installs a log subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A ledger with two record files and a funded [`SENDER`].
pub fn funded_ledger() -> MemoryLedger {
    MemoryLedger::default()
        .with_block(0, 99)
        .with_block(100, 199)
        .with_account(SENDER, U256::from(SENDER_BALANCE))
}

/// Code that writes `value` into `slot` and stops.
pub fn store(slot: u64, value: u64) -> BytecodeBuilder {
    BytecodeBuilder::default().sstore(slot, value)
}

/// A service over `ledger` driving [`MiniEvm`].
pub fn service(
    ledger: MemoryLedger,
    config: EvmConfig,
) -> ContractCallService<MemoryLedger, MiniEvm> {
    init_tracing();
    ContractCallService::new(Arc::new(ledger), Arc::new(MiniEvm), config).unwrap()
}

/// A context over `ledger` at the latest block.
pub fn latest_context(
    ledger: MemoryLedger,
    call_type: CallType,
) -> ExecutionContext<MemoryLedger> {
    init_tracing();
    let interval = BlockResolver::new(&ledger).resolve(BlockSelector::Latest).unwrap();
    ExecutionContext::new(call_type, StackedStateFrames::new(ledger, interval))
}

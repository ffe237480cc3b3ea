//! Test utilities for the call simulation subsystem.

mod bytecode;
mod evm;
mod ledger;

pub use bytecode::*;
pub use evm::*;
pub use ledger::*;

//! Historical EVM call simulation for a ledger mirror.
//!
//! Calls are executed against the ledger state as it existed at a chosen block. A
//! [`BlockResolver`] turns a [`BlockSelector`] into a [`ValidityInterval`], and every call gets
//! its own [`ExecutionContext`] whose [`StackedStateFrames`] layer writes on top of the
//! read-only [`HistoricalLedgerSource`]. Nested calls push a layer, successful ones commit it
//! into their parent and reverted ones discard it, so nothing a call writes ever reaches the
//! ledger.
//!
//! Two back-ends drive the black-box [`Evm`]: the [`LegacyProcessor`] and the
//! [`ModularizedExecutor`]. The [`ContractCallService`] picks one per call, and the
//! [`GasEstimator`] and [`OpcodeTracer`] build on the same execution path.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod constants;

mod config;
pub use config::*;

mod error;
pub use error::*;

mod ledger;
pub use ledger::*;

mod block;
pub use block::*;

mod state;
pub use state::*;

mod evm;
pub use evm::*;

mod call;
pub use call::*;

mod context;
pub use context::*;

mod result;
pub use result::*;

mod tracer;
pub use tracer::*;

mod executor;
pub use executor::*;

mod estimate;
pub use estimate::*;

mod service;
pub use service::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the EVM stack so downstream black-box implementations use matching versions.
pub use alloy_primitives;
pub use revm;

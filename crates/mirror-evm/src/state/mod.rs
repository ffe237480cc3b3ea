//! The layered, copy-on-write view of ledger state that a simulated call reads and writes.

mod frame;
mod stack;
mod world;

pub use frame::*;
pub use stack::*;
pub use world::*;

pub(crate) use world::new_account;

use crate::LedgerError;

/// Errors raised by the state overlay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A read fell through to the ledger and the ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Entering a nested call would exceed the call depth limit.
    #[error("call depth limit of {max} exceeded")]
    DepthExceeded {
        /// The configured limit.
        max: usize,
    },
    /// The request deadline passed while the call was running.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The root layer cannot be committed or discarded.
    #[error("root state frame cannot be {0}")]
    RootFrame(&'static str),
}

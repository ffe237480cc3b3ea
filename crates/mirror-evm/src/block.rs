//! Block selectors and their resolution to validity intervals.

use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{HistoricalLedgerSource, LedgerError, RecordFile, Timestamp, ValidityInterval};

/// Which point of the ledger history a call runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockSelector {
    /// The first record file.
    Earliest,
    /// The newest record file, extended to the present.
    #[default]
    Latest,
    /// A record file by block number.
    ByIndex(u64),
    /// The record file containing a consensus timestamp.
    ByTimestamp(Timestamp),
}

impl fmt::Display for BlockSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => f.write_str("earliest"),
            Self::Latest => f.write_str("latest"),
            Self::ByIndex(index) => write!(f, "{index:#x}"),
            Self::ByTimestamp(timestamp) => write!(f, "timestamp {timestamp}"),
        }
    }
}

/// Error parsing a [`BlockSelector`] from a block tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid block tag: {0}")]
pub struct ParseBlockSelectorError(String);

impl FromStr for BlockSelector {
    type Err = ParseBlockSelectorError;

    /// Parses JSON-RPC style block tags. `pending`, `safe` and `finalized` all mean the latest
    /// block, since a mirror has no pending state.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        match tag.to_ascii_lowercase().as_str() {
            "earliest" => return Ok(Self::Earliest),
            "latest" | "pending" | "safe" | "finalized" => return Ok(Self::Latest),
            _ => {}
        }
        let index = match tag.strip_prefix("0x").or_else(|| tag.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => tag.parse::<u64>(),
        };
        index.map(Self::ByIndex).map_err(|_| ParseBlockSelectorError(s.to_string()))
    }
}

/// Errors raised while resolving a [`BlockSelector`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The selector addresses a block outside the known range.
    #[error("block not found: {0}")]
    BlockNotFound(BlockSelector),
    /// The ledger failed while looking the block up.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Maps block selectors to validity intervals.
///
/// Holds no state besides the ledger handle: "latest" is looked up again on every call since
/// new record files keep landing.
#[derive(Debug, Clone)]
pub struct BlockResolver<L> {
    ledger: L,
}

impl<L: HistoricalLedgerSource> BlockResolver<L> {
    /// Creates a resolver over `ledger`.
    pub const fn new(ledger: L) -> Self {
        Self { ledger }
    }

    /// Resolves `selector` to the validity interval of its record file. The latest record
    /// file's interval is extended to `+∞`.
    pub fn resolve(&self, selector: BlockSelector) -> Result<ValidityInterval, ResolveError> {
        let record = self.record_file(selector)?;
        let interval = match selector {
            BlockSelector::Latest => ValidityInterval::open_ended(record.consensus_start),
            _ => record.interval(),
        };
        trace!(%selector, block = record.index, %interval, "Resolved block selector");
        Ok(interval)
    }

    /// Resolves `selector` to its record file.
    pub fn record_file(&self, selector: BlockSelector) -> Result<RecordFile, ResolveError> {
        let record = match selector {
            BlockSelector::Latest => self.ledger.latest_record_file()?,
            BlockSelector::Earliest => self.ledger.earliest_record_file()?,
            BlockSelector::ByIndex(index) => self.ledger.record_file_by_index(index)?,
            BlockSelector::ByTimestamp(timestamp) => {
                self.ledger.record_file_by_timestamp(timestamp)?
            }
        };
        found(selector, record)
    }
}

fn found(selector: BlockSelector, record: Option<RecordFile>) -> Result<RecordFile, ResolveError> {
    record.ok_or(ResolveError::BlockNotFound(selector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_tags() {
        assert_eq!("earliest".parse(), Ok(BlockSelector::Earliest));
        assert_eq!("latest".parse(), Ok(BlockSelector::Latest));
        assert_eq!("Pending".parse(), Ok(BlockSelector::Latest));
        assert_eq!("finalized".parse(), Ok(BlockSelector::Latest));
        assert_eq!("0x1f".parse(), Ok(BlockSelector::ByIndex(31)));
        assert_eq!("42".parse(), Ok(BlockSelector::ByIndex(42)));
        assert!("0xzz".parse::<BlockSelector>().is_err());
        assert!("-1".parse::<BlockSelector>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let selector = BlockSelector::ByIndex(255);
        assert_eq!(selector.to_string(), "0xff");
        assert_eq!(selector.to_string().parse(), Ok(selector));
    }
}

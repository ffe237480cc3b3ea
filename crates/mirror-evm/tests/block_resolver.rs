//! Tests for resolving block selectors against the record files of a ledger.

use mirror_evm::{
    test_utils::MemoryLedger, BlockResolver, BlockSelector, LedgerError, ResolveError,
    ValidityInterval,
};

/// Eleven record files, indexes 0 to 10, each covering 100 ns of consensus time.
fn ledger() -> MemoryLedger {
    (0..=10u64).fold(MemoryLedger::default(), |ledger, index| {
        ledger.with_block(index * 100, index * 100 + 99)
    })
}

#[test]
fn test_by_index_is_monotonic() {
    let resolver = BlockResolver::new(ledger());
    for index in 0..10 {
        let current = resolver.resolve(BlockSelector::ByIndex(index)).unwrap();
        let next = resolver.resolve(BlockSelector::ByIndex(index + 1)).unwrap();
        assert!(current.start() < next.start());
        assert_eq!(current.end(), Some(next.start()));
    }
}

#[test]
fn test_index_past_the_latest_block_is_not_found() {
    let resolver = BlockResolver::new(ledger());
    assert_eq!(
        resolver.resolve(BlockSelector::ByIndex(999_999)),
        Err(ResolveError::BlockNotFound(BlockSelector::ByIndex(999_999)))
    );
}

#[test]
fn test_earliest_and_latest() {
    let resolver = BlockResolver::new(ledger());
    let earliest = resolver.resolve(BlockSelector::Earliest).unwrap();
    assert_eq!(earliest, ValidityInterval::bounded(0, 100).unwrap());

    let latest = resolver.resolve(BlockSelector::Latest).unwrap();
    assert!(latest.is_open_ended());
    assert_eq!(latest.start(), 1_000);
    assert_eq!(latest.read_timestamp(), None);
}

#[test]
fn test_by_timestamp_resolves_to_containing_block() {
    let resolver = BlockResolver::new(ledger());
    let interval = resolver.resolve(BlockSelector::ByTimestamp(450)).unwrap();
    assert_eq!(interval, ValidityInterval::bounded(400, 500).unwrap());
    assert!(interval.contains(450));

    let edge = resolver.resolve(BlockSelector::ByTimestamp(499)).unwrap();
    assert_eq!(edge, interval);
    assert!(matches!(
        resolver.resolve(BlockSelector::ByTimestamp(5_000)),
        Err(ResolveError::BlockNotFound(_))
    ));
}

#[test]
fn test_empty_ledger_has_no_blocks() {
    let resolver = BlockResolver::new(MemoryLedger::default());
    for selector in [
        BlockSelector::Earliest,
        BlockSelector::Latest,
        BlockSelector::ByIndex(0),
        BlockSelector::ByTimestamp(0),
    ] {
        assert_eq!(resolver.resolve(selector), Err(ResolveError::BlockNotFound(selector)));
    }
}

#[test]
fn test_ledger_failures_surface() {
    let resolver = BlockResolver::new(ledger().unavailable());
    assert!(matches!(
        resolver.resolve(BlockSelector::Latest),
        Err(ResolveError::Ledger(LedgerError::Unavailable(_)))
    ));
}

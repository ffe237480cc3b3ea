use std::{collections::BTreeMap, time::Instant};

use alloy_primitives::{Address, U256};
use tracing::trace;

use crate::{
    constants::limits::MAX_CALL_DEPTH, ContractStorage, Entry, FrameError, HistoricalLedgerSource,
    LayerId, StateFrame, StateKind, ValidityInterval,
};

/// A position in the call hierarchy, taken with [`StackedStateFrames::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint(usize);

/// The layered read/write view of ledger state for one top-level call.
///
/// Layer `0` belongs to the top-level call and every nested call pushes one more layer. Reads
/// walk from the top layer down to layer `0` and then fall through to the ledger at the bound
/// [`ValidityInterval`]. Writes always land in the top layer. Layers live in an arena indexed
/// by [`LayerId`] and only ever grow or shrink at the top, so discarding a nested call is a
/// truncation.
///
/// Ledger answers are memoized in a cache below layer `0`. The cache never holds writes, so
/// it is not affected by commits or discards.
///
/// An optional deadline cuts the call off while it runs: once it has passed, entering a
/// nested call or reading from the ledger fails with [`FrameError::DeadlineExceeded`].
#[derive(Debug)]
pub struct StackedStateFrames<L> {
    ledger: L,
    interval: ValidityInterval,
    root: StateFrame,
    nested: Vec<StateFrame>,
    ledger_cache: StateFrame,
    max_call_depth: usize,
    deadline: Option<Instant>,
}

impl<L> StackedStateFrames<L> {
    /// Creates a stack holding an empty root layer over `ledger` at `interval`.
    pub fn new(ledger: L, interval: ValidityInterval) -> Self {
        Self::with_max_call_depth(ledger, interval, MAX_CALL_DEPTH)
    }

    /// Creates a stack that allows at most `max_call_depth` nested layers above the root.
    pub fn with_max_call_depth(
        ledger: L,
        interval: ValidityInterval,
        max_call_depth: usize,
    ) -> Self {
        Self {
            ledger,
            interval,
            root: StateFrame::new(0, None),
            nested: Vec::new(),
            ledger_cache: StateFrame::default(),
            max_call_depth,
            deadline: None,
        }
    }

    /// Stops nested calls and ledger reads once `deadline` has passed.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// The deadline, if one is set.
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails with [`FrameError::DeadlineExceeded`] once the deadline has passed.
    pub fn check_deadline(&self) -> Result<(), FrameError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(FrameError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// The interval ledger reads are bound to.
    pub const fn interval(&self) -> &ValidityInterval {
        &self.interval
    }

    /// The backing ledger.
    pub const fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Number of layers, including the root.
    pub fn depth(&self) -> usize {
        self.nested.len() + 1
    }

    /// Number of nested layers above the root.
    pub fn call_depth(&self) -> usize {
        self.nested.len()
    }

    /// The current read/write layer.
    pub fn top(&self) -> &StateFrame {
        self.nested.last().unwrap_or(&self.root)
    }

    /// Mutable access to the current read/write layer.
    pub fn top_mut(&mut self) -> &mut StateFrame {
        self.nested.last_mut().unwrap_or(&mut self.root)
    }

    /// The layer with the given id, if it is on the stack.
    pub fn layer(&self, id: LayerId) -> Option<&StateFrame> {
        match id {
            0 => Some(&self.root),
            id => self.nested.get(id - 1),
        }
    }

    /// Enters a nested call: pushes an empty layer whose parent is the current top.
    pub fn push(&mut self) -> Result<&mut StateFrame, FrameError> {
        self.check_deadline()?;
        if self.nested.len() >= self.max_call_depth {
            return Err(FrameError::DepthExceeded { max: self.max_call_depth });
        }
        let parent = self.top().layer_id();
        self.nested.push(StateFrame::new(parent + 1, Some(parent)));
        trace!(layer = parent + 1, "Pushed state frame");
        Ok(self.top_mut())
    }

    /// Leaves a nested call that succeeded: merges the top layer into its parent.
    pub fn commit_top(&mut self) -> Result<(), FrameError> {
        let child = self.nested.pop().ok_or(FrameError::RootFrame("committed"))?;
        trace!(layer = child.layer_id(), records = child.len(), "Committed state frame");
        self.top_mut().merge_from(child);
        Ok(())
    }

    /// Leaves a nested call that reverted: drops the top layer and all of its writes.
    pub fn discard_top(&mut self) -> Result<(), FrameError> {
        let child = self.nested.pop().ok_or(FrameError::RootFrame("discarded"))?;
        trace!(layer = child.layer_id(), records = child.len(), "Discarded state frame");
        Ok(())
    }

    /// Marks the current position in the call hierarchy.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.nested.len())
    }

    /// Discards, without merging, every layer pushed after `checkpoint`.
    pub fn revert_to(&mut self, checkpoint: Checkpoint) {
        self.nested.truncate(checkpoint.0);
    }

    /// Discards every layer above the root without merging. Returns how many were dropped.
    pub fn discard_above_root(&mut self) -> usize {
        let dropped = self.nested.len();
        self.nested.clear();
        dropped
    }

    /// Discards all writes, including those of the root layer.
    pub fn reset(&mut self) {
        self.nested.clear();
        self.root.clear();
    }

    /// Writes `value` for `key` into the top layer.
    pub fn set<K: StateKind>(&mut self, key: K::Key, value: K::Value) {
        self.top_mut().insert::<K>(key, Entry::Present(value));
    }

    /// Records a tombstone for `key` in the top layer.
    pub fn delete<K: StateKind>(&mut self, key: K::Key) {
        self.top_mut().insert::<K>(key, Entry::Deleted);
    }

    /// Looks `key` up in the layers only, without touching the ledger. `None` when no layer
    /// knows the key.
    pub fn peek<K: StateKind>(&self, key: &K::Key) -> Option<Entry<K::Value>> {
        self.layers_top_down().find_map(|layer| match layer.get::<K>(key) {
            Some(Entry::NotFound) | None => None,
            Some(entry) => Some(entry.clone()),
        })
    }

    /// Storage slots written for `address` by the calls on the stack, with later layers
    /// winning. Deleted slots read as zero.
    pub fn storage_changes(&self, address: Address) -> BTreeMap<U256, U256> {
        let mut changes = BTreeMap::new();
        for layer in core::iter::once(&self.root).chain(&self.nested) {
            for ((contract, slot), entry) in layer.iter::<ContractStorage>() {
                if *contract == address {
                    changes.insert(*slot, entry.as_present().copied().unwrap_or_default());
                }
            }
        }
        changes
    }

    fn layers_top_down(&self) -> impl Iterator<Item = &StateFrame> {
        self.nested.iter().rev().chain(core::iter::once(&self.root))
    }
}

impl<L: HistoricalLedgerSource> StackedStateFrames<L> {
    /// Reads `key` through the layers and, on a miss, from the ledger.
    ///
    /// The first layer that holds a value or a tombstone answers. Ledger answers are memoized
    /// below the root layer, which does not change what later reads observe.
    pub fn get<K: StateKind>(&mut self, key: &K::Key) -> Result<Entry<K::Value>, FrameError> {
        if let Some(entry) = self.peek::<K>(key) {
            return Ok(entry);
        }
        if let Some(entry) = self.ledger_cache.get::<K>(key) {
            return Ok(entry.clone());
        }
        self.check_deadline()?;
        let entry = K::load(&self.ledger, key, &self.interval)?;
        trace!(kind = ?K::KIND, ?key, ?entry, "Loaded from ledger");
        self.ledger_cache.insert::<K>(key.clone(), entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::MemoryLedger, AccountBalances, ContractCode};
    use alloy_primitives::Bytes;

    const ACCOUNT: Address = Address::repeat_byte(0x11);

    fn frames() -> StackedStateFrames<MemoryLedger> {
        let ledger = MemoryLedger::default()
            .with_block(0, 99)
            .with_account(ACCOUNT, U256::from(100))
            .with_storage(ACCOUNT, U256::from(1), U256::from(10));
        StackedStateFrames::with_max_call_depth(ledger, ValidityInterval::open_ended(0), 2)
    }

    #[test]
    fn test_reads_fall_through_to_ledger() {
        let mut frames = frames();
        assert_eq!(frames.get::<AccountBalances>(&ACCOUNT), Ok(Entry::Present(U256::from(100))));
        assert_eq!(
            frames.get::<AccountBalances>(&Address::repeat_byte(0x99)),
            Ok(Entry::NotFound)
        );
        assert!(frames.top().is_empty());
    }

    #[test]
    fn test_ledger_answers_are_memoized() {
        let mut frames = frames();
        let key = (ACCOUNT, U256::from(1));
        let first = frames.get::<ContractStorage>(&key).unwrap();
        let reads = frames.ledger().reads();
        let second = frames.get::<ContractStorage>(&key).unwrap();
        assert_eq!(first, second);
        assert_eq!(frames.ledger().reads(), reads);
    }

    #[test]
    fn test_discard_restores_parent_view() {
        let mut frames = frames();
        frames.push().unwrap();
        frames.set::<AccountBalances>(ACCOUNT, U256::from(1));
        frames.delete::<ContractStorage>((ACCOUNT, U256::from(1)));
        assert_eq!(frames.get::<ContractStorage>(&(ACCOUNT, U256::from(1))), Ok(Entry::Deleted));

        frames.discard_top().unwrap();
        assert_eq!(frames.get::<AccountBalances>(&ACCOUNT), Ok(Entry::Present(U256::from(100))));
        assert_eq!(
            frames.get::<ContractStorage>(&(ACCOUNT, U256::from(1))),
            Ok(Entry::Present(U256::from(10)))
        );
    }

    #[test]
    fn test_commit_merges_into_parent() {
        let mut frames = frames();
        frames.push().unwrap();
        frames.push().unwrap();
        assert_eq!(frames.top().layer_id(), 2);
        assert_eq!(frames.top().parent(), Some(1));
        frames.set::<ContractCode>(ACCOUNT, Bytes::from_static(&[0x00]));
        frames.commit_top().unwrap();

        assert_eq!(frames.top().layer_id(), 1);
        assert!(frames.top().get::<ContractCode>(&ACCOUNT).is_some());
        frames.commit_top().unwrap();
        assert_eq!(frames.depth(), 1);
        assert_eq!(frames.layer(0).map(StateFrame::len), Some(1));
    }

    #[test]
    fn test_root_cannot_be_popped() {
        let mut frames = frames();
        assert_eq!(frames.commit_top(), Err(FrameError::RootFrame("committed")));
        assert_eq!(frames.discard_top(), Err(FrameError::RootFrame("discarded")));
    }

    #[test]
    fn test_depth_limit() {
        let mut frames = frames();
        frames.push().unwrap();
        frames.push().unwrap();
        assert_eq!(frames.push().map(|_| ()), Err(FrameError::DepthExceeded { max: 2 }));
        assert_eq!(frames.discard_above_root(), 2);
        assert_eq!(frames.depth(), 1);
    }

    #[test]
    fn test_expired_deadline_stops_calls_and_ledger_reads() {
        let mut frames = frames();
        frames.set::<AccountBalances>(ACCOUNT, U256::from(3));
        frames.set_deadline(Instant::now());

        assert_eq!(frames.push().map(|_| ()), Err(FrameError::DeadlineExceeded));
        assert_eq!(frames.get::<AccountBalances>(&ACCOUNT), Ok(Entry::Present(U256::from(3))));
        assert_eq!(
            frames.get::<ContractStorage>(&(ACCOUNT, U256::from(1))),
            Err(FrameError::DeadlineExceeded)
        );
        assert_eq!(frames.ledger().reads(), 0);
    }

    #[test]
    fn test_revert_to_checkpoint() {
        let mut frames = frames();
        frames.set::<AccountBalances>(ACCOUNT, U256::from(7));
        let checkpoint = frames.checkpoint();
        frames.push().unwrap();
        frames.set::<AccountBalances>(ACCOUNT, U256::from(8));
        frames.revert_to(checkpoint);

        assert_eq!(frames.depth(), 1);
        assert_eq!(frames.peek::<AccountBalances>(&ACCOUNT), Some(Entry::Present(U256::from(7))));
        frames.reset();
        assert_eq!(frames.peek::<AccountBalances>(&ACCOUNT), None);
    }

    #[test]
    fn test_storage_changes_prefer_inner_layers() {
        let mut frames = frames();
        frames.set::<ContractStorage>((ACCOUNT, U256::from(1)), U256::from(1));
        frames.set::<ContractStorage>((ACCOUNT, U256::from(2)), U256::from(2));
        frames.push().unwrap();
        frames.set::<ContractStorage>((ACCOUNT, U256::from(2)), U256::from(3));
        frames.delete::<ContractStorage>((ACCOUNT, U256::from(1)));
        frames.set::<ContractStorage>((Address::ZERO, U256::from(1)), U256::from(4));

        let changes = frames.storage_changes(ACCOUNT);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[&U256::from(1)], U256::ZERO);
        assert_eq!(changes[&U256::from(2)], U256::from(3));
    }
}

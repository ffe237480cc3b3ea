use core::hash::Hash;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use alloy_primitives::{keccak256, map::HashMap, Address, Bytes, U256};

use crate::{
    state::new_account, CustomFee, Entity, EntityType, Entry, HistoricalLedgerSource,
    LedgerError, RecordFile, Timestamp, TokenRelationship, ValidityInterval,
};

/// Versions of one ledger record, ordered by the timestamp they became valid at. `None`
/// marks a deletion.
type Versions<V> = Vec<(Timestamp, Option<V>)>;

/// An in-memory, time-indexed ledger for testing purposes.
///
/// Records added without a timestamp are valid from timestamp `0`. Lookups return the last
/// version valid at the interval's read timestamp. Clones share the read counter.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    record_files: Vec<RecordFile>,
    entities: HashMap<Address, Versions<Entity>>,
    balances: HashMap<Address, Versions<U256>>,
    token_balances: HashMap<(Address, Address), Versions<U256>>,
    token_relationships: HashMap<(Address, Address), Versions<TokenRelationship>>,
    bytecode: HashMap<Address, Versions<Bytes>>,
    storage: HashMap<(Address, U256), Versions<U256>>,
    custom_fees: HashMap<Address, Versions<Vec<CustomFee>>>,
    unavailable: bool,
    read_delay: Option<Duration>,
    reads: Arc<AtomicUsize>,
}

impl MemoryLedger {
    /// Appends a record file covering `[consensus_start, consensus_end]`. Its index is the
    /// number of record files added before it.
    pub fn with_block(mut self, consensus_start: Timestamp, consensus_end: Timestamp) -> Self {
        let index = self.record_files.len() as u64;
        self.record_files.push(RecordFile {
            index,
            consensus_start,
            consensus_end,
            hash: keccak256(index.to_be_bytes()),
        });
        self
    }

    /// Adds an entity under `address`.
    pub fn with_entity(mut self, address: Address, entity: Entity) -> Self {
        insert_version(&mut self.entities, address, 0, Some(entity));
        self
    }

    /// Adds an account holding `balance`.
    pub fn with_account(self, address: Address, balance: U256) -> Self {
        self.with_entity(address, new_account(address)).with_balance_at(address, 0, balance)
    }

    /// Adds a contract with runtime `code`.
    pub fn with_contract(mut self, address: Address, code: impl Into<Bytes>) -> Self {
        let entity = Entity { entity_type: EntityType::Contract, ..new_account(address) };
        insert_version(&mut self.bytecode, address, 0, Some(code.into()));
        self.with_entity(address, entity.with_nonce(1))
    }

    /// Sets one storage slot of `address`.
    pub fn with_storage(self, address: Address, slot: U256, value: U256) -> Self {
        self.with_storage_at(address, slot, 0, value)
    }

    /// Sets the balance of `address` from `timestamp` on.
    pub fn with_balance_at(
        mut self,
        address: Address,
        timestamp: Timestamp,
        balance: U256,
    ) -> Self {
        insert_version(&mut self.balances, address, timestamp, Some(balance));
        self
    }

    /// Sets one storage slot of `address` from `timestamp` on.
    pub fn with_storage_at(
        mut self,
        address: Address,
        slot: U256,
        timestamp: Timestamp,
        value: U256,
    ) -> Self {
        insert_version(&mut self.storage, (address, slot), timestamp, Some(value));
        self
    }

    /// Deletes the entity under `address` from `timestamp` on.
    pub fn with_deleted_entity_at(mut self, address: Address, timestamp: Timestamp) -> Self {
        insert_version(&mut self.entities, address, timestamp, None);
        self
    }

    /// Sets the balance `account` holds of `token`.
    pub fn with_token_balance(mut self, token: Address, account: Address, balance: U256) -> Self {
        insert_version(&mut self.token_balances, (token, account), 0, Some(balance));
        self
    }

    /// Adds a token relationship.
    pub fn with_token_relationship(mut self, relationship: TokenRelationship) -> Self {
        let key = (relationship.token, relationship.account);
        insert_version(&mut self.token_relationships, key, 0, Some(relationship));
        self
    }

    /// Sets the custom fee schedule of `token`.
    pub fn with_custom_fees(mut self, token: Address, fees: Vec<CustomFee>) -> Self {
        insert_version(&mut self.custom_fees, token, 0, Some(fees));
        self
    }

    /// Makes every lookup fail with [`LedgerError::Unavailable`].
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Makes every record lookup take at least `delay`, like a ledger behind a slow link.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Number of record lookups answered so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable {
            return Err(LedgerError::Unavailable("memory ledger is offline".to_string()));
        }
        Ok(())
    }

    fn lookup<K, V>(
        &self,
        records: &HashMap<K, Versions<V>>,
        key: &K,
        interval: &ValidityInterval,
    ) -> Result<Entry<V>, LedgerError>
    where
        K: Eq + Hash,
        V: Clone,
    {
        self.check_available()?;
        if let Some(delay) = self.read_delay {
            thread::sleep(delay);
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        let at = interval.read_timestamp().unwrap_or(Timestamp::MAX);
        let version = records
            .get(key)
            .and_then(|versions| versions.iter().rev().find(|(from, _)| *from <= at));
        Ok(match version {
            Some((_, Some(value))) => Entry::Present(value.clone()),
            Some((_, None)) => Entry::Deleted,
            None => Entry::NotFound,
        })
    }
}

fn insert_version<K: Eq + Hash, V>(
    records: &mut HashMap<K, Versions<V>>,
    key: K,
    timestamp: Timestamp,
    value: Option<V>,
) {
    let versions = records.entry(key).or_default();
    let position = versions.partition_point(|(from, _)| *from <= timestamp);
    versions.insert(position, (timestamp, value));
}

impl HistoricalLedgerSource for MemoryLedger {
    fn entity(
        &self,
        address: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<Entity>, LedgerError> {
        self.lookup(&self.entities, &address, interval)
    }

    fn account_balance(
        &self,
        address: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<U256>, LedgerError> {
        self.lookup(&self.balances, &address, interval)
    }

    fn token_balance(
        &self,
        token: Address,
        account: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<U256>, LedgerError> {
        self.lookup(&self.token_balances, &(token, account), interval)
    }

    fn token_relationship(
        &self,
        token: Address,
        account: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<TokenRelationship>, LedgerError> {
        self.lookup(&self.token_relationships, &(token, account), interval)
    }

    fn contract_bytecode(
        &self,
        address: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<Bytes>, LedgerError> {
        self.lookup(&self.bytecode, &address, interval)
    }

    fn contract_storage(
        &self,
        address: Address,
        slot: U256,
        interval: &ValidityInterval,
    ) -> Result<Entry<U256>, LedgerError> {
        self.lookup(&self.storage, &(address, slot), interval)
    }

    fn custom_fees(
        &self,
        token: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<Vec<CustomFee>>, LedgerError> {
        self.lookup(&self.custom_fees, &token, interval)
    }

    fn earliest_record_file(&self) -> Result<Option<RecordFile>, LedgerError> {
        self.check_available()?;
        Ok(self.record_files.first().copied())
    }

    fn latest_record_file(&self) -> Result<Option<RecordFile>, LedgerError> {
        self.check_available()?;
        Ok(self.record_files.last().copied())
    }

    fn record_file_by_index(&self, index: u64) -> Result<Option<RecordFile>, LedgerError> {
        self.check_available()?;
        Ok(self.record_files.iter().find(|record| record.index == index).copied())
    }

    fn record_file_by_timestamp(
        &self,
        timestamp: Timestamp,
    ) -> Result<Option<RecordFile>, LedgerError> {
        self.check_available()?;
        Ok(self.record_files.iter().find(|record| record.contains(timestamp)).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: Address = Address::repeat_byte(0x42);

    #[test]
    fn test_lookup_returns_version_valid_at_interval_end() {
        let ledger = MemoryLedger::default()
            .with_account(ACCOUNT, U256::from(1))
            .with_balance_at(ACCOUNT, 200, U256::from(3))
            .with_balance_at(ACCOUNT, 100, U256::from(2));

        let at = |start, end| ValidityInterval::bounded(start, end).unwrap();
        assert_eq!(ledger.account_balance(ACCOUNT, &at(0, 100)), Ok(Entry::Present(U256::from(1))));
        assert_eq!(ledger.account_balance(ACCOUNT, &at(0, 101)), Ok(Entry::Present(U256::from(2))));
        assert_eq!(
            ledger.account_balance(ACCOUNT, &ValidityInterval::open_ended(0)),
            Ok(Entry::Present(U256::from(3)))
        );
        assert_eq!(ledger.reads(), 3);
    }

    #[test]
    fn test_deleted_entity_is_a_tombstone() {
        let ledger = MemoryLedger::default()
            .with_account(ACCOUNT, U256::ZERO)
            .with_deleted_entity_at(ACCOUNT, 50);
        let before = ValidityInterval::bounded(0, 50).unwrap();
        assert!(ledger.entity(ACCOUNT, &before).unwrap().is_present());
        assert_eq!(ledger.entity(ACCOUNT, &ValidityInterval::open_ended(0)), Ok(Entry::Deleted));
        assert_eq!(
            ledger.entity(Address::ZERO, &ValidityInterval::open_ended(0)),
            Ok(Entry::NotFound)
        );
    }

    #[test]
    fn test_record_files() {
        let ledger = MemoryLedger::default().with_block(0, 99).with_block(100, 199);
        assert_eq!(ledger.earliest_record_file().unwrap().map(|r| r.index), Some(0));
        assert_eq!(ledger.latest_record_file().unwrap().map(|r| r.index), Some(1));
        assert_eq!(ledger.record_file_by_timestamp(150).unwrap().map(|r| r.index), Some(1));
        assert_eq!(ledger.record_file_by_timestamp(200).unwrap(), None);
        assert!(!ledger.record_file_by_index(0).unwrap().unwrap().hash.is_zero());
    }

    #[test]
    fn test_unavailable_ledger_fails_every_lookup() {
        let ledger = MemoryLedger::default().with_block(0, 99).unavailable();
        assert!(matches!(ledger.latest_record_file(), Err(LedgerError::Unavailable(_))));
        assert!(matches!(
            ledger.entity(ACCOUNT, &ValidityInterval::open_ended(0)),
            Err(LedgerError::Unavailable(_))
        ));
    }
}

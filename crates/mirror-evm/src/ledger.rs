//! The read-only, time-indexed ledger that backs every simulated call.

use core::fmt;

use alloy_primitives::{Address, Bytes, B256, U256};
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

/// Consensus timestamp in nanoseconds since the epoch.
pub type Timestamp = u64;

/// A half-open range of consensus time, `[start, end)`.
///
/// `end == None` stands for `+∞`, the open interval of the latest block: reads against it see
/// the current state of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityInterval {
    start: Timestamp,
    end: Option<Timestamp>,
}

impl ValidityInterval {
    /// Creates the bounded interval `[start, end)`. Returns `None` unless `start < end`.
    pub const fn bounded(start: Timestamp, end: Timestamp) -> Option<Self> {
        if start < end {
            Some(Self { start, end: Some(end) })
        } else {
            None
        }
    }

    /// Creates the interval `[start, +∞)`.
    pub const fn open_ended(start: Timestamp) -> Self {
        Self { start, end: None }
    }

    /// Inclusive start of the interval.
    pub const fn start(&self) -> Timestamp {
        self.start
    }

    /// Exclusive end of the interval, `None` when open-ended.
    pub const fn end(&self) -> Option<Timestamp> {
        self.end
    }

    /// Whether the interval extends to `+∞`.
    pub const fn is_open_ended(&self) -> bool {
        self.end.is_none()
    }

    /// Whether `timestamp` falls inside the interval.
    pub const fn contains(&self, timestamp: Timestamp) -> bool {
        match self.end {
            Some(end) => self.start <= timestamp && timestamp < end,
            None => self.start <= timestamp,
        }
    }

    /// The last instant covered by the interval. Ledger reads return the values valid at this
    /// instant. `None` means "current state".
    pub const fn read_timestamp(&self) -> Option<Timestamp> {
        match self.end {
            Some(end) => Some(end - 1),
            None => None,
        }
    }
}

impl fmt::Display for ValidityInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, +inf)", self.start),
        }
    }
}

/// Result of looking a key up in a state layer or in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry<V> {
    /// The key holds a value.
    Present(V),
    /// The key existed and has been deleted. Masks older values.
    Deleted,
    /// The key has never held a value.
    NotFound,
}

impl<V> Entry<V> {
    /// Returns the value if present.
    pub fn present(self) -> Option<V> {
        match self {
            Self::Present(value) => Some(value),
            Self::Deleted | Self::NotFound => None,
        }
    }

    /// Returns a reference to the value if present.
    pub const fn as_present(&self) -> Option<&V> {
        match self {
            Self::Present(value) => Some(value),
            Self::Deleted | Self::NotFound => None,
        }
    }

    /// Whether the entry holds a value.
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Whether the entry is a tombstone.
    pub const fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Maps the contained value.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Entry<U> {
        match self {
            Self::Present(value) => Entry::Present(f(value)),
            Self::Deleted => Entry::Deleted,
            Self::NotFound => Entry::NotFound,
        }
    }
}

impl<V> From<Option<V>> for Entry<V> {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::NotFound, Self::Present)
    }
}

/// The ledger record families the overlay tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Accounts, contracts and tokens.
    Entity,
    /// Native balance of an account.
    AccountBalance,
    /// Fungible token balance of an account.
    TokenBalance,
    /// Association of an account with a token.
    TokenRelationship,
    /// Runtime bytecode of a contract.
    ContractBytecode,
    /// A single contract storage slot.
    ContractStorage,
    /// Custom fee schedule of a token.
    CustomFees,
}

/// `shard.realm.num` identifier of a ledger entity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntityId {
    /// Shard number.
    pub shard: u64,
    /// Realm number.
    pub realm: u64,
    /// Entity number.
    pub num: u64,
}

impl EntityId {
    /// Creates an entity id.
    pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }

    /// The "long-zero" EVM address of the entity: 4 bytes shard, 8 bytes realm, 8 bytes num.
    pub fn to_address(&self) -> Address {
        let mut bytes = [0u8; 20];
        bytes[..4].copy_from_slice(&(self.shard as u32).to_be_bytes());
        bytes[4..12].copy_from_slice(&self.realm.to_be_bytes());
        bytes[12..].copy_from_slice(&self.num.to_be_bytes());
        Address::from(bytes)
    }

    /// Parses a long-zero address back into an entity id. Returns `None` for addresses that
    /// are not in long-zero form (e.g. ECDSA-derived aliases).
    pub fn from_address(address: Address) -> Option<Self> {
        let bytes = address.as_slice();
        let shard = u32::from_be_bytes(bytes[..4].try_into().ok()?);
        let realm = u64::from_be_bytes(bytes[4..12].try_into().ok()?);
        let num = u64::from_be_bytes(bytes[12..].try_into().ok()?);
        // Long-zero addresses keep shard and realm small; anything else is an alias.
        if shard != 0 || realm > u32::MAX as u64 {
            return None;
        }
        Some(Self::new(shard as u64, realm, num))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

/// Kind of ledger entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// A plain account.
    Account,
    /// A smart contract.
    Contract,
    /// A token.
    Token,
}

/// A ledger entity as seen at some point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Ledger id.
    pub id: EntityId,
    /// EVM alias, when the entity has one besides its long-zero address.
    pub evm_address: Option<Address>,
    /// Entity kind.
    pub entity_type: EntityType,
    /// Ethereum-style nonce.
    pub nonce: u64,
    /// Consensus timestamp of the creating transaction.
    pub created_timestamp: Option<Timestamp>,
}

impl Entity {
    /// Creates an account entity with nonce zero.
    pub const fn account(id: EntityId) -> Self {
        Self {
            id,
            evm_address: None,
            entity_type: EntityType::Account,
            nonce: 0,
            created_timestamp: None,
        }
    }

    /// Creates a contract entity with nonce zero.
    pub const fn contract(id: EntityId) -> Self {
        Self {
            id,
            evm_address: None,
            entity_type: EntityType::Contract,
            nonce: 0,
            created_timestamp: None,
        }
    }

    /// Sets the nonce.
    pub const fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Sets the EVM alias.
    pub const fn with_evm_address(mut self, address: Address) -> Self {
        self.evm_address = Some(address);
        self
    }

    /// The address the EVM sees for this entity.
    pub fn address(&self) -> Address {
        self.evm_address.unwrap_or_else(|| self.id.to_address())
    }

    /// Whether the entity is a contract.
    pub fn is_contract(&self) -> bool {
        self.entity_type == EntityType::Contract
    }
}

/// Association of an account with a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRelationship {
    /// The token.
    pub token: Address,
    /// The account.
    pub account: Address,
    /// Whether the account is associated with the token.
    pub associated: bool,
    /// Whether the account is frozen for the token.
    pub frozen: bool,
    /// Whether KYC has been granted.
    pub kyc_granted: bool,
}

/// A custom fee charged on token transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFee {
    /// Account receiving the fee.
    pub collector: Address,
    /// Fee shape.
    pub kind: CustomFeeKind,
}

/// Shape of a [`CustomFee`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomFeeKind {
    /// A fixed amount, in the native currency or in `denominating_token`.
    Fixed {
        /// Fee amount.
        amount: U256,
        /// Token the fee is paid in, native currency when `None`.
        denominating_token: Option<Address>,
    },
    /// A fraction of the transferred amount.
    Fractional {
        /// Numerator of the fraction.
        numerator: u64,
        /// Denominator of the fraction.
        denominator: u64,
        /// Lower bound on the fee.
        minimum: U256,
        /// Upper bound on the fee, unbounded when `None`.
        maximum: Option<U256>,
    },
    /// A fraction of the value exchanged for a non-fungible token.
    Royalty {
        /// Numerator of the fraction.
        numerator: u64,
        /// Denominator of the fraction.
        denominator: u64,
    },
}

/// One record file: the unit the mirror calls a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFile {
    /// Block number.
    pub index: u64,
    /// First consensus timestamp in the file.
    pub consensus_start: Timestamp,
    /// Last consensus timestamp in the file, inclusive.
    pub consensus_end: Timestamp,
    /// Block hash.
    pub hash: B256,
}

impl RecordFile {
    /// The half-open validity interval covered by this record file.
    pub fn interval(&self) -> ValidityInterval {
        ValidityInterval::bounded(self.consensus_start, self.consensus_end.saturating_add(1))
            .unwrap_or_else(|| ValidityInterval::open_ended(self.consensus_start))
    }

    /// Whether `timestamp` falls inside the record file.
    pub const fn contains(&self, timestamp: Timestamp) -> bool {
        self.consensus_start <= timestamp && timestamp <= self.consensus_end
    }
}

/// Errors raised by a [`HistoricalLedgerSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The store could not be reached or failed to answer.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// The store returned a record that cannot be interpreted.
    #[error("invalid ledger record for {kind:?}: {message}")]
    InvalidRecord {
        /// Family of the offending record.
        kind: EntityKind,
        /// What is wrong with it.
        message: String,
    },
}

/// Read-only accessor over the time-indexed ledger.
///
/// Every lookup is filtered to the records whose validity overlaps `interval` and returns the
/// value valid at [`ValidityInterval::read_timestamp`]. Answers for a given interval never
/// change, so sources are shared across concurrent calls.
#[auto_impl(&, Box, Arc)]
pub trait HistoricalLedgerSource {
    /// Looks up the entity with the given EVM address.
    fn entity(
        &self,
        address: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<Entity>, LedgerError>;

    /// Looks up the native balance of an account.
    fn account_balance(
        &self,
        address: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<U256>, LedgerError>;

    /// Looks up the balance `account` holds of `token`.
    fn token_balance(
        &self,
        token: Address,
        account: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<U256>, LedgerError>;

    /// Looks up the relationship between `token` and `account`.
    fn token_relationship(
        &self,
        token: Address,
        account: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<TokenRelationship>, LedgerError>;

    /// Looks up the runtime bytecode of a contract.
    fn contract_bytecode(
        &self,
        address: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<Bytes>, LedgerError>;

    /// Looks up one storage slot of a contract.
    fn contract_storage(
        &self,
        address: Address,
        slot: U256,
        interval: &ValidityInterval,
    ) -> Result<Entry<U256>, LedgerError>;

    /// Looks up the custom fee schedule of a token.
    fn custom_fees(
        &self,
        token: Address,
        interval: &ValidityInterval,
    ) -> Result<Entry<Vec<CustomFee>>, LedgerError>;

    /// The record file with the lowest index.
    fn earliest_record_file(&self) -> Result<Option<RecordFile>, LedgerError>;

    /// The record file with the highest index.
    fn latest_record_file(&self) -> Result<Option<RecordFile>, LedgerError>;

    /// The record file with the given index.
    fn record_file_by_index(&self, index: u64) -> Result<Option<RecordFile>, LedgerError>;

    /// The record file whose consensus range contains `timestamp`.
    fn record_file_by_timestamp(
        &self,
        timestamp: Timestamp,
    ) -> Result<Option<RecordFile>, LedgerError>;
}

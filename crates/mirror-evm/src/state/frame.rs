//! A single copy-on-write layer of ledger state and the record families it holds.

use core::{fmt::Debug, hash::Hash};

use alloy_primitives::{map::HashMap, Address, Bytes, U256};

use crate::{
    CustomFee, Entity, EntityKind, Entry, HistoricalLedgerSource, LedgerError, TokenRelationship,
    ValidityInterval,
};

/// Index of a layer in a [`StackedStateFrames`](crate::StackedStateFrames) arena. The root
/// layer is `0`.
pub type LayerId = usize;

/// A family of ledger records tracked by [`StateFrame`].
///
/// Each family is a zero-sized marker type, so lookups like
/// `frames.get::<ContractStorage>(&(contract, slot))` are checked at compile time.
pub trait StateKind: Debug + 'static {
    /// Key of a record.
    type Key: Clone + Eq + Hash + Debug;
    /// Value of a record.
    type Value: Clone + PartialEq + Debug;

    /// The ledger record family.
    const KIND: EntityKind;

    /// The records of this family held by `frame`.
    fn entries(frame: &StateFrame) -> &HashMap<Self::Key, Entry<Self::Value>>;

    /// Mutable access to the records of this family held by `frame`.
    fn entries_mut(frame: &mut StateFrame) -> &mut HashMap<Self::Key, Entry<Self::Value>>;

    /// Reads a record from the ledger.
    fn load<L: HistoricalLedgerSource + ?Sized>(
        ledger: &L,
        key: &Self::Key,
        interval: &ValidityInterval,
    ) -> Result<Entry<Self::Value>, LedgerError>;
}

macro_rules! state_kinds {
    ($(
        $(#[$meta:meta])*
        $name:ident($kind:ident), $field:ident: $key:ty => $value:ty,
        |$ledger:ident, $k:ident, $interval:ident| $load:expr;
    )*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name;

            impl StateKind for $name {
                type Key = $key;
                type Value = $value;

                const KIND: EntityKind = EntityKind::$kind;

                fn entries(frame: &StateFrame) -> &HashMap<$key, Entry<$value>> {
                    &frame.$field
                }

                fn entries_mut(frame: &mut StateFrame) -> &mut HashMap<$key, Entry<$value>> {
                    &mut frame.$field
                }

                fn load<L: HistoricalLedgerSource + ?Sized>(
                    $ledger: &L,
                    $k: &$key,
                    $interval: &ValidityInterval,
                ) -> Result<Entry<$value>, LedgerError> {
                    $load
                }
            }
        )*

        /// One layer of the copy-on-write overlay.
        ///
        /// Holds, per record family, the writes made at one call level. A key missing from
        /// the layer is unknown here and is looked up in the parent layer.
        #[derive(Debug, Clone, Default)]
        pub struct StateFrame {
            layer_id: LayerId,
            parent: Option<LayerId>,
            $($field: HashMap<$key, Entry<$value>>,)*
        }

        impl StateFrame {
            /// Number of records held by the layer, across all families.
            pub fn len(&self) -> usize {
                0 $(+ self.$field.len())*
            }

            /// Whether the layer holds no records.
            pub fn is_empty(&self) -> bool {
                true $(&& self.$field.is_empty())*
            }

            /// Moves every record of `child` into this layer. Records of `child` win.
            pub(crate) fn merge_from(&mut self, child: Self) {
                $(self.$field.extend(child.$field);)*
            }

            /// Drops every record.
            pub(crate) fn clear(&mut self) {
                $(self.$field.clear();)*
            }
        }
    };
}

state_kinds! {
    /// Entities by EVM address.
    Entities(Entity), entities: Address => Entity,
        |ledger, key, interval| ledger.entity(*key, interval);
    /// Native balances by account address.
    AccountBalances(AccountBalance), balances: Address => U256,
        |ledger, key, interval| ledger.account_balance(*key, interval);
    /// Token balances by `(token, account)`.
    TokenBalances(TokenBalance), token_balances: (Address, Address) => U256,
        |ledger, key, interval| ledger.token_balance(key.0, key.1, interval);
    /// Token relationships by `(token, account)`.
    TokenRelationships(TokenRelationship),
        token_relationships: (Address, Address) => TokenRelationship,
        |ledger, key, interval| ledger.token_relationship(key.0, key.1, interval);
    /// Runtime bytecode by contract address.
    ContractCode(ContractBytecode), bytecode: Address => Bytes,
        |ledger, key, interval| ledger.contract_bytecode(*key, interval);
    /// Storage slots by `(contract, slot)`.
    ContractStorage(ContractStorage), storage: (Address, U256) => U256,
        |ledger, key, interval| ledger.contract_storage(key.0, key.1, interval);
    /// Custom fee schedules by token address.
    CustomFees(CustomFees), custom_fees: Address => Vec<CustomFee>,
        |ledger, key, interval| ledger.custom_fees(*key, interval);
}

impl StateFrame {
    /// Creates an empty layer.
    pub(crate) fn new(layer_id: LayerId, parent: Option<LayerId>) -> Self {
        Self { layer_id, parent, ..Default::default() }
    }

    /// Id of this layer.
    pub const fn layer_id(&self) -> LayerId {
        self.layer_id
    }

    /// Id of the parent layer. `None` for the root, which reads through to the ledger.
    pub const fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    /// The record this layer holds for `key`, `None` if the layer does not know the key.
    pub fn get<K: StateKind>(&self, key: &K::Key) -> Option<&Entry<K::Value>> {
        K::entries(self).get(key)
    }

    /// Records `entry` for `key` in this layer.
    pub fn insert<K: StateKind>(&mut self, key: K::Key, entry: Entry<K::Value>) {
        K::entries_mut(self).insert(key, entry);
    }

    /// Iterates over the records of one family held by this layer.
    pub fn iter<K: StateKind>(&self) -> impl Iterator<Item = (&K::Key, &Entry<K::Value>)> {
        K::entries(self).iter()
    }
}

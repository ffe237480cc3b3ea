use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, U256};

use crate::{
    AccountBalances, ContractCode, ContractStorage, CustomFee, CustomFees, Entities, Entity,
    EntityId, Entry, FrameError, HistoricalLedgerSource, StackedStateFrames, TokenBalances,
    TokenRelationship, TokenRelationships, ValidityInterval,
};

/// The mutable world state a black-box [`Evm`](crate::Evm) executes against.
///
/// Reads go through the active layers of a call's overlay and writes land in the top layer.
/// The EVM brackets every nested call with [`enter_call`](Self::enter_call) and
/// [`exit_call`](Self::exit_call), which is what pushes and pops layers.
pub trait WorldState {
    /// The interval ledger reads are bound to.
    fn interval(&self) -> &ValidityInterval;

    /// Number of nested calls currently entered.
    fn call_depth(&self) -> usize;

    /// Enters a nested call.
    fn enter_call(&mut self) -> Result<(), FrameError>;

    /// Leaves the innermost nested call, keeping its writes only if it succeeded.
    fn exit_call(&mut self, success: bool) -> Result<(), FrameError>;

    /// The entity known under `address`, including tombstones.
    fn entity_entry(&mut self, address: Address) -> Result<Entry<Entity>, FrameError>;

    /// The live entity known under `address`.
    fn entity(&mut self, address: Address) -> Result<Option<Entity>, FrameError> {
        Ok(self.entity_entry(address)?.present())
    }

    /// Whether the entity under `address` has been deleted.
    fn is_deleted(&mut self, address: Address) -> Result<bool, FrameError> {
        Ok(self.entity_entry(address)?.is_deleted())
    }

    /// Writes an entity under `address`.
    fn set_entity(&mut self, address: Address, entity: Entity);

    /// Deletes the entity under `address` together with its balance and bytecode.
    fn delete_entity(&mut self, address: Address);

    /// Native balance of `address`. Unknown accounts hold zero.
    fn balance(&mut self, address: Address) -> Result<U256, FrameError>;

    /// Sets the native balance of `address`.
    fn set_balance(&mut self, address: Address, balance: U256);

    /// Nonce of `address`. Unknown accounts have nonce zero.
    fn nonce(&mut self, address: Address) -> Result<u64, FrameError> {
        Ok(self.entity(address)?.map_or(0, |entity| entity.nonce))
    }

    /// Sets the nonce of `address`, creating an account entity when there is none.
    fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), FrameError> {
        let entity = self.entity(address)?.unwrap_or_else(|| new_account(address));
        self.set_entity(address, entity.with_nonce(nonce));
        Ok(())
    }

    /// Runtime bytecode at `address`. Empty for accounts without code.
    fn code(&mut self, address: Address) -> Result<Bytes, FrameError>;

    /// Sets the runtime bytecode at `address`.
    fn set_code(&mut self, address: Address, code: Bytes);

    /// One storage slot of `address`. Unwritten slots hold zero.
    fn storage(&mut self, address: Address, slot: U256) -> Result<U256, FrameError>;

    /// Writes one storage slot of `address`.
    fn set_storage(&mut self, address: Address, slot: U256, value: U256);

    /// Slots of `address` written by the calls entered so far.
    fn storage_changes(&self, address: Address) -> BTreeMap<U256, U256>;

    /// Balance `account` holds of `token`.
    fn token_balance(&mut self, token: Address, account: Address) -> Result<U256, FrameError>;

    /// Sets the balance `account` holds of `token`.
    fn set_token_balance(&mut self, token: Address, account: Address, balance: U256);

    /// Relationship between `token` and `account`, if any.
    fn token_relationship(
        &mut self,
        token: Address,
        account: Address,
    ) -> Result<Option<TokenRelationship>, FrameError>;

    /// Custom fee schedule of `token`. Empty when the token charges none.
    fn custom_fees(&mut self, token: Address) -> Result<Vec<CustomFee>, FrameError>;

    /// Moves `value` of native currency from `from` to `to`. Returns `false`, and changes
    /// nothing, when `from` cannot cover it.
    fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<bool, FrameError> {
        if value.is_zero() {
            return Ok(true);
        }
        let from_balance = self.balance(from)?;
        let Some(remaining) = from_balance.checked_sub(value) else {
            return Ok(false);
        };
        if from == to {
            return Ok(true);
        }
        let to_balance = self.balance(to)?;
        self.set_balance(from, remaining);
        self.set_balance(to, to_balance.saturating_add(value));
        Ok(true)
    }
}

/// A fresh account entity for `address`. Long-zero addresses map back to their entity id,
/// anything else becomes an alias of an unnumbered account.
pub(crate) fn new_account(address: Address) -> Entity {
    match EntityId::from_address(address) {
        Some(id) => Entity::account(id),
        None => Entity::account(EntityId::default()).with_evm_address(address),
    }
}

impl<L: HistoricalLedgerSource> WorldState for StackedStateFrames<L> {
    fn interval(&self) -> &ValidityInterval {
        Self::interval(self)
    }

    fn call_depth(&self) -> usize {
        Self::call_depth(self)
    }

    fn enter_call(&mut self) -> Result<(), FrameError> {
        self.push().map(drop)
    }

    fn exit_call(&mut self, success: bool) -> Result<(), FrameError> {
        if success {
            self.commit_top()
        } else {
            self.discard_top()
        }
    }

    fn entity_entry(&mut self, address: Address) -> Result<Entry<Entity>, FrameError> {
        self.get::<Entities>(&address)
    }

    fn set_entity(&mut self, address: Address, entity: Entity) {
        self.set::<Entities>(address, entity);
    }

    fn delete_entity(&mut self, address: Address) {
        self.delete::<Entities>(address);
        self.delete::<AccountBalances>(address);
        self.delete::<ContractCode>(address);
    }

    fn balance(&mut self, address: Address) -> Result<U256, FrameError> {
        Ok(self.get::<AccountBalances>(&address)?.present().unwrap_or_default())
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        self.set::<AccountBalances>(address, balance);
    }

    fn code(&mut self, address: Address) -> Result<Bytes, FrameError> {
        Ok(self.get::<ContractCode>(&address)?.present().unwrap_or_default())
    }

    fn set_code(&mut self, address: Address, code: Bytes) {
        self.set::<ContractCode>(address, code);
    }

    fn storage(&mut self, address: Address, slot: U256) -> Result<U256, FrameError> {
        Ok(self.get::<ContractStorage>(&(address, slot))?.present().unwrap_or_default())
    }

    fn set_storage(&mut self, address: Address, slot: U256, value: U256) {
        self.set::<ContractStorage>((address, slot), value);
    }

    fn storage_changes(&self, address: Address) -> BTreeMap<U256, U256> {
        Self::storage_changes(self, address)
    }

    fn token_balance(&mut self, token: Address, account: Address) -> Result<U256, FrameError> {
        Ok(self.get::<TokenBalances>(&(token, account))?.present().unwrap_or_default())
    }

    fn set_token_balance(&mut self, token: Address, account: Address, balance: U256) {
        self.set::<TokenBalances>((token, account), balance);
    }

    fn token_relationship(
        &mut self,
        token: Address,
        account: Address,
    ) -> Result<Option<TokenRelationship>, FrameError> {
        Ok(self.get::<TokenRelationships>(&(token, account))?.present())
    }

    fn custom_fees(&mut self, token: Address) -> Result<Vec<CustomFee>, FrameError> {
        Ok(self.get::<CustomFees>(&token)?.present().unwrap_or_default())
    }
}

//! Assembles EVM bytecode for the opcodes [`MiniEvm`](super::MiniEvm) understands.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{Revert, SolError};
use revm::bytecode::opcode::{
    ADD, BALANCE, CALL, DUP1, GAS, INVALID, ISZERO, MSTORE, POP, PUSH0, RETURN, REVERT, SLOAD,
    SSTORE, STOP,
};

/// Pads the bytes to the right with 0s to make it a multiple of the length.
pub fn right_pad_bytes(bytes: impl AsRef<[u8]>, multiple_of: usize) -> Vec<u8> {
    let bytes = bytes.as_ref().to_vec();
    let padding = (multiple_of - (bytes.len() % multiple_of)) % multiple_of;
    [bytes, vec![0u8; padding]].concat()
}

/// A builder for assembling EVM bytecode.
#[derive(Debug, Default, Clone)]
pub struct BytecodeBuilder {
    code: Vec<u8>,
}

impl BytecodeBuilder {
    /// Build the bytecode.
    pub fn build(self) -> Bytes {
        self.code.into()
    }

    /// Get the length of the bytecode.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the bytecode is empty.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Append a single opcode or byte.
    pub fn append(mut self, opcode: u8) -> Self {
        self.code.push(opcode);
        self
    }

    /// Append a series of opcodes or bytes.
    pub fn append_many(mut self, items: impl IntoIterator<Item = u8>) -> Self {
        self.code.extend(items);
        self
    }

    /// Append a PUSH opcode and the bytes to push.
    pub fn push_bytes(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        assert!(bytes.len() <= 32);
        self.code.push(PUSH0 + bytes.len() as u8);
        self.code.extend_from_slice(bytes);
        self
    }

    /// Append the shortest PUSH of `number`. Zero becomes `PUSH0`.
    pub fn push<T: Into<u128>>(self, number: T) -> Self {
        self.push_u256(U256::from(number.into()))
    }

    /// Append the shortest PUSH of a full word. Zero becomes `PUSH0`.
    pub fn push_u256(self, value: U256) -> Self {
        if value.is_zero() {
            return self.append(PUSH0);
        }
        self.push_bytes(value.to_be_bytes_trimmed_vec())
    }

    /// Append a PUSH20 of `address`.
    pub fn push_address(self, address: Address) -> Self {
        self.push_bytes(address)
    }

    /// Append MSTOREs writing `bytes` to memory at `offset`, padded to whole words.
    pub fn mstore(self, offset: usize, bytes: impl AsRef<[u8]>) -> Self {
        let padded_bytes = right_pad_bytes(bytes, 32);
        let mut this = self;
        for (i, chunk) in padded_bytes.chunks(32).enumerate() {
            this = this.push_bytes(chunk).push((offset + i * 32) as u64).append(MSTORE);
        }
        this
    }

    /// Append an SLOAD of `slot`, leaving the value on the stack.
    pub fn sload(self, slot: u64) -> Self {
        self.push(slot).append(SLOAD)
    }

    /// Append an SSTORE of `value` into `slot`.
    pub fn sstore(self, slot: u64, value: impl Into<u128>) -> Self {
        self.push(value).push(slot).append(SSTORE)
    }

    /// Append a BALANCE of `address`, leaving the balance on the stack.
    pub fn balance(self, address: Address) -> Self {
        self.push_address(address).append(BALANCE)
    }

    /// Append a CALL to `target` forwarding `gas` and `value`, without call data. The 32-byte
    /// return data is copied to memory at 0 and the success flag is left on the stack.
    pub fn call(self, target: Address, gas: u64, value: impl Into<u128>) -> Self {
        self.push(32u64)
            .push(0u64)
            .push(0u64)
            .push(0u64)
            .push(value)
            .push_address(target)
            .push(gas)
            .append(CALL)
    }

    /// Append a CALL to `target` forwarding all remaining gas.
    pub fn call_all_gas(self, target: Address) -> Self {
        self.push(32u64)
            .push(0u64)
            .push(0u64)
            .push(0u64)
            .push(0u64)
            .push_address(target)
            .append(GAS)
            .append(CALL)
    }

    /// Append an ADD of the two topmost stack words.
    pub fn add(self) -> Self {
        self.append(ADD)
    }

    /// Append an ISZERO of the topmost stack word.
    pub fn is_zero(self) -> Self {
        self.append(ISZERO)
    }

    /// Append a DUP1.
    pub fn dup(self) -> Self {
        self.append(DUP1)
    }

    /// Append a POP.
    pub fn pop(self) -> Self {
        self.append(POP)
    }

    /// Append a STOP.
    pub fn stop(self) -> Self {
        self.append(STOP)
    }

    /// Append the designated INVALID opcode.
    pub fn invalid(self) -> Self {
        self.append(INVALID)
    }

    /// Append a REVERT opcode with empty return data.
    pub fn revert(self) -> Self {
        self.append_many([PUSH0, PUSH0, REVERT])
    }

    /// Append a REVERT opcode with the given return data.
    pub fn revert_with_data(self, data: impl AsRef<[u8]>) -> Self {
        let data_len = data.as_ref().len();
        self.mstore(0, data).push(data_len as u64).push(0u64).append(REVERT)
    }

    /// Append a REVERT with the ABI-encoded `Error(string)` payload of `message`.
    pub fn revert_with_message(self, message: &str) -> Self {
        let payload = Revert { reason: message.to_string() }.abi_encode();
        self.revert_with_data(payload)
    }

    /// Append a RETURN opcode with empty return data.
    pub fn return_empty(self) -> Self {
        self.append_many([PUSH0, PUSH0, RETURN])
    }

    /// Append a RETURN opcode with the given return data.
    pub fn return_with_data(self, data: impl AsRef<[u8]>) -> Self {
        let data_len = data.as_ref().len();
        self.mstore(0, data).push(data_len as u64).push(0u64).append(RETURN)
    }

    /// Append a RETURN of the topmost stack word.
    pub fn return_top(self) -> Self {
        self.push(0u64).append(MSTORE).push(32u64).push(0u64).append(RETURN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revm::bytecode::opcode::PUSH1;

    #[test]
    fn test_push_uses_shortest_encoding() {
        assert_eq!(BytecodeBuilder::default().push(0u64).build().as_ref(), [PUSH0]);
        assert_eq!(BytecodeBuilder::default().push(0x1234u64).build().as_ref(), [0x61, 0x12, 0x34]);
        assert_eq!(BytecodeBuilder::default().push(1u64).build().as_ref(), [PUSH1, 1]);
        assert_eq!(BytecodeBuilder::default().push_u256(U256::MAX).len(), 33);
    }

    #[test]
    fn test_small_integers_become_words() {
        let code = BytecodeBuilder::default().sstore(1, 2u8).build();
        assert_eq!(code.as_ref(), [PUSH1, 2, PUSH1, 1, SSTORE]);
        let code = BytecodeBuilder::default().call(Address::ZERO, 7, 0u32).build();
        assert_eq!(code.len(), 2 + 3 + 1 + 21 + 2 + 1);
    }

    #[test]
    fn test_right_pad_bytes() {
        assert_eq!(right_pad_bytes([1u8], 4), vec![1, 0, 0, 0]);
        assert_eq!(right_pad_bytes([1u8, 2, 3, 4], 4), vec![1, 2, 3, 4]);
        assert!(right_pad_bytes([0u8; 0], 32).is_empty());
    }
}

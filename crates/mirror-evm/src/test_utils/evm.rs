//! A minimal bytecode interpreter behind the [`Evm`] seam.
//!
//! Understands just enough opcodes to exercise nested calls, storage writes, reverts and
//! halts against a [`WorldState`]. Every instruction has a fixed cost except `SSTORE` and
//! `CALL`; memory is free up to a hard cap.

use alloy_primitives::{Address, Bytes, B256, U256};
use revm::{
    bytecode::opcode::{
        ADD, BALANCE, CALL, DUP1, GAS, INVALID, ISZERO, MSTORE, POP, PUSH0, PUSH32, RETURN,
        REVERT, SLOAD, SSTORE, STOP,
    },
    context::result::{HaltReason, OutOfGasError},
};

use crate::{
    Evm, EvmError, EvmFrame, EvmOutcome, FrameError, InstructionHook, InstructionStep,
    WorldState,
};

/// Largest memory a frame may touch, in bytes.
pub const MINI_EVM_MEMORY_LIMIT: usize = 1 << 20;

const STACK_LIMIT: usize = 1024;
const SLOAD_COST: u64 = 2_100;
const SSTORE_SET_COST: u64 = 20_000;
const SSTORE_RESET_COST: u64 = 2_900;
const SSTORE_CLEAR_REFUND: u64 = 4_800;
const ACCOUNT_ACCESS_COST: u64 = 2_600;
const CALL_VALUE_COST: u64 = 9_000;

/// A minimal interpreter driving [`WorldState`] the way a real EVM would.
///
/// Nested calls are bracketed with [`WorldState::enter_call`] and [`WorldState::exit_call`].
/// A nested call that cannot be entered, because the depth limit is reached or the value
/// cannot be paid, fails without consuming the forwarded gas.
#[derive(Debug, Clone, Copy, Default)]
pub struct MiniEvm;

impl Evm for MiniEvm {
    fn execute(
        &self,
        frame: EvmFrame,
        state: &mut dyn WorldState,
        mut hook: Option<&mut dyn InstructionHook>,
    ) -> Result<EvmOutcome, EvmError> {
        run_frame(&frame, state, &mut hook)
    }
}

/// Why the interpreter loop stopped early.
enum Interrupt {
    Halt(HaltReason),
    Fatal(EvmError),
}

impl From<HaltReason> for Interrupt {
    fn from(reason: HaltReason) -> Self {
        Self::Halt(reason)
    }
}

impl From<FrameError> for Interrupt {
    fn from(error: FrameError) -> Self {
        Self::Fatal(error.into())
    }
}

/// How a frame that was not interrupted ended.
enum Exit {
    Return(Bytes),
    Revert(Bytes),
}

fn run_frame(
    frame: &EvmFrame,
    state: &mut dyn WorldState,
    hook: &mut Option<&mut dyn InstructionHook>,
) -> Result<EvmOutcome, EvmError> {
    if let Some(hook) = hook.as_deref_mut() {
        hook.on_call_enter(frame);
    }
    let code = match &frame.init_code {
        Some(init_code) => init_code.clone(),
        None => state.code(frame.address)?,
    };
    let mut interpreter = Interpreter::new(frame, code);
    let outcome = match interpreter.run(state, hook) {
        Ok(Exit::Return(output)) => {
            EvmOutcome::success(interpreter.gas_used(), output).with_refund(interpreter.refund)
        }
        Ok(Exit::Revert(output)) => EvmOutcome::revert(interpreter.gas_used(), output),
        Err(Interrupt::Halt(reason)) => EvmOutcome::halt(reason, frame.gas_limit),
        Err(Interrupt::Fatal(error)) => return Err(error),
    };
    if let Some(hook) = hook.as_deref_mut() {
        hook.on_call_exit(frame, &outcome);
    }
    Ok(outcome)
}

struct Interpreter<'a> {
    frame: &'a EvmFrame,
    code: Bytes,
    pc: usize,
    stack: Vec<U256>,
    memory: Vec<u8>,
    gas_remaining: u64,
    refund: u64,
}

impl<'a> Interpreter<'a> {
    fn new(frame: &'a EvmFrame, code: Bytes) -> Self {
        Self {
            frame,
            code,
            pc: 0,
            stack: Vec::new(),
            memory: Vec::new(),
            gas_remaining: frame.gas_limit,
            refund: 0,
        }
    }

    const fn gas_used(&self) -> u64 {
        self.frame.gas_limit - self.gas_remaining
    }

    fn run(
        &mut self,
        state: &mut dyn WorldState,
        hook: &mut Option<&mut dyn InstructionHook>,
    ) -> Result<Exit, Interrupt> {
        loop {
            let opcode = self.code.get(self.pc).copied().unwrap_or(STOP);
            let cost = self.cost(opcode, state)?;
            if let Some(hook) = hook.as_deref_mut() {
                let step = InstructionStep {
                    pc: self.pc,
                    opcode,
                    depth: self.frame.depth,
                    gas_remaining: self.gas_remaining,
                    gas_cost: cost,
                    stack: &self.stack,
                    memory: &self.memory,
                    address: self.frame.address,
                };
                hook.on_step(&step, &*state);
            }
            self.gas_remaining = self
                .gas_remaining
                .checked_sub(cost)
                .ok_or(HaltReason::OutOfGas(OutOfGasError::Basic))?;
            self.pc += 1;

            match opcode {
                STOP => return Ok(Exit::Return(Bytes::new())),
                ADD => {
                    let (a, b) = (self.pop()?, self.pop()?);
                    self.push(a.wrapping_add(b))?;
                }
                ISZERO => {
                    let value = self.pop()?;
                    self.push(U256::from(value.is_zero()))?;
                }
                POP => {
                    self.pop()?;
                }
                MSTORE => {
                    let (offset, value) = (self.pop()?, self.pop()?);
                    let offset = self.expand_memory(offset, U256::from(32))?;
                    self.memory[offset..offset + 32].copy_from_slice(&value.to_be_bytes::<32>());
                }
                SLOAD => {
                    let slot = self.pop()?;
                    let value = state.storage(self.frame.address, slot)?;
                    self.push(value)?;
                }
                SSTORE => {
                    if self.frame.is_static {
                        return Err(HaltReason::StateChangeDuringStaticCall.into());
                    }
                    let (slot, value) = (self.pop()?, self.pop()?);
                    let current = state.storage(self.frame.address, slot)?;
                    if !current.is_zero() && value.is_zero() {
                        self.refund += SSTORE_CLEAR_REFUND;
                    }
                    state.set_storage(self.frame.address, slot, value);
                }
                GAS => self.push(U256::from(self.gas_remaining))?,
                PUSH0..=PUSH32 => {
                    let size = (opcode - PUSH0) as usize;
                    let mut word = [0u8; 32];
                    for (i, byte) in word[32 - size..].iter_mut().enumerate() {
                        *byte = self.code.get(self.pc + i).copied().unwrap_or_default();
                    }
                    self.pc += size;
                    self.push(U256::from_be_bytes(word))?;
                }
                DUP1 => {
                    let top = *self.stack.last().ok_or(HaltReason::StackUnderflow)?;
                    self.push(top)?;
                }
                BALANCE => {
                    let address = to_address(self.pop()?);
                    let balance = state.balance(address)?;
                    self.push(balance)?;
                }
                CALL => self.call(state, hook)?,
                RETURN | REVERT => {
                    let (offset, size) = (self.pop()?, self.pop()?);
                    let output = self.read_memory(offset, size)?;
                    return Ok(if opcode == RETURN {
                        Exit::Return(output)
                    } else {
                        Exit::Revert(output)
                    });
                }
                INVALID => return Err(HaltReason::InvalidFEOpcode.into()),
                _ => return Err(HaltReason::OpcodeNotFound.into()),
            }
        }
    }

    /// Gas charged for `opcode` given the current stack.
    fn cost(&self, opcode: u8, state: &mut dyn WorldState) -> Result<u64, Interrupt> {
        Ok(match opcode {
            STOP | RETURN | REVERT | INVALID => 0,
            POP | GAS | PUSH0 => 2,
            SLOAD => SLOAD_COST,
            SSTORE => {
                let slot = self.peek(0)?;
                let value = self.peek(1)?;
                let current = state.storage(self.frame.address, slot)?;
                if current.is_zero() && !value.is_zero() {
                    SSTORE_SET_COST
                } else {
                    SSTORE_RESET_COST
                }
            }
            BALANCE => ACCOUNT_ACCESS_COST,
            CALL if self.peek(2)?.is_zero() => ACCOUNT_ACCESS_COST,
            CALL => ACCOUNT_ACCESS_COST + CALL_VALUE_COST,
            _ => 3,
        })
    }

    fn call(
        &mut self,
        state: &mut dyn WorldState,
        hook: &mut Option<&mut dyn InstructionHook>,
    ) -> Result<(), Interrupt> {
        let requested = self.pop()?;
        let target = to_address(self.pop()?);
        let value = self.pop()?;
        let (args_offset, args_size) = (self.pop()?, self.pop()?);
        let (ret_offset, ret_size) = (self.pop()?, self.pop()?);
        if self.frame.is_static && !value.is_zero() {
            return Err(HaltReason::CallNotAllowedInsideStatic.into());
        }
        let input = self.read_memory(args_offset, args_size)?;
        let ret_offset = self.expand_memory(ret_offset, ret_size)?;

        let gas_limit = requested.saturating_to::<u64>().min(self.gas_remaining);
        let frame = EvmFrame {
            caller: self.frame.address,
            address: target,
            value,
            input,
            init_code: None,
            gas_limit,
            depth: self.frame.depth + 1,
            is_static: self.frame.is_static,
        };

        match state.enter_call() {
            Ok(()) => {}
            Err(FrameError::DepthExceeded { .. }) => return self.push(U256::ZERO),
            Err(error) => return Err(error.into()),
        }
        if !state.transfer(frame.caller, frame.address, value)? {
            state.exit_call(false)?;
            return self.push(U256::ZERO);
        }
        let outcome = run_frame(&frame, state, hook).map_err(Interrupt::Fatal)?;
        state.exit_call(outcome.is_success())?;

        self.gas_remaining -= outcome.gas_used;
        if outcome.is_success() {
            self.refund += outcome.gas_refunded;
        }
        let copied = ret_size.saturating_to::<usize>().min(outcome.output.len());
        self.memory[ret_offset..ret_offset + copied].copy_from_slice(&outcome.output[..copied]);
        self.push(U256::from(outcome.is_success()))
    }

    fn push(&mut self, value: U256) -> Result<(), Interrupt> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(HaltReason::StackOverflow.into());
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<U256, Interrupt> {
        self.stack.pop().ok_or_else(|| HaltReason::StackUnderflow.into())
    }

    /// The stack word `depth` positions below the top.
    fn peek(&self, depth: usize) -> Result<U256, Interrupt> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|index| self.stack[index])
            .ok_or_else(|| HaltReason::StackUnderflow.into())
    }

    /// Grows memory to cover `size` bytes at `offset`, returning the offset.
    fn expand_memory(&mut self, offset: U256, size: U256) -> Result<usize, Interrupt> {
        let offset = offset.saturating_to::<usize>();
        let size = size.saturating_to::<usize>();
        if size == 0 {
            return Ok(offset.min(self.memory.len()));
        }
        let end = offset.saturating_add(size);
        if end > MINI_EVM_MEMORY_LIMIT {
            return Err(HaltReason::OutOfGas(OutOfGasError::Memory).into());
        }
        if end > self.memory.len() {
            self.memory.resize(end.div_ceil(32) * 32, 0);
        }
        Ok(offset)
    }

    fn read_memory(&mut self, offset: U256, size: U256) -> Result<Bytes, Interrupt> {
        let start = self.expand_memory(offset, size)?;
        let size = size.saturating_to::<usize>();
        Ok(Bytes::copy_from_slice(&self.memory[start..start + size]))
    }
}

fn to_address(word: U256) -> Address {
    Address::from_word(B256::from(word.to_be_bytes::<32>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decode_revert_reason,
        test_utils::{BytecodeBuilder, MemoryLedger},
        EvmStatus, StackedStateFrames, ValidityInterval,
    };

    const CALLER: Address = Address::repeat_byte(0xca);
    const CONTRACT: Address = Address::repeat_byte(0xc0);

    fn run(code: Bytes, gas_limit: u64) -> (EvmOutcome, StackedStateFrames<MemoryLedger>) {
        let ledger = MemoryLedger::default().with_block(0, 99).with_contract(CONTRACT, code);
        let mut state = StackedStateFrames::new(ledger, ValidityInterval::open_ended(0));
        let frame = EvmFrame::call(CALLER, CONTRACT, U256::ZERO, Bytes::new(), gas_limit);
        let outcome = MiniEvm.execute(frame, &mut state, None).unwrap();
        (outcome, state)
    }

    #[test]
    fn test_sstore_and_return() {
        let code = BytecodeBuilder::default().sstore(1, 5u64).sload(1).return_top().build();
        let (outcome, mut state) = run(code, 100_000);
        assert!(outcome.is_success());
        assert_eq!(U256::from_be_slice(&outcome.output), U256::from(5));
        assert_eq!(state.storage(CONTRACT, U256::from(1)).unwrap(), U256::from(5));
    }

    #[test]
    fn test_out_of_gas_consumes_everything() {
        let code = BytecodeBuilder::default().sstore(1, 5u64).stop().build();
        let (outcome, _) = run(code, 10_000);
        assert_eq!(outcome.status, EvmStatus::Halt(HaltReason::OutOfGas(OutOfGasError::Basic)));
        assert_eq!(outcome.gas_used, 10_000);
    }

    #[test]
    fn test_invalid_and_unknown_opcodes_halt() {
        let (outcome, _) = run(BytecodeBuilder::default().invalid().build(), 1_000);
        assert_eq!(outcome.status, EvmStatus::Halt(HaltReason::InvalidFEOpcode));
        let (outcome, _) = run(BytecodeBuilder::default().append(0x0c).build(), 1_000);
        assert_eq!(outcome.status, EvmStatus::Halt(HaltReason::OpcodeNotFound));
        let (outcome, _) = run(BytecodeBuilder::default().pop().build(), 1_000);
        assert_eq!(outcome.status, EvmStatus::Halt(HaltReason::StackUnderflow));
    }

    #[test]
    fn test_memory_cap_halts() {
        let code = BytecodeBuilder::default()
            .push(1u64)
            .push(MINI_EVM_MEMORY_LIMIT as u64)
            .append(MSTORE)
            .build();
        let (outcome, _) = run(code, 1_000);
        assert_eq!(
            outcome.status,
            EvmStatus::Halt(HaltReason::OutOfGas(OutOfGasError::Memory))
        );
    }

    #[test]
    fn test_revert_keeps_unused_gas() {
        let code = BytecodeBuilder::default().revert_with_message("nope").build();
        let (outcome, _) = run(code, 100_000);
        assert_eq!(outcome.status, EvmStatus::Revert);
        assert!(outcome.gas_used < 1_000);
        assert_eq!(decode_revert_reason(&outcome.output), "nope");
    }
}

//! Checks shared by both back-ends before a call reaches the EVM.

use alloy_primitives::{Address, Bytes};

use crate::{
    constants::gas::{
        INIT_CODE_WORD_COST, TX_BASE_COST, TX_CREATE_COST, TX_DATA_NON_ZERO_GAS,
        TX_DATA_ZERO_GAS,
    },
    state::new_account,
    CallError, CallParameters, Entity, EntityType, EvmConfig, EvmFrame, EvmOutcome,
    FrameError, PreCheckReason, WorldState,
};

/// Intrinsic gas of a call under the pre-Shanghai schedule: the base cost, the creation
/// surcharge and the per-byte cost of the call data.
pub fn intrinsic_gas(data: &[u8], is_create: bool) -> u64 {
    let zero_bytes = data.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zero_bytes = data.len() as u64 - zero_bytes;
    let base = if is_create { TX_BASE_COST + TX_CREATE_COST } else { TX_BASE_COST };
    base + zero_bytes * TX_DATA_ZERO_GAS + non_zero_bytes * TX_DATA_NON_ZERO_GAS
}

/// Cost of init code per EIP-3860, charged per 32-byte word.
pub fn init_code_cost(init_code_len: usize) -> u64 {
    (init_code_len as u64).div_ceil(32) * INIT_CODE_WORD_COST
}

/// Rejects call data larger than the configured maximum.
pub(crate) fn check_payload(
    params: &CallParameters,
    config: &EvmConfig,
) -> Result<(), CallError> {
    let size = params.call_data.len();
    if size > config.max_data_size {
        return Err(CallError::PayloadTooLarge { size, max: config.max_data_size });
    }
    Ok(())
}

/// Rejects gas limits above the configured maximum or below `intrinsic`.
pub(crate) fn check_gas_limit(
    params: &CallParameters,
    config: &EvmConfig,
    intrinsic: u64,
) -> Result<(), PreCheckReason> {
    if params.gas_limit > config.max_gas_limit {
        return Err(PreCheckReason::GasLimitTooHigh {
            limit: params.gas_limit,
            max: config.max_gas_limit,
        });
    }
    if params.gas_limit < intrinsic {
        return Err(PreCheckReason::IntrinsicGasTooLow {
            required: intrinsic,
            provided: params.gas_limit,
        });
    }
    Ok(())
}

/// Rejects deleted senders and senders that cannot cover the value.
pub(crate) fn check_sender(
    state: &mut dyn WorldState,
    params: &CallParameters,
) -> Result<(), CallError> {
    if state.is_deleted(params.sender)? {
        return Err(CallError::InvalidSender(params.sender));
    }
    let available = state.balance(params.sender)?;
    if available < params.value {
        let reason = PreCheckReason::InsufficientBalance { required: params.value, available };
        return Err(reason.into());
    }
    Ok(())
}

/// Rejects calls to deleted receivers.
pub(crate) fn check_receiver(
    state: &mut dyn WorldState,
    params: &CallParameters,
) -> Result<(), CallError> {
    match params.receiver {
        Some(receiver) if state.is_deleted(receiver)? => {
            Err(PreCheckReason::ReceiverDeleted(receiver).into())
        }
        _ => Ok(()),
    }
}

/// Picks the account the call runs at. Creations deploy to the address derived from the
/// sender and its nonce, and bump the nonce. A sender whose nonce cannot be bumped is
/// rejected.
pub(crate) fn target_address(
    state: &mut dyn WorldState,
    params: &CallParameters,
) -> Result<Address, CallError> {
    match params.receiver {
        Some(receiver) => Ok(receiver),
        None => {
            let nonce = state.nonce(params.sender)?;
            let next = nonce.checked_add(1).ok_or(PreCheckReason::NonceOverflow(params.sender))?;
            state.set_nonce(params.sender, next)?;
            Ok(params.sender.create(nonce))
        }
    }
}

/// The top-level EVM frame of a call running at `address` with `gas_limit` left after
/// intrinsic gas.
pub(crate) fn top_level_frame(
    params: &CallParameters,
    address: Address,
    gas_limit: u64,
) -> EvmFrame {
    let input = params.call_data.clone();
    if params.is_create() {
        EvmFrame::create(params.sender, address, params.value, input, gas_limit)
    } else {
        EvmFrame::call(params.sender, address, params.value, input, gas_limit)
    }
}

/// Stores the runtime code returned by a successful creation and marks the account as a
/// contract.
pub(crate) fn deploy(
    state: &mut dyn WorldState,
    address: Address,
    code: Bytes,
) -> Result<(), FrameError> {
    let entity = state.entity(address)?.unwrap_or_else(|| new_account(address));
    state.set_entity(address, Entity { entity_type: EntityType::Contract, nonce: 1, ..entity });
    state.set_code(address, code);
    Ok(())
}

/// Gas charged for the whole call: intrinsic gas plus execution, less the refund capped at a
/// fifth of the total (EIP-3529).
pub(crate) fn total_gas_used(intrinsic: u64, outcome: &EvmOutcome) -> u64 {
    let spent = intrinsic.saturating_add(outcome.gas_used);
    spent - outcome.gas_refunded.min(spent / 5)
}

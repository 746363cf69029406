use std::collections::BTreeMap;

use ethereum_types::U256;
use tessera_objects::{Float16, Idx, L1Tx, PoolL2Tx, TokenId};

use super::Config;
use crate::errors::ProcessorError;

// ZK INPUTS
// ================================================================================================

/// The witness bundle handed to proof generation.
///
/// Per-slot vectors are padded to the circuit sizes (`max_tx` transaction slots, `max_fee_tx`
/// fee slots) with zeroes, in the canonical order the batch was applied: L1-user, then
/// L1-coordinator, then L2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZkInputs {
    pub old_last_idx: u64,
    pub new_last_idx: u64,
    pub old_state_root: U256,
    pub new_state_root: U256,
    pub new_exit_root: U256,
    /// Sender index per transaction slot.
    pub from_idxs: Vec<u64>,
    /// Destination index per transaction slot.
    pub to_idxs: Vec<u64>,
    /// Compact-encoded moved amount per transaction slot.
    pub amounts_f16: Vec<u16>,
    /// Signed compressed payload per L2 slot (zero for L1 slots).
    pub tx_compressed_data: Vec<U256>,
    /// Coordinator fee-collection indexes, padded to `max_fee_tx`.
    pub fee_idxs: Vec<u64>,
    /// Token per fee slot, padded to `max_fee_tx`.
    pub fee_plan_tokens: Vec<u32>,
}

impl ZkInputs {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn build(
        config: &Config,
        old_last_idx: Idx,
        new_last_idx: Idx,
        old_state_root: U256,
        new_state_root: U256,
        new_exit_root: U256,
        l1_user_txs: &[L1Tx],
        l1_coordinator_txs: &[L1Tx],
        l2_txs: &[PoolL2Tx],
        coord_idxs_map: &BTreeMap<TokenId, Idx>,
    ) -> Result<Self, ProcessorError> {
        let slots = config.max_tx as usize;
        let mut from_idxs = vec![0u64; slots];
        let mut to_idxs = vec![0u64; slots];
        let mut amounts_f16 = vec![0u16; slots];
        let mut tx_compressed_data = vec![U256::zero(); slots];

        let mut slot = 0;
        for tx in l1_user_txs.iter().chain(l1_coordinator_txs.iter()) {
            from_idxs[slot] = tx.from_idx.as_u64();
            to_idxs[slot] = tx.to_idx.as_u64();
            // effective amounts are not always float-representable; the witness floors them
            amounts_f16[slot] = Float16::from_u256_floor(tx.effective_amount())?.0;
            slot += 1;
        }
        for tx in l2_txs {
            from_idxs[slot] = tx.from_idx.as_u64();
            to_idxs[slot] = tx.effective_to_idx().as_u64();
            amounts_f16[slot] = Float16::from_u256(tx.amount)?.0;
            tx_compressed_data[slot] =
                tessera_objects::crypto::fr_to_u256(tx.tx_compressed_data(config.chain_id)?);
            slot += 1;
        }

        let fee_slots = config.max_fee_tx as usize;
        let mut fee_idxs = vec![0u64; fee_slots];
        let mut fee_plan_tokens = vec![0u32; fee_slots];
        for (i, (token, idx)) in coord_idxs_map.iter().take(fee_slots).enumerate() {
            fee_idxs[i] = idx.as_u64();
            fee_plan_tokens[i] = token.0;
        }

        Ok(Self {
            old_last_idx: old_last_idx.as_u64(),
            new_last_idx: new_last_idx.as_u64(),
            old_state_root,
            new_state_root,
            new_exit_root,
            from_idxs,
            to_idxs,
            amounts_f16,
            tx_compressed_data,
            fee_idxs,
            fee_plan_tokens,
        })
    }
}

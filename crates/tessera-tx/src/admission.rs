//! Pool admission checks.
//!
//! Everything a pool must verify before persisting a submission: identity recomputation,
//! fee applicability, sender coordinates, signature, destination reachability, and (for
//! atomic submissions) request-link resolution plus single-group detection. Persistence
//! itself stays behind the pool backend.

use tessera_objects::{
    atomic::{is_single_atomic_group, request_offset_relative_position},
    PoolL2Tx, TxType,
};
use tessera_state::StateDb;

use crate::{errors::AdmissionError, pool::TxPool};

/// Validates a single-transaction submission and returns it normalized (type checked, id
/// recomputed), ready for the pool to persist.
pub fn prepare_single_submission<P: TxPool>(
    state: &StateDb,
    pool: &P,
    chain_id: u16,
    tx: PoolL2Tx,
) -> Result<PoolL2Tx, AdmissionError> {
    if tx.rq_offset != 0 || !tx.rq_tx_id.is_empty() {
        return Err(AdmissionError::RqFieldsInSingleSubmission);
    }
    let tx = tx.normalized()?;
    validate_pool_tx(state, pool, chain_id, &tx)?;
    Ok(tx)
}

/// Validates an atomic submission: resolves every request offset, copies the `rq_*` coupling
/// fields from the referenced transactions, validates each member, and confirms the
/// submission is one atomic group.
pub fn prepare_atomic_submission<P: TxPool>(
    state: &StateDb,
    pool: &P,
    chain_id: u16,
    txs: Vec<PoolL2Tx>,
) -> Result<Vec<PoolL2Tx>, AdmissionError> {
    if txs.len() <= 1 {
        return Err(AdmissionError::SingleTxInAtomicSubmission);
    }

    let mut txs = txs;
    for position in 0..txs.len() {
        let relative = request_offset_relative_position(txs[position].rq_offset)
            .map_err(|_| AdmissionError::TxsNotAtomic)?;
        let requested_position = position as isize + relative;
        if requested_position < 0 || requested_position >= txs.len() as isize {
            return Err(AdmissionError::RqOffsetOutOfBounds { position });
        }
        let requested = txs[requested_position as usize].clone();
        if txs[position].rq_tx_id == requested.tx_id {
            let tx = &mut txs[position];
            tx.rq_from_idx = requested.from_idx;
            tx.rq_to_idx = requested.to_idx;
            tx.rq_to_eth_addr = requested.to_eth_addr;
            tx.rq_to_bjj = requested.to_bjj;
            tx.rq_token_id = requested.token_id;
            tx.rq_amount = Some(requested.amount);
            tx.rq_fee = requested.fee;
            tx.rq_nonce = requested.nonce;
        }
    }

    let mut validated = Vec::with_capacity(txs.len());
    for tx in txs {
        let tx = tx.normalized()?;
        validate_pool_tx(state, pool, chain_id, &tx)?;
        validated.push(tx);
    }

    if !is_single_atomic_group(&validated) {
        return Err(AdmissionError::TxsNotAtomic);
    }
    Ok(validated)
}

/// The per-transaction admission checks shared by both submission paths.
///
/// Admission accepts nonces at or above the account nonce, so bursts park in the pool until
/// the selector's iterative passes reach them; the processor later demands strict equality.
pub fn validate_pool_tx<P: TxPool>(
    state: &StateDb,
    pool: &P,
    chain_id: u16,
    tx: &PoolL2Tx,
) -> Result<(), AdmissionError> {
    // fee applicability before anything stateful
    tx.fee.fee_amount(tx.amount)?;

    let sender = state
        .get_account(tx.from_idx)
        .map_err(|_| AdmissionError::SenderNotFound(tx.from_idx))?;
    if tx.token_id != sender.token_id {
        return Err(AdmissionError::TokenMismatch {
            tx: tx.token_id,
            account: sender.token_id,
        });
    }
    if tx.nonce < sender.nonce {
        return Err(AdmissionError::NonceTooLow {
            tx: tx.nonce,
            account: sender.nonce,
        });
    }
    if !tx.verify_signature(chain_id, &sender.bjj) {
        return Err(AdmissionError::InvalidSignature);
    }

    match tx.tx_type {
        TxType::Transfer => {
            let recipient = state
                .get_account(tx.to_idx)
                .map_err(|_| AdmissionError::RecipientNotFound(tx.to_idx))?;
            if tx.token_id != recipient.token_id {
                return Err(AdmissionError::RecipientTokenMismatch {
                    tx: tx.token_id,
                    recipient: recipient.token_id,
                });
            }
        }
        TxType::TransferToEthAddr => {
            let reachable = state.get_idx_by_eth_addr(tx.to_eth_addr, tx.token_id).is_ok()
                || pool.account_creation_auth(tx.to_eth_addr)?.is_some();
            if !reachable {
                return Err(AdmissionError::DestinationNotReachable(tx.to_eth_addr));
            }
        }
        TxType::Exit => {
            if tx.amount.is_zero() {
                return Err(AdmissionError::ExitZeroAmount);
            }
        }
        _ => {}
    }
    Ok(())
}

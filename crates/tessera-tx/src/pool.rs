//! The boundary to the pending-transaction pool.
//!
//! The selector only ever reads pending rows and writes lifecycle transitions; persistence is
//! someone else's problem behind the [TxPool] trait. [MemPool] is the in-memory
//! implementation used in tests and single-process embeddings.

use std::collections::BTreeMap;

use ethereum_types::Address;
use tessera_objects::{AccountCreationAuth, BatchNum, PoolL2Tx, PoolTxState, TxId};

use crate::errors::PoolError;

// POOL TRAIT
// ================================================================================================

/// What the selector needs from a pool backend.
pub trait TxPool {
    /// Returns all transactions in the pending state.
    fn pending_txs(&self) -> Result<Vec<PoolL2Tx>, PoolError>;

    /// Returns the account-creation authorization on file for an address, if any.
    fn account_creation_auth(&self, addr: Address) -> Result<Option<AccountCreationAuth>, PoolError>;

    /// Moves the given transactions into the forging state for a batch.
    fn start_forging(&mut self, tx_ids: &[TxId], batch_num: BatchNum) -> Result<(), PoolError>;

    /// Writes discard annotations back to pool rows; transactions whose annotation marks them
    /// unforgeable move to the invalid state, the rest stay pending.
    fn update_txs_info(&mut self, txs: &[PoolL2Tx]) -> Result<(), PoolError>;
}

// IN-MEMORY POOL
// ================================================================================================

/// A pool backend living entirely in memory.
#[derive(Debug, Default)]
pub struct MemPool {
    txs: BTreeMap<TxId, PoolL2Tx>,
    auths: BTreeMap<Address, AccountCreationAuth>,
}

impl MemPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an already-validated transaction.
    pub fn add_tx(&mut self, tx: PoolL2Tx) {
        self.txs.insert(tx.tx_id, tx);
    }

    /// Registers an account-creation authorization.
    pub fn add_auth(&mut self, auth: AccountCreationAuth) {
        self.auths.insert(auth.eth_addr, auth);
    }

    /// Returns a transaction by id.
    pub fn tx(&self, tx_id: TxId) -> Option<&PoolL2Tx> {
        self.txs.get(&tx_id)
    }
}

impl TxPool for MemPool {
    fn pending_txs(&self) -> Result<Vec<PoolL2Tx>, PoolError> {
        Ok(self
            .txs
            .values()
            .filter(|tx| tx.state == PoolTxState::Pending)
            .cloned()
            .collect())
    }

    fn account_creation_auth(&self, addr: Address) -> Result<Option<AccountCreationAuth>, PoolError> {
        Ok(self.auths.get(&addr).cloned())
    }

    fn start_forging(&mut self, tx_ids: &[TxId], _batch_num: BatchNum) -> Result<(), PoolError> {
        for tx_id in tx_ids {
            if let Some(tx) = self.txs.get_mut(tx_id) {
                tx.state = PoolTxState::Forging;
            }
        }
        Ok(())
    }

    fn update_txs_info(&mut self, txs: &[PoolL2Tx]) -> Result<(), PoolError> {
        for updated in txs {
            if let Some(tx) = self.txs.get_mut(&updated.tx_id) {
                tx.info = updated.info.clone();
                tx.error_code = updated.error_code;
                tx.error_type = updated.error_type.clone();
                if updated.state == PoolTxState::Invalid {
                    tx.state = PoolTxState::Invalid;
                }
            }
        }
        Ok(())
    }
}

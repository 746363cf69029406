use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};

use super::TxType;
use crate::{
    crypto::BjjPubkeyComp,
    errors::TxError,
    ids::{BatchNum, Idx, TokenId, TxId},
};

// L1 TRANSACTION
// ================================================================================================

/// A transaction originated (or synthesised) on the settlement chain.
///
/// L1 transactions cannot be rejected off-chain: the deposit part always settles, while the
/// transfer part is neutralised by zeroing its *effective amount* when a validity predicate
/// fails (see the processor's effective-amount rules). `user_origin` distinguishes queue
/// transactions forced by users from the coordinator-synthesised account creations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Tx {
    pub from_idx: Idx,
    pub to_idx: Idx,
    pub from_eth_addr: Address,
    pub from_bjj: BjjPubkeyComp,
    pub token_id: TokenId,
    pub amount: U256,
    pub deposit_amount: U256,
    /// Position within the forge queue (user origin) or within the batch's coordinator
    /// section.
    pub position: usize,
    pub user_origin: bool,
    /// The queue this transaction waits in; set for user-origin transactions only.
    pub to_forge_l1_txs_num: Option<u64>,
    pub tx_type: TxType,
    /// Set by the processor before balances move; `None` until then.
    pub effective_amount: Option<U256>,
    /// Set by the processor before balances move; `None` until then.
    pub effective_deposit_amount: Option<U256>,
}

impl L1Tx {
    /// Returns a coordinator-synthesised `CreateAccountDeposit` with zero amounts, used to open
    /// fee-collection and recipient accounts.
    pub fn new_coordinator_create_account(
        from_eth_addr: Address,
        from_bjj: BjjPubkeyComp,
        token_id: TokenId,
        position: usize,
    ) -> Self {
        Self {
            from_idx: Idx::NONE,
            to_idx: Idx::NONE,
            from_eth_addr,
            from_bjj,
            token_id,
            amount: U256::zero(),
            deposit_amount: U256::zero(),
            position,
            user_origin: false,
            to_forge_l1_txs_num: None,
            tx_type: TxType::CreateAccountDeposit,
            effective_amount: None,
            effective_deposit_amount: None,
        }
    }

    /// Computes the transaction id from the queue coordinates (user origin) or the forging
    /// batch (coordinator origin).
    pub fn id(&self, batch_num: BatchNum) -> Result<TxId, TxError> {
        if self.user_origin {
            let queue = self.to_forge_l1_txs_num.ok_or(TxError::MissingQueueNumber)?;
            Ok(TxId::l1_user(queue, self.position))
        } else {
            Ok(TxId::l1_coord(batch_num, self.position))
        }
    }

    /// The amount that actually moved, once the processor has ruled.
    pub fn effective_amount(&self) -> U256 {
        self.effective_amount.unwrap_or(self.amount)
    }

    /// The deposit that actually settled, once the processor has ruled.
    pub fn effective_deposit_amount(&self) -> U256 {
        self.effective_deposit_amount.unwrap_or(self.deposit_amount)
    }
}

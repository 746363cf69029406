use core::fmt;

use ethereum_types::U256;
use serde::{Deserialize, Serialize};

use crate::ids::{Idx, Nonce, TxId};

mod l1;
pub use l1::L1Tx;

mod pool;
pub use pool::{PoolL2Tx, PoolTxState};

use crate::fee::FeeSelector;

// TRANSACTION TYPE
// ================================================================================================

/// The protocol transaction types.
///
/// The first six originate on the settlement chain (or are synthesised by the coordinator in
/// the same wire format); the last four live in the off-chain pool until forged.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    CreateAccountDeposit,
    Deposit,
    DepositTransfer,
    CreateAccountDepositTransfer,
    ForceTransfer,
    ForceExit,
    #[default]
    Transfer,
    TransferToEthAddr,
    TransferToBjj,
    Exit,
}

impl TxType {
    /// Returns true for the L1 types that create an account.
    pub fn creates_account(self) -> bool {
        matches!(self, Self::CreateAccountDeposit | Self::CreateAccountDepositTransfer)
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateAccountDeposit => "CreateAccountDeposit",
            Self::Deposit => "Deposit",
            Self::DepositTransfer => "DepositTransfer",
            Self::CreateAccountDepositTransfer => "CreateAccountDepositTransfer",
            Self::ForceTransfer => "ForceTransfer",
            Self::ForceExit => "ForceExit",
            Self::Transfer => "Transfer",
            Self::TransferToEthAddr => "TransferToEthAddr",
            Self::TransferToBjj => "TransferToBJJ",
            Self::Exit => "Exit",
        };
        f.write_str(name)
    }
}

// FORGED L2 TRANSACTION
// ================================================================================================

/// The forged form of an L2 transaction: what remains once pool metadata is stripped.
///
/// This is what the synchronizer reads back from batch call-data and replays through the
/// processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Tx {
    pub tx_id: TxId,
    pub from_idx: Idx,
    pub to_idx: Idx,
    pub amount: U256,
    pub fee: FeeSelector,
    pub nonce: Nonce,
    pub tx_type: TxType,
}

impl L2Tx {
    /// Expands back into a pool transaction for replay; signature and pool metadata are gone.
    pub fn into_pool_tx(self) -> PoolL2Tx {
        PoolL2Tx {
            tx_id: self.tx_id,
            from_idx: self.from_idx,
            to_idx: self.to_idx,
            amount: self.amount,
            fee: self.fee,
            nonce: self.nonce,
            tx_type: self.tx_type,
            ..PoolL2Tx::default()
        }
    }
}

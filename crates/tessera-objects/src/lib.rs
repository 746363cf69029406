//! Core protocol types for the Tessera rollup.
//!
//! This crate defines everything whose encoding is observable on-chain: identifiers, accounts,
//! transactions, the compact amount codec, the fee table, and the compressed payloads that get
//! signed, plus the atomic-group plumbing shared between pool admission and transaction
//! selection. The state store and the batch engines build on top of it.

pub mod account;
pub mod atomic;
pub mod crypto;
pub mod transaction;

mod constants;
mod errors;
mod fee;
mod float16;
mod ids;

#[cfg(any(feature = "testing", test))]
pub mod testing;

// RE-EXPORTS
// ================================================================================================

pub use account::{Account, AccountCreationAuth};
pub use constants::*;
pub use errors::{AccountError, AmountError, CryptoError, IdError, TxError};
pub use fee::FeeSelector;
pub use float16::Float16;
pub use ids::{
    AtomicGroupId, BatchNum, Idx, Nonce, TokenId, TxId, TX_ID_PREFIX_L1_COORD,
    TX_ID_PREFIX_L1_USER, TX_ID_PREFIX_L2,
};
pub use transaction::{L1Tx, L2Tx, PoolL2Tx, PoolTxState, TxType};

pub use ethereum_types::{Address, U256};

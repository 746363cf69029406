use thiserror::Error;

use crate::ids::{Idx, Nonce, TokenId, TxId};

// ID ERROR
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("account index {0} does not fit into 48 bits")]
    IdxTooLarge(u64),
    #[error("nonce {0} does not fit into 40 bits")]
    NonceTooLarge(u64),
}

// AMOUNT ERROR
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount {0} is not representable as a compact float")]
    NotRepresentable(ethereum_types::U256),
    #[error("amount {0} exceeds the compact float exponent range")]
    ExponentOverflow(ethereum_types::U256),
    #[error("fee computation overflowed for amount {amount} and selector {selector}")]
    FeeOverflow {
        amount: ethereum_types::U256,
        selector: u8,
    },
}

// CRYPTO ERROR
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("poseidon hash failed: {0}")]
    Poseidon(String),
    #[error("compressed point does not decode to a curve point")]
    InvalidPoint,
    #[error("compressed signature does not decode")]
    InvalidSignature,
}

// TRANSACTION ERROR
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("transaction destination is malformed")]
    MalformedDestination,
    #[error("transaction declares type {declared} but its fields infer {inferred}")]
    TypeMismatch { declared: String, inferred: String },
    #[error("transaction declares id {declared} but its fields recompute to {computed}")]
    TxIdMismatch { declared: TxId, computed: TxId },
    #[error("request offset 0 cannot link a transaction into an atomic group")]
    RequestOffsetZero,
    #[error("request offset {0} is outside the protocol range 1..=7")]
    RequestOffsetOutOfRange(u8),
    #[error(
        "request offset of the transaction at position {position} points outside the group \
         (resolved position {resolved})"
    )]
    RequestOffsetOutOfBounds { position: usize, resolved: isize },
    #[error("l1 transaction of type {0} cannot be synthesised by the coordinator")]
    NotACoordinatorType(String),
    #[error("user-origin l1 transaction has no forge-queue number")]
    MissingQueueNumber,
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ACCOUNT ERROR
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("account {idx} nonce would move backwards from {current} to {new}")]
    NonceNotMonotonic { idx: Idx, current: Nonce, new: Nonce },
    #[error("account {idx} token id is immutable ({current} != {new})")]
    TokenIdChanged {
        idx: Idx,
        current: TokenId,
        new: TokenId,
    },
    #[error("account {0} key material (bjj or eth address) is immutable")]
    KeysChanged(Idx),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

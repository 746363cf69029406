use core::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::IdError;

// ACCOUNT INDEX
// ================================================================================================

/// A 48-bit account index into the state tree.
///
/// Indexes 0 and 1 are reserved by the protocol: 0 marks "no account" (and, as the source of an
/// L1 transaction, requests account creation), 1 is the exit pseudo-account. Regular accounts
/// start at [IDX_USER_THRESHOLD](Idx::USER_THRESHOLD) and are allocated sequentially without
/// gaps.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Idx(u64);

impl Idx {
    /// Number of bytes in the canonical big-endian encoding.
    pub const NUM_BYTES: usize = 6;

    /// The "no account / create account" sentinel.
    pub const NONE: Self = Self(0);

    /// The exit pseudo-account targeted by `Exit` and `ForceExit` transactions.
    pub const EXIT: Self = Self(1);

    /// First index available to user accounts; everything below is protocol-reserved.
    pub const USER_THRESHOLD: Self = Self(256);

    const MAX: u64 = (1 << 48) - 1;

    /// Returns a new [Idx] or an error if the value does not fit into 48 bits.
    pub fn new(value: u64) -> Result<Self, IdError> {
        if value > Self::MAX {
            return Err(IdError::IdxTooLarge(value));
        }
        Ok(Self(value))
    }

    /// Returns the underlying integer value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for indexes at or above the user threshold.
    pub const fn is_user(self) -> bool {
        self.0 >= Self::USER_THRESHOLD.0
    }

    /// Returns the canonical 6-byte big-endian encoding.
    pub fn to_bytes(self) -> [u8; Self::NUM_BYTES] {
        let be = self.0.to_be_bytes();
        be[2..8].try_into().expect("6-byte slice of an 8-byte array")
    }

    /// Parses an index from its 6-byte big-endian encoding.
    pub fn from_bytes(bytes: [u8; Self::NUM_BYTES]) -> Self {
        let mut be = [0u8; 8];
        be[2..8].copy_from_slice(&bytes);
        Self(u64::from_be_bytes(be))
    }
}

impl TryFrom<u64> for Idx {
    type Error = IdError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Idx> for u64 {
    fn from(idx: Idx) -> Self {
        idx.0
    }
}

impl fmt::Display for Idx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// TOKEN ID
// ================================================================================================

/// A 32-bit token identifier assigned by the settlement contract at token registration.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TokenId(pub u32);

impl TokenId {
    /// Returns the canonical 4-byte big-endian encoding.
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// NONCE
// ================================================================================================

/// A 40-bit account nonce; strictly increasing, one step per forged L2 transaction.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Nonce(u64);

impl Nonce {
    /// Number of bytes in the canonical big-endian encoding.
    pub const NUM_BYTES: usize = 5;

    const MAX: u64 = (1 << 40) - 1;

    /// Returns a new [Nonce] or an error if the value does not fit into 40 bits.
    pub fn new(value: u64) -> Result<Self, IdError> {
        if value > Self::MAX {
            return Err(IdError::NonceTooLarge(value));
        }
        Ok(Self(value))
    }

    /// Returns the underlying integer value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the nonce incremented by one.
    ///
    /// # Errors
    /// Returns an error if the increment would exceed the 40-bit range.
    pub fn incremented(self) -> Result<Self, IdError> {
        Self::new(self.0 + 1)
    }

    /// Returns the canonical 5-byte big-endian encoding.
    pub fn to_bytes(self) -> [u8; Self::NUM_BYTES] {
        let be = self.0.to_be_bytes();
        be[3..8].try_into().expect("5-byte slice of an 8-byte array")
    }
}

impl TryFrom<u64> for Nonce {
    type Error = IdError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// BATCH NUMBER
// ================================================================================================

/// Monotonic batch counter; one batch produces one state root.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BatchNum(pub u64);

impl BatchNum {
    /// Returns the next batch number.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for BatchNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// TRANSACTION ID
// ================================================================================================

/// Prefix byte of an L1 transaction id originated by a user on the settlement chain.
pub const TX_ID_PREFIX_L1_USER: u8 = 0x00;
/// Prefix byte of an L1 transaction id synthesised by the coordinator.
pub const TX_ID_PREFIX_L1_COORD: u8 = 0x01;
/// Prefix byte of an L2 transaction id.
pub const TX_ID_PREFIX_L2: u8 = 0x02;

/// A 12-byte transaction identifier.
///
/// The first byte encodes the origin of the transaction. For L2 transactions the rest is the
/// sender index (6 bytes) followed by the nonce (5 bytes), which makes the id recomputable from
/// the transaction alone. For L1 transactions the rest is a truncated digest over the queue
/// coordinates.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TxId(pub [u8; 12]);

impl TxId {
    /// The all-zero id, used for unset `rq_tx_id` references.
    pub const EMPTY: Self = Self([0u8; 12]);

    /// Computes the id of an L2 transaction from its sender index and nonce.
    pub fn l2(from_idx: Idx, nonce: Nonce) -> Self {
        let mut id = [0u8; 12];
        id[0] = TX_ID_PREFIX_L2;
        id[1..7].copy_from_slice(&from_idx.to_bytes());
        id[7..12].copy_from_slice(&nonce.to_bytes());
        Self(id)
    }

    /// Computes the id of an L1 transaction sent by a user, from the number of the forge-queue
    /// it waits in and its position within that queue.
    pub fn l1_user(to_forge_l1_txs_num: u64, position: usize) -> Self {
        Self::l1(TX_ID_PREFIX_L1_USER, to_forge_l1_txs_num, position)
    }

    /// Computes the id of an L1 transaction synthesised by the coordinator for a given batch and
    /// position.
    pub fn l1_coord(batch_num: BatchNum, position: usize) -> Self {
        Self::l1(TX_ID_PREFIX_L1_COORD, batch_num.0, position)
    }

    fn l1(prefix: u8, seq: u64, position: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seq.to_be_bytes());
        hasher.update((position as u16).to_be_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; 12];
        id[0] = prefix;
        id[1..12].copy_from_slice(&digest[..11]);
        Self(id)
    }

    /// Returns true if this is the all-zero id.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

// ATOMIC GROUP ID
// ================================================================================================

/// Opaque 32-byte hash identifying a bundle of L2 transactions that must forge together.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AtomicGroupId(pub [u8; 32]);

impl AtomicGroupId {
    /// The all-zero id carried by non-atomic transactions.
    pub const EMPTY: Self = Self([0u8; 32]);

    /// Returns true if this is the all-zero id.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Display for AtomicGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

// TESTS
// ================================================================================================

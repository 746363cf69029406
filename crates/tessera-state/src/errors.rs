use tessera_objects::{AccountError, BatchNum, CryptoError, Idx};
use thiserror::Error;

// MERKLE ERROR
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("key {0} already has a leaf in the tree")]
    KeyAlreadyExists(u64),
    #[error("key {0} has no leaf in the tree")]
    KeyNotFound(u64),
    #[error("insertion for key {0} ran past the maximum tree depth")]
    ReachedMaxLevel(u64),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// STATE ERROR
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("account index {0} not found")]
    IdxNotFound(Idx),
    #[error("account index {0} already exists")]
    IdxAlreadyExists(Idx),
    #[error("account index {0} is below the user threshold")]
    IdxBelowThreshold(Idx),
    #[error("account index {got} breaks the sequential allocation (next is {expected})")]
    IdxNotSequential { expected: Idx, got: Idx },
    #[error("no account matches the given address/key coordinates")]
    CoordinatesNotFound,
    #[error("checkpoint for batch {0} not found")]
    CheckpointNotFound(BatchNum),
    #[error("cannot reset forward to batch {target} from batch {current}")]
    ResetForward { current: BatchNum, target: BatchNum },
    #[error("operation requires a merkle tree but this store runs without one")]
    NoMerkleTree,
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

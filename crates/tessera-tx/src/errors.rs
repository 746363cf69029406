use ethereum_types::{Address, U256};
use tessera_objects::{AmountError, Idx, Nonce, TokenId, TxError};
use tessera_state::StateError;
use thiserror::Error;

// POOL ERROR
// ================================================================================================

/// Storage-level failure of a pool backend. Fatal for the current batch; the caller resets and
/// retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool storage failure: {0}")]
    Storage(String),
}

// PROCESSOR ERROR
// ================================================================================================

/// An invariant violated during deterministic batch replay. These abort the batch: the
/// selection that produced the input was supposed to make them impossible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    #[error("batch holds {got} transactions but the circuit fits {max}")]
    TooManyTxs { got: usize, max: u32 },
    #[error("batch holds {got} L1 transactions but the circuit fits {max}")]
    TooManyL1Txs { got: usize, max: u32 },
    #[error("coordinator index {0} has no account")]
    CoordIdxNotFound(Idx),
    #[error("token {0} is covered by more than one coordinator index")]
    DuplicateCoordToken(TokenId),
    #[error("transaction type {0} cannot appear in the L1 section")]
    UnexpectedL1Type(String),
    #[error("transaction type {0} cannot appear in the L2 section")]
    UnexpectedL2Type(String),
    #[error("destination of the transaction resolves to no account")]
    DestinationNotFound,
    #[error("account {idx} nonce is {expected} but the transaction carries {got}")]
    NonceMismatch { idx: Idx, expected: Nonce, got: Nonce },
    #[error("account {idx} holds token {account} but the transaction moves token {tx}")]
    TokenMismatch {
        idx: Idx,
        account: TokenId,
        tx: TokenId,
    },
    #[error("account {idx} balance {balance} cannot cover {required}")]
    BalanceInsufficient {
        idx: Idx,
        balance: U256,
        required: U256,
    },
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Crypto(#[from] tessera_objects::CryptoError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    State(#[from] StateError),
}

// SELECTOR ERROR
// ================================================================================================

/// A fatal selection failure; per-transaction problems are returned as discard annotations
/// instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    State(#[from] StateError),
}

// ADMISSION ERROR
// ================================================================================================

/// A bad-request failure at pool admission; the submission is rejected wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("single-transaction submissions cannot carry request fields")]
    RqFieldsInSingleSubmission,
    #[error("an atomic submission needs at least two transactions")]
    SingleTxInAtomicSubmission,
    #[error("the transactions do not form a single atomic group")]
    TxsNotAtomic,
    #[error("request offset of transaction {position} points outside the submission")]
    RqOffsetOutOfBounds { position: usize },
    #[error("sender account {0} not found")]
    SenderNotFound(Idx),
    #[error("transaction token {tx} does not match sender account token {account}")]
    TokenMismatch { tx: TokenId, account: TokenId },
    #[error("transaction nonce {tx} is below the account nonce {account}")]
    NonceTooLow { tx: Nonce, account: Nonce },
    #[error("wrong signature")]
    InvalidSignature,
    #[error("destination account {0} not found")]
    RecipientNotFound(Idx),
    #[error("destination token {recipient} does not match transaction token {tx}")]
    RecipientTokenMismatch { tx: TokenId, recipient: TokenId },
    #[error("destination address {0} has neither an account for the token nor an authorization")]
    DestinationNotReachable(Address),
    #[error("exit transactions with zero amount are rejected")]
    ExitZeroAmount,
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

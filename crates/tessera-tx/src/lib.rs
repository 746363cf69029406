//! Batch execution and transaction selection for the Tessera rollup.
//!
//! [TxProcessor](processor::TxProcessor) deterministically replays one batch onto a state
//! store; [TxSelector](selector::TxSelector) decides what goes into that batch, working a pool
//! behind the [TxPool](pool::TxPool) trait; [admission] holds the checks a pool runs before a
//! submission is persisted at all.

pub mod admission;
pub mod pool;
pub mod processor;
pub mod selector;

mod errors;

// RE-EXPORTS
// ================================================================================================

pub use errors::{AdmissionError, PoolError, ProcessorError, SelectorError};
pub use pool::{MemPool, TxPool};
pub use processor::{Config, ExitInfo, ProcessTxOutput, TxProcessor, ZkInputs};
pub use selector::{CoordAccount, Selection, TxSelector};

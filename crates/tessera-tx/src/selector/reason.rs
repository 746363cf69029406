//! Discard annotation codes written back to pool rows.
//!
//! A transaction left out of a batch carries one of these codes plus a message; unforgeable
//! ones also flip the pool row to the invalid state, everything else stays pending for the
//! next batch.

use tessera_objects::{PoolL2Tx, PoolTxState};

pub const INVALID_ATOMIC_GROUP: i32 = 1;
pub const FAILED_ATOMIC_GROUP: i32 = 2;
pub const SENDER_NOT_FOUND: i32 = 3;
pub const TOKEN_MISMATCH: i32 = 4;
pub const NONCE_TOO_LOW: i32 = 5;
pub const NONCE_IN_FUTURE: i32 = 6;
pub const INSUFFICIENT_BALANCE: i32 = 7;
pub const BATCH_FULL: i32 = 8;
pub const MISSING_AUTH: i32 = 9;
pub const RECIPIENT_NOT_FOUND: i32 = 10;
pub const EXIT_ZERO_AMOUNT: i32 = 11;
pub const PENDING_CREATION: i32 = 12;
pub const FEE_OVERFLOW: i32 = 13;
pub const PROCESSOR_REJECTED: i32 = 14;
pub const MALFORMED: i32 = 15;

/// Returns the stable label for a code.
pub fn kind(code: i32) -> &'static str {
    match code {
        INVALID_ATOMIC_GROUP => "invalid-atomic-group",
        FAILED_ATOMIC_GROUP => "failed-atomic-group",
        SENDER_NOT_FOUND => "sender-not-found",
        TOKEN_MISMATCH => "token-mismatch",
        NONCE_TOO_LOW => "nonce-too-low",
        NONCE_IN_FUTURE => "nonce-in-future",
        INSUFFICIENT_BALANCE => "insufficient-balance",
        BATCH_FULL => "batch-full",
        MISSING_AUTH => "missing-account-creation-auth",
        RECIPIENT_NOT_FOUND => "recipient-not-found",
        EXIT_ZERO_AMOUNT => "exit-zero-amount",
        PENDING_CREATION => "pending-account-creation",
        FEE_OVERFLOW => "fee-overflow",
        PROCESSOR_REJECTED => "processor-rejected",
        MALFORMED => "malformed",
        _ => "unknown",
    }
}

/// Stamps a discard annotation onto a transaction. Unforgeable transactions are marked invalid
/// so the pool retires them; the rest keep their pending state.
pub fn annotate(tx: &mut PoolL2Tx, code: i32, message: impl Into<String>, unforgeable: bool) {
    tx.error_code = code;
    tx.error_type = kind(code).to_string();
    tx.info = message.into();
    if unforgeable {
        tx.state = PoolTxState::Invalid;
    }
}

//! Key encoding for the `RocksDB` column families.
//!
//! Numeric ids are big-endian so that byte order matches numeric order.

use telecare_billing_core::{GatewayReference, PlanId, TransactionId, UserId};

/// Create a plan key.
#[must_use]
pub fn plan_key(plan_id: PlanId) -> [u8; 8] {
    plan_id.get().to_be_bytes()
}

/// Create a user key. Also used for subscriptions, which are one per user.
#[must_use]
pub fn user_key(user_id: UserId) -> [u8; 8] {
    user_id.get().to_be_bytes()
}

/// Create a ledger key from a gateway reference.
#[must_use]
pub fn transaction_key(reference: &GatewayReference) -> Vec<u8> {
    reference.as_str().as_bytes().to_vec()
}

/// Create a user-transaction index key.
///
/// Format: `user_id (8 bytes) || transaction_id (16 bytes)`
///
/// ULIDs are time-ordered, so a user's rows sort by creation time.
#[must_use]
pub fn user_transaction_key(user_id: UserId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&user_key(user_id));
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all ledger rows for a user.
#[must_use]
pub fn user_transactions_prefix(user_id: UserId) -> Vec<u8> {
    user_key(user_id).to_vec()
}

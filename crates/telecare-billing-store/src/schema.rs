//! Column families of the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Catalog plans, keyed by `plan_id` (big-endian).
    pub const PLANS: &str = "plans";

    /// Known users, keyed by `user_id` (big-endian). Value is empty.
    pub const USERS: &str = "users";

    /// Ledger rows, keyed by gateway reference.
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: ledger rows by user, keyed by `user_id || transaction_id`.
    /// Value is the gateway reference.
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";

    /// Subscriptions, keyed by `user_id` (big-endian).
    pub const SUBSCRIPTIONS: &str = "subscriptions";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::PLANS,
        cf::USERS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_USER,
        cf::SUBSCRIPTIONS,
    ]
}

//! Storage layer for telecare billing.
//!
//! The reconciliation engine talks to storage through [`Store`] and the [`UnitOfWork`] it
//! hands out. Everything written inside one unit of work commits together or not at all;
//! dropping a unit of work without calling [`UnitOfWork::commit`] rolls it back.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`. The ledger's serialization point is the unique index
//!   on `payment_transactions.gateway_reference` plus `SELECT ... FOR UPDATE`.
//! - [`MemoryStore`]: in-process, for tests and local development.
//! - `RocksStore` (feature `rocksdb-backend`): embedded single-node storage with column
//!   families, committing each unit of work as one `WriteBatch`.
//!
//! The single-process backends serialize units of work behind a store-wide writer guard.
//!
//! # Example
//!
//! ```no_run
//! use telecare_billing_store::{MemoryStore, Store, UserDirectory};
//! use telecare_billing_core::UserId;
//!
//! # async fn demo() -> telecare_billing_store::Result<()> {
//! let store = MemoryStore::new();
//! let user = UserId::new(11).expect("positive id");
//! store.register_user(user).await?;
//! assert!(store.user_exists(user).await?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use telecare_billing_core::{
    GatewayReference, PaymentTransaction, Plan, PlanId, Subscription, UserId,
};

/// Read access to the plan catalog.
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    /// Get a plan by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_plan(&self, plan_id: PlanId) -> Result<Option<Plan>>;

    /// List every plan, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_plans(&self) -> Result<Vec<Plan>>;
}

/// Existence checks against the platform's users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Whether a user with this id exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn user_exists(&self, user_id: UserId) -> Result<bool>;
}

/// The subscription view consumed by session scheduling.
#[async_trait]
pub trait SubscriptionStatus: Send + Sync {
    /// The user's subscription if it is active and unexpired right now.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn current_subscription(&self, user_id: UserId) -> Result<Option<Subscription>>;
}

/// Result of claiming a ledger row for a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    /// The row as it now exists, locked for this unit of work.
    pub transaction: PaymentTransaction,
    /// Whether the row was inserted by this claim.
    pub is_new: bool,
}

/// The storage trait defining all database operations.
#[async_trait]
pub trait Store: PlanCatalog + UserDirectory + SubscriptionStatus {
    // =========================================================================
    // Units of Work
    // =========================================================================

    /// Start an atomic unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>>;

    // =========================================================================
    // Ledger Reads
    // =========================================================================

    /// Get a ledger row by gateway reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_transaction(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<PaymentTransaction>>;

    /// List rows carrying a review flag, most recently flagged first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_flagged_transactions(&self, limit: usize) -> Result<Vec<PaymentTransaction>>;

    /// List rows for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions_by_user(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>>;

    // =========================================================================
    // Subscription Reads
    // =========================================================================

    /// Get a user's subscription row regardless of validity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_subscription(&self, user_id: UserId) -> Result<Option<Subscription>>;

    // =========================================================================
    // Catalog and Directory Administration
    // =========================================================================

    /// Insert or replace a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_plan(&self, plan: &Plan) -> Result<()>;

    /// Remove a plan from the catalog.
    ///
    /// Subscriptions and ledger rows pointing at it keep existing with `plan_id` cleared.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the plan doesn't exist.
    async fn delete_plan(&self, plan_id: PlanId) -> Result<()>;

    /// Record a user id as known. Registering twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn register_user(&self, user_id: UserId) -> Result<()>;
}

/// One atomic storage transaction.
///
/// Reads the engine needs while a unit of work is open go through the unit of work itself, so a
/// backend with pooled connections never needs a second connection per notification.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Whether a user with this id exists, read inside this unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn user_exists(&mut self, user_id: UserId) -> Result<bool>;

    /// Get a plan by id. A returned plan can't be deleted until this unit of work ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_plan(&mut self, plan_id: PlanId) -> Result<Option<Plan>>;

    /// List every plan, ordered by id. Returned plans can't be deleted until this unit of
    /// work ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_plans(&mut self) -> Result<Vec<Plan>>;

    /// Insert `candidate` unless a row with its gateway reference exists, then return the row
    /// for that reference locked for the rest of this unit of work.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if a concurrent writer won the insert in a way the
    /// backend cannot resolve in place.
    async fn claim_transaction(&mut self, candidate: PaymentTransaction) -> Result<Claim>;

    /// Overwrite a claimed ledger row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn save_transaction(&mut self, transaction: &PaymentTransaction) -> Result<()>;

    /// Get the user's subscription row, locked for the rest of this unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn subscription_for_update(&mut self, user_id: UserId) -> Result<Option<Subscription>>;

    /// Insert or overwrite the user's subscription row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if another writer created the row concurrently.
    async fn save_subscription(&mut self, subscription: &Subscription) -> Result<()>;

    /// Make every write of this unit of work visible at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is applied in that case.
    async fn commit(self: Box<Self>) -> Result<()>;
}

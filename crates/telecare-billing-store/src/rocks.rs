//! `RocksDB` storage implementation.
//!
//! Embedded single-node storage. Units of work are serialized by a store-wide writer guard;
//! their writes are staged in memory and land as one `WriteBatch` on commit.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use telecare_billing_core::{
    GatewayReference, PaymentTransaction, Plan, PlanId, Subscription, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{Claim, PlanCatalog, Store, SubscriptionStatus, UnitOfWork, UserDirectory};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    writer: Arc<Mutex<()>>,
}

#[derive(Default)]
struct StagedWrites {
    transactions: HashMap<GatewayReference, PaymentTransaction>,
    subscriptions: HashMap<UserId, Subscription>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_value<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn scan_values<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, data) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            values.push(Self::deserialize(&data)?);
        }
        Ok(values)
    }

    fn read_transaction(&self, reference: &GatewayReference) -> Result<Option<PaymentTransaction>> {
        self.get_value(cf::TRANSACTIONS, &keys::transaction_key(reference))
    }

    fn read_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        self.get_value(cf::SUBSCRIPTIONS, &keys::user_key(user_id))
    }

    /// Write staged rows and their user index entries atomically.
    fn apply(&self, staged: &StagedWrites) -> Result<()> {
        let batch = self.batch_for(staged)?;
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn batch_for(&self, staged: &StagedWrites) -> Result<WriteBatch> {
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let cf_subs = self.cf(cf::SUBSCRIPTIONS)?;

        let mut batch = WriteBatch::default();
        for tx in staged.transactions.values() {
            batch.put_cf(
                &cf_tx,
                keys::transaction_key(&tx.gateway_reference),
                Self::serialize(tx)?,
            );
            if let Some(user_id) = tx.user_id {
                batch.put_cf(
                    &cf_by_user,
                    keys::user_transaction_key(user_id, &tx.id),
                    tx.gateway_reference.as_str().as_bytes(),
                );
            }
        }
        for sub in staged.subscriptions.values() {
            batch.put_cf(&cf_subs, keys::user_key(sub.user_id), Self::serialize(sub)?);
        }
        Ok(batch)
    }

    fn remove_plan(&self, plan_id: PlanId) -> Result<()> {
        let plan_key = keys::plan_key(plan_id);
        if self.get_value::<Plan>(cf::PLANS, &plan_key)?.is_none() {
            return Err(StoreError::NotFound {
                entity: "plan",
                id: plan_id.to_string(),
            });
        }

        let now = Utc::now();
        let mut staged = StagedWrites::default();
        for mut tx in self.scan_values::<PaymentTransaction>(cf::TRANSACTIONS)? {
            if tx.plan_id == Some(plan_id) {
                tx.plan_id = None;
                tx.updated_at = now;
                staged.transactions.insert(tx.gateway_reference.clone(), tx);
            }
        }
        for mut sub in self.scan_values::<Subscription>(cf::SUBSCRIPTIONS)? {
            if sub.plan_id == Some(plan_id) {
                sub.plan_id = None;
                sub.updated_at = now;
                staged.subscriptions.insert(sub.user_id, sub);
            }
        }

        let mut batch = self.batch_for(&staged)?;
        let cf_plans = self.cf(cf::PLANS)?;
        batch.delete_cf(&cf_plans, plan_key);
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn user_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>> {
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let prefix = keys::user_transactions_prefix(user_id);

        let iter = self.db.iterator_cf(
            &cf_by_user,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut references: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            references.push(value.to_vec());
        }

        // Newest first
        references.reverse();

        let mut transactions = Vec::new();
        for raw in references.into_iter().skip(offset).take(limit) {
            let reference = String::from_utf8(raw)
                .map_err(|e| StoreError::Serialization(e.to_string()))
                .and_then(|s| {
                    GatewayReference::new(s).map_err(|e| StoreError::Serialization(e.to_string()))
                })?;
            if let Some(tx) = self.read_transaction(&reference)? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }
}

#[async_trait]
impl PlanCatalog for RocksStore {
    async fn get_plan(&self, plan_id: PlanId) -> Result<Option<Plan>> {
        self.get_value(cf::PLANS, &keys::plan_key(plan_id))
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        self.scan_values(cf::PLANS)
    }
}

#[async_trait]
impl UserDirectory for RocksStore {
    async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        let cf = self.cf(cf::USERS)?;
        let exists = self
            .db
            .get_cf(&cf, keys::user_key(user_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        Ok(exists)
    }
}

#[async_trait]
impl SubscriptionStatus for RocksStore {
    async fn current_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        let now = Utc::now();
        Ok(self
            .read_subscription(user_id)?
            .filter(|sub| sub.is_valid_at(now)))
    }
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Units of Work
    // =========================================================================

    async fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        Ok(Box::new(RocksUnitOfWork {
            _guard: guard,
            store: self,
            staged: StagedWrites::default(),
        }))
    }

    // =========================================================================
    // Ledger Reads
    // =========================================================================

    async fn get_transaction(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<PaymentTransaction>> {
        self.read_transaction(reference)
    }

    async fn list_flagged_transactions(&self, limit: usize) -> Result<Vec<PaymentTransaction>> {
        let mut flagged: Vec<PaymentTransaction> = self
            .scan_values::<PaymentTransaction>(cf::TRANSACTIONS)?
            .into_iter()
            .filter(|tx| tx.review.is_some())
            .collect();
        flagged.sort_by(|a, b| {
            let flagged_at = |tx: &PaymentTransaction| tx.review.as_ref().map(|r| r.flagged_at);
            flagged_at(b).cmp(&flagged_at(a)).then(b.id.cmp(&a.id))
        });
        flagged.truncate(limit);
        Ok(flagged)
    }

    async fn list_transactions_by_user(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>> {
        self.user_transactions(user_id, limit, offset)
    }

    // =========================================================================
    // Subscription Reads
    // =========================================================================

    async fn get_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        self.read_subscription(user_id)
    }

    // =========================================================================
    // Catalog and Directory Administration
    // =========================================================================

    async fn put_plan(&self, plan: &Plan) -> Result<()> {
        self.put_value(cf::PLANS, &keys::plan_key(plan.id), plan)
    }

    async fn delete_plan(&self, plan_id: PlanId) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.remove_plan(plan_id)
    }

    async fn register_user(&self, user_id: UserId) -> Result<()> {
        let cf = self.cf(cf::USERS)?;
        self.db
            .put_cf(&cf, keys::user_key(user_id), [])
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

struct RocksUnitOfWork<'a> {
    _guard: OwnedMutexGuard<()>,
    store: &'a RocksStore,
    staged: StagedWrites,
}

#[async_trait]
impl UnitOfWork for RocksUnitOfWork<'_> {
    // Plan deletion takes the writer guard, so these reads hold until commit.
    async fn user_exists(&mut self, user_id: UserId) -> Result<bool> {
        self.store.user_exists(user_id).await
    }

    async fn get_plan(&mut self, plan_id: PlanId) -> Result<Option<Plan>> {
        self.store.get_plan(plan_id).await
    }

    async fn list_plans(&mut self) -> Result<Vec<Plan>> {
        self.store.list_plans().await
    }

    async fn claim_transaction(&mut self, candidate: PaymentTransaction) -> Result<Claim> {
        let reference = candidate.gateway_reference.clone();

        if let Some(staged) = self.staged.transactions.get(&reference) {
            return Ok(Claim {
                transaction: staged.clone(),
                is_new: false,
            });
        }
        if let Some(existing) = self.store.read_transaction(&reference)? {
            return Ok(Claim {
                transaction: existing,
                is_new: false,
            });
        }

        self.staged
            .transactions
            .insert(reference, candidate.clone());
        Ok(Claim {
            transaction: candidate,
            is_new: true,
        })
    }

    async fn save_transaction(&mut self, transaction: &PaymentTransaction) -> Result<()> {
        self.staged
            .transactions
            .insert(transaction.gateway_reference.clone(), transaction.clone());
        Ok(())
    }

    async fn subscription_for_update(&mut self, user_id: UserId) -> Result<Option<Subscription>> {
        if let Some(staged) = self.staged.subscriptions.get(&user_id) {
            return Ok(Some(staged.clone()));
        }
        self.store.read_subscription(user_id)
    }

    async fn save_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        self.staged
            .subscriptions
            .insert(subscription.user_id, subscription.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.store.apply(&self.staged)
    }
}

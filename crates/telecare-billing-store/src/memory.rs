//! In-memory storage implementation.
//!
//! Ledger rows and subscriptions live behind one writer mutex. A unit of work holds that
//! mutex for its whole life and stages its writes; commit applies them in one step. The plan
//! catalog and user directory sit behind their own locks so the engine can read them while a
//! unit of work is open.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use telecare_billing_core::{
    GatewayReference, PaymentTransaction, Plan, PlanId, Subscription, UserId,
};

use crate::error::{Result, StoreError};
use crate::{Claim, PlanCatalog, Store, SubscriptionStatus, UnitOfWork, UserDirectory};

#[derive(Debug, Default)]
struct Ledger {
    transactions: HashMap<GatewayReference, PaymentTransaction>,
    subscriptions: HashMap<UserId, Subscription>,
}

#[derive(Debug, Default)]
struct Inner {
    ledger: Arc<Mutex<Ledger>>,
    plans: RwLock<BTreeMap<PlanId, Plan>>,
    users: RwLock<HashSet<UserId>>,
    commit_failures: Mutex<VecDeque<StoreError>>,
}

/// In-process storage. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with `error` and roll back.
    ///
    /// Queued failures are consumed one commit at a time.
    pub async fn fail_next_commit(&self, error: StoreError) {
        self.inner.commit_failures.lock().await.push_back(error);
    }
}

#[async_trait]
impl PlanCatalog for MemoryStore {
    async fn get_plan(&self, plan_id: PlanId) -> Result<Option<Plan>> {
        Ok(self.inner.plans.read().await.get(&plan_id).cloned())
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        Ok(self.inner.plans.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        Ok(self.inner.users.read().await.contains(&user_id))
    }
}

#[async_trait]
impl SubscriptionStatus for MemoryStore {
    async fn current_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        let now = Utc::now();
        Ok(self
            .inner
            .ledger
            .lock()
            .await
            .subscriptions
            .get(&user_id)
            .filter(|sub| sub.is_valid_at(now))
            .cloned())
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Units of Work
    // =========================================================================

    async fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        let guard = Arc::clone(&self.inner.ledger).lock_owned().await;
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            store: self,
            staged_transactions: HashMap::new(),
            staged_subscriptions: HashMap::new(),
        }))
    }

    // =========================================================================
    // Ledger Reads
    // =========================================================================

    async fn get_transaction(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<PaymentTransaction>> {
        Ok(self
            .inner
            .ledger
            .lock()
            .await
            .transactions
            .get(reference)
            .cloned())
    }

    async fn list_flagged_transactions(&self, limit: usize) -> Result<Vec<PaymentTransaction>> {
        let ledger = self.inner.ledger.lock().await;
        let mut flagged: Vec<_> = ledger
            .transactions
            .values()
            .filter(|tx| tx.review.is_some())
            .cloned()
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
        let ledger = self.inner.ledger.lock().await;
        let mut rows: Vec<_> = ledger
            .transactions
            .values()
            .filter(|tx| tx.user_id == Some(user_id))
            .cloned()
            .collect();
        // ULIDs sort by creation time.
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    // =========================================================================
    // Subscription Reads
    // =========================================================================

    async fn get_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        Ok(self
            .inner
            .ledger
            .lock()
            .await
            .subscriptions
            .get(&user_id)
            .cloned())
    }

    // =========================================================================
    // Catalog and Directory Administration
    // =========================================================================

    async fn put_plan(&self, plan: &Plan) -> Result<()> {
        self.inner.plans.write().await.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn delete_plan(&self, plan_id: PlanId) -> Result<()> {
        if self.inner.plans.write().await.remove(&plan_id).is_none() {
            return Err(StoreError::NotFound {
                entity: "plan",
                id: plan_id.to_string(),
            });
        }

        let mut ledger = self.inner.ledger.lock().await;
        let now = Utc::now();
        for tx in ledger.transactions.values_mut() {
            if tx.plan_id == Some(plan_id) {
                tx.plan_id = None;
                tx.updated_at = now;
            }
        }
        for sub in ledger.subscriptions.values_mut() {
            if sub.plan_id == Some(plan_id) {
                sub.plan_id = None;
                sub.updated_at = now;
            }
        }
        Ok(())
    }

    async fn register_user(&self, user_id: UserId) -> Result<()> {
        self.inner.users.write().await.insert(user_id);
        Ok(())
    }
}

struct MemoryUnitOfWork<'a> {
    guard: OwnedMutexGuard<Ledger>,
    store: &'a MemoryStore,
    staged_transactions: HashMap<GatewayReference, PaymentTransaction>,
    staged_subscriptions: HashMap<UserId, Subscription>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork<'_> {
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

        if let Some(existing) = self
            .staged_transactions
            .get(&reference)
            .or_else(|| self.guard.transactions.get(&reference))
        {
            return Ok(Claim {
                transaction: existing.clone(),
                is_new: false,
            });
        }

        self.staged_transactions
            .insert(reference, candidate.clone());
        Ok(Claim {
            transaction: candidate,
            is_new: true,
        })
    }

    async fn save_transaction(&mut self, transaction: &PaymentTransaction) -> Result<()> {
        self.staged_transactions
            .insert(transaction.gateway_reference.clone(), transaction.clone());
        Ok(())
    }

    async fn subscription_for_update(&mut self, user_id: UserId) -> Result<Option<Subscription>> {
        Ok(self
            .staged_subscriptions
            .get(&user_id)
            .or_else(|| self.guard.subscriptions.get(&user_id))
            .cloned())
    }

    async fn save_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        self.staged_subscriptions
            .insert(subscription.user_id, subscription.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if let Some(error) = self.store.inner.commit_failures.lock().await.pop_front() {
            tracing::debug!(%error, "Injected commit failure, rolling back");
            return Err(error);
        }

        let Self {
            mut guard,
            staged_transactions,
            staged_subscriptions,
            ..
        } = *self;
        guard.transactions.extend(staged_transactions);
        guard.subscriptions.extend(staged_subscriptions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use telecare_billing_core::{
        Currency, LedgerUpdate, ReviewKind, SessionCredits, TransactionStatus,
    };

    fn plan(id: i64) -> Plan {
        Plan {
            id: PlanId::new(id).unwrap(),
            name: format!("Plan {id}"),
            price: Decimal::from(100),
            currency: Currency::new("MWK").unwrap(),
            duration_days: 30,
            credits: SessionCredits::new(4, 2, 1),
        }
    }

    fn candidate(reference: &str) -> PaymentTransaction {
        let update = LedgerUpdate {
            reference: GatewayReference::new(reference).unwrap(),
            gateway_transaction_id: None,
            amount: Decimal::from(97),
            currency: Currency::new("MWK").unwrap(),
            status: TransactionStatus::Pending,
            payment_method: None,
            payment_channel: None,
            paid_at: None,
            user_id: None,
            plan_id: None,
            raw_payload: serde_json::Value::Null,
        };
        PaymentTransaction::open(&update, Utc::now())
    }

    #[tokio::test]
    async fn claim_inserts_once() {
        let store = MemoryStore::new();

        let mut uow = store.begin().await.unwrap();
        let first = uow.claim_transaction(candidate("REF-1")).await.unwrap();
        assert!(first.is_new);
        let again = uow.claim_transaction(candidate("REF-1")).await.unwrap();
        assert!(!again.is_new);
        assert_eq!(again.transaction.id, first.transaction.id);
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let later = uow.claim_transaction(candidate("REF-1")).await.unwrap();
        assert!(!later.is_new);
        assert_eq!(later.transaction.id, first.transaction.id);
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut uow = store.begin().await.unwrap();
            uow.claim_transaction(candidate("REF-1")).await.unwrap();
        }
        let reference = GatewayReference::new("REF-1").unwrap();
        assert!(store.get_transaction(&reference).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failure_discards_writes() {
        let store = MemoryStore::new();
        store
            .fail_next_commit(StoreError::Database("disk on fire".into()))
            .await;

        let mut uow = store.begin().await.unwrap();
        uow.claim_transaction(candidate("REF-1")).await.unwrap();
        assert!(uow.commit().await.is_err());

        let reference = GatewayReference::new("REF-1").unwrap();
        assert!(store.get_transaction(&reference).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_plan_clears_references() {
        let store = MemoryStore::new();
        store.put_plan(&plan(5)).await.unwrap();

        let mut tx = candidate("REF-1");
        tx.plan_id = Some(PlanId::new(5).unwrap());
        let mut uow = store.begin().await.unwrap();
        uow.claim_transaction(tx).await.unwrap();
        uow.commit().await.unwrap();

        store.delete_plan(PlanId::new(5).unwrap()).await.unwrap();

        let reference = GatewayReference::new("REF-1").unwrap();
        let row = store.get_transaction(&reference).await.unwrap().unwrap();
        assert_eq!(row.plan_id, None);
        assert!(store.get_plan(PlanId::new(5).unwrap()).await.unwrap().is_none());
        assert!(matches!(
            store.delete_plan(PlanId::new(5).unwrap()).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn flagged_rows_are_listed_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut uow = store.begin().await.unwrap();
        for (i, reference) in ["REF-A", "REF-B", "REF-C"].into_iter().enumerate() {
            let mut tx = candidate(reference);
            if i != 1 {
                tx.flag(
                    ReviewKind::AmountAnomaly,
                    "low",
                    now + chrono::Duration::seconds(i64::try_from(i).unwrap()),
                );
            }
            uow.claim_transaction(tx).await.unwrap();
        }
        uow.commit().await.unwrap();

        let flagged = store.list_flagged_transactions(10).await.unwrap();
        let refs: Vec<_> = flagged
            .iter()
            .map(|tx| tx.gateway_reference.as_str())
            .collect();
        assert_eq!(refs, ["REF-C", "REF-A"]);
    }

    #[tokio::test]
    async fn catalog_reads_do_not_wait_for_open_unit_of_work() {
        let store = MemoryStore::new();
        store.put_plan(&plan(5)).await.unwrap();
        store.register_user(UserId::new(11).unwrap()).await.unwrap();

        let _uow = store.begin().await.unwrap();
        assert!(store.get_plan(PlanId::new(5).unwrap()).await.unwrap().is_some());
        assert!(store.user_exists(UserId::new(11).unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn unit_of_work_reads_catalog_while_holding_ledger() {
        let store = MemoryStore::new();
        store.put_plan(&plan(5)).await.unwrap();
        store.register_user(UserId::new(11).unwrap()).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        assert!(uow.user_exists(UserId::new(11).unwrap()).await.unwrap());
        assert!(!uow.user_exists(UserId::new(12).unwrap()).await.unwrap());
        assert!(uow.get_plan(PlanId::new(5).unwrap()).await.unwrap().is_some());
        assert_eq!(uow.list_plans().await.unwrap().len(), 1);
        uow.commit().await.unwrap();
    }
}

//! PostgreSQL storage implementation.
//!
//! A unit of work is one `sqlx` transaction. Ledger claims use
//! `INSERT ... ON CONFLICT (gateway_reference) DO NOTHING` followed by `SELECT ... FOR UPDATE`,
//! so concurrent deliveries of one reference queue on the row lock instead of racing.

use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use telecare_billing_core::{
    Currency, GatewayReference, PaymentTransaction, Plan, PlanId, ReviewFlag, SessionCredits,
    Subscription, SubscriptionId, UserId,
};

use crate::error::{Result, StoreError};
use crate::{Claim, PlanCatalog, Store, SubscriptionStatus, UnitOfWork, UserDirectory};

const PLAN_COLUMNS: &str =
    "id, name, price, currency, duration_days, text_sessions, voice_calls, video_calls";

const TRANSACTION_COLUMNS: &str = "id, gateway_reference, gateway_transaction_id, amount, \
    currency, status, payment_method, payment_channel, raw_payload, user_id, plan_id, \
    plan_snapshot, review_kind, review_detail, flagged_at, delivery_count, created_at, paid_at, \
    updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, plan_name, plan_price, plan_currency, \
    status, start_date, end_date, text_sessions_remaining, voice_calls_remaining, \
    video_calls_remaining, total_text_sessions, total_voice_calls, total_video_calls, \
    payment_metadata, funding_reference, activated_at, created_at, updated_at";

/// PostgreSQL-backed storage.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Check connectivity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PlanCatalog for PgStore {
    async fn get_plan(&self, plan_id: PlanId) -> Result<Option<Plan>> {
        sqlx::query_as::<_, PlanRow>(&format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1"))
            .bind(plan_id.get())
            .fetch_optional(&self.pool)
            .await?
            .map(Plan::try_from)
            .transpose()
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        sqlx::query_as::<_, PlanRow>(&format!("SELECT {PLAN_COLUMNS} FROM plans ORDER BY id"))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Plan::try_from)
            .collect()
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id.get())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl SubscriptionStatus for PgStore {
    async fn current_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 AND status = 'active' AND end_date > now()"
        ))
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?
        .map(Subscription::try_from)
        .transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Units of Work
    // =========================================================================

    async fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    // =========================================================================
    // Ledger Reads
    // =========================================================================

    async fn get_transaction(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE gateway_reference = $1"
        ))
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(PaymentTransaction::try_from)
        .transpose()
    }

    async fn list_flagged_transactions(&self, limit: usize) -> Result<Vec<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions \
             WHERE review_kind IS NOT NULL ORDER BY flagged_at DESC, id DESC LIMIT $1"
        ))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PaymentTransaction::try_from)
        .collect()
    }

    async fn list_transactions_by_user(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions \
             WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id.get())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PaymentTransaction::try_from)
        .collect()
    }

    // =========================================================================
    // Subscription Reads
    // =========================================================================

    async fn get_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"
        ))
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?
        .map(Subscription::try_from)
        .transpose()
    }

    // =========================================================================
    // Catalog and Directory Administration
    // =========================================================================

    async fn put_plan(&self, plan: &Plan) -> Result<()> {
        sqlx::query(
            "INSERT INTO plans \
                 (id, name, price, currency, duration_days, text_sessions, voice_calls, video_calls) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 name = EXCLUDED.name, price = EXCLUDED.price, currency = EXCLUDED.currency, \
                 duration_days = EXCLUDED.duration_days, \
                 text_sessions = EXCLUDED.text_sessions, voice_calls = EXCLUDED.voice_calls, \
                 video_calls = EXCLUDED.video_calls, updated_at = now()",
        )
        .bind(plan.id.get())
        .bind(&plan.name)
        .bind(plan.price)
        .bind(plan.currency.as_str())
        .bind(i64::from(plan.duration_days))
        .bind(i64::from(plan.credits.text))
        .bind(i64::from(plan.credits.voice))
        .bind(i64::from(plan.credits.video))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_plan(&self, plan_id: PlanId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE payment_transactions SET plan_id = NULL, updated_at = now() WHERE plan_id = $1",
        )
        .bind(plan_id.get())
        .execute(&mut *tx)
        .await?;

        // subscriptions.plan_id is cleared by ON DELETE SET NULL.
        let deleted = sqlx::query("DELETE FROM plans WHERE id = $1")
            .bind(plan_id.get())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "plan",
                id: plan_id.to_string(),
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn register_user(&self, user_id: UserId) -> Result<()> {
        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(user_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn user_exists(&mut self, user_id: UserId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id.get())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    // FOR KEY SHARE blocks DELETE until commit but lets catalog edits through.
    async fn get_plan(&mut self, plan_id: PlanId) -> Result<Option<Plan>> {
        sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1 FOR KEY SHARE"
        ))
        .bind(plan_id.get())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Plan::try_from)
        .transpose()
    }

    async fn list_plans(&mut self) -> Result<Vec<Plan>> {
        sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans ORDER BY id FOR KEY SHARE"
        ))
        .fetch_all(&mut *self.tx)
        .await?
        .into_iter()
        .map(Plan::try_from)
        .collect()
    }

    async fn claim_transaction(&mut self, candidate: PaymentTransaction) -> Result<Claim> {
        let inserted = sqlx::query_scalar::<_, String>(
            "INSERT INTO payment_transactions \
                 (id, gateway_reference, gateway_transaction_id, amount, currency, status, \
                  payment_method, payment_channel, raw_payload, user_id, plan_id, plan_snapshot, \
                  review_kind, review_detail, flagged_at, delivery_count, created_at, paid_at, \
                  updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19) \
             ON CONFLICT (gateway_reference) DO NOTHING \
             RETURNING id",
        )
        .bind(candidate.id.to_string())
        .bind(candidate.gateway_reference.as_str())
        .bind(&candidate.gateway_transaction_id)
        .bind(candidate.amount)
        .bind(candidate.currency.as_str())
        .bind(candidate.status.as_str())
        .bind(&candidate.payment_method)
        .bind(&candidate.payment_channel)
        .bind(&candidate.raw_payload)
        .bind(candidate.user_id.map(UserId::get))
        .bind(candidate.plan_id.map(PlanId::get))
        .bind(candidate.plan_snapshot.as_ref().map(Json))
        .bind(candidate.review.as_ref().map(|r| r.kind.as_str()))
        .bind(candidate.review.as_ref().map(|r| r.detail.as_str()))
        .bind(candidate.review.as_ref().map(|r| r.flagged_at))
        .bind(i64::from(candidate.delivery_count))
        .bind(candidate.created_at)
        .bind(candidate.paid_at)
        .bind(candidate.updated_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions \
             WHERE gateway_reference = $1 FOR UPDATE"
        ))
        .bind(candidate.gateway_reference.as_str())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| {
            StoreError::Conflict(format!(
                "ledger row for {} vanished after insert race",
                candidate.gateway_reference
            ))
        })?;

        Ok(Claim {
            transaction: PaymentTransaction::try_from(row)?,
            is_new: inserted.is_some(),
        })
    }

    async fn save_transaction(&mut self, transaction: &PaymentTransaction) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE payment_transactions SET \
                 gateway_transaction_id = $2, amount = $3, currency = $4, status = $5, \
                 payment_method = $6, payment_channel = $7, raw_payload = $8, user_id = $9, \
                 plan_id = $10, plan_snapshot = $11, review_kind = $12, review_detail = $13, \
                 flagged_at = $14, delivery_count = $15, paid_at = $16, updated_at = $17 \
             WHERE gateway_reference = $1",
        )
        .bind(transaction.gateway_reference.as_str())
        .bind(&transaction.gateway_transaction_id)
        .bind(transaction.amount)
        .bind(transaction.currency.as_str())
        .bind(transaction.status.as_str())
        .bind(&transaction.payment_method)
        .bind(&transaction.payment_channel)
        .bind(&transaction.raw_payload)
        .bind(transaction.user_id.map(UserId::get))
        .bind(transaction.plan_id.map(PlanId::get))
        .bind(transaction.plan_snapshot.as_ref().map(Json))
        .bind(transaction.review.as_ref().map(|r| r.kind.as_str()))
        .bind(transaction.review.as_ref().map(|r| r.detail.as_str()))
        .bind(transaction.review.as_ref().map(|r| r.flagged_at))
        .bind(i64::from(transaction.delivery_count))
        .bind(transaction.paid_at)
        .bind(transaction.updated_at)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "transaction",
                id: transaction.gateway_reference.to_string(),
            });
        }
        Ok(())
    }

    async fn subscription_for_update(&mut self, user_id: UserId) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id.get())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Subscription::try_from)
        .transpose()
    }

    async fn save_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscriptions \
                 (id, user_id, plan_id, plan_name, plan_price, plan_currency, status, start_date, \
                  end_date, text_sessions_remaining, voice_calls_remaining, video_calls_remaining, \
                  total_text_sessions, total_voice_calls, total_video_calls, payment_metadata, \
                  funding_reference, activated_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20) \
             ON CONFLICT (id) DO UPDATE SET \
                 plan_id = EXCLUDED.plan_id, plan_name = EXCLUDED.plan_name, \
                 plan_price = EXCLUDED.plan_price, plan_currency = EXCLUDED.plan_currency, \
                 status = EXCLUDED.status, start_date = EXCLUDED.start_date, \
                 end_date = EXCLUDED.end_date, \
                 text_sessions_remaining = EXCLUDED.text_sessions_remaining, \
                 voice_calls_remaining = EXCLUDED.voice_calls_remaining, \
                 video_calls_remaining = EXCLUDED.video_calls_remaining, \
                 total_text_sessions = EXCLUDED.total_text_sessions, \
                 total_voice_calls = EXCLUDED.total_voice_calls, \
                 total_video_calls = EXCLUDED.total_video_calls, \
                 payment_metadata = EXCLUDED.payment_metadata, \
                 funding_reference = EXCLUDED.funding_reference, \
                 activated_at = EXCLUDED.activated_at, updated_at = EXCLUDED.updated_at",
        )
        .bind(*subscription.id.as_uuid())
        .bind(subscription.user_id.get())
        .bind(subscription.plan_id.map(PlanId::get))
        .bind(&subscription.plan_name)
        .bind(subscription.plan_price)
        .bind(subscription.plan_currency.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(i64::from(subscription.credits.text))
        .bind(i64::from(subscription.credits.voice))
        .bind(i64::from(subscription.credits.video))
        .bind(i64::from(subscription.total_credits.text))
        .bind(i64::from(subscription.total_credits.voice))
        .bind(i64::from(subscription.total_credits.video))
        .bind(&subscription.payment_metadata)
        .bind(&subscription.funding_reference)
        .bind(subscription.activated_at)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: i64,
    name: String,
    price: Decimal,
    currency: String,
    duration_days: i64,
    text_sessions: i64,
    voice_calls: i64,
    video_calls: i64,
}

impl TryFrom<PlanRow> for Plan {
    type Error = StoreError;

    fn try_from(row: PlanRow) -> Result<Self> {
        Ok(Self {
            id: PlanId::new(row.id).map_err(corrupt)?,
            name: row.name,
            price: row.price,
            currency: Currency::new(row.currency).map_err(corrupt)?,
            duration_days: to_u32(row.duration_days)?,
            credits: SessionCredits::new(
                to_u32(row.text_sessions)?,
                to_u32(row.voice_calls)?,
                to_u32(row.video_calls)?,
            ),
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: String,
    gateway_reference: String,
    gateway_transaction_id: Option<String>,
    amount: Decimal,
    currency: String,
    status: String,
    payment_method: Option<String>,
    payment_channel: Option<String>,
    raw_payload: serde_json::Value,
    user_id: Option<i64>,
    plan_id: Option<i64>,
    plan_snapshot: Option<Json<Plan>>,
    review_kind: Option<String>,
    review_detail: Option<String>,
    flagged_at: Option<DateTime<Utc>>,
    delivery_count: i64,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        let review = match (row.review_kind, row.flagged_at) {
            (Some(kind), Some(flagged_at)) => Some(ReviewFlag {
                kind: kind.parse().map_err(corrupt)?,
                detail: row.review_detail.unwrap_or_default(),
                flagged_at,
            }),
            _ => None,
        };

        Ok(Self {
            id: row.id.parse().map_err(corrupt)?,
            gateway_reference: GatewayReference::new(row.gateway_reference).map_err(corrupt)?,
            gateway_transaction_id: row.gateway_transaction_id,
            amount: row.amount,
            currency: Currency::new(row.currency).map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            payment_method: row.payment_method,
            payment_channel: row.payment_channel,
            raw_payload: row.raw_payload,
            user_id: row.user_id.map(UserId::new).transpose().map_err(corrupt)?,
            plan_id: row.plan_id.map(PlanId::new).transpose().map_err(corrupt)?,
            plan_snapshot: row.plan_snapshot.map(|Json(plan)| plan),
            review,
            delivery_count: to_u32(row.delivery_count)?,
            created_at: row.created_at,
            paid_at: row.paid_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: i64,
    plan_id: Option<i64>,
    plan_name: String,
    plan_price: Decimal,
    plan_currency: String,
    status: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    text_sessions_remaining: i64,
    voice_calls_remaining: i64,
    video_calls_remaining: i64,
    total_text_sessions: i64,
    total_voice_calls: i64,
    total_video_calls: i64,
    payment_metadata: serde_json::Value,
    funding_reference: Option<String>,
    activated_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Self {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(corrupt)?,
            plan_id: row.plan_id.map(PlanId::new).transpose().map_err(corrupt)?,
            plan_name: row.plan_name,
            plan_price: row.plan_price,
            plan_currency: Currency::new(row.plan_currency).map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            start_date: row.start_date,
            end_date: row.end_date,
            credits: SessionCredits::new(
                to_u32(row.text_sessions_remaining)?,
                to_u32(row.voice_calls_remaining)?,
                to_u32(row.video_calls_remaining)?,
            ),
            total_credits: SessionCredits::new(
                to_u32(row.total_text_sessions)?,
                to_u32(row.total_voice_calls)?,
                to_u32(row.total_video_calls)?,
            ),
            payment_metadata: row.payment_metadata,
            funding_reference: row.funding_reference,
            activated_at: row.activated_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn corrupt(err: impl Display) -> StoreError {
    StoreError::Serialization(err.to_string())
}

fn to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| corrupt(format!("counter out of range: {value}")))
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

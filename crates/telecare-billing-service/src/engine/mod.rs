//! Payment webhook reconciliation.
//!
//! Every notification runs as one unit of work:
//!
//! ```text
//! UNSEEN -> PENDING -> { COMPLETED, FAILED }
//! ```
//!
//! 1. Upsert the ledger row for the reference.
//! 2. Anything but a fresh transition into `completed` is committed and acknowledged.
//! 3. A fresh `completed` resolves the user and plan and reconciles the amount. Rejections keep
//!    the row `pending` with a review flag.
//! 4. An accepted amount completes the row and activates the subscription in the same commit.
//!
//! Storage conflicts re-run the whole unit of work, which then sees the winner's row.

pub mod activator;
pub mod ledger;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use telecare_billing_core::{
    ActivationKind, AmountReconciler, EngineConfig, GatewayReference, InvalidTolerance,
    NotificationError, NotificationPayload, PaymentTransaction, PlanId, ReconcileRejection,
    Reconciliation, ReviewKind, Transition, UserId,
};
use telecare_billing_store::{PlanCatalog, Store, StoreError, UnitOfWork, UserDirectory};

use crate::crypto::{constant_time_eq, hmac_sha256_hex, normalize_signature};
use crate::error::EngineError;
use activator::PlanSource;

/// Attempts per notification when storage reports a conflict.
const MAX_ATTEMPTS: u32 = 3;

/// How a notification was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The payment completed and the subscription was activated.
    Activated,
    /// The reference is already terminal; nothing changed.
    Duplicate,
    /// The payment is not final yet.
    Pending,
    /// The payment failed.
    Failed,
    /// The amount or currency did not reconcile; the row awaits review.
    AmountAnomaly,
    /// The event type is not processed.
    Ignored,
}

/// Result of handling one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineReport {
    /// How the notification was handled.
    pub outcome: Outcome,
    /// Gateway reference of the notification.
    pub reference: String,
    /// What activation did, when it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<ActivationKind>,
}

impl EngineReport {
    fn new(outcome: Outcome, reference: &GatewayReference) -> Self {
        Self {
            outcome,
            reference: reference.to_string(),
            activation: None,
        }
    }
}

/// Turns gateway notifications into ledger rows and subscription activations.
pub struct WebhookReconciliationEngine {
    store: Arc<dyn Store>,
    config: EngineConfig,
    reconciler: AmountReconciler,
}

impl WebhookReconciliationEngine {
    /// Create an engine over `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured fee tolerance is out of range.
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Result<Self, InvalidTolerance> {
        let reconciler = config.reconciler()?;
        Ok(Self {
            store,
            config,
            reconciler,
        })
    }

    /// The configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check a signature header against the raw body.
    ///
    /// # Errors
    ///
    /// Fails if no key is configured, no signature was sent, or it doesn't match.
    pub fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> Result<(), EngineError> {
        let key = self
            .config
            .gateway_signing_key
            .as_deref()
            .ok_or(EngineError::SigningKeyNotConfigured)?;
        let signature = signature
            .map(normalize_signature)
            .filter(|s| !s.is_empty())
            .ok_or(EngineError::MissingSignature)?;

        let expected = hmac_sha256_hex(key.as_bytes(), body).map_err(|e| {
            tracing::error!(error = %e, "Signing key rejected by HMAC");
            EngineError::SigningKeyNotConfigured
        })?;

        if constant_time_eq(&signature, &expected) {
            Ok(())
        } else {
            tracing::warn!("Webhook signature mismatch");
            Err(EngineError::InvalidSignature)
        }
    }

    /// Verify and handle a signed notification body.
    pub async fn handle_signed(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<EngineReport, EngineError> {
        self.verify_signature(body, signature)?;
        self.handle(body).await
    }

    /// Handle a notification body whose origin has already been established.
    pub async fn handle(&self, body: &[u8]) -> Result<EngineReport, EngineError> {
        let payload = NotificationPayload::from_slice(body)?;
        self.process(payload).await
    }

    /// Handle a validated notification.
    pub async fn process(&self, payload: NotificationPayload) -> Result<EngineReport, EngineError> {
        if !self.config.accepts_event(payload.event_type.as_deref()) {
            tracing::info!(
                reference = %payload.reference,
                event_type = ?payload.event_type,
                "Ignoring notification with unprocessed event type"
            );
            return Ok(EngineReport::new(Outcome::Ignored, &payload.reference));
        }

        if !self.config.supports_currency(&payload.currency) {
            return Err(NotificationError::UnsupportedCurrency(payload.currency).into());
        }

        tracing::info!(
            reference = %payload.reference,
            status = %payload.status,
            raw_status = %payload.raw_status,
            amount = %payload.amount,
            currency = %payload.currency,
            user_id = ?payload.user_id,
            plan_id = ?payload.plan_id,
            "Processing payment notification"
        );

        let mut attempt = 1;
        loop {
            match self.process_once(&payload).await {
                Err(EngineError::Store(StoreError::Conflict(msg))) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        reference = %payload.reference,
                        attempt,
                        conflict = %msg,
                        "Storage conflict, retrying notification"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn process_once(&self, payload: &NotificationPayload) -> Result<EngineReport, EngineError> {
        let now = Utc::now();
        let mut uow = self.store.begin().await?;

        let entry = ledger::upsert(uow.as_mut(), &payload.ledger_update(), now).await?;
        let mut transaction = entry.transaction;

        match entry.transition {
            Transition::Unchanged => {
                uow.commit().await?;
                let outcome = if entry.was_terminal {
                    Outcome::Duplicate
                } else {
                    Outcome::Pending
                };
                return Ok(EngineReport::new(outcome, &transaction.gateway_reference));
            }
            Transition::Failed => {
                uow.commit().await?;
                tracing::info!(reference = %transaction.gateway_reference, "Payment failed");
                return Ok(EngineReport::new(Outcome::Failed, &transaction.gateway_reference));
            }
            Transition::ToComplete => {}
        }

        let Some(user_id) = resolve_user(uow.as_mut(), &transaction).await? else {
            let user_id = transaction.user_id;
            let detail = user_id.map_or_else(
                || "notification names no user".to_string(),
                |id| format!("user {id} does not exist"),
            );
            flag_and_commit(uow, &mut transaction, ReviewKind::UnknownUser, detail).await?;
            return Err(EngineError::UnknownUser(user_id));
        };

        let Some((plan, source)) =
            activator::resolve_plan(uow.as_mut(), &self.reconciler, &transaction).await?
        else {
            let reference = transaction.gateway_reference.to_string();
            flag_and_commit(
                uow,
                &mut transaction,
                ReviewKind::UnknownPlan,
                "no plan could be resolved",
            )
            .await?;
            return Err(EngineError::UnknownPlan(reference));
        };

        let reconciliation = self.reconciler.reconcile(
            transaction.amount,
            &transaction.currency,
            plan.price,
            &plan.currency,
        );
        if let Reconciliation::Rejected(rejection) = reconciliation {
            tracing::warn!(
                reference = %transaction.gateway_reference,
                user_id = %user_id,
                plan_id = %plan.id,
                reason = %rejection,
                "Payment did not reconcile, holding for review"
            );
            let kind = match rejection {
                ReconcileRejection::CurrencyMismatch { .. } => ReviewKind::CurrencyMismatch,
                ReconcileRejection::BelowTolerance { .. }
                | ReconcileRejection::AboveCatalogPrice { .. } => ReviewKind::AmountAnomaly,
            };
            flag_and_commit(uow, &mut transaction, kind, rejection.to_string()).await?;
            return Ok(EngineReport::new(
                Outcome::AmountAnomaly,
                &transaction.gateway_reference,
            ));
        }

        transaction.user_id = Some(user_id);
        if source != PlanSource::Snapshot {
            transaction.plan_id = Some(plan.id);
        }
        if transaction.plan_snapshot.is_none() {
            transaction.plan_snapshot = Some(plan.clone());
        }
        transaction.complete(now);
        uow.save_transaction(&transaction).await?;

        let (_, kind) =
            activator::activate(uow.as_mut(), user_id, &plan, source, &transaction, now).await?;
        uow.commit().await?;

        Ok(EngineReport {
            outcome: Outcome::Activated,
            reference: transaction.gateway_reference.to_string(),
            activation: Some(kind),
        })
    }

    /// Open a checkout: write a pending placeholder under a fresh reference.
    ///
    /// The placeholder carries the catalog price and plan snapshot, so the later notification
    /// only has to quote the reference.
    pub async fn initiate(
        &self,
        user_id: UserId,
        plan_id: PlanId,
    ) -> Result<PaymentTransaction, EngineError> {
        if !self.store.user_exists(user_id).await? {
            return Err(EngineError::UnknownUser(Some(user_id)));
        }
        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or(EngineError::PlanNotFound(plan_id))?;

        let placeholder =
            PaymentTransaction::placeholder(GatewayReference::generate(), user_id, &plan, Utc::now());

        let mut uow = self.store.begin().await?;
        let claim = uow.claim_transaction(placeholder).await?;
        if !claim.is_new {
            return Err(StoreError::Conflict(format!(
                "reference {} already exists",
                claim.transaction.gateway_reference
            ))
            .into());
        }
        uow.commit().await?;

        tracing::info!(
            reference = %claim.transaction.gateway_reference,
            user_id = %user_id,
            plan_id = %plan_id,
            amount = %plan.price,
            "Payment initiated"
        );

        Ok(claim.transaction)
    }
}

async fn resolve_user(
    uow: &mut (dyn UnitOfWork + '_),
    transaction: &PaymentTransaction,
) -> Result<Option<UserId>, StoreError> {
    match transaction.user_id {
        Some(user_id) if uow.user_exists(user_id).await? => Ok(Some(user_id)),
        _ => Ok(None),
    }
}

async fn flag_and_commit(
    mut uow: Box<dyn UnitOfWork + '_>,
    transaction: &mut PaymentTransaction,
    kind: ReviewKind,
    detail: impl Into<String>,
) -> Result<(), StoreError> {
    transaction.flag(kind, detail, Utc::now());
    uow.save_transaction(transaction).await?;
    uow.commit().await?;
    tracing::warn!(
        reference = %transaction.gateway_reference,
        review = %kind,
        "Transaction flagged for review"
    );
    Ok(())
}

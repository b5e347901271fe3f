//! Plan resolution and subscription activation.

use chrono::{DateTime, Utc};
use telecare_billing_core::{
    ActivationKind, AmountReconciler, PaymentTransaction, Plan, Subscription, UserId,
};
use telecare_billing_store::{Result, UnitOfWork};

/// Where the terms of a payment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// The plan named on the ledger row, read from the catalog.
    Catalog,
    /// The snapshot stored on the ledger row; the plan is no longer in the catalog.
    Snapshot,
    /// No plan was named; the only catalog plan whose band contains the amount.
    AmountMatch,
}

/// Resolve the plan a completed payment pays for.
///
/// A plan id on the row is looked up in the catalog, falling back to the row's snapshot when the
/// plan has been deleted. Without any plan id, the amount is matched against the catalog and only
/// an unambiguous match is used.
///
/// Catalog reads go through `uow`, so a resolved plan stays in the catalog until activation
/// commits.
pub async fn resolve_plan(
    uow: &mut (dyn UnitOfWork + '_),
    reconciler: &AmountReconciler,
    transaction: &PaymentTransaction,
) -> Result<Option<(Plan, PlanSource)>> {
    if let Some(plan_id) = transaction.plan_id {
        if let Some(plan) = uow.get_plan(plan_id).await? {
            return Ok(Some((plan, PlanSource::Catalog)));
        }
        return Ok(transaction
            .plan_snapshot
            .clone()
            .filter(|snapshot| snapshot.id == plan_id)
            .map(|snapshot| (snapshot, PlanSource::Snapshot)));
    }

    if let Some(snapshot) = &transaction.plan_snapshot {
        return Ok(Some((snapshot.clone(), PlanSource::Snapshot)));
    }

    let mut candidates = uow.list_plans().await?.into_iter().filter(|plan| {
        reconciler
            .reconcile(
                transaction.amount,
                &transaction.currency,
                plan.price,
                &plan.currency,
            )
            .is_accepted()
    });

    match (candidates.next(), candidates.next()) {
        (Some(plan), None) => {
            tracing::info!(
                reference = %transaction.gateway_reference,
                plan_id = %plan.id,
                amount = %transaction.amount,
                "Resolved plan from received amount"
            );
            Ok(Some((plan, PlanSource::AmountMatch)))
        }
        (Some(_), Some(_)) => {
            tracing::warn!(
                reference = %transaction.gateway_reference,
                amount = %transaction.amount,
                "Received amount matches several plans"
            );
            Ok(None)
        }
        (None, _) => Ok(None),
    }
}

/// Create, extend or renew the user's subscription for a completed payment.
///
/// Runs inside the same unit of work that completes the ledger row.
pub async fn activate(
    uow: &mut (dyn UnitOfWork + '_),
    user_id: UserId,
    plan: &Plan,
    source: PlanSource,
    funding: &PaymentTransaction,
    now: DateTime<Utc>,
) -> Result<(Subscription, ActivationKind)> {
    let (mut subscription, kind) = match uow.subscription_for_update(user_id).await? {
        Some(mut existing) => {
            let kind = existing.apply(plan, funding, now);
            (existing, kind)
        }
        None => (
            Subscription::start(user_id, plan, funding, now),
            ActivationKind::Created,
        ),
    };

    if source == PlanSource::Snapshot {
        subscription.plan_id = None;
    }

    uow.save_subscription(&subscription).await?;

    tracing::info!(
        user_id = %user_id,
        plan_id = %plan.id,
        reference = %funding.gateway_reference,
        kind = ?kind,
        end_date = %subscription.end_date,
        "Subscription activated"
    );

    Ok((subscription, kind))
}

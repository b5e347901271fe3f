//! Ledger upsert inside a unit of work.

use chrono::{DateTime, Utc};
use telecare_billing_core::{LedgerUpdate, PaymentTransaction, Transition};
use telecare_billing_store::{Result, UnitOfWork};

/// A ledger row after a notification was folded into it.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// The row, not yet saved if `transition` is [`Transition::ToComplete`].
    pub transaction: PaymentTransaction,
    /// Whether this notification created the row.
    pub is_new: bool,
    /// What the notification did to the status.
    pub transition: Transition,
    /// Whether the row was already terminal before this notification.
    pub was_terminal: bool,
}

/// Insert-if-absent by gateway reference, then merge the notification into the locked row.
///
/// The merged row is saved here; a [`Transition::ToComplete`] row is saved again by the caller
/// once it has been completed or flagged.
pub async fn upsert(
    uow: &mut (dyn UnitOfWork + '_),
    update: &LedgerUpdate,
    now: DateTime<Utc>,
) -> Result<LedgerEntry> {
    let claim = uow
        .claim_transaction(PaymentTransaction::open(update, now))
        .await?;

    let mut transaction = claim.transaction;
    let was_terminal = transaction.status.is_terminal();
    let transition = transaction.merge(update, now);
    uow.save_transaction(&transaction).await?;

    tracing::debug!(
        reference = %transaction.gateway_reference,
        is_new = claim.is_new,
        status = %transaction.status,
        delivery_count = transaction.delivery_count,
        ?transition,
        "Ledger row upserted"
    );

    Ok(LedgerEntry {
        transaction,
        is_new: claim.is_new,
        transition,
        was_terminal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use telecare_billing_core::{Currency, GatewayReference, TransactionStatus};
    use telecare_billing_store::{MemoryStore, Store};

    fn update(status: TransactionStatus) -> LedgerUpdate {
        LedgerUpdate {
            reference: GatewayReference::new("REF-L").unwrap(),
            gateway_transaction_id: None,
            amount: Decimal::from(97),
            currency: Currency::new("MWK").unwrap(),
            status,
            payment_method: None,
            payment_channel: None,
            paid_at: None,
            user_id: None,
            plan_id: None,
            raw_payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn second_delivery_reuses_the_row() {
        let store = MemoryStore::new();

        let mut uow = store.begin().await.unwrap();
        let first = upsert(uow.as_mut(), &update(TransactionStatus::Pending), Utc::now())
            .await
            .unwrap();
        uow.commit().await.unwrap();
        assert!(first.is_new);
        assert_eq!(first.transition, Transition::Unchanged);

        let mut uow = store.begin().await.unwrap();
        let second = upsert(uow.as_mut(), &update(TransactionStatus::Failed), Utc::now())
            .await
            .unwrap();
        uow.commit().await.unwrap();
        assert!(!second.is_new);
        assert!(!second.was_terminal);
        assert_eq!(second.transition, Transition::Failed);
        assert_eq!(second.transaction.id, first.transaction.id);

        let stored = store
            .get_transaction(&GatewayReference::new("REF-L").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.delivery_count, 2);
    }
}

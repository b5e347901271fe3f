//! Boundary validation of gateway notifications.
//!
//! Gateway payloads are loosely typed: amounts arrive as numbers or strings, `meta` arrives as
//! an object or as a JSON-encoded string, and the same fact can live under several keys. All of
//! that is resolved here into a [`NotificationPayload`]. Nothing loosely typed travels further.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::{
    checked_amount, normalize, Currency, GatewayReference, IdError, InvalidCurrency, LedgerUpdate,
    PlanId, TransactionStatus, UserId,
};

/// A validated gateway notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    /// Idempotency key (`tx_ref`, or `reference` when absent).
    pub reference: GatewayReference,
    /// Secondary gateway id (`charge_id` or `transaction_id`).
    pub transaction_id: Option<String>,
    /// Amount received.
    pub amount: Decimal,
    /// Currency received.
    pub currency: Currency,
    /// Status token exactly as sent.
    pub raw_status: String,
    /// Normalized status.
    pub status: TransactionStatus,
    /// Lower-cased event type, when sent.
    pub event_type: Option<String>,
    /// Payment method descriptor.
    pub payment_method: Option<String>,
    /// Payment channel descriptor.
    pub payment_channel: Option<String>,
    /// Gateway completion time.
    pub paid_at: Option<DateTime<Utc>>,
    /// Paying user from `meta`.
    pub user_id: Option<UserId>,
    /// Purchased plan from `meta`.
    pub plan_id: Option<PlanId>,
    /// The body as received.
    pub raw: serde_json::Value,
}

/// Why a notification body was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    /// The body is not JSON.
    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),

    /// The body is JSON but has the wrong shape.
    #[error("unexpected payload shape: {0}")]
    InvalidShape(String),

    /// A required field is absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The reference is not usable as an idempotency key.
    #[error("invalid reference: {0}")]
    InvalidReference(IdError),

    /// The amount is not a non-negative decimal the ledger can hold exactly.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The currency is not an ISO code.
    #[error(transparent)]
    InvalidCurrency(#[from] InvalidCurrency),

    /// The currency is valid but not accepted by this deployment.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(Currency),

    /// `meta` could not be decoded.
    #[error("invalid meta: {0}")]
    InvalidMeta(String),

    /// `meta.user_id` is not a positive integer.
    #[error("invalid user_id: {0}")]
    InvalidUserId(IdError),

    /// `meta.plan_id` is not a positive integer.
    #[error("invalid plan_id: {0}")]
    InvalidPlanId(IdError),
}

/// A JSON scalar sent as either a number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// `97`, `97.5`
    Number(serde_json::Number),
    /// `"97.50"`
    Text(String),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }
}

/// `meta` as sent: an object, or the same object JSON-encoded into a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MetaField {
    /// `{"user_id": 11}`
    Object(WireMeta),
    /// `"{\"user_id\":11}"`
    Encoded(String),
}

/// The `meta` keys we act on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireMeta {
    user_id: Option<Scalar>,
    plan_id: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
struct WireAuthorization {
    channel: Option<String>,
    completed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireNotification {
    tx_ref: Option<Scalar>,
    reference: Option<Scalar>,
    charge_id: Option<Scalar>,
    transaction_id: Option<Scalar>,
    amount: Option<Scalar>,
    currency: Option<String>,
    status: Option<String>,
    event_type: Option<String>,
    payment_method: Option<String>,
    payment_channel: Option<String>,
    paid_at: Option<String>,
    #[serde(default)]
    authorization: Option<WireAuthorization>,
    #[serde(default)]
    meta: Option<MetaField>,
}

impl NotificationPayload {
    /// Validate a raw request body.
    ///
    /// # Errors
    ///
    /// Returns a [`NotificationError`] describing the first problem found.
    pub fn from_slice(body: &[u8]) -> Result<Self, NotificationError> {
        let raw: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| NotificationError::InvalidJson(e.to_string()))?;
        Self::from_value(raw)
    }

    /// Validate an already-parsed JSON document.
    ///
    /// # Errors
    ///
    /// Returns a [`NotificationError`] describing the first problem found.
    pub fn from_value(raw: serde_json::Value) -> Result<Self, NotificationError> {
        if !raw.is_object() {
            return Err(NotificationError::InvalidShape(
                "expected a JSON object".to_string(),
            ));
        }
        let wire: WireNotification = serde_json::from_value(raw.clone())
            .map_err(|e| NotificationError::InvalidShape(e.to_string()))?;

        let reference = wire
            .tx_ref
            .map(Scalar::into_text)
            .filter(|s| !s.is_empty())
            .or_else(|| wire.reference.map(Scalar::into_text))
            .filter(|s| !s.is_empty())
            .ok_or(NotificationError::MissingField("tx_ref"))?;
        let reference =
            GatewayReference::new(reference).map_err(NotificationError::InvalidReference)?;

        let amount = parse_amount(wire.amount.ok_or(NotificationError::MissingField("amount"))?)?;

        let currency = Currency::new(
            wire.currency
                .filter(|s| !s.trim().is_empty())
                .ok_or(NotificationError::MissingField("currency"))?,
        )?;

        let raw_status = wire
            .status
            .filter(|s| !s.trim().is_empty())
            .ok_or(NotificationError::MissingField("status"))?;
        let status = normalize(&raw_status);

        let meta = match wire.meta {
            None => WireMeta::default(),
            Some(MetaField::Object(meta)) => meta,
            Some(MetaField::Encoded(text)) if text.trim().is_empty() => WireMeta::default(),
            Some(MetaField::Encoded(text)) => serde_json::from_str(&text)
                .map_err(|e| NotificationError::InvalidMeta(e.to_string()))?,
        };

        let user_id = meta
            .user_id
            .map(|v| v.into_text().parse::<UserId>())
            .transpose()
            .map_err(NotificationError::InvalidUserId)?;
        let plan_id = meta
            .plan_id
            .map(|v| v.into_text().parse::<PlanId>())
            .transpose()
            .map_err(NotificationError::InvalidPlanId)?;

        let authorization = wire.authorization.unwrap_or_default();
        let paid_at = wire
            .paid_at
            .or(authorization.completed_at)
            .and_then(|s| parse_timestamp(&s));

        Ok(Self {
            reference,
            transaction_id: wire
                .charge_id
                .or(wire.transaction_id)
                .map(Scalar::into_text)
                .filter(|s| !s.is_empty()),
            amount,
            currency,
            raw_status,
            status,
            event_type: wire
                .event_type
                .map(|e| e.trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty()),
            payment_method: non_empty(wire.payment_method),
            payment_channel: non_empty(wire.payment_channel.or(authorization.channel)),
            paid_at,
            user_id,
            plan_id,
            raw,
        })
    }

    /// The ledger fields carried by this notification.
    #[must_use]
    pub fn ledger_update(&self) -> LedgerUpdate {
        LedgerUpdate {
            reference: self.reference.clone(),
            gateway_transaction_id: self.transaction_id.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            status: self.status,
            payment_method: self.payment_method.clone(),
            payment_channel: self.payment_channel.clone(),
            paid_at: self.paid_at,
            user_id: self.user_id,
            plan_id: self.plan_id,
            raw_payload: self.raw.clone(),
        }
    }
}

fn parse_amount(value: Scalar) -> Result<Decimal, NotificationError> {
    let text = value.into_text();
    let amount = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| NotificationError::InvalidAmount(text.clone()))?;
    checked_amount(amount).map_err(|e| NotificationError::InvalidAmount(e.to_string()))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    tracing::warn!(value, "Ignoring unparseable gateway timestamp");
    None
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<NotificationPayload, NotificationError> {
        NotificationPayload::from_value(value)
    }

    #[test]
    fn parses_gateway_shape_with_encoded_meta() {
        let payload = parse(json!({
            "event_type": "API.Charge.Payment",
            "tx_ref": "REF-1",
            "charge_id": "ch_123",
            "amount": 97,
            "currency": "mwk",
            "status": "success",
            "meta": "{\"user_id\":\"11\",\"plan_id\":5}",
            "authorization": {"channel": "Mobile Money", "completed_at": "2026-01-02T10:00:00Z"}
        }))
        .unwrap();

        assert_eq!(payload.reference.as_str(), "REF-1");
        assert_eq!(payload.transaction_id.as_deref(), Some("ch_123"));
        assert_eq!(payload.amount, Decimal::from(97));
        assert_eq!(payload.currency.as_str(), "MWK");
        assert_eq!(payload.status, TransactionStatus::Completed);
        assert_eq!(payload.event_type.as_deref(), Some("api.charge.payment"));
        assert_eq!(payload.payment_channel.as_deref(), Some("Mobile Money"));
        assert_eq!(payload.user_id, Some(UserId::new(11).unwrap()));
        assert_eq!(payload.plan_id, Some(PlanId::new(5).unwrap()));
        assert!(payload.paid_at.is_some());
    }

    #[test]
    fn accepts_object_meta_and_string_amount() {
        let payload = parse(json!({
            "reference": "REF-2",
            "amount": "96.50",
            "currency": "MWK",
            "status": "pending",
            "meta": {"user_id": 11}
        }))
        .unwrap();

        assert_eq!(payload.reference.as_str(), "REF-2");
        assert_eq!(payload.amount, Decimal::from_str("96.5").unwrap());
        assert_eq!(payload.plan_id, None);
    }

    #[test]
    fn tx_ref_wins_over_reference() {
        let payload = parse(json!({
            "tx_ref": "TXN_A",
            "reference": "gw-1",
            "amount": 1,
            "currency": "MWK",
            "status": "pending"
        }))
        .unwrap();
        assert_eq!(payload.reference.as_str(), "TXN_A");
    }

    #[test]
    fn missing_fields_are_malformed() {
        let base = json!({"tx_ref": "R", "amount": 1, "currency": "MWK", "status": "success"});
        for field in ["tx_ref", "amount", "currency", "status"] {
            let mut body = base.clone();
            body.as_object_mut().unwrap().remove(field);
            assert!(
                matches!(parse(body), Err(NotificationError::MissingField(_))),
                "{field}"
            );
        }
    }

    #[test]
    fn rejects_bad_values() {
        let body = |amount: serde_json::Value, meta: serde_json::Value| {
            json!({"tx_ref": "R", "amount": amount, "currency": "MWK", "status": "success", "meta": meta})
        };

        assert!(matches!(
            parse(body(json!("abc"), json!({}))),
            Err(NotificationError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse(body(json!(-5), json!({}))),
            Err(NotificationError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse(body(json!("99999999999999"), json!({}))),
            Err(NotificationError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse(body(json!("96.996"), json!({}))),
            Err(NotificationError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse(body(json!(1), json!("{not json"))),
            Err(NotificationError::InvalidMeta(_))
        ));
        assert!(matches!(
            parse(body(json!(1), json!({"user_id": 0}))),
            Err(NotificationError::InvalidUserId(_))
        ));
    }

    #[test]
    fn non_object_bodies_are_rejected() {
        assert!(matches!(
            NotificationPayload::from_slice(b"[1,2]"),
            Err(NotificationError::InvalidShape(_))
        ));
        assert!(matches!(
            NotificationPayload::from_slice(b"not json"),
            Err(NotificationError::InvalidJson(_))
        ));
    }

    #[test]
    fn gateway_local_timestamps_are_read_as_utc() {
        let ts = parse_timestamp("2026-01-02 10:00:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-02T10:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }
}

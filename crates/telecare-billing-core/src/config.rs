//! Engine configuration.

use rust_decimal::Decimal;

use crate::{AmountReconciler, Currency, InvalidTolerance};

/// Event types processed when none are configured.
pub const DEFAULT_EVENT_TYPES: &[&str] = &["api.charge.payment", "checkout.payment"];

/// Settings the reconciliation engine is constructed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Largest gateway fee accepted, in percent of the catalog price.
    pub fee_tolerance_percent: Decimal,
    /// Currencies notifications may be denominated in.
    pub supported_currencies: Vec<Currency>,
    /// Shared HMAC key for notification signatures. Signed ingress is refused without it.
    pub gateway_signing_key: Option<String>,
    /// Lower-case event types that are processed. Others are acknowledged and ignored.
    pub accepted_event_types: Vec<String>,
}

impl EngineConfig {
    /// Build the amount reconciler for the configured tolerance.
    ///
    /// # Errors
    ///
    /// Returns an error if the tolerance is not a percentage below 100.
    pub fn reconciler(&self) -> Result<AmountReconciler, InvalidTolerance> {
        AmountReconciler::new(self.fee_tolerance_percent)
    }

    /// Whether `currency` is accepted by this deployment.
    #[must_use]
    pub fn supports_currency(&self, currency: &Currency) -> bool {
        self.supported_currencies.contains(currency)
    }

    /// Whether notifications with this event type are processed.
    ///
    /// Notifications without an event type are processed.
    #[must_use]
    pub fn accepts_event(&self, event_type: Option<&str>) -> bool {
        event_type.map_or(true, |event| {
            self.accepted_event_types
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(event))
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_tolerance_percent: Decimal::from(5),
            supported_currencies: vec![Currency::from_static("MWK")],
            gateway_signing_key: None,
            accepted_event_types: DEFAULT_EVENT_TYPES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

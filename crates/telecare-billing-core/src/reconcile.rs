//! Amount reconciliation against catalog prices.
//!
//! Gateways forward the amount *received* after deducting their processing fee, so the
//! figure in a notification is usually a little below the catalog price. A received amount is
//! accepted when it lies in `[price × (1 − tolerance), price]` and the currencies agree.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::Currency;

/// Outcome of reconciling a received amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The amount is acceptable. `fee` is the gap to the catalog price.
    Accepted {
        /// Catalog price minus received amount.
        fee: Decimal,
    },
    /// The amount cannot fund this plan.
    Rejected(ReconcileRejection),
}

impl Reconciliation {
    /// Whether the amount was accepted.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Why a received amount was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReconcileRejection {
    /// More was deducted than the tolerance allows.
    #[error("received {received} is below the accepted minimum {minimum} for price {price}")]
    BelowTolerance {
        /// Amount reported by the gateway.
        received: Decimal,
        /// Lowest acceptable amount.
        minimum: Decimal,
        /// Catalog price.
        price: Decimal,
    },

    /// The gateway reported more than the plan costs.
    #[error("received {received} exceeds price {price}")]
    AboveCatalogPrice {
        /// Amount reported by the gateway.
        received: Decimal,
        /// Catalog price.
        price: Decimal,
    },

    /// The payment was made in a different currency than the plan.
    #[error("received currency {received} does not match plan currency {expected}")]
    CurrencyMismatch {
        /// Currency reported by the gateway.
        received: Currency,
        /// Plan currency.
        expected: Currency,
    },
}

/// Validates received amounts within a configured fee tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountReconciler {
    tolerance_percent: Decimal,
}

impl AmountReconciler {
    /// Create a reconciler allowing fees up to `tolerance_percent` of the price.
    ///
    /// # Errors
    ///
    /// Returns an error unless `0 <= tolerance_percent < 100`.
    pub fn new(tolerance_percent: Decimal) -> Result<Self, InvalidTolerance> {
        if tolerance_percent.is_sign_negative() || tolerance_percent >= Decimal::ONE_HUNDRED {
            return Err(InvalidTolerance(tolerance_percent));
        }
        Ok(Self { tolerance_percent })
    }

    /// The configured tolerance in percent.
    #[must_use]
    pub const fn tolerance_percent(&self) -> Decimal {
        self.tolerance_percent
    }

    /// Lowest received amount accepted for `price`.
    #[must_use]
    pub fn minimum_for(&self, price: Decimal) -> Decimal {
        price * (Decimal::ONE_HUNDRED - self.tolerance_percent) / Decimal::ONE_HUNDRED
    }

    /// Reconcile `received` against a catalog `price`.
    #[must_use]
    pub fn reconcile(
        &self,
        received: Decimal,
        received_currency: &Currency,
        price: Decimal,
        price_currency: &Currency,
    ) -> Reconciliation {
        if received_currency != price_currency {
            return Reconciliation::Rejected(ReconcileRejection::CurrencyMismatch {
                received: received_currency.clone(),
                expected: price_currency.clone(),
            });
        }

        if received > price {
            return Reconciliation::Rejected(ReconcileRejection::AboveCatalogPrice {
                received,
                price,
            });
        }

        let minimum = self.minimum_for(price);
        if received < minimum {
            return Reconciliation::Rejected(ReconcileRejection::BelowTolerance {
                received,
                minimum,
                price,
            });
        }

        Reconciliation::Accepted {
            fee: price - received,
        }
    }
}

/// The tolerance is outside `[0, 100)`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fee tolerance must be in [0, 100) percent, got {0}")]
pub struct InvalidTolerance(pub Decimal);

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn mwk() -> Currency {
        Currency::new("MWK").unwrap()
    }

    #[test]
    fn three_percent_fee_is_accepted_at_five_percent_tolerance() {
        let reconciler = AmountReconciler::new(dec("5")).unwrap();
        let result = reconciler.reconcile(dec("97"), &mwk(), dec("100"), &mwk());
        assert_eq!(result, Reconciliation::Accepted { fee: dec("3") });
    }

    #[test]
    fn lower_bound_is_inclusive() {
        let reconciler = AmountReconciler::new(dec("3")).unwrap();
        assert!(reconciler
            .reconcile(dec("97"), &mwk(), dec("100"), &mwk())
            .is_accepted());
    }

    #[test]
    fn one_unit_below_bound_is_rejected() {
        let reconciler = AmountReconciler::new(dec("3")).unwrap();
        let result = reconciler.reconcile(dec("96.99"), &mwk(), dec("100"), &mwk());
        assert_eq!(
            result,
            Reconciliation::Rejected(ReconcileRejection::BelowTolerance {
                received: dec("96.99"),
                minimum: dec("97"),
                price: dec("100"),
            })
        );
    }

    #[test]
    fn tamper_sized_gap_is_rejected() {
        let reconciler = AmountReconciler::new(dec("5")).unwrap();
        assert!(!reconciler
            .reconcile(dec("10"), &mwk(), dec("100"), &mwk())
            .is_accepted());
    }

    #[test]
    fn overpayment_is_rejected() {
        let reconciler = AmountReconciler::new(dec("5")).unwrap();
        assert!(matches!(
            reconciler.reconcile(dec("100.01"), &mwk(), dec("100"), &mwk()),
            Reconciliation::Rejected(ReconcileRejection::AboveCatalogPrice { .. })
        ));
    }

    #[test]
    fn currency_must_match() {
        let reconciler = AmountReconciler::new(dec("5")).unwrap();
        let usd = Currency::new("USD").unwrap();
        assert!(matches!(
            reconciler.reconcile(dec("100"), &usd, dec("100"), &mwk()),
            Reconciliation::Rejected(ReconcileRejection::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn zero_tolerance_requires_exact_price() {
        let reconciler = AmountReconciler::new(Decimal::ZERO).unwrap();
        assert!(reconciler
            .reconcile(dec("100"), &mwk(), dec("100"), &mwk())
            .is_accepted());
        assert!(!reconciler
            .reconcile(dec("99.99"), &mwk(), dec("100"), &mwk())
            .is_accepted());
    }

    #[test]
    fn tolerance_must_be_a_percentage() {
        assert!(AmountReconciler::new(dec("-1")).is_err());
        assert!(AmountReconciler::new(dec("100")).is_err());
        assert!(AmountReconciler::new(dec("99.5")).is_ok());
    }
}

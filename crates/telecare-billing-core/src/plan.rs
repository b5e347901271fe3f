//! Catalog plan types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Currency, PlanId};

/// Session credit counters for the three consultation channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredits {
    /// Text consultation sessions.
    pub text: u32,
    /// Voice calls.
    pub voice: u32,
    /// Video calls.
    pub video: u32,
}

impl SessionCredits {
    /// Create a credit triple.
    #[must_use]
    pub const fn new(text: u32, voice: u32, video: u32) -> Self {
        Self { text, voice, video }
    }

    /// Add another grant on top of these counters.
    ///
    /// Counters saturate instead of wrapping.
    #[must_use]
    pub const fn plus(self, grant: Self) -> Self {
        Self {
            text: self.text.saturating_add(grant.text),
            voice: self.voice.saturating_add(grant.voice),
            video: self.video.saturating_add(grant.video),
        }
    }
}

/// A purchasable plan as listed in the catalog.
///
/// The same shape is stored on ledger rows as a snapshot of the terms the user paid for,
/// so activation still works after the plan is removed from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Catalog id.
    pub id: PlanId,
    /// Display name.
    pub name: String,
    /// Catalog price.
    pub price: Decimal,
    /// Price currency.
    pub currency: Currency,
    /// Validity granted per purchase, in days.
    pub duration_days: u32,
    /// Session credits granted per purchase.
    pub credits: SessionCredits,
}

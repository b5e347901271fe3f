//! Gateway status normalization.
//!
//! Gateways report payment state in their own vocabulary. Only tokens that positively mean
//! "money received" map to `Completed`; anything unrecognized maps to `Pending` so that new
//! vocabulary degrades to "no action" instead of an activation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Internal lifecycle status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Awaiting a confirmed outcome.
    Pending,
    /// Payment confirmed by the gateway. Terminal.
    Completed,
    /// Payment failed or was cancelled. Terminal.
    Failed,
}

impl TransactionStatus {
    /// Whether no further status change is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward step.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed | Self::Failed)
        )
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not one of the internal values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stored status: {0}")]
pub struct UnknownStoredStatus(pub String);

impl FromStr for TransactionStatus {
    type Err = UnknownStoredStatus;

    /// Parses the internal storage form only. Gateway tokens go through [`normalize`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStoredStatus(other.to_string())),
        }
    }
}

const COMPLETED_TOKENS: &[&str] = &["success", "successful", "confirmed", "completed", "paid"];

const FAILED_TOKENS: &[&str] = &[
    "failed",
    "failure",
    "declined",
    "cancelled",
    "canceled",
    "rejected",
    "reversed",
    "expired",
    "error",
];

const PENDING_TOKENS: &[&str] = &["pending", "processing", "initiated", "created"];

/// Map a raw gateway status token onto the internal lifecycle.
#[must_use]
pub fn normalize(raw: &str) -> TransactionStatus {
    let token = raw.trim().to_ascii_lowercase();

    if COMPLETED_TOKENS.contains(&token.as_str()) {
        TransactionStatus::Completed
    } else if FAILED_TOKENS.contains(&token.as_str()) {
        TransactionStatus::Failed
    } else {
        if !PENDING_TOKENS.contains(&token.as_str()) {
            tracing::warn!(raw_status = %raw, "Unrecognized gateway status, treating as pending");
        }
        TransactionStatus::Pending
    }
}

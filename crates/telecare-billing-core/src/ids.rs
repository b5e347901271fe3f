//! Identifier types for telecare billing.
//!
//! Every identifier is a distinct type. Users and plans share a numeric id space in the
//! platform database, so a bare `i64` is never accepted where one of them is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use ulid::{Generator, Ulid};

/// Process-wide monotonic ULID source, so ids generated in the same millisecond still sort in
/// creation order.
static ULIDS: Mutex<Generator> = Mutex::new(Generator::new());

fn next_ulid() -> Ulid {
    ULIDS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .generate()
        .unwrap_or_else(|_| Ulid::new())
}

/// Maximum accepted length of a gateway reference.
pub const MAX_REFERENCE_LEN: usize = 255;

/// A platform user identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct UserId(i64);

impl UserId {
    /// Create a `UserId` from a positive database id.
    ///
    /// # Errors
    ///
    /// Returns `IdError::NonPositive` for zero or negative values.
    pub const fn new(id: i64) -> Result<Self, IdError> {
        if id <= 0 {
            return Err(IdError::NonPositive);
        }
        Ok(Self(id))
    }

    /// Return the raw database id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().parse::<i64>().map_err(|_| IdError::NotNumeric)?;
        Self::new(id)
    }
}

impl TryFrom<i64> for UserId {
    type Error = IdError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for i64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// A catalog plan identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct PlanId(i64);

impl PlanId {
    /// Create a `PlanId` from a positive database id.
    ///
    /// # Errors
    ///
    /// Returns `IdError::NonPositive` for zero or negative values.
    pub const fn new(id: i64) -> Result<Self, IdError> {
        if id <= 0 {
            return Err(IdError::NonPositive);
        }
        Ok(Self(id))
    }

    /// Return the raw database id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlanId({})", self.0)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlanId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().parse::<i64>().map_err(|_| IdError::NotNumeric)?;
        Self::new(id)
    }
}

impl TryFrom<i64> for PlanId {
    type Error = IdError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PlanId> for i64 {
    fn from(id: PlanId) -> Self {
        id.0
    }
}

/// The gateway-assigned reference of a payment attempt.
///
/// This is the idempotency key of the ledger. It is always a string, even when a gateway
/// happens to send something that looks numeric.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GatewayReference(String);

impl GatewayReference {
    /// Create a reference, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is empty, too long, or contains control characters.
    pub fn new(value: impl AsRef<str>) -> Result<Self, IdError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(IdError::EmptyReference);
        }
        if trimmed.len() > MAX_REFERENCE_LEN {
            return Err(IdError::ReferenceTooLong(trimmed.len()));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(IdError::InvalidReference);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Generate a fresh reference for a payment initiated by this service.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("TXN_{}", next_ulid()))
    }

    /// Return the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for GatewayReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GatewayReference({})", self.0)
    }
}

impl fmt::Display for GatewayReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GatewayReference {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for GatewayReference {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GatewayReference> for String {
    fn from(reference: GatewayReference) -> Self {
        reference.0
    }
}

impl AsRef<[u8]> for GatewayReference {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// A ledger row identifier using ULID for time-ordering.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(Ulid);

impl TransactionId {
    /// Generate a new `TransactionId` with the current timestamp.
    ///
    /// Ids from one process are strictly increasing.
    #[must_use]
    pub fn generate() -> Self {
        Self(next_ulid())
    }

    /// Return the bytes of the ULID (16 bytes).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_bytes()
    }

    /// Create a `TransactionId` from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Ulid::from_bytes(bytes))
    }
}

impl FromStr for TransactionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
        Ok(Self(ulid))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TransactionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0.to_string()
    }
}

/// A subscription row identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(uuid::Uuid);

impl SubscriptionId {
    /// Create a new `SubscriptionId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random `SubscriptionId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for SubscriptionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SubscriptionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SubscriptionId> for String {
    fn from(id: SubscriptionId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// Numeric ids start at 1.
    #[error("id must be a positive integer")]
    NonPositive,

    /// The input is not an integer.
    #[error("id is not numeric")]
    NotNumeric,

    /// The reference is empty after trimming.
    #[error("reference is empty")]
    EmptyReference,

    /// The reference exceeds `MAX_REFERENCE_LEN`.
    #[error("reference is too long ({0} bytes)")]
    ReferenceTooLong(usize),

    /// The reference contains control characters.
    #[error("reference contains invalid characters")]
    InvalidReference,

    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}

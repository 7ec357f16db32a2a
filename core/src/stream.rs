//! Aggregate identities, stream identification and versioning types.
//!
//! Every aggregate instance owns exactly one event stream, identified by the
//! pair ([`AggregateType`], [`AggregateId`]) wrapped in a [`StreamId`].
//! Positions inside a stream are expressed as [`Version`]s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

/// Unique identifier of an aggregate instance.
///
/// # Validation
///
/// - `FromStr::from_str()`: Validates input (rejects empty strings)
/// - `From::from()` and `new()`: No validation (for internal use with trusted input)
///
/// # Examples
///
/// ```
/// use foldline_core::stream::AggregateId;
///
/// let id = AggregateId::new("station-1");
/// assert_eq!(id.as_str(), "station-1");
///
/// let parsed: AggregateId = "station-2".parse().unwrap();
/// assert_eq!(parsed, AggregateId::new("station-2"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateId(String);

impl AggregateId {
    /// Create a new `AggregateId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier (UUID v4).
    ///
    /// # Examples
    ///
    /// ```
    /// use foldline_core::stream::AggregateId;
    ///
    /// let a = AggregateId::generate();
    /// let b = AggregateId::generate();
    /// assert_ne!(a, b);
    /// ```
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the identifier into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AggregateId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseIdError("Aggregate ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for AggregateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AggregateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Type tag of an aggregate (e.g. `"WeatherStation"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateType(String);

impl AggregateType {
    /// Create a new `AggregateType`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the type tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AggregateType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AggregateType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a single event stream: one aggregate instance of one type.
///
/// # Examples
///
/// ```
/// use foldline_core::stream::StreamId;
///
/// let stream = StreamId::new("WeatherStation", "station-1");
/// assert_eq!(stream.to_string(), "WeatherStation/station-1");
/// assert_eq!(stream.aggregate_id().as_str(), "station-1");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    aggregate_type: AggregateType,
    aggregate_id: AggregateId,
}

impl StreamId {
    /// Create a stream identifier from its two parts.
    #[must_use]
    pub fn new(aggregate_type: impl Into<AggregateType>, aggregate_id: impl Into<AggregateId>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }

    /// The aggregate type of this stream.
    #[must_use]
    pub const fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    /// The aggregate instance of this stream.
    #[must_use]
    pub const fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.aggregate_id)
    }
}

/// Position in an event stream, used for optimistic concurrency and version gating.
///
/// `Version::INITIAL` (0) is the version of an aggregate or read model that has
/// not folded any events. The first event of a stream carries sequence number 1,
/// so after folding `n` events a consumer is at `Version::new(n)`.
///
/// # Examples
///
/// ```
/// use foldline_core::stream::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert!(v1.follows(v0));
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The initial version (0), before any event.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }

    /// True when `self` is exactly one past `previous`.
    #[must_use]
    pub const fn follows(self, previous: Self) -> bool {
        self.0 == previous.0 + 1
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl std::ops::Add<u64> for Version {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// Saturates at zero.
impl std::ops::Sub<u64> for Version {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_sub(rhs))
    }
}

//! Value types for the hierarchical ephemeral attribute model

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hierarchical scope an attribute belongs to, e.g. `["account", "<uuid>"]`
/// or `["domain", "<uuid>"]`. Immutable once built; never persisted on its
/// own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    segments: Vec<String>,
}

impl Location {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

/// An attribute name plus an optional per-value discriminator.
///
/// The dynamic component allows multiple concurrent values under one
/// attribute name, e.g. one entry per live auth token. Two keys are equal iff
/// both the name and the dynamic component match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeKey {
    name: String,
    dynamic_component: Option<String>,
}

impl AttributeKey {
    /// A single-valued attribute key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dynamic_component: None,
        }
    }

    /// A multi-valued attribute key discriminated by `component`.
    pub fn dynamic(name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dynamic_component: Some(component.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dynamic_component(&self) -> Option<&str> {
        self.dynamic_component.as_deref()
    }

    /// True iff the dynamic component is present.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic_component.is_some()
    }
}

/// When a written attribute stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Absolute wall-clock deadline in epoch milliseconds.
    Absolute(u64),
    /// Deadline relative to the moment of the write.
    Relative(Duration),
}

impl Expiration {
    /// Expiration at a given wall-clock instant.
    pub fn at(deadline: DateTime<Utc>) -> Self {
        Expiration::Absolute(deadline.timestamp_millis().max(0) as u64)
    }

    /// The absolute deadline in epoch milliseconds.
    pub fn absolute_millis(&self) -> u64 {
        match self {
            Expiration::Absolute(millis) => *millis,
            Expiration::Relative(duration) => {
                now_millis().saturating_add(duration.as_millis() as u64)
            }
        }
    }

    /// Milliseconds left until the deadline; non-positive when already past.
    pub fn relative_millis(&self) -> i64 {
        match self {
            Expiration::Absolute(millis) => *millis as i64 - now_millis() as i64,
            Expiration::Relative(duration) => duration.as_millis() as i64,
        }
    }
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// One attribute write: key, value, and optional expiration.
///
/// A `None` value is a deletion request, not a write of an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInput {
    key: AttributeKey,
    value: Option<String>,
    expiration: Option<Expiration>,
}

impl AttributeInput {
    /// A plain write with no expiration.
    pub fn new(key: AttributeKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: Some(value.into()),
            expiration: None,
        }
    }

    /// A write whose validity ends at `expiration`.
    pub fn expiring(key: AttributeKey, value: impl Into<String>, expiration: Expiration) -> Self {
        Self {
            key,
            value: Some(value.into()),
            expiration: Some(expiration),
        }
    }

    /// A null-valued input; stores treat it as "delete this key".
    pub fn tombstone(key: AttributeKey) -> Self {
        Self {
            key,
            value: None,
            expiration: None,
        }
    }

    pub fn key(&self) -> &AttributeKey {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn expiration(&self) -> Option<Expiration> {
        self.expiration
    }
}

/// Outcome of a lookup: the key plus the decoded value when present.
///
/// An absent attribute is a normal result; it is distinct from an attribute
/// present with an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResult {
    key: AttributeKey,
    value: Option<String>,
}

impl StoreResult {
    pub fn present(key: AttributeKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: Some(value.into()),
        }
    }

    pub fn absent(key: AttributeKey) -> Self {
        Self { key, value: None }
    }

    pub fn key(&self) -> &AttributeKey {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

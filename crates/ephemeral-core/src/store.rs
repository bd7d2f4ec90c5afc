//! The operation surface a backend adapter must provide

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AttributeInput, AttributeKey, Location, StoreResult};

/// Backend-agnostic ephemeral attribute store.
///
/// Implementations delegate durability and TTL enforcement to their backing
/// process. Absence of an attribute is a normal result, never an error;
/// connectivity failures surface as errors and must not be conflated with
/// absence.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Fetch one attribute.
    async fn get(&self, key: &AttributeKey, location: &Location) -> Result<StoreResult>;

    /// Write one attribute. A `None` value deletes the key instead; an
    /// already-expired input is skipped.
    async fn set(&self, input: &AttributeInput, location: &Location) -> Result<()>;

    /// Same contract as [`set`](Self::set): last write wins, no
    /// read-modify-write.
    async fn update(&self, input: &AttributeInput, location: &Location) -> Result<()>;

    /// Remove one attribute. `value` is accepted for interface symmetry with
    /// multi-valued stores; flat-key backends ignore it.
    async fn delete(&self, key: &AttributeKey, value: &str, location: &Location) -> Result<()>;

    /// True iff the raw key currently exists in the backend.
    async fn has(&self, key: &AttributeKey, location: &Location) -> Result<bool>;

    /// Reclaim expired entries. Backends with native expiry implement this as
    /// a no-op.
    async fn purge_expired(&self, key: &AttributeKey, location: &Location) -> Result<()>;

    /// Drop every attribute under `location` whose lifetime is not already
    /// bounded by a backend TTL.
    async fn delete_data(&self, location: &Location) -> Result<()>;
}

//! ephemeral-core: shared contract for ephemeral attribute stores
//!
//! An ephemeral attribute is a key-value fact with optional time-bounded
//! validity (auth tokens, CSRF crumbs, last-logon timestamps). This crate
//! defines the hierarchical attribute model, the [`EphemeralStore`] operation
//! surface, the configuration source consumed by backend factories, and the
//! common error taxonomy. Backend adapters such as `ephemeral-ssdb` implement
//! these contracts.

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{ConfigSource, PoolSettings, StaticConfig};
pub use error::{Result, StoreError};
pub use store::EphemeralStore;
pub use types::{AttributeInput, AttributeKey, Expiration, Location, StoreResult};

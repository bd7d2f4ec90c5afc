//! ephemeral-ssdb: SSDB backend for ephemeral attributes
//!
//! Stores hierarchical ephemeral attributes as flat key-value pairs in SSDB,
//! which speaks the Redis wire protocol. An auth token for an account is
//! stored under a key like
//! `account|47e456be-b00a-465e-a1db-4b53e64fa|authTokens|366778080`, with the
//! expiration (when one exists) folded into the stored value. TTL-bearing
//! attributes lean on the backend's native key expiration; this crate never
//! sweeps expired keys itself.

pub mod codec;
pub mod factory;
pub mod pool;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::ValueCodec;
pub use factory::SsdbStoreFactory;
pub use pool::{BackendUrl, ConnectionPool, PooledConnection, BACKEND_SCHEME};
pub use store::SsdbEphemeralStore;

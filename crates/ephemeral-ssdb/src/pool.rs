//! Connection pooling and retry for the SSDB backend
//!
//! Every store operation takes one connection out of the pool through an RAII
//! guard and returns it on every exit path. A stale connection is only
//! detectable by using it, so recovery is coarse: discard the whole pool,
//! redial from the original endpoint, and retry the command exactly once.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ephemeral_core::{PoolSettings, Result, StoreError};
use redis::{Cmd, FromRedisValue, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::warn;

/// Backend identifier expected as the scheme of configured URLs.
pub const BACKEND_SCHEME: &str = "ssdb";

/// Parsed `ssdb:host[:port]` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUrl {
    host: String,
    port: Option<u16>,
}

impl BackendUrl {
    /// Parse a configured backend URL.
    ///
    /// The scheme must match [`BACKEND_SCHEME`] case-insensitively and the
    /// port, when present, must be a valid integer; anything else is a
    /// configuration error, raised before any connection attempt.
    pub fn parse(url: &str) -> Result<Self> {
        let mut tokens = url.split(':');
        let scheme = tokens.next().unwrap_or_default();
        let host = tokens.next();
        let port = tokens.next();
        if !scheme.eq_ignore_ascii_case(BACKEND_SCHEME) || tokens.next().is_some() {
            return Err(StoreError::Configuration(format!(
                "backend URL must be of the form '{BACKEND_SCHEME}:<host>[:<port>]', got '{url}'"
            )));
        }
        let host = match host {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                return Err(StoreError::Configuration(format!(
                    "backend URL '{url}' is missing a host"
                )))
            }
        };
        let port = match port {
            None => None,
            Some(port) => Some(port.parse::<u16>().map_err(|_| {
                StoreError::Configuration(format!("failed to parse backend port number '{port}'"))
            })?),
        };
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Connection string for the Redis-protocol client. A missing port falls
    /// back to the client's default.
    fn client_url(&self) -> String {
        match self.port {
            Some(port) => format!("redis://{}:{}/", self.host, port),
            None => format!("redis://{}/", self.host),
        }
    }
}

/// One live backend connection, able to execute a single command.
#[async_trait]
pub trait BackendConnection: Send {
    async fn run_command(&mut self, cmd: &Cmd) -> redis::RedisResult<Value>;
}

#[async_trait]
impl BackendConnection for redis::aio::MultiplexedConnection {
    async fn run_command(&mut self, cmd: &Cmd) -> redis::RedisResult<Value> {
        let value: Value = cmd.query_async(self).await?;
        Ok(value)
    }
}

/// Dials new backend connections. The production implementation wraps the
/// Redis-protocol client; tests script this seam for fault injection.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>>;
}

/// Production factory over [`redis::Client`].
pub struct RedisConnectionFactory {
    client: redis::Client,
}

impl RedisConnectionFactory {
    pub fn new(url: &BackendUrl) -> Result<Self> {
        let client = redis::Client::open(url.client_url()).map_err(|e| {
            StoreError::Configuration(format!("invalid backend endpoint: {e}"))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ConnectionFactory for RedisConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(format!("unable to connect to backend: {e}")))?;
        Ok(Box::new(conn))
    }
}

struct PoolState {
    idle: Vec<Box<dyn BackendConnection>>,
    generation: u64,
    closed: bool,
}

struct PoolShared {
    factory: Arc<dyn ConnectionFactory>,
    permits: Option<Arc<Semaphore>>,
    acquire_timeout: Option<std::time::Duration>,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        // A panic while holding the lock leaves only pool bookkeeping behind;
        // continue with whatever state is there.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Outcome classification for a single attempt. Stale connections earn one
/// pool rebuild; everything else surfaces as-is.
enum RunError {
    Stale(String),
    Fatal(StoreError),
}

/// Bounded (or unbounded) pool of reusable backend connections.
///
/// Created lazily: building the pool performs no I/O, the first acquire
/// dials. Shared by all concurrent callers of the owning store.
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Build a pool over the production Redis-protocol factory.
    pub fn connect(url: &BackendUrl, settings: PoolSettings) -> Result<Self> {
        Ok(Self::with_factory(
            Arc::new(RedisConnectionFactory::new(url)?),
            settings,
        ))
    }

    /// Build a pool over any connection factory.
    pub fn with_factory(factory: Arc<dyn ConnectionFactory>, settings: PoolSettings) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                factory,
                permits: settings.bound().map(|n| Arc::new(Semaphore::new(n))),
                acquire_timeout: settings.acquire_timeout(),
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    generation: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Take one connection out of the pool, dialing a new one when no idle
    /// connection is available. The returned guard gives the connection back
    /// on every exit path.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        match self.acquire_inner().await {
            Ok(conn) => Ok(conn),
            Err(RunError::Stale(message)) => Err(StoreError::Connection(message)),
            Err(RunError::Fatal(e)) => Err(e),
        }
    }

    async fn acquire_inner(&self) -> std::result::Result<PooledConnection, RunError> {
        if self.shared.state().closed {
            return Err(RunError::Fatal(StoreError::Closed));
        }
        let permit = match &self.shared.permits {
            None => None,
            Some(semaphore) => {
                let acquired = match self.shared.acquire_timeout {
                    Some(wait) => timeout(wait, semaphore.clone().acquire_owned())
                        .await
                        .map_err(|_| {
                            RunError::Fatal(StoreError::Connection(
                                "timed out waiting for a pooled backend connection".to_string(),
                            ))
                        })?,
                    None => semaphore.clone().acquire_owned().await,
                };
                // The semaphore is only closed when the pool is.
                Some(acquired.map_err(|_| RunError::Fatal(StoreError::Closed))?)
            }
        };
        let (generation, reused) = {
            let mut state = self.shared.state();
            if state.closed {
                return Err(RunError::Fatal(StoreError::Closed));
            }
            (state.generation, state.idle.pop())
        };
        let conn = match reused {
            Some(conn) => conn,
            None => self.shared.factory.connect().await.map_err(|e| match e {
                StoreError::Connection(message) => RunError::Stale(message),
                other => RunError::Fatal(other),
            })?,
        };
        Ok(PooledConnection {
            conn: Some(conn),
            generation,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Discard every pooled connection; subsequent acquires dial fresh from
    /// the original endpoint. Callers still holding a connection finish their
    /// round-trip, after which the guard drops it instead of returning it.
    pub fn rebuild(&self) {
        let mut state = self.shared.state();
        state.generation = state.generation.wrapping_add(1);
        state.idle.clear();
    }

    /// Close the pool. Subsequent operations fail with [`StoreError::Closed`].
    pub fn close(&self) {
        {
            let mut state = self.shared.state();
            state.closed = true;
            state.idle.clear();
        }
        if let Some(semaphore) = &self.shared.permits {
            semaphore.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    /// Execute one command under the retry discipline and convert the reply.
    ///
    /// A connection-level failure (broken pipe, refused or dropped
    /// connection, IO timeout) triggers exactly one pool rebuild and one
    /// retry; the second failure is definitive. Application-level errors are
    /// never retried.
    pub async fn run<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let value = self.run_raw(cmd).await?;
        T::from_owned_redis_value(value)
            .map_err(|e| StoreError::Connection(format!("unexpected backend reply: {e}")))
    }

    async fn run_raw(&self, cmd: &Cmd) -> Result<Value> {
        match self.try_run(cmd).await {
            Ok(value) => Ok(value),
            Err(RunError::Fatal(e)) => Err(e),
            Err(RunError::Stale(message)) => {
                warn!("backend connection failed ({message}); rebuilding pool and retrying once");
                self.rebuild();
                match self.try_run(cmd).await {
                    Ok(value) => Ok(value),
                    Err(RunError::Fatal(e)) => Err(e),
                    Err(RunError::Stale(message)) => Err(StoreError::Connection(format!(
                        "backend unreachable after pool rebuild: {message}"
                    ))),
                }
            }
        }
    }

    async fn try_run(&self, cmd: &Cmd) -> std::result::Result<Value, RunError> {
        let mut conn = self.acquire_inner().await?;
        match conn.run_command(cmd).await {
            Ok(value) => Ok(value),
            Err(e) if is_connection_failure(&e) => {
                conn.discard();
                Err(RunError::Stale(e.to_string()))
            }
            Err(e) => Err(RunError::Fatal(StoreError::Connection(format!(
                "unable to perform backend operation: {e}"
            )))),
        }
    }
}

fn is_connection_failure(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

/// RAII guard for one pooled connection.
///
/// Dropping the guard returns the connection to the pool, unless the pool was
/// rebuilt or closed in the meantime, in which case the connection is simply
/// dropped.
pub struct PooledConnection {
    conn: Option<Box<dyn BackendConnection>>,
    generation: u64,
    shared: Arc<PoolShared>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    /// Execute one command on this connection, bypassing the retry wrapper.
    pub async fn run_command(&mut self, cmd: &Cmd) -> redis::RedisResult<Value> {
        match self.conn.as_mut() {
            Some(conn) => conn.run_command(cmd).await,
            None => Err(redis::RedisError::from((
                redis::ErrorKind::ClientError,
                "connection already discarded",
            ))),
        }
    }

    /// Drop the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        self.conn = None;
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("has_conn", &self.conn.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut state = self.shared.state();
            if !state.closed && state.generation == self.generation {
                state.idle.push(conn);
            }
        }
    }
}

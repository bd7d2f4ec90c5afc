//! Scripted transport doubles for exercising the pool and store without a
//! live backend

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ephemeral_core::{Result, StoreError};
use redis::{Cmd, RedisResult, Value};

use crate::pool::{BackendConnection, ConnectionFactory};

/// Connection that pops one scripted reply per command and records the raw
/// commands it saw.
pub struct ScriptedConnection {
    replies: VecDeque<RedisResult<Value>>,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl BackendConnection for ScriptedConnection {
    async fn run_command(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        self.log.lock().unwrap().push(cmd.get_packed_command());
        self.replies.pop_front().unwrap_or(Ok(Value::Nil))
    }
}

/// Factory handing out pre-scripted connections in order, counting dials.
pub struct ScriptedFactory {
    connections: Mutex<VecDeque<ScriptedConnection>>,
    dials: AtomicUsize,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedFactory {
    /// One inner `Vec` per connection the factory may hand out, each entry a
    /// reply for one command in order.
    pub fn new(scripts: Vec<Vec<RedisResult<Value>>>) -> Self {
        let log = Arc::new(Mutex::new(Vec::new()));
        let connections = scripts
            .into_iter()
            .map(|replies| ScriptedConnection {
                replies: replies.into(),
                log: Arc::clone(&log),
            })
            .collect();
        Self {
            connections: Mutex::new(connections),
            dials: AtomicUsize::new(0),
            log,
        }
    }

    /// How many connections were dialed so far.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// All commands executed so far, in RESP wire form.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match self.connections.lock().unwrap().pop_front() {
            Some(conn) => Ok(Box::new(conn)),
            None => Err(StoreError::Connection(
                "no scripted connection left".to_string(),
            )),
        }
    }
}

/// RESP wire form of a command, for comparing against [`ScriptedFactory::commands`].
pub fn packed(cmd: &Cmd) -> Vec<u8> {
    cmd.get_packed_command()
}

//! The SSDB-backed ephemeral store

use async_trait::async_trait;
use ephemeral_core::{
    AttributeInput, AttributeKey, EphemeralStore, Location, Result, StoreResult,
};
use tracing::debug;

use crate::codec::{self, ValueCodec, DELIMITER};
use crate::pool::ConnectionPool;

/// Ephemeral attribute store backed by one SSDB endpoint.
///
/// Maps each `(location, attribute key)` pair onto one flat backend key and
/// folds expirations into the stored value. The backend's native key
/// expiration is the only expiry enforcement path.
pub struct SsdbEphemeralStore {
    pool: ConnectionPool,
    values: ValueCodec,
}

impl SsdbEphemeralStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self::with_value_codec(pool, ValueCodec::default())
    }

    /// A store whose value encoding is switched to the JSON-compatible mode,
    /// for backends shared with a JSON-typed consumer.
    pub fn with_value_codec(pool: ConnectionPool, values: ValueCodec) -> Self {
        Self { pool, values }
    }

    /// Close the underlying pool; later operations fail cleanly with a
    /// closed-store error.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[async_trait]
impl EphemeralStore for SsdbEphemeralStore {
    async fn get(&self, key: &AttributeKey, location: &Location) -> Result<StoreResult> {
        let encoded = codec::encode_key(key, location)?;
        debug!("backend GET {encoded}");
        let mut cmd = redis::cmd("GET");
        cmd.arg(&encoded);
        let raw: Option<String> = self.pool.run(&cmd).await?;
        Ok(match raw {
            Some(raw) => {
                let (value, _expiry) = self.values.decode(&raw);
                StoreResult::present(key.clone(), value)
            }
            None => StoreResult::absent(key.clone()),
        })
    }

    async fn set(&self, input: &AttributeInput, location: &Location) -> Result<()> {
        let encoded_key = codec::encode_key(input.key(), location)?;
        let Some(encoded_value) = self.values.encode(input) else {
            // A null value means "delete this key".
            return self.delete(input.key(), "", location).await;
        };
        match input.expiration() {
            None => {
                debug!("backend SET {encoded_key}");
                let mut cmd = redis::cmd("SET");
                cmd.arg(&encoded_key).arg(&encoded_value);
                self.pool.run(&cmd).await
            }
            Some(expiration) => {
                let ttl = expiration.relative_millis() / 1000;
                if ttl <= 0 {
                    // The backend would evict it immediately anyway.
                    debug!("skipping write of already-expired attribute {encoded_key}");
                    return Ok(());
                }
                debug!("backend SET {encoded_key} EX {ttl}");
                let mut cmd = redis::cmd("SET");
                cmd.arg(&encoded_key).arg(&encoded_value).arg("EX").arg(ttl);
                self.pool.run(&cmd).await
            }
        }
    }

    async fn update(&self, input: &AttributeInput, location: &Location) -> Result<()> {
        // Last write wins; an update is just a set.
        self.set(input, location).await
    }

    async fn delete(&self, key: &AttributeKey, _value: &str, location: &Location) -> Result<()> {
        let encoded = codec::encode_key(key, location)?;
        debug!("backend DEL {encoded}");
        let mut cmd = redis::cmd("DEL");
        cmd.arg(&encoded);
        let _deleted: i64 = self.pool.run(&cmd).await?;
        Ok(())
    }

    async fn has(&self, key: &AttributeKey, location: &Location) -> Result<bool> {
        let encoded = codec::encode_key(key, location)?;
        debug!("backend GET {encoded} (existence check)");
        let mut cmd = redis::cmd("GET");
        cmd.arg(&encoded);
        // Presence of the raw key is authoritative; expired keys are purged
        // by the backend itself, so the value is never decoded here.
        let raw: Option<String> = self.pool.run(&cmd).await?;
        Ok(raw.is_some())
    }

    async fn purge_expired(&self, _key: &AttributeKey, _location: &Location) -> Result<()> {
        // The backend deletes expired keys on its own; nothing to sweep.
        Ok(())
    }

    async fn delete_data(&self, location: &Location) -> Result<()> {
        let prefix = codec::encode_location(location)?;
        let pattern = format!("{prefix}{DELIMITER}*");
        debug!("backend KEYS {pattern}");
        let mut cmd = redis::cmd("KEYS");
        cmd.arg(&pattern);
        let keys: Vec<String> = self.pool.run(&cmd).await?;
        for key in keys {
            let attr = codec::decode_key(&key)?;
            let mut ttl_cmd = redis::cmd("TTL");
            ttl_cmd.arg(&key);
            let ttl: i64 = self.pool.run(&ttl_cmd).await?;
            // -1 is "exists without a TTL"; TTL-bound attributes are left to
            // expire naturally, -2 means the key vanished meanwhile.
            if ttl == -1 {
                debug!("backend DEL {key} (attribute {})", attr.name());
                let mut del_cmd = redis::cmd("DEL");
                del_cmd.arg(&key);
                let _deleted: i64 = self.pool.run(&del_cmd).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ephemeral_core::{Expiration, PoolSettings, StoreError};
    use redis::Value;

    use crate::test_support::{packed, ScriptedFactory};

    use super::*;

    const ACCOUNT_ID: &str = "47e456be-b00a-465e-a1db-4b53e64fa";

    fn account_location() -> Location {
        Location::new(["account", ACCOUNT_ID])
    }

    fn domain_location() -> Location {
        Location::new(["domain", ACCOUNT_ID])
    }

    fn store_with(scripts: Vec<Vec<redis::RedisResult<Value>>>) -> (SsdbEphemeralStore, Arc<ScriptedFactory>) {
        let factory = Arc::new(ScriptedFactory::new(scripts));
        let pool = ConnectionPool::with_factory(factory.clone(), PoolSettings::default());
        (SsdbEphemeralStore::new(pool), factory)
    }

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn set_writes_encoded_key_and_value() {
        let (store, factory) = store_with(vec![vec![Ok(Value::Okay)]]);
        let input = AttributeInput::new(AttributeKey::new("testK"), "testV");
        store.set(&input, &domain_location()).await.unwrap();

        let mut expected = redis::cmd("SET");
        expected
            .arg(format!("domain|{ACCOUNT_ID}|testK"))
            .arg("testV|");
        assert_eq!(factory.commands(), vec![packed(&expected)]);
    }

    #[tokio::test]
    async fn set_dynamic_appends_the_discriminator() {
        let (store, factory) = store_with(vec![vec![Ok(Value::Okay)]]);
        let input = AttributeInput::new(AttributeKey::dynamic("testK", "testD"), "testV");
        store.set(&input, &domain_location()).await.unwrap();

        let mut expected = redis::cmd("SET");
        expected
            .arg(format!("domain|{ACCOUNT_ID}|testK|testD"))
            .arg("testV|");
        assert_eq!(factory.commands(), vec![packed(&expected)]);
    }

    #[tokio::test]
    async fn set_with_ttl_issues_a_bounded_write() {
        let (store, factory) = store_with(vec![vec![Ok(Value::Okay)]]);
        let input = AttributeInput::expiring(
            AttributeKey::dynamic("testK", "testD"),
            "testV",
            Expiration::Relative(Duration::from_secs(2)),
        );
        store.set(&input, &domain_location()).await.unwrap();

        let commands = factory.commands();
        assert_eq!(commands.len(), 1);
        let wire = String::from_utf8(commands[0].clone()).unwrap();
        assert!(wire.contains(&format!("domain|{ACCOUNT_ID}|testK|testD")));
        assert!(wire.contains("\r\nEX\r\n"));
        assert!(wire.contains("\r\n2\r\n"));
    }

    #[tokio::test]
    async fn expired_input_is_silently_skipped() {
        let (store, factory) = store_with(vec![vec![Ok(Value::Okay)]]);
        let input = AttributeInput::expiring(
            AttributeKey::new("testK"),
            "testV",
            Expiration::Absolute(1),
        );
        store.set(&input, &domain_location()).await.unwrap();

        assert!(factory.commands().is_empty());
        assert_eq!(factory.dial_count(), 0);
    }

    #[tokio::test]
    async fn null_value_set_degrades_to_delete() {
        let (store, factory) = store_with(vec![vec![Ok(Value::Int(1))]]);
        let input = AttributeInput::tombstone(AttributeKey::new("testK"));
        store.set(&input, &domain_location()).await.unwrap();

        let mut expected = redis::cmd("DEL");
        expected.arg(format!("domain|{ACCOUNT_ID}|testK"));
        assert_eq!(factory.commands(), vec![packed(&expected)]);
    }

    #[tokio::test]
    async fn update_behaves_like_set() {
        let (store, factory) = store_with(vec![vec![Ok(Value::Okay)]]);
        let input = AttributeInput::new(AttributeKey::new("testK"), "testV2");
        store.update(&input, &domain_location()).await.unwrap();

        let mut expected = redis::cmd("SET");
        expected
            .arg(format!("domain|{ACCOUNT_ID}|testK"))
            .arg("testV2|");
        assert_eq!(factory.commands(), vec![packed(&expected)]);
    }

    #[tokio::test]
    async fn get_decodes_present_values() {
        let (store, _factory) = store_with(vec![vec![Ok(bulk("8.7.0|1473761137744"))]]);
        let key = AttributeKey::dynamic("zimbraAuthTokens", "366778080");
        let result = store.get(&key, &account_location()).await.unwrap();

        assert!(result.is_present());
        assert_eq!(result.value(), Some("8.7.0"));
        assert_eq!(result.key(), &key);
    }

    #[tokio::test]
    async fn get_of_missing_key_is_an_absent_result() {
        let (store, factory) = store_with(vec![vec![Ok(Value::Nil)]]);
        let key = AttributeKey::new("somekey");
        let result = store.get(&key, &account_location()).await.unwrap();

        assert!(!result.is_present());
        let mut expected = redis::cmd("GET");
        expected.arg(format!("account|{ACCOUNT_ID}|somekey"));
        assert_eq!(factory.commands(), vec![packed(&expected)]);
    }

    #[tokio::test]
    async fn has_reports_raw_presence() {
        let (store, _factory) = store_with(vec![vec![Ok(bulk("v|")), Ok(Value::Nil)]]);
        let key = AttributeKey::new("somekey");
        assert!(store.has(&key, &account_location()).await.unwrap());
        assert!(!store.has(&key, &account_location()).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_the_flat_key() {
        let (store, factory) = store_with(vec![vec![Ok(Value::Int(1))]]);
        let key = AttributeKey::new("someattr");
        store.delete(&key, "value", &account_location()).await.unwrap();

        let mut expected = redis::cmd("DEL");
        expected.arg(format!("account|{ACCOUNT_ID}|someattr"));
        assert_eq!(factory.commands(), vec![packed(&expected)]);
    }

    #[tokio::test]
    async fn purge_expired_is_a_no_op() {
        let (store, factory) = store_with(vec![]);
        store
            .purge_expired(&AttributeKey::new("somekey"), &account_location())
            .await
            .unwrap();
        assert_eq!(factory.dial_count(), 0);
    }

    #[tokio::test]
    async fn delete_data_sweeps_only_unbounded_keys() {
        let bound_key = format!("account|{ACCOUNT_ID}|authTokens|TOK1");
        let unbound_key = format!("account|{ACCOUNT_ID}|lastLogonTimestamp");
        let (store, factory) = store_with(vec![vec![
            Ok(Value::Array(vec![bulk(&unbound_key), bulk(&bound_key)])),
            Ok(Value::Int(-1)),
            Ok(Value::Int(1)),
            Ok(Value::Int(120)),
        ]]);
        store.delete_data(&account_location()).await.unwrap();

        let commands = factory.commands();
        assert_eq!(commands.len(), 4);
        let mut keys_cmd = redis::cmd("KEYS");
        keys_cmd.arg(format!("account|{ACCOUNT_ID}|*"));
        assert_eq!(commands[0], packed(&keys_cmd));
        let mut del_cmd = redis::cmd("DEL");
        del_cmd.arg(&unbound_key);
        assert_eq!(commands[2], packed(&del_cmd));
    }

    #[tokio::test]
    async fn operations_on_a_closed_store_fail_cleanly() {
        let (store, _factory) = store_with(vec![]);
        store.close();
        assert!(store.is_closed());

        let err = store
            .get(&AttributeKey::new("somekey"), &account_location())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    #[tokio::test]
    async fn delimiter_in_location_is_rejected_before_any_io() {
        let (store, factory) = store_with(vec![]);
        let location = Location::new(["acc|ount", ACCOUNT_ID]);
        let err = store
            .get(&AttributeKey::new("somekey"), &location)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
        assert_eq!(factory.dial_count(), 0);
    }
}

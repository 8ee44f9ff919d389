//! Redis-backed duplicate store.
//!
//! Records live under `image:<fingerprint>` as JSON strings written with
//! `SETEX`, so every write refreshes the TTL. Approximate matching walks the
//! key space with `SCAN ... MATCH image:* COUNT n`, never `KEYS`.

#[cfg(feature = "redis")]
mod implementation {
    use crate::config::StoreConfig;
    use crate::models::{DuplicateRecord, Fingerprint, STORE_KEY_PREFIX};
    use crate::storage::store_error;
    use crate::storage::traits::{DuplicateStore, ScanCursor, ScanPage};
    use crate::{Error, Result};
    use redis::aio::ConnectionManager;
    use redis::{Client, Cmd, FromRedisValue};
    use secrecy::ExposeSecret;
    use std::time::Duration;

    /// Duplicate store on a shared Redis instance.
    ///
    /// Cloning is cheap: clones share one multiplexed connection that
    /// reconnects on its own after failures.
    #[derive(Clone)]
    pub struct RedisDuplicateStore {
        connection: ConnectionManager,
        timeout: Duration,
    }

    impl std::fmt::Debug for RedisDuplicateStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisDuplicateStore")
                .field("timeout", &self.timeout)
                .finish_non_exhaustive()
        }
    }

    impl RedisDuplicateStore {
        /// Connects using the store settings.
        ///
        /// # Errors
        ///
        /// Returns [`Error::InvalidInput`] for a malformed URL and
        /// [`Error::StoreUnavailable`] if the server cannot be reached within
        /// the operation timeout.
        pub async fn connect(config: &StoreConfig) -> Result<Self> {
            let client = Client::open(config.url.expose_secret())
                .map_err(|e| Error::InvalidInput(format!("invalid redis url: {e}")))?;
            let timeout = config.operation_timeout();

            let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| store_error("redis_connect", timed_out("redis_connect", timeout)))?
                .map_err(|e| store_error("redis_connect", unavailable("redis_connect", &e)))?;

            tracing::info!(url = %config.redacted_url(), "Connected to redis duplicate store");
            Ok(Self {
                connection,
                timeout,
            })
        }

        /// Runs one command under the operation timeout.
        ///
        /// Timeouts and command errors both count as store errors.
        async fn run<T: FromRedisValue>(&self, operation: &'static str, cmd: Cmd) -> Result<T> {
            let mut connection = self.connection.clone();
            match tokio::time::timeout(self.timeout, cmd.query_async::<T>(&mut connection)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(store_error(operation, unavailable(operation, &e))),
                Err(_) => Err(store_error(operation, timed_out(operation, self.timeout))),
            }
        }
    }

    impl DuplicateStore for RedisDuplicateStore {
        fn name(&self) -> &'static str {
            "redis"
        }

        async fn put(
            &self,
            fingerprint: &Fingerprint,
            record: &DuplicateRecord,
            ttl: Duration,
        ) -> Result<()> {
            let mut cmd = redis::cmd("SETEX");
            cmd.arg(fingerprint.store_key())
                .arg(ttl.as_secs().max(1))
                .arg(record.to_json()?);
            self.run::<()>("redis_setex", cmd).await
        }

        async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<DuplicateRecord>> {
            let key = fingerprint.store_key();
            let mut cmd = redis::cmd("GET");
            cmd.arg(&key);

            let Some(json) = self.run::<Option<String>>("redis_get", cmd).await? else {
                return Ok(None);
            };

            match DuplicateRecord::from_json(&key, &json) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Treating malformed record as absent");
                    Ok(None)
                },
            }
        }

        async fn scan(&self, cursor: ScanCursor, batch_size: usize) -> Result<ScanPage> {
            let position = match cursor {
                ScanCursor::Start => "0".to_string(),
                ScanCursor::Resume(position) => position,
            };

            let mut cmd = redis::cmd("SCAN");
            cmd.arg(&position)
                .arg("MATCH")
                .arg(format!("{STORE_KEY_PREFIX}*"))
                .arg("COUNT")
                .arg(batch_size.max(1));

            let (next, keys) = self.run::<(String, Vec<String>)>("redis_scan", cmd).await?;

            Ok(ScanPage {
                keys: keys
                    .iter()
                    .filter_map(|key| Fingerprint::from_store_key(key))
                    .collect(),
                // Redis signals the end of a full iteration with cursor 0.
                next: (next != "0").then_some(ScanCursor::Resume(next)),
            })
        }
    }

    fn unavailable(operation: &str, e: &redis::RedisError) -> Error {
        Error::StoreUnavailable {
            operation: operation.to_string(),
            cause: e.to_string(),
        }
    }

    fn timed_out(operation: &str, timeout: Duration) -> Error {
        Error::StoreUnavailable {
            operation: operation.to_string(),
            cause: format!("timed out after {}ms", timeout.as_millis()),
        }
    }
}

#[cfg(feature = "redis")]
pub use implementation::RedisDuplicateStore;

#[cfg(not(feature = "redis"))]
mod stub {
    use crate::config::StoreConfig;
    use crate::models::{DuplicateRecord, Fingerprint};
    use crate::storage::traits::{DuplicateStore, ScanCursor, ScanPage};
    use crate::{Error, Result};
    use std::time::Duration;

    /// Stub Redis duplicate store when feature is not enabled.
    #[derive(Debug, Clone)]
    pub struct RedisDuplicateStore;

    impl RedisDuplicateStore {
        /// Connects using the store settings (stub).
        ///
        /// # Errors
        ///
        /// Always returns an error because the feature is not enabled.
        pub async fn connect(_config: &StoreConfig) -> Result<Self> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }
    }

    impl DuplicateStore for RedisDuplicateStore {
        fn name(&self) -> &'static str {
            "redis"
        }

        async fn put(
            &self,
            _fingerprint: &Fingerprint,
            _record: &DuplicateRecord,
            _ttl: Duration,
        ) -> Result<()> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        async fn get(&self, _fingerprint: &Fingerprint) -> Result<Option<DuplicateRecord>> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        async fn scan(&self, _cursor: ScanCursor, _batch_size: usize) -> Result<ScanPage> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }
    }
}

#[cfg(not(feature = "redis"))]
pub use stub::RedisDuplicateStore;

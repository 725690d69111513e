//! Key-value client wrapper for the simulation state store.
//!
//! Same reconnect-on-demand discipline as the Modbus wrapper: any failed
//! command drops the connection so the next `is_connected()` is truthful.
//! Tags are namespaced as `<namespace>_<tag>` in the store.

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info, warn};

use simbridge_state::{TagValue, now_millis};

use crate::config::CacheConfig;

/// Errors from simulation-store I/O.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Command failed: {0}")]
    Command(String),
}

/// Simulation store session with reconnect-on-demand semantics.
pub struct CacheClient {
    config: CacheConfig,
    conn: Option<MultiplexedConnection>,
    last_ok: i64,
}

impl CacheClient {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            conn: None,
            last_ok: 0,
        }
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Timestamp of the last successful command (millis since epoch).
    pub fn last_ok_millis(&self) -> i64 {
        self.last_ok
    }

    /// Open a connection if none is open.
    pub async fn connect(&mut self) -> Result<(), CacheError> {
        if self.conn.is_some() {
            return Ok(());
        }

        debug!(url = %self.config.url, "connecting to simulation store");
        let client = redis::Client::open(self.config.url.as_str())
            .map_err(|e| CacheError::Connect(e.to_string()))?;

        let conn = tokio::time::timeout(
            self.config.timeout(),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Timeout)?
        .map_err(|e| CacheError::Connect(e.to_string()))?;

        info!(url = %self.config.url, "simulation store connection established");
        self.conn = Some(conn);
        self.last_ok = now_millis();
        Ok(())
    }

    /// Read a tag. A missing key and an unparseable payload both read as
    /// `None`; only transport failures are errors.
    pub async fn get(&mut self, tag: &str) -> Result<Option<TagValue>, CacheError> {
        self.connect().await?;
        let key = self.config.key_for(tag);

        let result = match self.conn.as_mut() {
            Some(conn) => {
                tokio::time::timeout(self.config.timeout(), conn.get::<_, Option<String>>(&key))
                    .await
            }
            None => return Err(CacheError::Command("no open connection".to_string())),
        };

        let raw = self.settle(result)?;
        match raw {
            Some(payload) => {
                self.last_ok = now_millis();
                let value = TagValue::parse(&payload);
                if value.is_none() {
                    warn!(%key, %payload, "non-scalar payload for tag, treating as missing");
                }
                Ok(value)
            }
            None => Ok(None),
        }
    }

    /// Write a tag.
    pub async fn set(&mut self, tag: &str, value: &TagValue) -> Result<(), CacheError> {
        self.connect().await?;
        let key = self.config.key_for(tag);
        let payload = value.to_string();

        let result = match self.conn.as_mut() {
            Some(conn) => {
                tokio::time::timeout(self.config.timeout(), conn.set::<_, _, ()>(&key, payload))
                    .await
            }
            None => return Err(CacheError::Command("no open connection".to_string())),
        };

        self.settle(result)?;
        self.last_ok = now_millis();
        Ok(())
    }

    /// Drop the connection, if open.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!("closed simulation store connection");
        }
    }

    /// Unwrap the timeout/transport layers of a command result, dropping the
    /// connection on any failure.
    fn settle<T>(
        &mut self,
        result: Result<redis::RedisResult<T>, tokio::time::error::Elapsed>,
    ) -> Result<T, CacheError> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.conn = None;
                Err(CacheError::Command(e.to_string()))
            }
            Err(_) => {
                self.conn = None;
                Err(CacheError::Timeout)
            }
        }
    }
}

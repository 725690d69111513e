//! Facade over the controller and simulation-store clients.
//!
//! Owns both client sessions behind async mutexes so the polling loop, the
//! synchronization loop and the test harness can share one set of
//! connections without holding each other up longer than a single call.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use simbridge_state::{TagValue, now_millis};

use crate::cache::{CacheClient, CacheError};
use crate::config::BridgeConfig;
use crate::modbus::{ModbusClient, ModbusError};

/// Errors from either client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Modbus(#[from] ModbusError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Shared access point to both external endpoints.
pub struct Connections {
    plc: Mutex<ModbusClient>,
    cache: Mutex<CacheClient>,
    timeout: Duration,
}

impl Connections {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            plc: Mutex::new(ModbusClient::new(config.plc.clone())),
            cache: Mutex::new(CacheClient::new(config.cache.clone())),
            timeout: config.bridge.connection_timeout(),
        }
    }

    /// Best-effort initial connection attempts. Failures are expected when
    /// the endpoints come up after the bridge; the loops reconnect on demand.
    pub async fn connect_all(&self) {
        if let Err(e) = self.plc.lock().await.connect().await {
            info!(error = %e, "initial PLC connection failed, will retry");
        }
        if let Err(e) = self.cache.lock().await.connect().await {
            info!(error = %e, "initial simulation store connection failed, will retry");
        }
    }

    /// Controller session open and last success within the timeout window.
    pub async fn plc_reachable(&self) -> bool {
        let plc = self.plc.lock().await;
        plc.is_connected() && self.fresh(plc.last_ok_millis())
    }

    /// Store connection open and last success within the timeout window.
    pub async fn cache_reachable(&self) -> bool {
        let cache = self.cache.lock().await;
        cache.is_connected() && self.fresh(cache.last_ok_millis())
    }

    /// Attempt to open the controller session if none is open.
    pub async fn ensure_plc(&self) -> bool {
        self.plc.lock().await.connect().await.is_ok()
    }

    /// Attempt to open the store connection if none is open.
    pub async fn ensure_cache(&self) -> bool {
        self.cache.lock().await.connect().await.is_ok()
    }

    pub async fn plc_last_ok(&self) -> i64 {
        self.plc.lock().await.last_ok_millis()
    }

    pub async fn cache_last_ok(&self) -> i64 {
        self.cache.lock().await.last_ok_millis()
    }

    pub async fn read_coils(&self, addr: u16, count: u16) -> Result<Vec<bool>, ClientError> {
        Ok(self.plc.lock().await.read_coils(addr, count).await?)
    }

    pub async fn read_input_registers(
        &self,
        addr: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        Ok(self
            .plc
            .lock()
            .await
            .read_input_registers(addr, count)
            .await?)
    }

    pub async fn write_registers(&self, addr: u16, values: &[u16]) -> Result<(), ClientError> {
        Ok(self.plc.lock().await.write_registers(addr, values).await?)
    }

    pub async fn write_coil(&self, addr: u16, value: bool) -> Result<(), ClientError> {
        Ok(self.plc.lock().await.write_coil(addr, value).await?)
    }

    pub async fn cache_get(&self, tag: &str) -> Result<Option<TagValue>, ClientError> {
        Ok(self.cache.lock().await.get(tag).await?)
    }

    pub async fn cache_set(&self, tag: &str, value: &TagValue) -> Result<(), ClientError> {
        Ok(self.cache.lock().await.set(tag, value).await?)
    }

    /// Close both sessions. Called exactly once by the shutdown sequence.
    pub async fn close_all(&self) {
        info!("closing all connections");
        self.plc.lock().await.close().await;
        self.cache.lock().await.close();
    }

    fn fresh(&self, last_ok: i64) -> bool {
        now_millis() - last_ok < self.timeout.as_millis() as i64
    }
}

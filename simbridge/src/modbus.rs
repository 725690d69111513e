//! Modbus TCP client wrapper for the OpenPLC controller.
//!
//! Wraps a `tokio-modbus` session with per-call timeouts and
//! reconnect-on-demand. Any failed call drops the session so that
//! `is_connected()` truthfully reflects reachability afterwards.

use std::net::SocketAddr;

use tokio_modbus::client::{Context, Reader, Writer};
use tokio_modbus::prelude::*;
use tracing::{debug, info};

use simbridge_state::now_millis;

use crate::config::PlcConfig;

/// Errors from controller I/O.
#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request timed out")]
    Timeout,
    #[error("I/O failed: {0}")]
    Io(String),
    #[error("Modbus exception: {0}")]
    Exception(String),
}

/// Controller session with reconnect-on-demand semantics.
pub struct ModbusClient {
    config: PlcConfig,
    ctx: Option<Context>,
    last_ok: i64,
}

impl ModbusClient {
    pub fn new(config: PlcConfig) -> Self {
        Self {
            config,
            ctx: None,
            last_ok: 0,
        }
    }

    /// Whether a session is currently open.
    pub fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    /// Timestamp of the last successful call (millis since epoch).
    pub fn last_ok_millis(&self) -> i64 {
        self.last_ok
    }

    /// Open a session if none is open.
    pub async fn connect(&mut self) -> Result<(), ModbusError> {
        if self.ctx.is_some() {
            return Ok(());
        }

        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| ModbusError::Connect(format!("Invalid address: {}", e)))?;

        debug!(%addr, "connecting to PLC");
        let ctx = tokio::time::timeout(
            self.config.timeout(),
            tcp::connect_slave(addr, Slave(self.config.unit_id)),
        )
        .await
        .map_err(|_| ModbusError::Timeout)?
        .map_err(|e| ModbusError::Connect(e.to_string()))?;

        info!(%addr, "PLC connection established");
        self.ctx = Some(ctx);
        self.last_ok = now_millis();
        Ok(())
    }

    /// Read a block of coils (%QX).
    pub async fn read_coils(&mut self, addr: u16, count: u16) -> Result<Vec<bool>, ModbusError> {
        self.connect().await?;
        let result = match self.ctx.as_mut() {
            Some(ctx) => {
                tokio::time::timeout(self.config.timeout(), ctx.read_coils(addr, count)).await
            }
            None => return Err(ModbusError::Io("no open session".to_string())),
        };
        self.settle(result)
    }

    /// Read a block of input registers (%IW).
    pub async fn read_input_registers(
        &mut self,
        addr: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.connect().await?;
        let result = match self.ctx.as_mut() {
            Some(ctx) => {
                tokio::time::timeout(self.config.timeout(), ctx.read_input_registers(addr, count))
                    .await
            }
            None => return Err(ModbusError::Io("no open session".to_string())),
        };
        self.settle(result)
    }

    /// Write a contiguous register block.
    pub async fn write_registers(
        &mut self,
        addr: u16,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        self.connect().await?;
        let result = match self.ctx.as_mut() {
            Some(ctx) => {
                tokio::time::timeout(
                    self.config.timeout(),
                    ctx.write_multiple_registers(addr, values),
                )
                .await
            }
            None => return Err(ModbusError::Io("no open session".to_string())),
        };
        self.settle(result)
    }

    /// Write a single coil.
    pub async fn write_coil(&mut self, addr: u16, value: bool) -> Result<(), ModbusError> {
        self.connect().await?;
        let result = match self.ctx.as_mut() {
            Some(ctx) => {
                tokio::time::timeout(self.config.timeout(), ctx.write_single_coil(addr, value))
                    .await
            }
            None => return Err(ModbusError::Io("no open session".to_string())),
        };
        self.settle(result)
    }

    /// Close the session, if open.
    pub async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            debug!("closing PLC connection");
            if let Err(e) = ctx.disconnect().await {
                debug!(error = %e, "error while closing PLC connection");
            }
        }
    }

    /// Unwrap the timeout/transport/exception layers of a call result,
    /// dropping the session on any failure.
    fn settle<T, E, X>(
        &mut self,
        result: Result<Result<Result<T, X>, E>, tokio::time::error::Elapsed>,
    ) -> Result<T, ModbusError>
    where
        E: std::fmt::Display,
        X: std::fmt::Debug,
    {
        match result {
            Ok(Ok(Ok(value))) => {
                self.last_ok = now_millis();
                Ok(value)
            }
            Ok(Ok(Err(exception))) => {
                self.ctx = None;
                Err(ModbusError::Exception(format!("{:?}", exception)))
            }
            Ok(Err(e)) => {
                self.ctx = None;
                Err(ModbusError::Io(e.to_string()))
            }
            Err(_) => {
                self.ctx = None;
                Err(ModbusError::Timeout)
            }
        }
    }
}

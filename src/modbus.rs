//! Modbus TCP client for the voltage front-end and relay board
//!
//! The three ZMPT-style voltage sensors and the relay bank hang off a small
//! Modbus TCP I/O gateway: one input register per phase carries the raw ADC
//! code, one coil per phase drives the relay. This module provides the async
//! client with proper error handling and connection management, and the
//! [`PhaseIo`] implementation the driver runs against in production.

use crate::config::{ChannelsConfig, ModbusConfig};
use crate::error::{Result, TriphaseError};
use crate::hal::PhaseIo;
use crate::logging::get_logger;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

/// Modbus TCP client for the I/O gateway
pub struct ModbusClient {
    /// Modbus TCP client connection
    client: Option<tokio_modbus::client::Context>,

    /// Configuration
    config: ModbusConfig,

    /// Connection timeout
    connection_timeout: Duration,

    /// Operation timeout
    operation_timeout: Duration,

    /// Logger
    logger: crate::logging::StructuredLogger,
}

impl ModbusClient {
    /// Create a new Modbus client
    pub fn new(config: &ModbusConfig) -> Self {
        let logger = get_logger("modbus");
        Self {
            client: None,
            config: config.clone(),
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(2),
            logger,
        }
    }

    /// Connect to the Modbus server
    pub async fn connect(&mut self) -> Result<()> {
        let address = format!("{}:{}", self.config.ip, self.config.port);

        self.logger
            .info(&format!("Connecting to Modbus server at {}", address));

        let socket_addr: std::net::SocketAddr = address
            .parse()
            .map_err(|e| TriphaseError::modbus(format!("Invalid socket address: {}", e)))?;

        let slave = Slave(self.config.unit_id);
        match timeout(self.connection_timeout, tcp::connect_slave(socket_addr, slave)).await {
            Ok(Ok(client)) => {
                self.client = Some(client);
                self.logger.info("Successfully connected to Modbus server");
                Ok(())
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to connect to Modbus server: {}", e);
                self.logger.error(&error_msg);
                Err(TriphaseError::modbus(error_msg))
            }
            Err(_) => {
                let error_msg = "Connection timeout".to_string();
                self.logger.error(&error_msg);
                Err(TriphaseError::timeout(error_msg))
            }
        }
    }

    /// Disconnect from the Modbus server
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(_client) = self.client.take() {
            self.logger.info("Disconnecting from Modbus server");
            // The client will be dropped automatically
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Read a single input register (one raw ADC code)
    pub async fn read_input_register(&mut self, address: u16) -> Result<u16> {
        let timeout_duration = self.operation_timeout;

        let client = self.get_client()?;
        let request = client.read_input_registers(address, 1);

        match timeout(timeout_duration, request).await {
            Ok(Ok(Ok(response))) => response.first().copied().ok_or_else(|| {
                TriphaseError::modbus(format!("Empty response reading register {}", address))
            }),
            Ok(Ok(Err(e))) => {
                let error_msg = format!("Modbus exception reading register {}: {}", address, e);
                self.logger.error(&error_msg);
                Err(TriphaseError::modbus(error_msg))
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to read input register {}: {}", address, e);
                self.logger.error(&error_msg);
                Err(TriphaseError::modbus(error_msg))
            }
            Err(_) => {
                let error_msg = "Read operation timeout".to_string();
                self.logger.error(&error_msg);
                Err(TriphaseError::timeout(error_msg))
            }
        }
    }

    /// Write a single coil
    pub async fn write_coil(&mut self, address: u16, level: bool) -> Result<()> {
        let timeout_duration = self.operation_timeout;

        self.logger
            .debug(&format!("Writing coil {} = {}", address, level));

        let client = self.get_client()?;
        let request = client.write_single_coil(address, level);

        match timeout(timeout_duration, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                let error_msg = format!("Failed to write coil {}: {}", address, e);
                self.logger.error(&error_msg);
                Err(TriphaseError::modbus(error_msg))
            }
            Err(_) => {
                let error_msg = "Write operation timeout".to_string();
                self.logger.error(&error_msg);
                Err(TriphaseError::timeout(error_msg))
            }
        }
    }

    /// Get client reference or error if not connected
    fn get_client(&mut self) -> Result<&mut tokio_modbus::client::Context> {
        self.client
            .as_mut()
            .ok_or_else(|| TriphaseError::modbus("Not connected to Modbus server"))
    }
}

/// Production [`PhaseIo`] backend with automatic reconnection.
///
/// The relay board inputs are usually active-low; `relay_active_low`
/// inverts the coil level here so callers only ever deal in energized
/// true/false.
pub struct ModbusIo {
    client: ModbusClient,
    channels: ChannelsConfig,
    max_retry_attempts: u32,
    retry_delay: Duration,
    logger: crate::logging::StructuredLogger,
}

impl ModbusIo {
    /// Create a new backend over the given gateway connection
    pub fn new(config: &ModbusConfig, channels: &ChannelsConfig) -> Self {
        let logger = get_logger("modbus_io");
        Self {
            client: ModbusClient::new(config),
            channels: channels.clone(),
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            logger,
        }
    }

    fn phase_channel(map: &[u16; 3], phase: usize) -> Result<u16> {
        map.get(phase).copied().ok_or_else(|| {
            TriphaseError::validation("phase", &format!("Phase index {} out of range", phase))
        })
    }

    /// Execute a Modbus operation, reconnecting on connection failures
    async fn execute_with_reconnect<F, T>(&mut self, operation: F) -> Result<T>
    where
        F: for<'a> Fn(
            &'a mut ModbusClient,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<T>> + Send + 'a>>,
    {
        let mut attempts = 0;

        loop {
            // Ensure we're connected
            if !self.client.is_connected() {
                if let Err(e) = self.client.connect().await {
                    attempts += 1;
                    if attempts >= self.max_retry_attempts {
                        return Err(e);
                    }
                    self.logger
                        .warn(&format!("Connection attempt {} failed: {}", attempts, e));
                    sleep(self.retry_delay).await;
                    continue;
                }
            }

            // Execute the operation
            match operation(&mut self.client).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if Self::is_connection_error(&e) {
                        self.logger
                            .warn(&format!("Operation failed due to connection error: {}", e));
                        self.client.disconnect().await.ok();
                        attempts += 1;
                        if attempts >= self.max_retry_attempts {
                            return Err(e);
                        }
                        sleep(self.retry_delay).await;
                        continue;
                    } else {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Check if an error is a connection-related error
    fn is_connection_error(error: &TriphaseError) -> bool {
        match error {
            TriphaseError::Modbus { message: msg } => {
                msg.contains("connection")
                    || msg.contains("Connection")
                    || msg.contains("timeout")
                    || msg.contains("disconnected")
            }
            TriphaseError::Timeout { message: _ } => true,
            _ => false,
        }
    }
}

#[async_trait]
impl PhaseIo for ModbusIo {
    async fn read_code(&mut self, phase: usize) -> Result<u16> {
        let address = Self::phase_channel(&self.channels.adc_inputs, phase)?;
        self.execute_with_reconnect(|client| {
            Box::pin(async move { client.read_input_register(address).await })
        })
        .await
    }

    async fn set_relay(&mut self, phase: usize, energized: bool) -> Result<()> {
        let address = Self::phase_channel(&self.channels.relay_coils, phase)?;
        let level = if self.channels.relay_active_low {
            !energized
        } else {
            energized
        };
        self.execute_with_reconnect(|client| {
            Box::pin(async move { client.write_coil(address, level).await })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModbusConfig;

    #[test]
    fn test_modbus_config() {
        let config = ModbusConfig::default();
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 1);
    }

    #[test]
    fn test_modbus_client_creation() {
        let config = ModbusConfig::default();
        let client = ModbusClient::new(&config);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_phase_channel_bounds() {
        let map = [10u16, 11, 12];
        assert_eq!(ModbusIo::phase_channel(&map, 2).unwrap(), 12);
        assert!(ModbusIo::phase_channel(&map, 3).is_err());
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(ModbusIo::is_connection_error(&TriphaseError::timeout(
            "op timed out"
        )));
        assert!(ModbusIo::is_connection_error(&TriphaseError::modbus(
            "Connection reset"
        )));
        assert!(!ModbusIo::is_connection_error(&TriphaseError::validation(
            "phase", "bad"
        )));
    }
}

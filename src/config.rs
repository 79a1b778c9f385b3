//! Configuration management for Triphase
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{Result, TriphaseError};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_false() -> bool {
    false
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Modbus TCP connection to the ADC front-end / relay board
    pub modbus: ModbusConfig,

    /// Per-phase channel address mappings
    pub channels: ChannelsConfig,

    /// Voltage sampler calibration
    pub sampler: SamplerConfig,

    /// Quality scoring constants
    pub scoring: ScoringConfig,

    /// Switchover safety limits
    pub switching: SwitchingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,

    /// Sampling tick in milliseconds (one phase refreshed per tick)
    pub sample_interval_ms: u64,

    /// Trend/decision tick in milliseconds
    pub evaluation_interval_ms: u64,

    /// Interval for reseeding per-phase min/max to the running average, seconds
    pub stats_reset_interval_secs: u64,

    /// Run against the simulated mains backend instead of real hardware
    #[serde(default = "default_false")]
    pub simulate: bool,
}

/// Modbus TCP connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// IP address of the I/O gateway
    pub ip: String,

    /// TCP port (typically 502)
    pub port: u16,

    /// Modbus unit identifier
    pub unit_id: u8,
}

/// Per-phase channel addresses on the I/O gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Input register address per phase carrying the raw ADC code
    pub adc_inputs: [u16; 3],

    /// Coil address per phase driving the relay
    pub relay_coils: [u16; 3],

    /// Relay boards driven active-low: coil OFF energizes the relay
    pub relay_active_low: bool,
}

/// Voltage sampler calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// ADC reference voltage in volts
    pub vref: f64,

    /// Full-scale ADC code (12-bit converters report 4095)
    pub adc_max: u16,

    /// Number of codes acquired per burst. The burst window
    /// (samples x sample_delay_us) must span at least one full AC cycle.
    pub samples: usize,

    /// Inter-sample delay in microseconds
    pub sample_delay_us: u64,

    /// Sensor-to-mains scale factor; adjust against a multimeter
    pub calibration_factor: f64,

    /// Readings at or below this are treated as noise and never lower the
    /// running minimum
    pub noise_floor_volts: f64,

    /// Exponential smoothing weight given to a new reading (0..1)
    pub avg_alpha: f64,
}

/// Quality scoring constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Nominal mains voltage the voltage score is centered on
    pub target_voltage: f64,

    /// Deviation from target at which the voltage score reaches zero
    pub voltage_error_span: f64,

    /// Min/max spread at which the stability score reaches zero
    pub max_variation: f64,

    /// Phases averaging below this are excluded from comparison entirely
    pub min_voltage: f64,

    /// Fixed score advantage for the currently selected phase
    pub hysteresis_bonus: f64,

    /// Weight of the voltage score in the composite
    pub voltage_weight: f64,

    /// Weight of the stability score in the composite
    pub stability_weight: f64,
}

/// Switchover safety limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchingConfig {
    /// Targets averaging below this are refused at switch time
    pub undervoltage_threshold: f64,

    /// Targets averaging above this are refused at switch time
    pub overvoltage_threshold: f64,

    /// Minimum seconds between non-forced switches
    pub min_switch_interval_secs: u64,

    /// Pause between break and make, milliseconds
    pub relay_settle_ms: u64,

    /// Click each relay once at startup
    pub relay_self_test: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.50".to_string(),
            port: 502,
            unit_id: 1,
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            adc_inputs: [0, 1, 2],
            relay_coils: [0, 1, 2],
            relay_active_low: true,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            vref: 3.3,
            adc_max: 4095,
            samples: 300,
            sample_delay_us: 200,
            calibration_factor: 250.0,
            noise_floor_volts: 50.0,
            avg_alpha: 0.15,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            target_voltage: 220.0,
            voltage_error_span: 50.0,
            max_variation: 30.0,
            min_voltage: 150.0,
            hysteresis_bonus: 15.0,
            voltage_weight: 0.6,
            stability_weight: 0.4,
        }
    }
}

impl Default for SwitchingConfig {
    fn default() -> Self {
        Self {
            undervoltage_threshold: 180.0,
            overvoltage_threshold: 260.0,
            min_switch_interval_secs: 30,
            relay_settle_ms: 100,
            relay_self_test: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/triphase.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modbus: ModbusConfig::default(),
            channels: ChannelsConfig::default(),
            sampler: SamplerConfig::default(),
            scoring: ScoringConfig::default(),
            switching: SwitchingConfig::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
            sample_interval_ms: 200,
            evaluation_interval_ms: 5000,
            stats_reset_interval_secs: 300,
            simulate: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "triphase_config.yaml",
            "/data/triphase_config.yaml",
            "/etc/triphase/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.modbus.ip.is_empty() {
            return Err(TriphaseError::validation(
                "modbus.ip",
                "IP address cannot be empty",
            ));
        }

        if self.modbus.port == 0 {
            return Err(TriphaseError::validation(
                "modbus.port",
                "Port must be greater than 0",
            ));
        }

        if self.sampler.samples < 2 {
            return Err(TriphaseError::validation(
                "sampler.samples",
                "At least two samples per burst are required",
            ));
        }

        if self.sampler.adc_max == 0 {
            return Err(TriphaseError::validation(
                "sampler.adc_max",
                "Full-scale code must be greater than 0",
            ));
        }

        if self.sampler.calibration_factor <= 0.0 {
            return Err(TriphaseError::validation(
                "sampler.calibration_factor",
                "Must be positive",
            ));
        }

        if !(0.0..=1.0).contains(&self.sampler.avg_alpha) {
            return Err(TriphaseError::validation(
                "sampler.avg_alpha",
                "Smoothing weight must be within 0..1",
            ));
        }

        // The burst is a blocking operation from the control loop's
        // perspective; it has to finish before the next sampling tick.
        let burst_ms = (self.sampler.samples as u64 * self.sampler.sample_delay_us) / 1000;
        if burst_ms >= self.sample_interval_ms {
            return Err(TriphaseError::validation(
                "sampler.samples",
                "Sampling burst does not fit within sample_interval_ms",
            ));
        }

        if self.switching.undervoltage_threshold >= self.switching.overvoltage_threshold {
            return Err(TriphaseError::validation(
                "switching.undervoltage_threshold",
                "Undervoltage threshold must be below the overvoltage threshold",
            ));
        }

        if self.scoring.voltage_weight < 0.0 || self.scoring.stability_weight < 0.0 {
            return Err(TriphaseError::validation(
                "scoring.voltage_weight",
                "Score weights must be non-negative",
            ));
        }

        if self.scoring.voltage_error_span <= 0.0 || self.scoring.max_variation <= 0.0 {
            return Err(TriphaseError::validation(
                "scoring.voltage_error_span",
                "Score spans must be positive",
            ));
        }

        if self.sample_interval_ms == 0 || self.evaluation_interval_ms == 0 {
            return Err(TriphaseError::validation(
                "sample_interval_ms",
                "Intervals must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.modbus.port, 502);
        assert_eq!(config.sampler.samples, 300);
        assert_eq!(config.sample_interval_ms, 200);
        assert!((config.scoring.target_voltage - 220.0).abs() < f64::EPSILON);
        assert!(!config.simulate);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        // Test invalid IP
        config.modbus.ip = String::new();
        assert!(config.validate().is_err());

        // Reset and test burst that cannot fit the sampling tick
        config = Config::default();
        config.sampler.sample_delay_us = 10_000;
        assert!(config.validate().is_err());

        // Inverted voltage gates
        config = Config::default();
        config.switching.undervoltage_threshold = 300.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.modbus.port, deserialized.modbus.port);
        assert_eq!(config.channels.adc_inputs, deserialized.channels.adc_inputs);
    }
}

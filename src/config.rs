//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `soil-monitor.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - SerialConfig: port, line settings and modbus slave address of the probe.
//!     - ServerConfig: where the web api listens.
//!     - AdvisorConfig: hosted language model endpoint, model and credentials.
//!     - LoggingConfig: log level and whether readings are echoed to the log.
//!
//! every section is optional in the file; missing sections and keys take the
//! values the sensor ships with (4800 8N1, slave 1, 1s timeout).
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::Path;

/// environment variable that overrides `advisor.api_key`
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial line and modbus device settings
///
/// `default_port` is only used when port discovery finds no usb adapter.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    pub default_port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    /// "none", "odd" or "even"
    pub parity: String,
    pub stop_bits: u8,
    /// per-operation timeout in seconds
    pub timeout_secs: f64,
    pub slave_address: u8,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 4800,
            data_bits: 8,
            parity: "none".to_string(),
            stop_bits: 1,
            timeout_secs: 1.0,
            slave_address: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdvisorConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_seconds: u64,
    /// empty means "not configured"; see API_KEY_ENV
    pub api_key: String,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            timeout_seconds: 60,
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let mut config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config.apply_env();
        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("soil-monitor.toml"),
            std::path::PathBuf::from("..").join("config").join("soil-monitor.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.advisor.api_key = key.trim().to_string();
            }
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let s = &self.serial;
        println!("┌─────────────────────────────────────────┐");
        println!("│           HOST CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Default Port: {}", s.default_port);
        println!("│ Line: {} baud, {} data, parity {}, {} stop", s.baud_rate, s.data_bits, s.parity, s.stop_bits);
        println!("│ Timeout: {}s | Slave: {}", s.timeout_secs, s.slave_address);
        println!("│ Listen: {}", self.server.bind);
        println!("│ Advisor: {} ({})", self.advisor.model,
            if self.advisor.api_key.is_empty() { "no api key" } else { "api key set" });
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_probe_factory_settings() {
        let c = HostConfig::default();
        assert_eq!(c.serial.default_port, "/dev/ttyUSB0");
        assert_eq!(c.serial.baud_rate, 4800);
        assert_eq!(c.serial.data_bits, 8);
        assert_eq!(c.serial.parity, "none");
        assert_eq!(c.serial.stop_bits, 1);
        assert_eq!(c.serial.timeout_secs, 1.0);
        assert_eq!(c.serial.slave_address, 1);
        assert_eq!(c.server.bind, "0.0.0.0:5000");
        assert_eq!(c.advisor.model, "gemini-2.5-flash");
        assert_eq!(c.advisor.timeout_seconds, 60);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let c: HostConfig = toml::from_str(
            r#"
[serial]
default_port = "/dev/ttyAMA0"
baud_rate = 9600

[logging]
show_sensor_data = false
"#,
        )
        .unwrap();
        assert_eq!(c.serial.default_port, "/dev/ttyAMA0");
        assert_eq!(c.serial.baud_rate, 9600);
        assert_eq!(c.serial.data_bits, 8);
        assert_eq!(c.serial.slave_address, 1);
        assert!(!c.logging.show_sensor_data);
        assert_eq!(c.logging.level, "info");
        assert_eq!(c.server.bind, "0.0.0.0:5000");
    }

    #[test]
    fn test_empty_file_is_default() {
        let c: HostConfig = toml::from_str("").unwrap();
        assert_eq!(c.serial, SerialConfig::default());
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(HostConfig::load("definitely/not/here.toml").is_err());
    }
}

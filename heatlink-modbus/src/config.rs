//! Configuration for heater devices.

use heatlink_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::controller::{AdaptiveDisablePolicy, PidAction};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] heatlink_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatlinkConfig {
    /// Heater devices and polling settings
    pub heater: HeaterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Heater-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaterConfig {
    /// Devices to control
    pub devices: Vec<DeviceConfig>,

    /// Interval between monitor samples in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Configuration for a single heater module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (used to select devices on the command line)
    pub name: String,

    /// Serial line the module is attached to
    pub serial: SerialConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Response timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// What disabling adaptive tuning does
    #[serde(default)]
    pub adaptive_disable: AdaptiveDisablePolicy,

    /// Thermocouple type code
    #[serde(default = "default_thermocouple_type")]
    pub thermocouple_type: u16,

    /// PID action direction
    #[serde(default)]
    pub action: PidAction,

    /// Input filter level
    #[serde(default)]
    pub filter: u16,

    /// PID gains applied by `prepare`
    #[serde(default)]
    pub pid: Option<PidSettings>,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_thermocouple_type() -> u16 {
    crate::controller::DEFAULT_THERMOCOUPLE_TYPE
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0" or "COM1")
    pub port: String,
    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// PID parameters written as one block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidSettings {
    pub max_rate: f64,
    pub derivative_gain: f64,
    pub proportional_gain: f64,
    pub integral_gain: f64,
    pub setpoint: f64,
}

impl PidSettings {
    fn values(&self) -> [(&'static str, f64); 5] {
        [
            ("max_rate", self.max_rate),
            ("derivative_gain", self.derivative_gain),
            ("proportional_gain", self.proportional_gain),
            ("integral_gain", self.integral_gain),
            ("setpoint", self.setpoint),
        ]
    }
}

impl HeatlinkConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: HeatlinkConfig = heatlink_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: HeatlinkConfig = heatlink_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heater.devices.is_empty() {
            return Err(ConfigError::Validation(
                "At least one device must be configured".to_string(),
            ));
        }

        if self.heater.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut lines: HashMap<&str, &DeviceConfig> = HashMap::new();
        for device in &self.heater.devices {
            if device.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Device name cannot be empty".to_string(),
                ));
            }

            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Device '{}' is configured twice",
                    device.name
                )));
            }

            if !(1..=247).contains(&device.unit_id) {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': unit_id must be 1-247",
                    device.name
                )));
            }

            device.serial.validate(&device.name)?;

            // Units sharing a port share one line: same settings, distinct ids.
            if let Some(other) = lines.get(device.serial.port.as_str()) {
                if other.serial != device.serial {
                    return Err(ConfigError::Validation(format!(
                        "Devices '{}' and '{}' share port {} with different serial settings",
                        other.name, device.name, device.serial.port
                    )));
                }
                if other.unit_id == device.unit_id {
                    return Err(ConfigError::Validation(format!(
                        "Devices '{}' and '{}' both use unit_id {} on {}",
                        other.name, device.name, device.unit_id, device.serial.port
                    )));
                }
            }
            lines.insert(&device.serial.port, device);

            if let Some(pid) = &device.pid {
                for (field, value) in pid.values() {
                    if !value.is_finite() {
                        return Err(ConfigError::Validation(format!(
                            "Device '{}': pid.{} must be a finite number",
                            device.name, field
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

impl SerialConfig {
    fn validate(&self, device: &str) -> Result<(), ConfigError> {
        if self.port.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Device '{}': serial port cannot be empty",
                device
            )));
        }

        match self.parity.to_lowercase().as_str() {
            "none" | "even" | "odd" => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': invalid parity '{}' (use none, even, or odd)",
                    device, self.parity
                )));
            }
        }

        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::Validation(format!(
                "Device '{}': data_bits must be 5-8",
                device
            )));
        }

        if !(1..=2).contains(&self.stop_bits) {
            return Err(ConfigError::Validation(format!(
                "Device '{}': stop_bits must be 1 or 2",
                device
            )));
        }

        Ok(())
    }
}

impl HeaterConfig {
    /// Select devices by name; an empty selection means every device.
    ///
    /// Repeated names select the device once, in first-seen order.
    pub fn select(&self, names: &[String]) -> Result<Vec<&DeviceConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self.devices.iter().collect());
        }

        let mut selected: Vec<&DeviceConfig> = Vec::with_capacity(names.len());
        for name in names {
            let device = self
                .devices
                .iter()
                .find(|d| &d.name == name)
                .ok_or_else(|| ConfigError::Validation(format!("Unknown device '{}'", name)))?;
            if !selected.iter().any(|d| d.name == device.name) {
                selected.push(device);
            }
        }

        Ok(selected)
    }
}

/// Devices reachable through one serial line.
#[derive(Debug, Clone)]
pub struct LineConfig<'a> {
    pub serial: &'a SerialConfig,
    /// Largest response timeout among the devices on the line
    pub timeout: Duration,
    pub devices: Vec<&'a DeviceConfig>,
}

/// Group devices by serial port, keeping first-seen order of ports and
/// devices.
pub fn lines<'a>(devices: &[&'a DeviceConfig]) -> Vec<LineConfig<'a>> {
    let mut lines: Vec<LineConfig<'a>> = Vec::new();

    for &device in devices {
        let timeout = Duration::from_millis(device.timeout_ms);
        match lines
            .iter_mut()
            .find(|line| line.serial.port == device.serial.port)
        {
            Some(line) => {
                line.timeout = line.timeout.max(timeout);
                line.devices.push(device);
            }
            None => lines.push(LineConfig {
                serial: &device.serial,
                timeout,
                devices: vec![device],
            }),
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        heater: {
            devices: [
                { name: "c1", serial: { port: "/dev/ttyACM4" } }
            ]
        }
    }"#;

    #[test]
    fn test_defaults() {
        let config = HeatlinkConfig::parse(MINIMAL).unwrap();
        let device = &config.heater.devices[0];

        assert_eq!(device.unit_id, 1);
        assert_eq!(device.timeout_ms, 1000);
        assert_eq!(device.thermocouple_type, 1);
        assert_eq!(device.filter, 0);
        assert_eq!(device.action, PidAction::Direct);
        assert_eq!(device.adaptive_disable, AdaptiveDisablePolicy::Skip);
        assert!(device.pid.is_none());
        assert_eq!(device.serial.baud_rate, 9600);
        assert_eq!(device.serial.data_bits, 8);
        assert_eq!(device.serial.parity, "none");
        assert_eq!(device.serial.stop_bits, 1);
        assert_eq!(config.heater.poll_interval_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_device() {
        let json = r#"{
            logging: { level: "debug", format: "json" },
            heater: {
                poll_interval_ms: 500,
                devices: [
                    {
                        name: "c2",
                        serial: {
                            port: "/dev/ttyACM2",
                            baud_rate: 19200,
                            parity: "even",
                            stop_bits: 2
                        },
                        unit_id: 2,
                        timeout_ms: 250,
                        adaptive_disable: "write_zero",
                        thermocouple_type: 3,
                        action: "reverse",
                        filter: 4,
                        pid: {
                            max_rate: 1,
                            derivative_gain: 1,
                            proportional_gain: 8,
                            integral_gain: 0,
                            setpoint: 70
                        }
                    }
                ]
            }
        }"#;

        let config = HeatlinkConfig::parse(json).unwrap();
        let device = &config.heater.devices[0];

        assert_eq!(device.unit_id, 2);
        assert_eq!(device.serial.baud_rate, 19200);
        assert_eq!(device.serial.parity, "even");
        assert_eq!(device.adaptive_disable, AdaptiveDisablePolicy::WriteZero);
        assert_eq!(device.action, PidAction::Reverse);
        assert_eq!(device.pid.unwrap().proportional_gain, 8.0);
        assert_eq!(config.heater.poll_interval_ms, 500);
    }

    #[test]
    fn test_validate_empty_devices() {
        let result = HeatlinkConfig::parse("{ heater: { devices: [] } }");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_unit_id() {
        let json = r#"{
            heater: {
                devices: [
                    { name: "c1", unit_id: 0, serial: { port: "/dev/ttyACM0" } }
                ]
            }
        }"#;
        assert!(HeatlinkConfig::parse(json).is_err());

        let json = json.replace("unit_id: 0", "unit_id: 248");
        assert!(HeatlinkConfig::parse(&json).is_err());
    }

    #[test]
    fn test_validate_duplicate_names() {
        let json = r#"{
            heater: {
                devices: [
                    { name: "c1", serial: { port: "/dev/ttyACM0" } },
                    { name: "c1", unit_id: 2, serial: { port: "/dev/ttyACM0" } }
                ]
            }
        }"#;
        assert!(HeatlinkConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_parity() {
        let json = r#"{
            heater: {
                devices: [
                    { name: "c1", serial: { port: "/dev/ttyACM0", parity: "mark" } }
                ]
            }
        }"#;
        assert!(HeatlinkConfig::parse(json).is_err());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let json = r#"{
            heater: {
                devices: [
                    { name: "c1", action: "sideways", serial: { port: "/dev/ttyACM0" } }
                ]
            }
        }"#;
        assert!(matches!(
            HeatlinkConfig::parse(json),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_select_devices() {
        let json = r#"{
            heater: {
                devices: [
                    { name: "c1", serial: { port: "/dev/ttyACM4" } },
                    { name: "c2", unit_id: 2, serial: { port: "/dev/ttyACM2" } }
                ]
            }
        }"#;
        let config = HeatlinkConfig::parse(json).unwrap();

        assert_eq!(config.heater.select(&[]).unwrap().len(), 2);

        let selected = config.heater.select(&["c2".to_string()]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].unit_id, 2);

        assert!(config.heater.select(&["c3".to_string()]).is_err());
    }

    #[test]
    fn test_select_repeated_names_once() {
        let json = r#"{
            heater: {
                devices: [
                    { name: "c1", serial: { port: "/dev/ttyACM4" } },
                    { name: "c2", unit_id: 2, serial: { port: "/dev/ttyACM2" } }
                ]
            }
        }"#;
        let config = HeatlinkConfig::parse(json).unwrap();

        let names: Vec<String> = ["c2", "c1", "c2", "c1"]
            .iter()
            .map(|n| n.to_string())
            .collect();
        let selected: Vec<&str> = config
            .heater
            .select(&names)
            .unwrap()
            .into_iter()
            .map(|d| d.name.as_str())
            .collect();

        assert_eq!(selected, vec!["c2", "c1"]);
    }

    #[test]
    fn test_shared_port_rules() {
        let json = r#"{
            heater: {
                devices: [
                    { name: "c1", serial: { port: "/dev/ttyUSB0" } },
                    { name: "c2", serial: { port: "/dev/ttyUSB0", baud_rate: 19200 }, unit_id: 2 }
                ]
            }
        }"#;
        assert!(HeatlinkConfig::parse(json).is_err());

        let json = r#"{
            heater: {
                devices: [
                    { name: "c1", serial: { port: "/dev/ttyUSB0" } },
                    { name: "c2", serial: { port: "/dev/ttyUSB0" } }
                ]
            }
        }"#;
        assert!(HeatlinkConfig::parse(json).is_err());
    }

    #[test]
    fn test_lines_group_by_port() {
        let json = r#"{
            heater: {
                devices: [
                    { name: "a", serial: { port: "/dev/ttyUSB0" }, timeout_ms: 200 },
                    { name: "b", serial: { port: "/dev/ttyACM1" } },
                    { name: "c", serial: { port: "/dev/ttyUSB0" }, unit_id: 3, timeout_ms: 700 }
                ]
            }
        }"#;
        let config = HeatlinkConfig::parse(json).unwrap();
        let devices = config.heater.select(&[]).unwrap();
        let lines = lines(&devices);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].serial.port, "/dev/ttyUSB0");
        assert_eq!(lines[0].timeout, Duration::from_millis(700));
        let names: Vec<&str> = lines[0].devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(lines[1].devices.len(), 1);
    }
}

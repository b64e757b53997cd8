//! Configuration file management.
//!
//! The file describes one peripheral, how to reconnect to it and the sources
//! to publish from it:
//!
//! ```toml
//! [device]
//! address = "AA:BB:CC:DD:EE:FF"
//! connect_timeout = 15
//!
//! [reconnect]
//! initial_delay = 1
//! max_delay = 60
//!
//! [[sensors]]
//! name = "Battery"
//! service = "180F"
//! characteristic = "2A19"
//! update_interval = 60
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use blesensor_core::{
    LinkOptions, ReconnectOptions, SourceConfig, ValueDecoder, ValueFormat, ValueParser,
};
use blesensor_types::BleUuid;
use serde::{Deserialize, Serialize};

/// Longest accepted poll interval in seconds (one day).
pub const MAX_UPDATE_INTERVAL: u64 = 86_400;

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The peripheral to connect to.
    pub device: DeviceConfig,
    /// Reconnection behaviour after a link loss.
    pub reconnect: ReconnectConfig,
    /// Sources published from the peripheral.
    pub sensors: Vec<SensorConfig>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Err(ConfigError::NotFound(path))
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every error found.
    ///
    /// This checks:
    /// - At least one sensor is configured
    /// - Timeouts and reconnect delays are positive and ordered
    /// - Sensor names are present and unique
    /// - UUIDs parse as 16, 32 or 128-bit UUIDs
    /// - Each sensor either subscribes or polls, at a sane interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.device.validate());
        errors.extend(self.reconnect.validate());

        if self.sensors.is_empty() {
            errors.push(ValidationError {
                field: "sensors".to_string(),
                message: "at least one sensor must be configured".to_string(),
            });
        }

        let mut seen_names = HashSet::new();
        for (i, sensor) in self.sensors.iter().enumerate() {
            let prefix = format!("sensors[{}]", i);
            if let Err(e) = sensor.to_source_config(&prefix) {
                errors.extend(e);
            }
            if !sensor.name.is_empty() && !seen_names.insert(sensor.name.as_str()) {
                errors.push(ValidationError {
                    field: format!("{}.name", prefix),
                    message: format!("duplicate sensor name '{}'", sensor.name),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// The configured sources, ready for the driver.
    pub fn source_configs(&self) -> Result<Vec<SourceConfig>, ConfigError> {
        self.sensors
            .iter()
            .enumerate()
            .map(|(i, sensor)| sensor.to_source_config(&format!("sensors[{}]", i)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::Validation)
    }

    /// Connection-manager options derived from `[device]`.
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions::new().connect_timeout(Duration::from_secs(self.device.connect_timeout))
    }

    /// Reconnect options derived from `[reconnect]`.
    pub fn reconnect_options(&self) -> ReconnectOptions {
        let reconnect = &self.reconnect;
        let options = ReconnectOptions::new()
            .initial_delay(Duration::from_secs(reconnect.initial_delay))
            .max_delay(Duration::from_secs(reconnect.max_delay))
            .jitter(reconnect.jitter);
        match reconnect.max_attempts {
            Some(attempts) => options.max_attempts(attempts),
            None => options,
        }
    }
}

/// The `[device]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// MAC address, platform id or advertised-name fragment.
    pub address: String,
    /// Connection timeout in seconds.
    pub connect_timeout: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            connect_timeout: 15,
        }
    }
}

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.connect_timeout == 0 {
            errors.push(ValidationError {
                field: "device.connect_timeout".to_string(),
                message: "connect timeout must be at least 1 second".to_string(),
            });
        }
        errors
    }
}

/// The `[reconnect]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt, in seconds.
    pub initial_delay: u64,
    /// Upper bound of the backoff delay, in seconds.
    pub max_delay: u64,
    /// Give up after this many attempts; unlimited when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Randomise delays.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: 1,
            max_delay: 60,
            max_attempts: None,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    /// Validate reconnect configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.initial_delay == 0 {
            errors.push(ValidationError {
                field: "reconnect.initial_delay".to_string(),
                message: "initial delay must be at least 1 second".to_string(),
            });
        }
        if self.max_delay < self.initial_delay {
            errors.push(ValidationError {
                field: "reconnect.max_delay".to_string(),
                message: format!(
                    "max delay {} is shorter than the initial delay {}",
                    self.max_delay, self.initial_delay
                ),
            });
        }
        errors
    }
}

fn default_update_interval() -> u64 {
    60
}

fn default_scale() -> f32 {
    1.0
}

/// One `[[sensors]]` entry.
///
/// UUIDs are kept as text so that validation can report every bad one with
/// its field path instead of stopping at the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Display name, unique within the file.
    pub name: String,
    /// Service UUID.
    pub service: String,
    /// Characteristic UUID.
    pub characteristic: String,
    /// Descriptor UUID; empty reads the characteristic value.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub descriptor: String,
    /// Subscribe to notifications.
    #[serde(default)]
    pub notify: bool,
    /// Poll interval in seconds; 0 never polls.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    /// Payload decoder; the first byte when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ValueFormat>,
    /// Multiplier applied by the decoder.
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Offset added by the decoder after scaling.
    #[serde(default)]
    pub offset: f32,
    /// Skip polls while a read is outstanding.
    #[serde(default)]
    pub dedupe_reads: bool,
}

impl SensorConfig {
    /// A polled sensor with default settings.
    pub fn new(name: &str, service: BleUuid, characteristic: BleUuid) -> Self {
        Self {
            name: name.to_string(),
            service: service.to_string(),
            characteristic: characteristic.to_string(),
            descriptor: String::new(),
            notify: false,
            update_interval: default_update_interval(),
            format: None,
            scale: default_scale(),
            offset: 0.0,
            dedupe_reads: false,
        }
    }

    /// Check the entry and turn it into a [`SourceConfig`].
    pub fn to_source_config(&self, prefix: &str) -> Result<SourceConfig, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: String| {
            errors.push(ValidationError {
                field: format!("{}.{}", prefix, field),
                message,
            })
        };

        if self.name.trim().is_empty() {
            error("name", "sensor name cannot be empty".to_string());
        }

        let service = self
            .service
            .parse::<BleUuid>()
            .map_err(|e| error("service", e.to_string()))
            .ok();
        let characteristic = self
            .characteristic
            .parse::<BleUuid>()
            .map_err(|e| error("characteristic", e.to_string()))
            .ok();
        let descriptor = BleUuid::parse_optional(&self.descriptor)
            .map_err(|e| error("descriptor", e.to_string()))
            .ok()
            .flatten();

        if self.update_interval > MAX_UPDATE_INTERVAL {
            error(
                "update_interval",
                format!(
                    "update interval {} is too long (maximum {} seconds / 1 day)",
                    self.update_interval, MAX_UPDATE_INTERVAL
                ),
            );
        }
        if !self.notify && self.update_interval == 0 {
            error(
                "update_interval",
                "neither notifications nor polling are enabled".to_string(),
            );
        }
        if !self.scale.is_finite() {
            error("scale", format!("scale {} is not finite", self.scale));
        }
        if !self.offset.is_finite() {
            error("offset", format!("offset {} is not finite", self.offset));
        }

        let (Some(service), Some(characteristic)) = (service, characteristic) else {
            return Err(errors);
        };
        if !errors.is_empty() {
            return Err(errors);
        }

        let parser = match self.format {
            Some(format) => ValueParser::from(
                ValueDecoder::new(format)
                    .scale(self.scale)
                    .offset(self.offset),
            ),
            None => ValueParser::FirstByte,
        };
        let builder = SourceConfig::builder(service, characteristic)
            .name(self.name.trim())
            .descriptor(descriptor)
            .notify(self.notify)
            .parser(parser);
        let builder = match self.update_interval {
            0 => builder.never_poll(),
            secs => builder.update_interval(Duration::from_secs(secs)),
        };

        builder
            .dedupe_reads(self.dedupe_reads)
            .build_validated()
            .map_err(|e| {
                vec![ValidationError {
                    field: prefix.to_string(),
                    message: e.to_string(),
                }]
            })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No configuration file at {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `device.connect_timeout` or `sensors[0].service`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blesensor")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use blesensor_types::uuid::{BATTERY_LEVEL, BATTERY_SERVICE, CHARACTERISTIC_USER_DESCRIPTION};

    const FULL: &str = r#"
        [device]
        address = "AA:BB:CC:DD:EE:FF"
        connect_timeout = 20

        [reconnect]
        initial_delay = 2
        max_delay = 30
        max_attempts = 10

        [[sensors]]
        name = "Battery"
        service = "180F"
        characteristic = "2A19"
        descriptor = ""
        notify = false
        update_interval = 60

        [[sensors]]
        name = "Temperature"
        service = "181A"
        characteristic = "2A6E"
        notify = true
        update_interval = 0
        format = "i16_le"
        scale = 0.01
    "#;

    fn field_errors(config: &Config) -> Vec<String> {
        match config.validate() {
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.device.connect_timeout, 15);
        assert_eq!(config.reconnect.initial_delay, 1);
        assert_eq!(config.reconnect.max_delay, 60);
        assert!(config.sensors.is_empty());
    }

    #[test]
    fn test_config_full_toml() {
        let config: Config = toml::from_str(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.device.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.reconnect.max_attempts, Some(10));
        assert_eq!(config.sensors.len(), 2);

        let sources = config.source_configs().unwrap();
        assert_eq!(sources[0].name, "Battery");
        assert_eq!(sources[0].service, BATTERY_SERVICE);
        assert_eq!(sources[0].characteristic, BATTERY_LEVEL);
        assert_eq!(sources[0].update_interval, Some(Duration::from_secs(60)));
        assert!(matches!(sources[0].parser, ValueParser::FirstByte));

        assert!(sources[1].notify);
        assert_eq!(sources[1].update_interval, None);
        assert!(matches!(
            sources[1].parser,
            ValueParser::Format(ValueDecoder {
                format: ValueFormat::I16Le,
                ..
            })
        ));
    }

    #[test]
    fn test_sensor_defaults() {
        let toml = r#"
            name = "Battery"
            service = "0x180F"
            characteristic = "2A19"
        "#;
        let sensor: SensorConfig = toml::from_str(toml).unwrap();
        assert_eq!(sensor.update_interval, 60);
        assert_eq!(sensor.scale, 1.0);
        assert!(!sensor.notify);
        assert!(sensor.format.is_none());
        assert!(sensor.descriptor.is_empty());
    }

    #[test]
    fn test_descriptor_is_parsed() {
        let mut sensor = SensorConfig::new("Label", BATTERY_SERVICE, BATTERY_LEVEL);
        sensor.descriptor = "2901".to_string();
        let source = sensor.to_source_config("sensors[0]").unwrap();
        assert_eq!(source.descriptor, Some(CHARACTERISTIC_USER_DESCRIPTION));
    }

    #[test]
    fn test_link_and_reconnect_options() {
        let config: Config = toml::from_str(FULL).unwrap();
        assert_eq!(
            config.link_options().connect_timeout,
            Duration::from_secs(20)
        );
        let reconnect = config.reconnect_options();
        assert_eq!(reconnect.initial_delay, Duration::from_secs(2));
        assert_eq!(reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(reconnect.max_attempts, Some(10));

        let unlimited = Config::default().reconnect_options();
        assert_eq!(unlimited.max_attempts, None);
    }

    #[test]
    fn test_validate_empty_sensors() {
        assert_eq!(field_errors(&Config::default()), vec!["sensors"]);
    }

    #[test]
    fn test_validate_collects_every_error() {
        let mut config = Config::default();
        config.device.connect_timeout = 0;
        config.reconnect.initial_delay = 0;

        let mut bad = SensorConfig::new("", BATTERY_SERVICE, BATTERY_LEVEL);
        bad.service = "not-a-uuid".to_string();
        bad.characteristic = "12345".to_string();
        bad.descriptor = "xyz".to_string();
        config.sensors.push(bad);

        let errors = field_errors(&config);
        assert_eq!(
            errors,
            vec![
                "device.connect_timeout",
                "reconnect.initial_delay",
                "sensors[0].name",
                "sensors[0].service",
                "sensors[0].characteristic",
                "sensors[0].descriptor",
            ]
        );
    }

    #[test]
    fn test_validate_duplicate_names() {
        let mut config = Config::default();
        config
            .sensors
            .push(SensorConfig::new("Battery", BATTERY_SERVICE, BATTERY_LEVEL));
        config
            .sensors
            .push(SensorConfig::new("Battery", BATTERY_SERVICE, BATTERY_LEVEL));
        assert_eq!(field_errors(&config), vec!["sensors[1].name"]);
    }

    #[test]
    fn test_validate_intervals() {
        let mut idle = SensorConfig::new("Idle", BATTERY_SERVICE, BATTERY_LEVEL);
        idle.update_interval = 0;
        let mut slow = SensorConfig::new("Slow", BATTERY_SERVICE, BATTERY_LEVEL);
        slow.update_interval = MAX_UPDATE_INTERVAL + 1;
        let mut pushed = SensorConfig::new("Pushed", BATTERY_SERVICE, BATTERY_LEVEL);
        pushed.update_interval = 0;
        pushed.notify = true;

        let config = Config {
            sensors: vec![idle, slow, pushed],
            ..Default::default()
        };
        assert_eq!(
            field_errors(&config),
            vec!["sensors[0].update_interval", "sensors[1].update_interval"]
        );
    }

    #[test]
    fn test_validate_reconnect_order() {
        let mut config = Config::default();
        config
            .sensors
            .push(SensorConfig::new("Battery", BATTERY_SERVICE, BATTERY_LEVEL));
        config.reconnect.initial_delay = 30;
        config.reconnect.max_delay = 10;
        assert_eq!(field_errors(&config), vec!["reconnect.max_delay"]);
    }

    #[test]
    fn test_validate_non_finite_scale() {
        let mut sensor = SensorConfig::new("Battery", BATTERY_SERVICE, BATTERY_LEVEL);
        sensor.format = Some(ValueFormat::U8);
        sensor.scale = f32::INFINITY;
        let errors = sensor.to_source_config("sensors[0]").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sensors[0].scale");
    }

    #[test]
    fn test_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError {
                field: "sensors[0].service".to_string(),
                message: "Invalid UUID: 'x'".to_string(),
            },
            ValidationError {
                field: "sensors".to_string(),
                message: "at least one sensor must be configured".to_string(),
            },
        ]);
        let text = error.to_string();
        assert!(text.starts_with("Configuration validation failed:"));
        assert!(text.contains("  - sensors[0].service: Invalid UUID: 'x'"));
        assert!(text.contains("  - sensors: at least one sensor must be configured"));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config: Config = toml::from_str(FULL).unwrap();
        config.sensors[0].dedupe_reads = true;
        config.save(&config_path).unwrap();

        let loaded = Config::load_validated(&config_path).unwrap();
        assert_eq!(loaded.device.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(loaded.sensors.len(), 2);
        assert!(loaded.sensors[0].dedupe_reads);
        assert_eq!(loaded.sensors[1].format, Some(ValueFormat::I16Le));
        assert_eq!(loaded.reconnect.max_attempts, Some(10));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_validated_rejects_invalid() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[[sensors]]\nname = \"x\"\nservice = \"180F\"\ncharacteristic = \"zz\"\n",
        )
        .unwrap();

        let result = Config::load_validated(&config_path);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("blesensor/config.toml"));
    }
}

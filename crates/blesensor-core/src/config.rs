//! Per-source configuration.

use std::time::Duration;

use tracing::info;

use blesensor_types::BleUuid;

use crate::error::{Error, Result};
use crate::parser::ValueParser;

/// Shortest poll interval accepted by [`SourceConfig::validate`].
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration of one value source.
///
/// UUIDs and the notification flag are fixed for the life of the source;
/// `update_interval` is only consumed by the scheduler.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Name used in logs and published events.
    pub name: String,
    /// Service that contains the characteristic.
    pub service: BleUuid,
    /// Characteristic to read or subscribe to.
    pub characteristic: BleUuid,
    /// Descriptor below the characteristic to read instead, if any.
    pub descriptor: Option<BleUuid>,
    /// Whether to register for notifications after discovery.
    pub notify: bool,
    /// Poll interval. `None` disables polling.
    pub update_interval: Option<Duration>,
    /// Converts raw bytes into a measurement.
    pub parser: ValueParser,
    /// Suppress a poll while the previous read has not completed.
    pub dedupe_reads: bool,
}

impl SourceConfig {
    /// Start building a configuration for a characteristic.
    pub fn builder(service: BleUuid, characteristic: BleUuid) -> SourceConfigBuilder {
        SourceConfigBuilder {
            config: SourceConfig {
                name: characteristic.to_string(),
                service,
                characteristic,
                descriptor: None,
                notify: false,
                update_interval: Some(Duration::from_secs(60)),
                parser: ValueParser::default(),
                dedupe_reads: false,
            },
        }
    }

    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_config("name must not be empty"));
        }
        if let Some(interval) = self.update_interval
            && interval < MIN_UPDATE_INTERVAL
        {
            return Err(Error::invalid_config(format!(
                "{}: update_interval must be at least {:?}",
                self.name, MIN_UPDATE_INTERVAL
            )));
        }
        if !self.notify && self.update_interval.is_none() {
            return Err(Error::invalid_config(format!(
                "{}: neither notifications nor polling are enabled",
                self.name
            )));
        }
        if let ValueParser::Format(decoder) = &self.parser
            && !(decoder.scale.is_finite() && decoder.offset.is_finite())
        {
            return Err(Error::invalid_config(format!(
                "{}: scale and offset must be finite",
                self.name
            )));
        }
        Ok(())
    }

    /// Log the configuration at `info`.
    pub fn log_config(&self) {
        let descriptor = self
            .descriptor
            .map(|d| d.to_string())
            .unwrap_or_default();
        let interval = match self.update_interval {
            Some(interval) => format!("{:?}", interval),
            None => "never".to_string(),
        };
        info!(source = %self.name, "BLE Sensor '{}'", self.name);
        info!(source = %self.name, "  Service UUID       : {}", self.service);
        info!(source = %self.name, "  Characteristic UUID: {}", self.characteristic);
        info!(source = %self.name, "  Descriptor UUID    : {}", descriptor);
        info!(
            source = %self.name,
            "  Notifications      : {}",
            if self.notify { "YES" } else { "NO" }
        );
        info!(source = %self.name, "  Update Interval    : {}", interval);
        info!(source = %self.name, "  Decoder            : {}", self.parser);
    }
}

/// Builder for [`SourceConfig`].
#[derive(Debug, Clone)]
pub struct SourceConfigBuilder {
    config: SourceConfig,
}

impl SourceConfigBuilder {
    /// Set the name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Target a descriptor below the characteristic.
    #[must_use]
    pub fn descriptor(mut self, descriptor: impl Into<Option<BleUuid>>) -> Self {
        self.config.descriptor = descriptor.into();
        self
    }

    /// Enable or disable notifications.
    #[must_use]
    pub fn notify(mut self, notify: bool) -> Self {
        self.config.notify = notify;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.config.update_interval = Some(interval);
        self
    }

    /// Never poll; values arrive only through notifications.
    #[must_use]
    pub fn never_poll(mut self) -> Self {
        self.config.update_interval = None;
        self
    }

    /// Set the value parser.
    #[must_use]
    pub fn parser(mut self, parser: impl Into<ValueParser>) -> Self {
        self.config.parser = parser.into();
        self
    }

    /// Use a closure as the decoder.
    #[must_use]
    pub fn decoder<F>(mut self, decode: F) -> Self
    where
        F: Fn(&[u8]) -> f32 + Send + Sync + 'static,
    {
        self.config.parser = ValueParser::custom(decode);
        self
    }

    /// Enable or disable the in-flight read guard.
    #[must_use]
    pub fn dedupe_reads(mut self, enabled: bool) -> Self {
        self.config.dedupe_reads = enabled;
        self
    }

    /// Build the configuration without validating it.
    #[must_use]
    pub fn build(self) -> SourceConfig {
        self.config
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<SourceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

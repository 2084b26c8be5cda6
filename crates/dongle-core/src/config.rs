//! Dongle configuration.
//!
//! Every field has a default equal to the device build constant, so a TOML
//! file only needs to name what it overrides:
//!
//! ```toml
//! dongle_id = 42
//! log_min_wait = 5
//!
//! [log]
//! reserved_bytes = 4096
//! record_format = "compact"
//! ```

use dongle_error::{DongleError, Result};
use dongle_tracker::TrackerConfig;
use dongle_types::RecordFormat;
use serde::{Deserialize, Serialize};

/// Fourteen days in minutes.
pub const DEFAULT_MAX_LOG_AGE: u32 = 14 * 24 * 60;
pub const DEFAULT_EPOCH_LENGTH: u32 = 15;

/// Placement and format of the encounter log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Page-aligned start of the device storage area (OTP table, then log).
    pub flash_offset: u32,
    /// Bytes reserved for encounter records.
    pub reserved_bytes: u32,
    pub record_format: RecordFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            flash_offset: 0,
            reserved_bytes: 0x100,
            record_format: RecordFormat::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DongleConfig {
    pub dongle_id: u32,
    /// Clock value at provisioning.
    pub t_init: u32,
    pub backend_pk_size: u32,
    pub dongle_sk_size: u32,
    pub max_tracked: usize,
    pub log_min_wait: u32,
    pub min_encounter_duration: u32,
    /// Records whose last sighting is older than this are evicted.
    pub max_log_age: u32,
    pub report_interval: u32,
    pub epoch_length: u32,
    pub log: LogConfig,
}

impl Default for DongleConfig {
    fn default() -> Self {
        let tracker = TrackerConfig::default();
        Self {
            dongle_id: 0,
            t_init: 0,
            backend_pk_size: 0,
            dongle_sk_size: 0,
            max_tracked: tracker.max_tracked,
            log_min_wait: tracker.log_min_wait,
            min_encounter_duration: tracker.min_encounter_duration,
            max_log_age: DEFAULT_MAX_LOG_AGE,
            report_interval: DEFAULT_MAX_LOG_AGE,
            epoch_length: DEFAULT_EPOCH_LENGTH,
            log: LogConfig::default(),
        }
    }
}

impl DongleConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|err| DongleError::invalid_config(format!("config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub const fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            max_tracked: self.max_tracked,
            log_min_wait: self.log_min_wait,
            min_encounter_duration: self.min_encounter_duration,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.tracker().validate()?;
        if self.epoch_length == 0 {
            return Err(DongleError::invalid_config("epoch_length must be non-zero"));
        }
        if self.report_interval == 0 {
            return Err(DongleError::invalid_config("report_interval must be non-zero"));
        }
        let record = self.log.record_format.encoded_len();
        if (self.log.reserved_bytes as usize) < record {
            return Err(DongleError::invalid_config(format!(
                "log.reserved_bytes = {} cannot hold one {record}-byte record",
                self.log.reserved_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_device_constants() {
        let config = DongleConfig::default();
        assert_eq!(config.max_tracked, 16);
        assert_eq!(config.log_min_wait, 15);
        assert_eq!(config.max_log_age, 20_160);
        assert_eq!(config.report_interval, config.max_log_age);
        assert_eq!(config.epoch_length, 15);
        assert_eq!(config.log.reserved_bytes, 0x100);
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_overrides_only_named_keys() {
        let config = DongleConfig::from_toml_str(
            r#"
            dongle_id = 42
            log_min_wait = 5

            [log]
            reserved_bytes = 4096
            record_format = "compact"
            "#,
        )
        .unwrap();
        assert_eq!(config.dongle_id, 42);
        assert_eq!(config.log_min_wait, 5);
        assert_eq!(config.max_tracked, 16, "case=default_kept");
        assert_eq!(config.log.reserved_bytes, 4096);
        assert_eq!(config.log.record_format, RecordFormat::Compact);
        assert_eq!(config.log.flash_offset, 0);
    }

    #[test]
    fn test_validation_failures() {
        let zero_epoch = DongleConfig {
            epoch_length: 0,
            ..DongleConfig::default()
        };
        assert!(zero_epoch.validate().is_err(), "case=epoch");

        let zero_tracked = DongleConfig {
            max_tracked: 0,
            ..DongleConfig::default()
        };
        assert!(zero_tracked.validate().is_err(), "case=tracked");

        let tiny_log = DongleConfig {
            log: LogConfig {
                reserved_bytes: 10,
                ..LogConfig::default()
            },
            ..DongleConfig::default()
        };
        assert!(tiny_log.validate().is_err(), "case=log");
    }

    #[test]
    fn test_bad_toml_is_invalid_config() {
        let err = DongleConfig::from_toml_str("max_tracked = \"many\"").unwrap_err();
        assert!(matches!(err, DongleError::InvalidConfig { .. }));
    }
}

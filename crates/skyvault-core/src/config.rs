//! Station configuration
//!
//! Every tunable of the station lives in [`StationConfig`]. The defaults
//! describe the reference installation; a deployment may ship a postcard
//! encoded blob instead. Vault capacity is not part of it: it is the const
//! generic `N` of the vault types so the history stays a fixed-size array.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::storage::EMERGENCY_SLOTS;

/// Default number of samples each vault keeps.
pub const DEFAULT_CAPACITY: usize = 1200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be non-zero")]
    ZeroPeriod { name: &'static str },

    #[error("append period must be a whole number of minutes and a multiple of the poll period")]
    AppendPeriod,

    #[error("store period must hold a whole number of append periods")]
    StorePeriod,

    #[error("{appends} appends per store period exceed the {slots} emergency slots")]
    EmergencyOverflow { appends: u32, slots: usize },

    #[error("normalization range for {name} must be positive")]
    NormRange { name: &'static str },

    #[error("failed to encode or decode the configuration blob")]
    Encoding,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Periods {
    /// Indoor sensor polling [ms]
    pub poll_ms: u32,
    /// Appending the averaged readings to the vaults [ms]
    pub append_ms: u32,
    /// Full snapshot of the vaults to non-volatile memory [ms]
    pub store_ms: u32,
    /// RTC event polling [ms]
    pub clock_poll_ms: u32,
    /// Motion sensor polling [ms]
    pub presence_poll_ms: u32,
    /// Screen refresh [ms]
    pub frame_ms: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct WeatherWeights {
    pub pressure: f32,
    pub humidity: f32,
    pub temperature: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrendConfig {
    /// Look-back window of the weather prediction [min]
    pub backstep_minutes: u16,
    /// Highest plausible pressure change [mmHg/min]
    pub pressure_norm: f32,
    /// Highest plausible humidity change [%/min]
    pub humidity_norm: f32,
    /// Highest plausible temperature change [°C/min]
    pub temperature_norm: f32,
    pub weights: WeatherWeights,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Location {
    /// Degrees east
    pub longitude: f32,
    /// Offset from GMT without daylight saving [h]
    pub gmt_offset_hours: i8,
    /// Day length at the summer solstice [h]
    pub longest_day_hours: u8,
    /// Day length at the winter solstice [h]
    pub shortest_day_hours: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DisplayConfig {
    /// Radio counts as receiving for this long after a packet [ms]
    pub receive_threshold_ms: u32,
    /// Radio counts as lost after this long without a packet [ms]
    pub pending_threshold_ms: u32,
    /// Backlight timeout without motion or input [ms]
    pub idle_timeout_ms: u32,
    pub pan_slow: u16,
    pub pan_fast: u16,
    pub cursor_slow: u16,
    pub cursor_fast: u16,
    /// Samples visible in a graph; longer histories can be panned
    pub graph_width: u16,
    /// Minimum history for cursor mode
    pub cursor_box: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Attempts per non-volatile transfer after the first one fails
    pub nv_retry_limit: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub periods: Periods,
    pub trend: TrendConfig,
    pub location: Location,
    pub display: DisplayConfig,
    pub storage: StorageConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            periods: Periods {
                poll_ms: 60_000,
                append_ms: 360_000,
                store_ms: 3_600_000,
                clock_poll_ms: 250,
                presence_poll_ms: 500,
                frame_ms: 50,
            },
            trend: TrendConfig {
                backstep_minutes: 90,
                pressure_norm: 0.01,
                humidity_norm: 0.5,
                temperature_norm: 0.15,
                weights: WeatherWeights {
                    pressure: 0.6,
                    humidity: 0.3,
                    temperature: 0.1,
                },
            },
            location: Location {
                longitude: 24.75,
                gmt_offset_hours: 2,
                longest_day_hours: 18,
                shortest_day_hours: 6,
            },
            display: DisplayConfig {
                receive_threshold_ms: 1_000,
                pending_threshold_ms: 300_000,
                idle_timeout_ms: 60_000,
                pan_slow: 20,
                pan_fast: 50,
                cursor_slow: 1,
                cursor_fast: 10,
                graph_width: 240,
                cursor_box: 16,
            },
            storage: StorageConfig { nv_retry_limit: 3 },
        }
    }
}

impl StationConfig {
    /// Append period in whole minutes, the unit of sample spacing.
    pub const fn append_minutes(&self) -> u32 {
        self.periods.append_ms / 60_000
    }

    pub const fn appends_per_store(&self) -> u32 {
        self.periods.store_ms / self.periods.append_ms
    }

    /// Check the relations between periods the storage layout depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.periods;
        for (name, value) in [
            ("poll period", p.poll_ms),
            ("append period", p.append_ms),
            ("store period", p.store_ms),
            ("clock poll period", p.clock_poll_ms),
            ("presence poll period", p.presence_poll_ms),
            ("frame period", p.frame_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroPeriod { name });
            }
        }

        if p.append_ms % 60_000 != 0 || p.append_ms % p.poll_ms != 0 {
            return Err(ConfigError::AppendPeriod);
        }
        if p.store_ms % p.append_ms != 0 {
            return Err(ConfigError::StorePeriod);
        }

        let appends = self.appends_per_store();
        if appends as usize > EMERGENCY_SLOTS {
            return Err(ConfigError::EmergencyOverflow {
                appends,
                slots: EMERGENCY_SLOTS,
            });
        }

        for (name, value) in [
            ("pressure", self.trend.pressure_norm),
            ("humidity", self.trend.humidity_norm),
            ("temperature", self.trend.temperature_norm),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NormRange { name });
            }
        }

        Ok(())
    }

    pub fn to_postcard(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Encoding)
    }

    /// Decode and validate a configuration blob.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Encoding)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StationConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.append_minutes(), 6);
        assert_eq!(config.appends_per_store(), 10);
    }

    #[test]
    fn test_append_period_must_be_whole_minutes() {
        let mut config = StationConfig::default();
        config.periods.append_ms = 90_000;
        config.periods.poll_ms = 30_000;
        assert_eq!(config.validate(), Err(ConfigError::AppendPeriod));
    }

    #[test]
    fn test_store_period_must_hold_whole_appends() {
        let mut config = StationConfig::default();
        config.periods.store_ms = 3_000_000;
        assert_eq!(config.validate(), Err(ConfigError::StorePeriod));
    }

    #[test]
    fn test_store_period_must_fit_emergency_slots() {
        let mut config = StationConfig::default();
        config.periods.store_ms = config.periods.append_ms * (EMERGENCY_SLOTS as u32 + 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmergencyOverflow { .. })
        ));
    }

    #[test]
    fn test_postcard_round_trip() {
        let mut config = StationConfig::default();
        config.trend.backstep_minutes = 120;
        config.location.longitude = -3.5;

        let bytes = config.to_postcard().unwrap();
        let decoded = StationConfig::from_postcard(&bytes).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_corrupt_blob_is_rejected() {
        assert_eq!(
            StationConfig::from_postcard(&[0xFF, 0xFF]),
            Err(ConfigError::Encoding)
        );
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clock::Location;
use motion::MotionConfig;
use network::Topics;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed site configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid site configuration: {0}")]
    Invalid(String),
}

/// Static, per-installation settings. Never written by the firmware.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    pub device: DeviceConfig,
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub location: LocationConfig,
    pub battery: BatteryConfig,
    pub motor: MotorConfig,
    pub pins: PinConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WifiNetwork {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WifiConfig {
    pub networks: Vec<WifiNetwork>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    pub broker_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub topics: Topics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    pub timezone_offset_hours: i32,
    #[serde(default = "enabled")]
    pub daylight_saving: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatteryConfig {
    /// No motion below this voltage.
    pub low_voltage: f32,
    /// ADC count to volts, including the divider.
    pub volts_per_bit: f32,
    /// ADC count to volts for the panel input.
    pub panel_volts_per_bit: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotorConfig {
    pub steps_per_revolution: i32,
    pub step_delay_us: u32,
    pub homing_timeout_secs: u64,
}

/// GPIO numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinConfig {
    pub stepper: [i32; 4],
    pub limiter_switch: i32,
    pub power_rail: i32,
    pub i2c_sda: i32,
    pub i2c_scl: i32,
}

impl SiteConfig {
    /// Missing or malformed configuration is fatal; there is no built-in fallback.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SiteConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.wifi.networks.is_empty() {
            return Err(ConfigError::Invalid("no WiFi network configured".into()));
        }
        if !(-12..=14).contains(&self.location.timezone_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "timezone offset {}h out of range",
                self.location.timezone_offset_hours
            )));
        }
        if self.motor.steps_per_revolution < 8 {
            return Err(ConfigError::Invalid(format!(
                "{} steps per revolution is not a turntable",
                self.motor.steps_per_revolution
            )));
        }
        if self.motor.homing_timeout_secs == 0 {
            return Err(ConfigError::Invalid("homing timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn location(&self) -> Location {
        Location {
            latitude: self.location.latitude,
            longitude: self.location.longitude,
            altitude: self.location.altitude,
            utc_offset_hours: self.location.timezone_offset_hours,
            daylight_saving: self.location.daylight_saving,
        }
    }

    pub fn motion(&self) -> MotionConfig {
        MotionConfig::new(
            self.motor.steps_per_revolution,
            Duration::from_secs(self.motor.homing_timeout_secs),
        )
    }

    pub fn networks(&self) -> Vec<(String, String)> {
        self.wifi
            .networks
            .iter()
            .map(|n| (n.ssid.clone(), n.password.clone()))
            .collect()
    }
}

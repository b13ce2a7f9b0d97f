//! Operating state that survives deep sleep.
//!
//! The whole record is read once at wake and written back once before
//! suspending. A write goes to `<file>.tmp` first and is renamed over the
//! target, so a reset mid-write leaves either the old or the new record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use motion::MotorState;

use crate::config::SiteConfig;

#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("cannot read state file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed state file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot encode state: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("cannot write state file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeState {
    pub steps_taken: i32,
    pub max_steps_to_rotate: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub south_step: Option<i32>,
    pub microswitch_steps: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_calibration: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_wake: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_battery_voltage: Option<f32>,
    pub battery_low_voltage: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_humidity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pressure: Option<f32>,
    pub suspend_secs: u64,
    pub keep_awake_secs: u64,
    pub timezone_offset_hours: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub debug: bool,
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

impl RuntimeState {
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let temp = temp_path(path);
        if !path.exists() && temp.exists() {
            log::warn!("{} missing, promoting {}", path.display(), temp.display());
            fs::rename(&temp, path).map_err(|source| StateError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let content = fs::read_to_string(path).map_err(|source| StateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let state = toml::from_str(&content).map_err(|source| StateError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded runtime state from {}", path.display());
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let content = toml::to_string_pretty(self)?;
        let temp = temp_path(path);
        let write_err = |source| StateError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::create(&temp).map_err(write_err)?;
        file.write_all(content.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        if fs::rename(&temp, path).is_err() {
            // SPIFFS will not rename over an existing file.
            fs::remove_file(path).map_err(write_err)?;
            fs::rename(&temp, path).map_err(write_err)?;
        }
        log::debug!("Runtime state written to {}", path.display());
        Ok(())
    }

    pub fn motor_state(&self) -> MotorState {
        MotorState {
            steps_taken: self.steps_taken,
            max_steps_to_rotate: self.max_steps_to_rotate,
            south_step: self.south_step,
            microswitch_steps: self.microswitch_steps,
            table_turning: false,
        }
    }

    /// Copy the motor's view back just before saving.
    pub fn absorb(&mut self, motor: &MotorState) {
        self.steps_taken = motor.steps_taken;
        self.max_steps_to_rotate = motor.max_steps_to_rotate;
        self.south_step = motor.south_step;
        self.microswitch_steps = motor.microswitch_steps;
    }

    /// Site settings win over whatever was persisted last time.
    pub fn adopt_site(&mut self, site: &SiteConfig) {
        self.timezone_offset_hours = site.location.timezone_offset_hours;
        self.latitude = site.location.latitude;
        self.longitude = site.location.longitude;
        self.battery_low_voltage = site.battery.low_voltage;
    }
}

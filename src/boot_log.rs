use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use motion::{Journal, Phase};

#[derive(Debug, Clone, PartialEq)]
pub enum Milestone {
    Boot { reason: String },
    StateLoaded,
    StateSaved,
    StateSaveFailed(String),
    Motion(Phase),
    Fault(String),
    Suspend { secs: u64 },
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Milestone::Boot { reason } => write!(f, "boot, reset reason {}", reason),
            Milestone::StateLoaded => f.write_str("state loaded"),
            Milestone::StateSaved => f.write_str("state saved"),
            Milestone::StateSaveFailed(e) => write!(f, "state save failed: {}", e),
            Milestone::Motion(phase) => write!(f, "{}", phase),
            Milestone::Fault(e) => write!(f, "fault: {}", e),
            Milestone::Suspend { secs } => write!(f, "suspend for {}s", secs),
        }
    }
}

/// Append-only milestone file for the current boot; the previous boot's file
/// is kept alongside with a `.1` suffix. Nothing reads it back at runtime.
#[derive(Debug, Clone)]
pub struct BootLog {
    path: PathBuf,
}

impl BootLog {
    /// Move the last boot's log aside and start a new one.
    pub fn rotate(path: &Path) -> BootLog {
        let mut previous = path.as_os_str().to_owned();
        previous.push(".1");
        if path.exists() {
            let _ = fs::remove_file(&previous);
            if let Err(e) = fs::rename(path, &previous) {
                log::warn!("Boot log rotation failed: {}", e);
            }
        }
        BootLog {
            path: path.to_path_buf(),
        }
    }

    pub fn record(&self, milestone: Milestone) {
        let line = format!(
            "{} {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            milestone
        );
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            log::warn!("Boot log write failed: {}", e);
        }
    }
}

impl Journal for BootLog {
    fn note(&self, phase: Phase) {
        self.record(Milestone::Motion(phase));
    }
}

use chrono::{DateTime, Utc};
use std::time::Duration;

use clock::Clock;
use network::ErrorReport;

use crate::config::ConfigError;
use crate::runtime::StateError;

/// Below this much free heap the cycle is not started.
pub const MIN_FREE_HEAP: u32 = 16 * 1024;

const REBOOT_DELAY: Duration = Duration::from_secs(10);

/// Faults that end the wake cycle with a reboot.
#[derive(thiserror::Error, Debug)]
pub enum Fault {
    #[error("communication failure: {0:#}")]
    Communication(anyhow::Error),

    #[error("memory exhausted, {free} bytes free")]
    MemoryExhausted { free: u32 },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0:#}")]
    Runtime(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    ReportThenReboot(Duration),
    /// Reporting needs memory that is not there.
    RebootNow,
}

impl Fault {
    pub fn escalation(&self) -> Escalation {
        match self {
            Fault::MemoryExhausted { .. } => Escalation::RebootNow,
            _ => Escalation::ReportThenReboot(REBOOT_DELAY),
        }
    }
}

/// What the cycle needs to know about the chip it runs on.
pub trait System {
    fn uptime_ms(&self) -> u64;
    fn free_heap(&self) -> u32;
    fn address(&self) -> String;
}

pub fn check_heap(system: &dyn System) -> Result<(), Fault> {
    let free = system.free_heap();
    if free < MIN_FREE_HEAP {
        return Err(Fault::MemoryExhausted { free });
    }
    Ok(())
}

pub fn error_report(
    clock: &Clock,
    now: DateTime<Utc>,
    system: &dyn System,
    device: &str,
    text: &str,
) -> ErrorReport {
    ErrorReport {
        timestamp: clock.timestamp(now),
        uptime_ms: system.uptime_ms(),
        device: device.to_string(),
        address: system.address(),
        text: text.to_string(),
        free_memory: system.free_heap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct Chip {
        free: u32,
    }

    impl System for Chip {
        fn uptime_ms(&self) -> u64 {
            1500
        }

        fn free_heap(&self) -> u32 {
            self.free
        }

        fn address(&self) -> String {
            "10.0.0.7".into()
        }
    }

    #[test]
    fn memory_exhaustion_skips_reporting() {
        let fault = check_heap(&Chip { free: 4096 }).unwrap_err();
        assert_eq!(fault.escalation(), Escalation::RebootNow);
        assert!(check_heap(&Chip { free: 200_000 }).is_ok());
    }

    #[test]
    fn other_faults_report_first() {
        let fault = Fault::Communication(anyhow!("broker unreachable"));
        assert_eq!(fault.escalation(), Escalation::ReportThenReboot(Duration::from_secs(10)));
        assert_eq!(fault.to_string(), "communication failure: broker unreachable");
    }
}

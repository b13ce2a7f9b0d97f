pub mod boot_log;
pub mod config;
pub mod cycle;
pub mod fault;
pub mod runtime;

pub use boot_log::{BootLog, Milestone};
pub use config::{ConfigError, SiteConfig};
pub use cycle::{plan, CycleReport, Plan, Reason, WakeCycle};
pub use fault::{Escalation, Fault, System};
pub use runtime::{RuntimeState, StateError};

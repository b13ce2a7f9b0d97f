#[cfg(target_os = "espidf")]
pub mod mqtt;
pub mod telemetry;

pub use telemetry::{ErrorReport, Publisher, Reading, Telemetry, Topics};

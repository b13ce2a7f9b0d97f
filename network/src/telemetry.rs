use std::fmt;

use anyhow::bail;
use log::*;
use serde::{Deserialize, Serialize};

/// Fire-and-forget message transport, the MQTT client on the device.
pub trait Publisher {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;
    fn is_connected(&self) -> bool;
}

/// One topic per measurement plus the error channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Topics {
    pub temperature: String,
    pub humidity: String,
    pub pressure: String,
    pub battery_voltage: String,
    pub errors: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Temperature(f32),
    Humidity(f32),
    Pressure(f32),
    BatteryVoltage(f32),
}

/// Semicolon separated error record:
/// `timestamp;uptime_ms;device;address;error;free_memory`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub timestamp: String,
    pub uptime_ms: u64,
    pub device: String,
    pub address: String,
    pub text: String,
    pub free_memory: u32,
}

// Field separators inside the message would shift every later column.
fn field(text: &str) -> String {
    text.replace(';', ",").replace(['\n', '\r'], " ")
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{};{};{}",
            field(&self.timestamp),
            self.uptime_ms,
            field(&self.device),
            field(&self.address),
            field(&self.text),
            self.free_memory
        )
    }
}

pub struct Telemetry<P> {
    publisher: P,
    topics: Topics,
}

impl<P: Publisher> Telemetry<P> {
    pub fn new(publisher: P, topics: Topics) -> Self {
        Telemetry { publisher, topics }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn report(&mut self, reading: Reading) -> anyhow::Result<()> {
        let (topic, value) = match reading {
            Reading::Temperature(v) => (&self.topics.temperature, v),
            Reading::Humidity(v) => (&self.topics.humidity, v),
            Reading::Pressure(v) => (&self.topics.pressure, v),
            Reading::BatteryVoltage(v) => (&self.topics.battery_voltage, v),
        };
        if !self.publisher.is_connected() {
            bail!("not connected, dropping {:?}", reading);
        }
        let payload = format!("{:.2}", value);
        debug!("Publishing {} to {}", payload, topic);
        self.publisher.publish(topic, payload.as_bytes())
    }

    pub fn report_error(&mut self, report: &ErrorReport) -> anyhow::Result<()> {
        if !self.publisher.is_connected() {
            bail!("not connected, error report kept local");
        }
        let record = report.to_string();
        warn!("Reporting error: {}", record);
        self.publisher.publish(&self.topics.errors, record.as_bytes())
    }
}

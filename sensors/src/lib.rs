#[cfg(target_os = "espidf")]
pub mod esp;

pub mod sensors {
    use anyhow::bail;

    /// Anything that reads a single voltage, the panel or the battery divider.
    pub trait Voltmeter {
        fn volts(&mut self) -> anyhow::Result<f32>;

        /// Mean of up to `samples` readings. Failed or non-finite readings are
        /// skipped; it is an error only if none succeed.
        fn average(&mut self, samples: usize) -> anyhow::Result<f32> {
            let mut sum = 0.0;
            let mut taken = 0;
            for _ in 0..samples {
                match self.volts() {
                    Ok(volts) if volts.is_finite() => {
                        sum += volts;
                        taken += 1;
                    }
                    Ok(volts) => log::warn!("Ignoring voltage reading {}", volts),
                    Err(e) => log::warn!("Voltage reading failed: {:#}", e),
                }
            }
            if taken == 0 {
                bail!("no valid reading in {} samples", samples);
            }
            Ok(sum / taken as f32)
        }
    }

    /// One reading of the environmental sensor.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Climate {
        /// Degrees Celsius.
        pub temperature: f32,
        /// Relative humidity, percent.
        pub humidity: f32,
        /// Hectopascal.
        pub pressure: f32,
    }

    pub trait Environment {
        fn measure(&mut self) -> anyhow::Result<Climate>;
    }

}

pub use sensors::{Climate, Environment, Voltmeter};

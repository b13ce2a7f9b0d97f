use std::borrow::Borrow;

use anyhow::anyhow;
use bme280::i2c::BME280;
use esp_idf_svc::hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_svc::hal::delay::Ets;
use esp_idf_svc::hal::gpio::ADCPin;

use crate::sensors::{Climate, Environment, Voltmeter};

/// One ADC1 channel scaled to volts. `volts_per_bit` folds in the voltage
/// divider in front of the pin.
pub struct AdcVoltmeter<'d, T, M>
where
    T: ADCPin,
    M: Borrow<AdcDriver<'d, T::Adc>>,
{
    channel: AdcChannelDriver<'d, T, M>,
    volts_per_bit: f32,
}

impl<'d, T, M> AdcVoltmeter<'d, T, M>
where
    T: ADCPin,
    M: Borrow<AdcDriver<'d, T::Adc>>,
{
    pub fn new(channel: AdcChannelDriver<'d, T, M>, volts_per_bit: f32) -> Self {
        AdcVoltmeter {
            channel,
            volts_per_bit,
        }
    }
}

impl<'d, T, M> Voltmeter for AdcVoltmeter<'d, T, M>
where
    T: ADCPin,
    M: Borrow<AdcDriver<'d, T::Adc>>,
{
    fn volts(&mut self) -> anyhow::Result<f32> {
        let raw = self.channel.read_raw()?;
        Ok(raw as f32 * self.volts_per_bit)
    }
}

/// BME280 on I2C, forced measurements.
pub struct Bme280Sensor<I2C> {
    device: BME280<I2C>,
}

impl<I2C> Bme280Sensor<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    pub fn new(bus: I2C) -> anyhow::Result<Self> {
        let mut device = BME280::new_primary(bus);
        device
            .init(&mut Ets)
            .map_err(|e| anyhow!("BME280 init failed: {:?}", e))?;
        Ok(Bme280Sensor { device })
    }
}

impl<I2C> Environment for Bme280Sensor<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    fn measure(&mut self) -> anyhow::Result<Climate> {
        let m = self
            .device
            .measure(&mut Ets)
            .map_err(|e| anyhow!("BME280 read failed: {:?}", e))?;
        Ok(Climate {
            temperature: m.temperature,
            humidity: m.humidity,
            pressure: m.pressure / 100.0,
        })
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("rotator is ESP-IDF firmware; on the host only `cargo test` is useful");
}

#[cfg(target_os = "espidf")]
fn main() {
    firmware::run()
}

#[cfg(target_os = "espidf")]
mod firmware {
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant, SystemTime};

    use anyhow::anyhow;
    use chrono::{DateTime, Utc};
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::adc::attenuation::DB_11;
    use esp_idf_svc::hal::adc::oneshot::config::AdcChannelConfig;
    use esp_idf_svc::hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
    use esp_idf_svc::hal::delay::Ets;
    use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, Output, PinDriver, Pull};
    use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::hal::prelude::*;
    use esp_idf_svc::hal::reset::{self, ResetReason};
    use esp_idf_svc::log::EspLogger;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sntp::{EspSntp, SyncStatus};
    use esp_idf_svc::sys;
    use log::*;

    use clock::Clock;
    use motion::{Motion, Uln2003};
    use network::mqtt::Mqtt;
    use network::Telemetry;
    use rotator::fault::{self, Escalation, Fault, System};
    use rotator::{BootLog, CycleReport, Milestone, RuntimeState, SiteConfig, WakeCycle};
    use sensors::esp::{AdcVoltmeter, Bme280Sensor};
    use wifi::wifi::Wifi;

    const CONFIG_PATH: &str = "/storage/config.toml";
    const STATE_PATH: &str = "/storage/state.toml";
    const BOOT_LOG_PATH: &str = "/storage/boot.log";
    const SNTP_TIMEOUT: Duration = Duration::from_secs(30);
    const MQTT_TIMEOUT: Duration = Duration::from_secs(15);

    struct Chip {
        address: String,
    }

    impl System for Chip {
        fn uptime_ms(&self) -> u64 {
            (unsafe { sys::esp_timer_get_time() } / 1000) as u64
        }

        fn free_heap(&self) -> u32 {
            unsafe { sys::esp_get_free_heap_size() }
        }

        fn address(&self) -> String {
            self.address.clone()
        }
    }

    fn now() -> DateTime<Utc> {
        SystemTime::now().into()
    }

    fn runtime(e: impl Into<anyhow::Error>) -> Fault {
        Fault::Runtime(e.into())
    }

    fn communication(e: impl Into<anyhow::Error>) -> Fault {
        Fault::Communication(e.into())
    }

    fn mount_storage() -> anyhow::Result<()> {
        let conf = sys::esp_vfs_spiffs_conf_t {
            base_path: c"/storage".as_ptr(),
            partition_label: c"storage".as_ptr(),
            max_files: 5,
            format_if_mount_failed: false,
        };
        sys::esp!(unsafe { sys::esp_vfs_spiffs_register(&conf) })?;
        Ok(())
    }

    fn wait_for_time(sntp: &EspSntp) -> anyhow::Result<()> {
        info!("Synchronizing with NTP Server");
        let started = Instant::now();
        while sntp.get_sync_status() != SyncStatus::Completed {
            if started.elapsed() >= SNTP_TIMEOUT {
                return Err(anyhow!("no NTP time within {:?}", SNTP_TIMEOUT));
            }
            thread::sleep(Duration::from_millis(200));
        }
        info!("Time Sync Completed");
        Ok(())
    }

    fn coil(gpio: i32) -> anyhow::Result<PinDriver<'static, AnyOutputPin, Output>> {
        // Pin numbers come from the site configuration.
        Ok(PinDriver::output(unsafe { AnyOutputPin::new(gpio) })?)
    }

    fn deep_sleep(duration: Duration) -> ! {
        info!("Deep sleep for {}s", duration.as_secs());
        unsafe { sys::esp_deep_sleep(duration.as_micros() as u64) }
    }

    pub fn run() {
        sys::link_patches();
        EspLogger::initialize_default();

        let reason = ResetReason::get();
        info!("Reset reason {:?}", reason);

        if let Err(e) = mount_storage() {
            error!("Cannot mount storage: {:#}", e);
            thread::sleep(Duration::from_secs(10));
            reset::restart();
        }

        let boot_log = BootLog::rotate(Path::new(BOOT_LOG_PATH));
        boot_log.record(Milestone::Boot {
            reason: format!("{:?}", reason),
        });

        match wake(&boot_log) {
            Ok(report) => {
                if !report.keep_awake.is_zero() {
                    info!("Staying awake {}s", report.keep_awake.as_secs());
                    thread::sleep(report.keep_awake);
                }
                deep_sleep(report.suspend)
            }
            Err(fault) => {
                error!("{}", fault);
                boot_log.record(Milestone::Fault(fault.to_string()));
                match fault.escalation() {
                    Escalation::RebootNow => reset::restart(),
                    Escalation::ReportThenReboot(delay) => {
                        info!("Rebooting in {}s", delay.as_secs());
                        thread::sleep(delay);
                        reset::restart()
                    }
                }
            }
        }
    }

    fn wake(boot_log: &BootLog) -> Result<CycleReport, Fault> {
        let site = SiteConfig::load(Path::new(CONFIG_PATH))?;
        let peripherals = Peripherals::take().map_err(runtime)?;
        let sysloop = EspSystemEventLoop::take().map_err(runtime)?;
        let nvs = EspDefaultNvsPartition::take().map_err(runtime)?;

        // Sensors and motor sit behind an open-drain, active low switch.
        let mut rail = PinDriver::input_output_od(unsafe { AnyIOPin::new(site.pins.power_rail) })
            .map_err(runtime)?;
        rail.set_low().map_err(runtime)?;

        let mut wifi = Wifi::new(peripherals.modem, sysloop, nvs).map_err(communication)?;
        wifi.connect_strongest(&site.networks()).map_err(communication)?;
        let address = wifi.address().map(|a| a.to_string()).unwrap_or_default();

        let sntp = EspSntp::new_default().map_err(communication)?;
        wait_for_time(&sntp).map_err(communication)?;

        let mqtt = Mqtt::new_mqtt(
            &site.mqtt.broker_url,
            &site.device.id,
            site.mqtt.user.as_deref(),
            site.mqtt.password.as_deref(),
        )
        .map_err(communication)?;
        if !mqtt.wait_connected(MQTT_TIMEOUT) {
            return Err(communication(anyhow!("MQTT broker unreachable")));
        }
        let mut telemetry = Telemetry::new(mqtt, site.mqtt.topics.clone());

        let chip = Chip { address };
        let clock = Clock::new(site.location());

        let result = (|| -> Result<CycleReport, Fault> {
            let mut state = RuntimeState::load(Path::new(STATE_PATH))?;
            boot_log.record(Milestone::StateLoaded);
            state.adopt_site(&site);
            if state.debug {
                log::set_max_level(LevelFilter::Debug);
            }

            let [in1, in2, in3, in4] = site.pins.stepper;
            let coils = [
                coil(in1).map_err(runtime)?,
                coil(in2).map_err(runtime)?,
                coil(in3).map_err(runtime)?,
                coil(in4).map_err(runtime)?,
            ];
            let drive = Uln2003::new(coils, Ets, site.motor.step_delay_us);
            let mut switch = PinDriver::input(unsafe { AnyIOPin::new(site.pins.limiter_switch) })
                .map_err(runtime)?;
            switch.set_pull(Pull::Up).map_err(runtime)?;

            let adc = AdcDriver::new(peripherals.adc1).map_err(runtime)?;
            let adc_config = AdcChannelConfig {
                attenuation: DB_11,
                ..Default::default()
            };
            let panel = AdcVoltmeter::new(
                AdcChannelDriver::new(&adc, peripherals.pins.gpio2, &adc_config).map_err(runtime)?,
                site.battery.panel_volts_per_bit,
            );
            let mut battery = AdcVoltmeter::new(
                AdcChannelDriver::new(&adc, peripherals.pins.gpio3, &adc_config).map_err(runtime)?,
                site.battery.volts_per_bit,
            );

            let i2c = I2cDriver::new(
                peripherals.i2c0,
                unsafe { AnyIOPin::new(site.pins.i2c_sda) },
                unsafe { AnyIOPin::new(site.pins.i2c_scl) },
                &I2cConfig::new().baudrate(100_u32.kHz().into()),
            )
            .map_err(runtime)?;
            let mut environment = Bme280Sensor::new(i2c).map_err(runtime)?;

            let mut motion = Motion::new(drive, switch, panel, site.motion(), state.motor_state())
                .with_journal(boot_log.clone());

            let mut cycle = WakeCycle {
                motion: &mut motion,
                battery: &mut battery,
                environment: &mut environment,
                telemetry: &mut telemetry,
                clock: &clock,
                boot_log,
                system: &chip,
                device_id: &site.device.id,
                now: &now,
            };
            cycle.run(&mut state, Path::new(STATE_PATH))
        })();

        if let Err(fault) = &result {
            if fault.escalation() != Escalation::RebootNow {
                let report = fault::error_report(&clock, now(), &chip, &site.device.id, &fault.to_string());
                if let Err(e) = telemetry.report_error(&report) {
                    warn!("Error report not sent: {:#}", e);
                }
            }
        }

        if let Err(e) = rail.set_high() {
            warn!("Power rail release failed: {}", e);
        }
        result
    }
}

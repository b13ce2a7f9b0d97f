use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, TimeZone, Utc};

use clock::{Clock, Location};
use motion::sim::Bench;
use motion::{MotionConfig, MotionError};
use network::{Publisher, Telemetry, Topics};
use rotator::{BootLog, CycleReport, Fault, Plan, Reason, RuntimeState, System, WakeCycle};
use sensors::{Climate, Environment, Voltmeter};

struct Battery(f32);

impl Voltmeter for Battery {
    fn volts(&mut self) -> anyhow::Result<f32> {
        Ok(self.0)
    }
}

struct Weather;

impl Environment for Weather {
    fn measure(&mut self) -> anyhow::Result<Climate> {
        Ok(Climate {
            temperature: 21.5,
            humidity: 40.0,
            pressure: 1012.0,
        })
    }
}

struct BrokenWeather;

impl Environment for BrokenWeather {
    fn measure(&mut self) -> anyhow::Result<Climate> {
        Err(anyhow!("no ack from sensor"))
    }
}

#[derive(Default)]
struct Broker {
    sent: Vec<(String, String)>,
}

impl Publisher for Broker {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.sent
            .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

struct Chip {
    free: u32,
}

impl System for Chip {
    fn uptime_ms(&self) -> u64 {
        5000
    }

    fn free_heap(&self) -> u32 {
        self.free
    }

    fn address(&self) -> String {
        "10.0.0.7".into()
    }
}

fn topics() -> Topics {
    Topics {
        temperature: "t".into(),
        humidity: "h".into(),
        pressure: "p".into(),
        battery_voltage: "b".into(),
        errors: "e".into(),
    }
}

// Sunrise near 01:00 UTC, sunset near 19:50 UTC in mid June.
fn clock() -> Clock {
    Clock::new(Location {
        latitude: 60.17,
        longitude: 24.94,
        altitude: 0.0,
        utc_offset_hours: 2,
        daylight_saving: true,
    })
}

fn june(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, day, hour, minute, 0).unwrap()
}

fn fresh_state() -> RuntimeState {
    toml::from_str(include_str!("../state.toml.example")).unwrap()
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rotator-cycle-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

struct Outcome {
    result: Result<CycleReport, Fault>,
    state: RuntimeState,
    sent: Vec<(String, String)>,
    state_path: PathBuf,
    boot_log: PathBuf,
}

fn wake(
    name: &str,
    bench: &Bench,
    mut state: RuntimeState,
    at: DateTime<Utc>,
    battery: f32,
    environment: &mut dyn Environment,
    free_heap: u32,
) -> Outcome {
    let dir = scratch(name);
    let state_path = dir.join("state.toml");
    let log_path = dir.join("boot.log");
    let boot_log = BootLog::rotate(&log_path);
    let clock = clock();
    let chip = Chip { free: free_heap };
    let now = move || at;

    let mut motion = bench
        .motion(MotionConfig::default(), state.motor_state())
        .with_journal(boot_log.clone());
    let mut battery = Battery(battery);
    let mut telemetry = Telemetry::new(Broker::default(), topics());

    let result = WakeCycle {
        motion: &mut motion,
        battery: &mut battery,
        environment,
        telemetry: &mut telemetry,
        clock: &clock,
        boot_log: &boot_log,
        system: &chip,
        device_id: "rotator-test",
        now: &now,
    }
    .run(&mut state, &state_path);

    Outcome {
        result,
        state,
        sent: telemetry.publisher().sent.clone(),
        state_path,
        boot_log: log_path,
    }
}

#[test]
fn first_boot_at_noon_finds_south() {
    let bench = Bench::at(250).peak_at_sample(400);
    // 12:20 standard time.
    let at = june(16, 10, 20);

    let outcome = wake("first-noon", &bench, fresh_state(), at, 4.1, &mut Weather, 200_000);
    let report = outcome.result.unwrap();

    assert_eq!(report.plan, Plan::Calibrate(Reason::FirstRun));
    let calibration = report.calibration.unwrap();
    assert_eq!(calibration.samples, 899);
    assert_eq!(calibration.peak_index, 400);
    assert!(calibration.south_latched);
    assert_eq!(bench.position(), 400);

    let saved = RuntimeState::load(&outcome.state_path).unwrap();
    assert_eq!(saved.steps_taken, 400);
    assert_eq!(saved.south_step, Some(400));
    assert_eq!(saved.last_calibration, Some(at));
    assert_eq!(saved.last_wake, Some(at));
    assert_eq!(saved.last_temperature, Some(21.5));
    assert_eq!(saved, outcome.state);
    assert!(report.saved);

    let log = fs::read_to_string(&outcome.boot_log).unwrap();
    assert!(log.contains("sweep started"));
    assert!(log.contains("sweep finished"));
    assert!(log.contains("state saved"));
}

#[test]
fn first_boot_off_noon_tracks_without_south() {
    let bench = Bench::at(30).peak_at_sample(120);

    let outcome = wake("first-morning", &bench, fresh_state(), june(16, 6, 0), 4.1, &mut Weather, 200_000);
    let report = outcome.result.unwrap();

    assert_eq!(report.plan, Plan::Calibrate(Reason::FirstRun));
    assert_eq!(outcome.state.south_step, None);
    assert_eq!(outcome.state.steps_taken, 120);
    assert!(outcome.state.last_calibration.is_some());
}

#[test]
fn low_battery_moves_nothing_but_reports() {
    let bench = Bench::at(250).peak_at_sample(400);

    let outcome = wake("low-battery", &bench, fresh_state(), june(16, 10, 20), 3.1, &mut Weather, 200_000);
    let report = outcome.result.unwrap();

    assert_eq!(report.plan, Plan::Hold);
    assert_eq!(bench.steps_issued(), 0);
    assert_eq!(
        outcome.sent,
        vec![
            ("t".to_string(), "21.50".to_string()),
            ("h".to_string(), "40.00".to_string()),
            ("p".to_string(), "1012.00".to_string()),
            ("b".to_string(), "3.10".to_string()),
        ]
    );
    let volts = outcome.state.last_battery_voltage.unwrap();
    assert!((volts - 3.1).abs() < 1e-5);
    assert_eq!(outcome.state.last_wake, None);
    assert!(report.saved);
}

#[test]
fn night_wake_parks_at_the_switch() {
    let bench = Bench::at(300);
    let mut state = fresh_state();
    state.steps_taken = 300;
    state.microswitch_steps = 4;
    state.south_step = Some(450);
    state.last_calibration = Some(june(15, 10, 5));
    state.last_wake = Some(june(16, 18, 0));

    let outcome = wake("night", &bench, state, june(16, 23, 30), 4.0, &mut Weather, 200_000);

    assert_eq!(outcome.result.unwrap().plan, Plan::Park);
    assert_eq!(bench.position(), 4);
    assert_eq!(outcome.state.steps_taken, 4);
    assert_eq!(outcome.state.last_wake, Some(june(16, 18, 0)));
}

#[test]
fn same_day_wake_follows_the_sun() {
    let bench = Bench::at(300).peak_at_position(700);
    let mut state = fresh_state();
    state.steps_taken = 300;
    state.microswitch_steps = 4;
    state.south_step = Some(450);
    state.last_calibration = Some(june(15, 10, 5));
    state.last_wake = Some(june(16, 7, 0));

    let at = june(16, 8, 0);
    let outcome = wake("advance", &bench, state, at, 4.0, &mut Weather, 200_000);

    assert_eq!(outcome.result.unwrap().plan, Plan::Advance { minutes: 60 });
    assert_eq!(outcome.state.steps_taken, 342);
    assert_eq!(outcome.state.last_wake, Some(at));
}

#[test]
fn lost_switch_is_reported_and_forces_rehoming() {
    let bench = Bench::at(300).stuck_open();
    let mut state = fresh_state();
    state.steps_taken = 300;
    state.microswitch_steps = 4;
    state.last_calibration = Some(june(15, 10, 5));
    state.last_wake = Some(june(15, 18, 0));

    let outcome = wake("stuck-open", &bench, state, june(16, 6, 0), 4.0, &mut Weather, 200_000);
    let report = outcome.result.unwrap();

    assert_eq!(report.plan, Plan::StartOfDay);
    assert!(matches!(report.motion_error, Some(MotionError::SwitchTimeout { .. })));
    assert_eq!(outcome.state.steps_taken, outcome.state.max_steps_to_rotate);
    assert_eq!(outcome.state.last_wake, Some(june(15, 18, 0)));

    let errors: Vec<_> = outcome.sent.iter().filter(|(topic, _)| topic == "e").collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains(";rotator-test;10.0.0.7;limiter switch did not close"));

    let log = fs::read_to_string(&outcome.boot_log).unwrap();
    assert!(log.contains("homing failed"));
}

#[test]
fn forgotten_position_is_recovered_the_same_day() {
    let bench = Bench::at(300).peak_at_sample(520);
    let mut state = fresh_state();
    state.steps_taken = state.max_steps_to_rotate;
    state.microswitch_steps = 4;
    state.south_step = Some(450);
    state.last_calibration = Some(june(15, 10, 5));
    state.last_wake = Some(june(16, 6, 0));

    let at = june(16, 8, 0);
    let outcome = wake("position-lost", &bench, state, at, 4.0, &mut Weather, 200_000);

    assert_eq!(outcome.result.unwrap().plan, Plan::Calibrate(Reason::PositionLost));
    assert_eq!(bench.position(), 520);
    assert_eq!(outcome.state.steps_taken, bench.position());
    assert_eq!(outcome.state.south_step, Some(450));
    assert_eq!(outcome.state.last_wake, Some(at));
    assert_eq!(outcome.state.last_calibration, Some(at));
}

#[test]
fn failed_sensor_read_is_not_fatal() {
    let bench = Bench::at(0);
    let mut state = fresh_state();
    state.last_calibration = Some(june(15, 10, 5));

    let outcome = wake("sensor", &bench, state, june(16, 23, 30), 4.0, &mut BrokenWeather, 200_000);

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.sent, vec![("b".to_string(), "4.00".to_string())]);
    assert_eq!(outcome.state.last_temperature, None);
}

#[test]
fn exhausted_memory_stops_before_anything_moves() {
    let bench = Bench::at(250);

    let outcome = wake("memory", &bench, fresh_state(), june(16, 10, 20), 4.1, &mut Weather, 1024);

    assert!(matches!(outcome.result, Err(Fault::MemoryExhausted { free: 1024 })));
    assert_eq!(bench.steps_issued(), 0);
    assert!(outcome.sent.is_empty());
    assert!(!outcome.state_path.exists());
}

#[test]
fn unwritable_state_still_suspends() {
    let bench = Bench::at(0);
    let mut state = fresh_state();
    state.last_calibration = Some(june(15, 10, 5));
    state.suspend_secs = 1800;

    let dir = scratch("unwritable");
    let boot_log = BootLog::rotate(&dir.join("boot.log"));
    let clock = clock();
    let chip = Chip { free: 200_000 };
    let now = || june(16, 23, 30);
    let mut motion = bench.motion(MotionConfig::default(), state.motor_state());
    let mut telemetry = Telemetry::new(Broker::default(), topics());

    let report = WakeCycle {
        motion: &mut motion,
        battery: &mut Battery(4.0),
        environment: &mut Weather,
        telemetry: &mut telemetry,
        clock: &clock,
        boot_log: &boot_log,
        system: &chip,
        device_id: "rotator-test",
        now: &now,
    }
    .run(&mut state, &dir.join("missing").join("state.toml"))
    .unwrap();

    assert!(!report.saved);
    assert_eq!(report.suspend, Duration::from_secs(1800));
    assert!(telemetry.publisher().sent.iter().any(|(topic, _)| topic == "e"));
}

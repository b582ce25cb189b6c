//! End-to-end runs of the control runtime against simulated sensors.
//!
//! Each simulated data line keeps its own virtual clock, so channels read
//! in parallel without disturbing each other's pulse timing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use terrarium::adapters::sim::{SimGpio, SimResponse};
use terrarium::app::events::Notification;
use terrarium::config::{ChannelConfig, HeatingZone, HumidityConfig, SystemConfig};
use terrarium::error::SensorError;
use terrarium::model::{ChannelId, Measurement, RelayId, Trigger};
use terrarium::pins;
use terrarium::runtime::{Runtime, Shutdown, WORKER_GRACE};
use terrarium::sensors::{self, ChannelSlot, SensorReader};

use super::mock_hw::{Rig, m};

fn single_channel_config(poll_ms: u64) -> SystemConfig {
    let mut config = SystemConfig {
        channels: vec![ChannelConfig {
            id: ChannelId(1),
            pin: pins::SENSOR_1_GPIO,
            label: "Nest 1".into(),
        }],
        heating: vec![HeatingZone {
            channel: ChannelId(1),
            relay: RelayId(1),
            target_c: 29.0,
        }],
        humidity: Some(HumidityConfig {
            channel: ChannelId(1),
            relay: RelayId(5),
            threshold_pct: 60.0,
            lockout_hours: 6,
            pulse_ms: 20,
        }),
        ..SystemConfig::default()
    };
    config.timing.poll_interval_ms = poll_ms;
    config.timing.maintenance_interval_ms = 50;
    config.validate().unwrap();
    config
}

/// Three channels, each heating its own relay.
fn three_channel_config(poll_ms: u64) -> SystemConfig {
    let sensors = [pins::SENSOR_1_GPIO, pins::SENSOR_2_GPIO, pins::SENSOR_3_GPIO];
    let mut config = SystemConfig {
        channels: (1..=3)
            .map(|n| ChannelConfig {
                id: ChannelId(n),
                pin: sensors[usize::from(n - 1)],
                label: format!("Nest {n}"),
            })
            .collect(),
        heating: (1..=3)
            .map(|n| HeatingZone {
                channel: ChannelId(n),
                relay: RelayId(n),
                target_c: 29.0,
            })
            .collect(),
        humidity: None,
        ..SystemConfig::default()
    };
    config.timing.poll_interval_ms = poll_ms;
    config.timing.maintenance_interval_ms = 50;
    config.validate().unwrap();
    config
}

/// Poll `cond` until it holds or five seconds pass.
fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn open(rig: &Rig) -> Vec<ChannelSlot> {
    let cfg = rig.service.config();
    sensors::open_channels(&rig.gpio, &cfg.channels, &cfg.timing)
}

fn start(rig: &Rig) -> (Shutdown, std::thread::JoinHandle<()>) {
    let channels = open(rig);
    assert_eq!(channels.len(), 1);
    start_with(rig, channels)
}

fn start_with(rig: &Rig, channels: Vec<ChannelSlot>) -> (Shutdown, std::thread::JoinHandle<()>) {
    let shutdown = Shutdown::new();
    let handle = Runtime::new(rig.service.clone(), channels, shutdown.clone())
        .spawn()
        .unwrap();
    (shutdown, handle)
}

#[test]
fn live_sensor_drives_heater_and_pulse() {
    let backend = Arc::new(SimGpio::virtual_time());
    let sensor = backend.attach_sensor(pins::SENSOR_1_GPIO, SimResponse::Reply(m(27.0, 50.0)));
    let rig = Rig::on_backend(single_channel_config(20), backend);
    let (shutdown, handle) = start(&rig);

    assert!(wait_for(|| rig.store.readings().len() >= 3), "readings not persisted");
    assert!(
        wait_for(|| rig.triggers(5).contains(&(false, Trigger::HumidityPulseComplete))),
        "humidity pulse did not complete"
    );
    assert_eq!(rig.service.relay_state(RelayId(1)), Some(true));
    // Daylight relay switched by the maintenance loop (manual clock sits at noon).
    assert!(wait_for(|| rig.triggers(4) == vec![(true, Trigger::Scheduler)]));

    shutdown.trigger();
    handle.join().unwrap();

    // One pulse per lockout window.
    assert_eq!(rig.triggers(5).iter().filter(|(on, _)| *on).count(), 1);
    assert!(sensor.transactions() >= 3);
    assert!(rig.service.relay_states().values().all(|on| !on));
    assert_eq!(rig.backend.output_level(pins::RELAY_1_GPIO), Some(false));
    assert!(!rig.gpio.is_claimed(pins::SENSOR_1_GPIO));
    assert!(!rig.gpio.is_claimed(pins::RELAY_1_GPIO));

    let first = &rig.store.readings()[0];
    assert!(first.valid);
    assert_eq!(first.temperature_c, Some(27.0));
}

#[test]
fn silent_sensor_reports_errors_and_keeps_heater_off() {
    let backend = Arc::new(SimGpio::virtual_time());
    backend.attach_sensor(pins::SENSOR_1_GPIO, SimResponse::Silent);
    let rig = Rig::on_backend(single_channel_config(20), backend);
    let (shutdown, handle) = start(&rig);

    assert!(wait_for(|| rig.notifier.errors().len() >= 2));
    shutdown.trigger();
    handle.join().unwrap();

    assert!(rig.store.readings().is_empty());
    assert!(rig.triggers(1).is_empty());
    assert!(rig.triggers(5).is_empty());
}

#[test]
fn shutdown_interrupts_a_long_poll_interval() {
    let backend = Arc::new(SimGpio::virtual_time());
    backend.attach_sensor(pins::SENSOR_1_GPIO, SimResponse::Reply(m(31.0, 70.0)));
    let rig = Rig::on_backend(single_channel_config(60_000), backend);
    let (shutdown, handle) = start(&rig);

    assert!(wait_for(|| rig.store.readings().len() == 1));
    let stopping = Instant::now();
    shutdown.trigger();
    handle.join().unwrap();
    assert!(stopping.elapsed() < Duration::from_secs(2));
    assert!(rig.service.relays().is_released());
}

fn readings_for(rig: &Rig, channel: u8) -> usize {
    rig.store.readings().iter().filter(|r| r.channel == ChannelId(channel)).count()
}

fn errors_for(rig: &Rig, channel: u8) -> Vec<String> {
    rig.notifier
        .errors()
        .into_iter()
        .filter_map(|n| match n {
            Notification::ErrorOccurred {
                channel: Some(c),
                message,
            } if c == ChannelId(channel) => Some(message),
            _ => None,
        })
        .collect()
}

/// Panics on every read.
struct PanickingReader;

impl SensorReader for PanickingReader {
    fn read(&mut self) -> Result<Measurement, SensorError> {
        panic!("sensor driver fault");
    }

    fn pause(&mut self, _duration: Duration) {}
}

/// Stuck inside a transaction far longer than any tick.
struct StuckReader;

impl SensorReader for StuckReader {
    fn read(&mut self) -> Result<Measurement, SensorError> {
        std::thread::sleep(Duration::from_secs(30));
        Err(SensorError::NoReport)
    }

    fn pause(&mut self, _duration: Duration) {}
}

#[test]
fn silent_channel_does_not_disturb_its_neighbours() {
    let backend = Arc::new(SimGpio::virtual_time());
    backend.attach_sensor(pins::SENSOR_1_GPIO, SimResponse::Reply(m(27.0, 50.0)));
    backend.attach_sensor(pins::SENSOR_2_GPIO, SimResponse::Silent);
    backend.attach_sensor(pins::SENSOR_3_GPIO, SimResponse::Reply(m(25.5, 45.0)));
    let rig = Rig::on_backend(three_channel_config(20), backend);
    let channels = open(&rig);
    assert_eq!(channels.len(), 3);
    let (shutdown, handle) = start_with(&rig, channels);

    assert!(
        wait_for(|| readings_for(&rig, 1) >= 3 && readings_for(&rig, 3) >= 3),
        "healthy channels stalled"
    );
    assert!(wait_for(|| errors_for(&rig, 2).len() >= 2));
    shutdown.trigger();
    handle.join().unwrap();

    let readings = rig.store.readings();
    assert!(readings.iter().all(|r| r.valid));
    assert!(readings.iter().all(|r| r.channel != ChannelId(2)));
    for r in readings.iter().filter(|r| r.channel == ChannelId(1)) {
        assert_eq!((r.temperature_c, r.humidity_pct), (Some(27.0), Some(50.0)));
    }
    for r in readings.iter().filter(|r| r.channel == ChannelId(3)) {
        assert_eq!((r.temperature_c, r.humidity_pct), (Some(25.5), Some(45.0)));
    }
    assert_eq!(rig.triggers(1)[0], (true, Trigger::TemperatureThreshold));
    assert_eq!(rig.triggers(3)[0], (true, Trigger::TemperatureThreshold));
    assert!(rig.triggers(2).is_empty());
}

#[test]
fn panicking_reader_leaves_other_channels_running() {
    let backend = Arc::new(SimGpio::virtual_time());
    backend.attach_sensor(pins::SENSOR_1_GPIO, SimResponse::Reply(m(27.0, 50.0)));
    backend.attach_sensor(pins::SENSOR_3_GPIO, SimResponse::Reply(m(27.0, 50.0)));
    let rig = Rig::on_backend(three_channel_config(20), backend);
    let mut channels = open(&rig);
    channels[1].reader = Some(Box::new(PanickingReader));
    let (shutdown, handle) = start_with(&rig, channels);

    assert!(wait_for(|| errors_for(&rig, 2).len() >= 3), "lost channel not reported every tick");
    let before = (readings_for(&rig, 1), readings_for(&rig, 3));
    assert!(
        wait_for(|| readings_for(&rig, 1) >= before.0 + 3 && readings_for(&rig, 3) >= before.1 + 3),
        "healthy channels stopped after the panic"
    );
    shutdown.trigger();
    handle.join().unwrap();

    let lost = SensorError::ReaderLost.to_string();
    assert!(errors_for(&rig, 2)[0].contains(&lost));
    assert!(rig.triggers(2).is_empty());
    assert!(rig.service.relays().is_released());
}

#[test]
fn stuck_reader_misses_the_tick_and_does_not_block_shutdown() {
    let backend = Arc::new(SimGpio::virtual_time());
    let rig = Rig::on_backend(single_channel_config(20), backend);
    let mut channels = open(&rig);
    channels[0].reader = Some(Box::new(StuckReader));
    let (shutdown, handle) = start_with(&rig, channels);

    assert!(wait_for(|| !errors_for(&rig, 1).is_empty()), "missed tick not reported");
    let no_report = SensorError::NoReport.to_string();
    assert!(errors_for(&rig, 1)[0].contains(&no_report));

    let stopping = Instant::now();
    shutdown.trigger();
    handle.join().unwrap();
    assert!(stopping.elapsed() < WORKER_GRACE + Duration::from_secs(1));
    assert!(rig.service.relays().is_released());
    assert!(rig.store.readings().is_empty());
}

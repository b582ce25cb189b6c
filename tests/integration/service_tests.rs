//! Integration tests for acquisition → decisions → relays through the
//! control service.

use chrono::{NaiveTime, TimeDelta};

use terrarium::app::commands::Command;
use terrarium::app::events::Notification;
use terrarium::app::ports::{Clock, StoragePort};
use terrarium::config::SystemConfig;
use terrarium::error::{ActuatorError, Error, SensorError, WaitPhase};
use terrarium::model::{ChannelId, LogEntry, LogKind, RelayId, Trigger};
use terrarium::pins;
use terrarium::sensors::{self, RetryPolicy, Settled, read_with_retry};
use terrarium::adapters::sim::SimResponse;

use super::mock_hw::{Rig, m};

const TIMEOUT: SensorError = SensorError::ProtocolTimeout(WaitPhase::Response);

fn at(h: u32, min: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, min, 0).unwrap()
}

// ── Heating ───────────────────────────────────────────────────

#[test]
fn heating_follows_hysteresis_sequence() {
    let rig = Rig::new();
    let ch = ChannelId(1);
    let mut states = Vec::new();
    for t in [30.0, 29.5, 28.9, 29.3, 30.1] {
        let settled = rig.service.settle_channel(ch, Ok(m(t, 70.0)));
        rig.service.apply_reading(ch, settled.reading());
        states.push(rig.service.relay_state(RelayId(1)).unwrap());
    }
    assert_eq!(states, vec![false, false, true, true, false]);

    // Only the two changes were recorded.
    assert_eq!(
        rig.triggers(1),
        vec![
            (true, Trigger::TemperatureThreshold),
            (false, Trigger::TemperatureThreshold)
        ]
    );
    let first = &rig.store.actuations()[0];
    let source = first.source.expect("source context");
    assert_eq!(source.channel, ch);
    assert_eq!(source.temperature_c, Some(28.9));
}

#[test]
fn failing_channel_falls_back_to_cache_without_persisting() {
    let rig = Rig::new();
    let sensor = rig
        .backend
        .attach_sensor(pins::SENSOR_2_GPIO, SimResponse::Reply(m(22.5, 55.0)));
    let cfg = rig.service.config();
    let mut channels = sensors::open_channels(&rig.gpio, &cfg.channels, &cfg.timing);
    let slot = channels
        .iter_mut()
        .find(|s| s.config.id == ChannelId(2))
        .expect("channel 2 open");
    let reader = slot.reader.as_mut().unwrap();

    // Tick 1: good read.
    let outcome = read_with_retry(reader.as_mut(), RetryPolicy::default());
    let settled = rig.service.settle_channel(ChannelId(2), outcome);
    assert!(matches!(settled, Settled::Fresh(_)));
    rig.service.apply_reading(ChannelId(2), settled.reading());
    assert_eq!(rig.store.readings().len(), 1);
    assert_eq!(rig.service.relay_state(RelayId(2)), Some(true));

    // Tick 2: the device goes silent for all three attempts.
    sensor.set_steady(SimResponse::Silent);
    let outcome = read_with_retry(reader.as_mut(), RetryPolicy::default());
    assert_eq!(outcome, Err(TIMEOUT));
    assert_eq!(sensor.transactions(), 4);

    let settled = rig.service.settle_channel(ChannelId(2), outcome);
    let Settled::Fallback(reading) = &settled else {
        panic!("expected fallback, got {settled:?}");
    };
    assert!(!reading.valid);
    assert_eq!(reading.temperature_c, Some(22.5));
    assert_eq!(reading.humidity_pct, Some(55.0));
    assert_eq!(rig.store.readings().len(), 1, "fallback must not be persisted");

    // Cached values never drive the heater.
    rig.service.apply_reading(ChannelId(2), settled.reading());
    assert_eq!(rig.service.relay_state(RelayId(2)), Some(false));
    assert_eq!(rig.triggers(2).last(), Some(&(false, Trigger::SensorInvalid)));
}

#[test]
fn channel_without_data_reports_error_and_stays_off() {
    let rig = Rig::new();
    let settled = rig.service.settle_channel(ChannelId(3), Err(TIMEOUT));
    assert_eq!(settled, Settled::NoData);
    assert!(rig.service.apply_reading(ChannelId(3), None).is_none());

    assert_eq!(rig.service.relay_state(RelayId(3)), Some(false));
    assert!(rig.triggers(3).is_empty());
    let errors = rig.notifier.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        Notification::ErrorOccurred { channel: Some(ChannelId(3)), .. }
    ));
}

// ── Humidity ──────────────────────────────────────────────────

#[test]
fn dry_reading_pulses_once_per_lockout() {
    let rig = Rig::new();
    let ch = ChannelId(1);

    let settled = rig.service.settle_channel(ch, Ok(m(30.0, 50.0)));
    let pulse = rig.service.apply_reading(ch, settled.reading()).expect("pulse due");
    assert_eq!(pulse.relay, RelayId(5));
    assert_eq!(pulse.duration, std::time::Duration::from_secs(1));

    assert!(rig.service.begin_pulse(&pulse));
    assert_eq!(rig.service.relay_state(RelayId(5)), Some(true));
    rig.service.end_pulse(&pulse);
    assert_eq!(rig.service.relay_state(RelayId(5)), Some(false));
    assert_eq!(
        rig.triggers(5),
        vec![
            (true, Trigger::HumidityThreshold),
            (false, Trigger::HumidityPulseComplete)
        ]
    );

    // Still dry a minute later: locked.
    rig.clock.advance(TimeDelta::minutes(1));
    let settled = rig.service.settle_channel(ch, Ok(m(30.0, 45.0)));
    assert!(rig.service.apply_reading(ch, settled.reading()).is_none());
    assert!(rig.service.lockout_state().unwrap().is_locked());

    // Lockout elapsed.
    rig.clock.advance(TimeDelta::hours(6));
    let settled = rig.service.settle_channel(ch, Ok(m(30.0, 45.0)));
    assert!(rig.service.apply_reading(ch, settled.reading()).is_some());
}

#[test]
fn humidity_rule_ignores_other_channels_and_cached_values() {
    let rig = Rig::new();

    let settled = rig.service.settle_channel(ChannelId(2), Ok(m(30.0, 20.0)));
    assert!(rig.service.apply_reading(ChannelId(2), settled.reading()).is_none());

    rig.service.settle_channel(ChannelId(1), Ok(m(30.0, 80.0)));
    let settled = rig.service.settle_channel(ChannelId(1), Err(TIMEOUT));
    assert!(matches!(settled, Settled::Fallback(_)));
    assert!(rig.service.apply_reading(ChannelId(1), settled.reading()).is_none());
    assert!(!rig.service.lockout_state().unwrap().is_locked());
}

// ── Daylight ──────────────────────────────────────────────────

#[test]
fn daylight_follows_window() {
    let rig = Rig::new();

    rig.clock.set_time_of_day(at(7, 0));
    assert_eq!(rig.service.check_daylight(), Ok(None));

    rig.clock.set_time_of_day(at(9, 0));
    let rec = rig.service.check_daylight().unwrap().expect("lamp on");
    assert!(rec.state);
    assert_eq!(rec.trigger, Trigger::Scheduler);

    // Same state again: no record.
    assert_eq!(rig.service.check_daylight(), Ok(None));

    rig.clock.set_time_of_day(at(20, 0));
    assert!(!rig.service.check_daylight().unwrap().expect("lamp off").state);
}

#[test]
fn overnight_schedule_update_applies_immediately() {
    let rig = Rig::new();
    rig.clock.set_time_of_day(at(12, 0));
    rig.service
        .handle_command(Command::UpdateSchedule {
            on: "20:00".into(),
            off: "06:00".into(),
        })
        .unwrap();
    assert_eq!(rig.service.relay_state(RelayId(4)), Some(false));

    rig.clock.set_time_of_day(at(23, 0));
    rig.service.check_daylight().unwrap();
    assert_eq!(rig.service.relay_state(RelayId(4)), Some(true));

    rig.clock.set_time_of_day(at(2, 0));
    assert_eq!(rig.service.check_daylight(), Ok(None));
    assert_eq!(rig.service.relay_state(RelayId(4)), Some(true));

    let stored = rig.store.load_config().unwrap().unwrap();
    assert_eq!(stored.daylight.unwrap().on, "20:00");
}

#[test]
fn malformed_schedule_skips_cycle_and_leaves_relay() {
    let mut config = SystemConfig::default();
    if let Some(d) = config.daylight.as_mut() {
        d.on = "8 o'clock".into();
    }
    let rig = Rig::with_config(config);
    rig.service.manual_override(RelayId(4), true).unwrap();

    assert!(matches!(
        rig.service.check_daylight(),
        Err(Error::InvalidScheduleFormat(_))
    ));
    rig.service.maintenance_tick();
    assert_eq!(rig.service.relay_state(RelayId(4)), Some(true));
    assert_eq!(rig.notifier.errors().len(), 1);
}

// ── Operator entry points ─────────────────────────────────────

#[test]
fn manual_override_is_idempotent() {
    let rig = Rig::new();
    let cmd: Command = "relay 6 on".parse().unwrap();
    rig.service.handle_command(cmd.clone()).unwrap();
    rig.service.handle_command(cmd).unwrap();
    assert_eq!(rig.triggers(6), vec![(true, Trigger::ManualOverride)]);
    assert_eq!(rig.backend.output_level(pins::RELAY_6_GPIO), Some(true));

    assert_eq!(
        rig.service.manual_override(RelayId(9), true),
        Err(Error::Actuator(ActuatorError::UnknownRelay(RelayId(9))))
    );
}

#[test]
fn relay_write_failure_is_reported_not_recorded() {
    let rig = Rig::new();
    rig.backend.fail_writes(pins::RELAY_1_GPIO, true);
    let settled = rig.service.settle_channel(ChannelId(1), Ok(m(20.0, 80.0)));
    rig.service.apply_reading(ChannelId(1), settled.reading());

    assert_eq!(rig.service.relay_state(RelayId(1)), Some(false));
    assert!(rig.triggers(1).is_empty());
    assert!(matches!(
        rig.notifier.errors().as_slice(),
        [Notification::ErrorOccurred { channel: Some(ChannelId(1)), .. }]
    ));
}

#[test]
fn storage_outage_does_not_stop_control() {
    let rig = Rig::new();
    rig.store.set_available(false);

    let settled = rig.service.settle_channel(ChannelId(1), Ok(m(25.0, 80.0)));
    assert!(matches!(settled, Settled::Fresh(_)));
    rig.service.apply_reading(ChannelId(1), settled.reading());
    rig.service.maintenance_tick();
    assert_eq!(rig.service.relay_state(RelayId(1)), Some(true));

    rig.store.set_available(true);
    assert!(rig.store.readings().is_empty());
    assert!(rig.store.actuations().is_empty());
    // The cache still updated.
    assert!(rig.service.last_good(ChannelId(1)).is_some());
}

// ── Housekeeping ──────────────────────────────────────────────

#[test]
fn maintenance_snapshots_and_prunes() {
    let rig = Rig::new();
    let now = rig.clock.now();
    let stale = LogEntry::hourly_snapshot(now - TimeDelta::days(400), &[]);
    rig.store.append_log(&stale).unwrap();
    rig.service.settle_channel(ChannelId(1), Ok(m(29.5, 70.0)));

    rig.service.maintenance_tick();

    let logs = rig.store.logs();
    assert!(!logs.contains(&stale));
    let snapshot = logs
        .iter()
        .find(|e| e.kind == LogKind::HourlySnapshot)
        .expect("snapshot logged");
    assert_eq!(snapshot.snapshot.len(), 1);
    assert_eq!(snapshot.snapshot[0].temperature_c, Some(29.5));

    // Next tick inside the hour: no second snapshot.
    rig.clock.advance(TimeDelta::minutes(5));
    rig.service.maintenance_tick();
    let snapshots = rig
        .store
        .logs()
        .iter()
        .filter(|e| e.kind == LogKind::HourlySnapshot)
        .count();
    assert_eq!(snapshots, 1);
}

// ── Startup / shutdown ────────────────────────────────────────

#[test]
fn relay_keeps_a_pin_shared_with_a_channel() {
    let mut config = SystemConfig::default();
    config.channels[1].pin = pins::RELAY_2_GPIO;
    let rig = Rig::with_config(config);
    let cfg = rig.service.config();
    let channels = sensors::open_channels(&rig.gpio, &cfg.channels, &cfg.timing);

    assert_eq!(channels.len(), 2);
    assert!(channels.iter().all(|s| s.config.id != ChannelId(2)));
    assert_eq!(rig.service.relay_state(RelayId(2)), Some(false));
}

#[test]
fn shutdown_forces_everything_off() {
    let rig = Rig::new();
    for id in 1..=6 {
        rig.service.manual_override(RelayId(id), true).unwrap();
    }
    {
        let _guard = rig.service.fail_safe_guard();
    }
    assert!(rig.service.relay_states().values().all(|on| !on));
    assert_eq!(rig.backend.output_level(pins::RELAY_3_GPIO), Some(false));
    assert!(!rig.gpio.is_claimed(pins::RELAY_3_GPIO));
    assert_eq!(
        rig.service.manual_override(RelayId(1), true),
        Err(Error::Actuator(ActuatorError::Released))
    );
    // Idempotent.
    rig.service.shutdown();
}

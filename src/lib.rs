//! Terrarium controller library.
//!
//! Sensor acquisition, hysteresis and lockout decisions, the daylight
//! schedule and the fail-safe relay bank for a heated enclosure. The
//! `terrariumd` binary wires these to sysfs GPIO (or the simulator), an
//! in-process store and the log.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod model;
pub mod pins;
pub mod runtime;
pub mod scheduler;

pub mod adapters;
pub mod control;
pub mod drivers;
pub mod sensors;

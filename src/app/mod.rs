//! Application core: decision logic behind port traits.
//!
//! This module wires the enclosure rules together: acquisition results in,
//! hysteresis, humidity lockout and daylight decisions out, all through the
//! relay actuator. Hardware, persistence and observers are reached only via
//! the **port traits** in [`ports`], so the whole core runs against mocks.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;

//! Decision logic that sits between acquisition and the relay bank.
//!
//! Both controllers are free of I/O: they take a value and the current
//! state and say what should happen. The control service applies the
//! outcome through the relay actuator.

pub mod hysteresis;
pub mod lockout;

//! Hardware-facing drivers: pin ownership, the relay bank, worker threads.

pub mod gpio;
pub mod relay;
pub mod task;

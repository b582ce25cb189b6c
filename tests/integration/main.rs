//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the simulated GPIO backend and in-process adapters. No real
//! hardware required.

mod mock_hw;
mod runtime_tests;
mod service_tests;

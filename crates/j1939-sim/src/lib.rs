//! j1939-sim - Simulated J1939 ECU
//!
//! Attaches a configurable responder to a [`j1939::LoopbackBus`] medium so
//! tools and tests can exercise the request and Transport Protocol paths
//! without hardware.
//!
//! # Modules
//!
//! - [`config`] - TOML description of responses, acknowledgments and test results
//! - [`ecu`] - The responder task

pub mod config;
pub mod ecu;

pub use config::{AckDef, ResponseDef, SimConfig, SimError, TestResultDef};
pub use ecu::SimulatedEcu;

//! j1939 - SAE J1939 communication stack
//!
//! This crate provides the protocol machinery a diagnostic tool needs to
//! query modules on a heavy-vehicle CAN bus: the frame model, a fan-out bus
//! abstraction with timed reads, the J1939-21 Transport Protocol and a
//! request/response client with retry, acknowledgment and busy handling.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RequestClient                           │
//! │  request / request_multiple / request_raw / correlated      │
//! │                          │                                  │
//! │               ┌──────────┴───────────┐                      │
//! │               │ TransportProtocolBus │                      │
//! │               │  RTS/CTS/BAM/DT/EOM  │                      │
//! │               │  one task / session  │                      │
//! │               └──────────┬───────────┘                      │
//! │                          │                                  │
//! │                 ┌────────┴────────┐                         │
//! │                 │   dyn Bus       │                         │
//! │                 │ (Loopback/HW)   │                         │
//! │                 └────────┬────────┘                         │
//! │                          │                                  │
//! │                 ┌────────┴────────┐                         │
//! │                 │ BroadcastQueue  │  fan-out to readers     │
//! │                 └─────────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod frame;
pub mod pgn;
pub mod queue;
pub mod request;
pub mod tp;

pub use bus::{Bus, BusError, BusReader, LoopbackBus};
pub use config::{ConfigError, RequestConfig, StackConfig, TransportConfig};
pub use error::{DecodeError, EncodeError};
pub use frame::{Frame, GLOBAL_ADDRESS};
pub use queue::{BroadcastQueue, Entry, Subscription};
pub use request::{
    AckCode, Acknowledgment, Decoder, Dm30, Dm7Command, PgnMessage, RequestClient, Response,
    ScaledTestResult,
};
pub use tp::{
    AbortReason, LogWarnings, ProtocolViolation, RecordedWarnings, SessionAbort,
    TransportProtocolBus, WarningSink,
};

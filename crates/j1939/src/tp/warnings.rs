//! Protocol irregularity reporting
//!
//! Malformed but recoverable TP control frames do not abort a session; they
//! are reported through a [`WarningSink`]. Production code logs them, tests
//! record them and assert on the exact text.

use parking_lot::Mutex;
use thiserror::Error;

/// A recoverable deviation from J1939-21 observed on the bus
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("TP.CM_CTS bytes 4-5 should be FFFF: {value:04X}  {frame}")]
    CtsReservedBytes { value: u16, frame: String },

    #[error("TP.CM_CTS PGN should be {expected:06X}: {actual:06X}  {frame}")]
    CtsPgnMismatch {
        expected: u32,
        actual: u32,
        frame: String,
    },

    #[error("TP.CM_CTS hold open next packet should be FF: {next_packet:02X}  {frame}")]
    CtsHoldOpen { next_packet: u8, frame: String },

    #[error("TP.CM_CTS requests packets {first}-{last} of {total}  {frame}")]
    CtsOutOfRange {
        first: u8,
        last: u8,
        total: u8,
        frame: String,
    },

    #[error("TP session already active for {peer:02X} PGN {pgn:06X}, ignoring  {frame}")]
    DuplicateSession { peer: u8, pgn: u32, frame: String },

    #[error("TP connection from {peer:02X} busy with PGN {active:06X}, refusing PGN {pgn:06X}  {frame}")]
    ConnectionInUse {
        peer: u8,
        pgn: u32,
        active: u32,
        frame: String,
    },

    #[error("TP announcement inconsistent: {total_bytes} bytes in {total_packets} packets  {frame}")]
    InvalidAnnouncement {
        total_bytes: u16,
        total_packets: u8,
        frame: String,
    },

    #[error("TP.DT sequence {sequence} outside 1-{total}  {frame}")]
    SequenceOutOfRange {
        sequence: u8,
        total: u8,
        frame: String,
    },
}

/// Destination for protocol warnings
pub trait WarningSink: Send + Sync {
    fn warn(&self, violation: ProtocolViolation);
}

/// Sends warnings to the `tracing` log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWarnings;

impl WarningSink for LogWarnings {
    fn warn(&self, violation: ProtocolViolation) {
        tracing::warn!("{}", violation);
    }
}

/// Keeps every warning in memory, in arrival order
#[derive(Debug, Default)]
pub struct RecordedWarnings {
    recorded: Mutex<Vec<ProtocolViolation>>,
}

impl RecordedWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn violations(&self) -> Vec<ProtocolViolation> {
        self.recorded.lock().clone()
    }

    /// Rendered warning texts
    pub fn messages(&self) -> Vec<String> {
        self.recorded.lock().iter().map(|v| v.to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.recorded.lock().is_empty()
    }
}

impl WarningSink for RecordedWarnings {
    fn warn(&self, violation: ProtocolViolation) {
        tracing::debug!(%violation, "Recorded protocol warning");
        self.recorded.lock().push(violation);
    }
}

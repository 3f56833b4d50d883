//! Integration tests for the J1939 stack
//!
//! These tests run the tool side of the stack against scripted peers and
//! simulated ECUs on a shared loop-back medium. Timer-driven scenarios use
//! tokio's paused clock, so they are deterministic and fast.
//!
//! # Test Structure
//!
//! - `transport_test.rs` - TP reassembly, loss recovery, aborts, warnings
//! - `request_test.rs` - Request client against simulated ECUs
//! - `timing_test.rs` - T1-T4 and read-window bounds
//!
//! This library holds the shared fixtures.

use std::sync::Arc;
use std::time::Duration;

use j1939::tp::control::{data_transfer_frame, PACKET_PAYLOAD};
use j1939::tp::ControlMessage;
use j1939::{
    pgn, Bus, BusReader, Frame, LoopbackBus, RecordedWarnings, RequestClient, TransportConfig,
    TransportProtocolBus,
};

pub const TOOL: u8 = 0xF9;
pub const ENGINE: u8 = 0x00;
pub const TRANSMISSION: u8 = 0x03;

/// PDU1 PGN used for point-to-point transfers in the tests
pub const PROPRIETARY_A: u32 = 0xEF00;
/// PDU2 PGN used for broadcast transfers in the tests
pub const COMPONENT_ID: u32 = 0xFEEB;

/// How long scripted peers wait for traffic before giving up
pub const PEER_WINDOW: Duration = Duration::from_secs(30);

/// Deterministic test payload `0, 1, 2, ...`
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

/// The tool under test: a TP bus at [`TOOL`] on a fresh medium
pub struct Tool {
    pub medium: LoopbackBus,
    pub bus: Arc<TransportProtocolBus>,
    pub warnings: Arc<RecordedWarnings>,
}

impl Tool {
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Self {
        let medium = LoopbackBus::new(TOOL);
        let warnings = Arc::new(RecordedWarnings::new());
        let bus = Arc::new(TransportProtocolBus::with_settings(
            Arc::new(medium.clone()),
            config,
            warnings.clone(),
        ));
        Self {
            medium,
            bus,
            warnings,
        }
    }

    pub fn client(&self) -> RequestClient {
        RequestClient::new(self.bus.clone())
    }

    pub fn read(&self) -> BusReader {
        self.bus.read(PEER_WINDOW)
    }
}

impl Default for Tool {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw node driven step by step by a test
pub struct Peer {
    pub address: u8,
    node: LoopbackBus,
    reader: BusReader,
}

impl Peer {
    pub fn attach(medium: &LoopbackBus, address: u8) -> Self {
        let node = medium.attach(address);
        let reader = node.read(PEER_WINDOW);
        Self {
            address,
            node,
            reader,
        }
    }

    pub async fn send(&self, frame: Frame) {
        self.node.send(frame).await.expect("peer send");
    }

    /// Put `frame` on the medium without the echo tag, as a remote node would
    pub fn inject(&self, frame: Frame) {
        self.node.inject(frame);
    }

    pub async fn control(&self, message: ControlMessage, to: u8) {
        self.send(message.to_frame(self.address, to)).await;
    }

    pub async fn request_to_send(&self, to: u8, pgn: u32, data: &[u8]) {
        let message = ControlMessage::RequestToSend {
            total_bytes: data.len() as u16,
            total_packets: data.len().div_ceil(PACKET_PAYLOAD) as u8,
            max_packets: 0xFF,
            pgn,
        };
        self.control(message, to).await;
    }

    /// Send packet `sequence` of `data`
    pub async fn packet(&self, to: u8, sequence: u8, data: &[u8]) {
        let start = (sequence as usize - 1) * PACKET_PAYLOAD;
        let end = (start + PACKET_PAYLOAD).min(data.len());
        self.send(data_transfer_frame(self.address, to, sequence, &data[start..end]))
            .await;
    }

    /// Next TP.CM sent by `from`, skipping everything else
    pub async fn next_control(&mut self, from: u8) -> Option<(Frame, ControlMessage)> {
        while let Some(frame) = self.reader.next().await {
            if frame.source() != from || frame.pgn() != pgn::TP_CM {
                continue;
            }
            if let Some(message) = ControlMessage::parse(frame.data()) {
                return Some((frame, message));
            }
        }
        None
    }

    /// Next TP.DT sent by `from`
    pub async fn next_packet(&mut self, from: u8) -> Option<Frame> {
        while let Some(frame) = self.reader.next().await {
            if frame.source() == from && frame.pgn() == pgn::TP_DT {
                return Some(frame);
            }
        }
        None
    }

    /// Next frame from `from` that is not Transport Protocol traffic
    pub async fn next_frame(&mut self, from: u8) -> Option<Frame> {
        while let Some(frame) = self.reader.next().await {
            if frame.source() == from && !pgn::is_transport(frame.pgn()) {
                return Some(frame);
            }
        }
        None
    }

    /// TP.CM messages from `from` already buffered, without waiting
    pub fn buffered_control(&mut self, from: u8) -> Vec<ControlMessage> {
        let mut messages = Vec::new();
        while let Some(frame) = self.reader.try_next() {
            if frame.source() == from && frame.pgn() == pgn::TP_CM {
                messages.extend(ControlMessage::parse(frame.data()));
            }
        }
        messages
    }
}

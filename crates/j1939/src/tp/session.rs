//! Transport session bookkeeping
//!
//! A [`TransportSession`] is the pure state of one multi-packet transfer:
//! identity, totals, the packet bitmap and the data buffer. The async
//! drivers in `sender` and `receiver` own one each and move it through its
//! [`SessionState`]s.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::control::{packet_count, PACKET_PAYLOAD};
use crate::frame::Frame;

/// Which end of the transfer this node is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingCts,
    SendingSegments,
    AwaitingEom,
    AwaitingData,
    Complete,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingCts => "awaiting CTS",
            Self::SendingSegments => "sending",
            Self::AwaitingEom => "awaiting EOM ACK",
            Self::AwaitingData => "awaiting data",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Identity of a session in the bus' session table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub peer: u8,
    pub pgn: u32,
    pub role: Role,
}

/// Outcome of storing one TP.DT packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Stored,
    Duplicate,
    OutOfRange,
}

/// Contiguous packet range requested by one CTS. `count == 0` means nothing is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub start: u8,
    pub count: u8,
}

pub struct TransportSession {
    key: SessionKey,
    destination: u8,
    total_bytes: usize,
    total_packets: u8,
    buffer: Vec<u8>,
    present: Vec<bool>,
    state: SessionState,
}

impl TransportSession {
    /// Reassembly of a message announced by `peer` to `destination`
    pub fn receiver(peer: u8, destination: u8, pgn: u32, total_bytes: usize, total_packets: u8) -> Self {
        let packets = total_packets as usize;
        Self {
            key: SessionKey {
                peer,
                pgn,
                role: Role::Receiver,
            },
            destination,
            total_bytes,
            total_packets,
            buffer: vec![0xFF; packets * PACKET_PAYLOAD],
            present: vec![false; packets],
            state: SessionState::AwaitingData,
        }
    }

    /// Transmission of `data` to `peer` (global for BAM)
    pub fn sender(peer: u8, pgn: u32, data: Bytes) -> Self {
        let packets = packet_count(data.len());
        Self {
            key: SessionKey {
                peer,
                pgn,
                role: Role::Sender,
            },
            destination: peer,
            total_bytes: data.len(),
            total_packets: packets.min(u8::MAX as usize) as u8,
            buffer: data.to_vec(),
            present: vec![false; packets],
            state: SessionState::AwaitingCts,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn total_packets(&self) -> u8 {
        self.total_packets
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::trace!(
                peer = self.key.peer,
                pgn = self.key.pgn,
                from = %self.state,
                to = %state,
                "TP session state change"
            );
            self.state = state;
        }
    }

    /// Slot a received packet by its sequence number
    pub fn store(&mut self, sequence: u8, payload: &[u8]) -> Segment {
        let Some(index) = self.index(sequence) else {
            return Segment::OutOfRange;
        };
        if self.present[index] {
            return Segment::Duplicate;
        }

        let offset = index * PACKET_PAYLOAD;
        let len = payload.len().min(PACKET_PAYLOAD);
        self.buffer[offset..offset + len].copy_from_slice(&payload[..len]);
        self.present[index] = true;
        Segment::Stored
    }

    /// Record a packet as sent
    pub fn mark(&mut self, sequence: u8) {
        if let Some(index) = self.index(sequence) {
            self.present[index] = true;
        }
    }

    pub fn contains(&self, sequence: u8) -> bool {
        self.index(sequence).is_some_and(|index| self.present[index])
    }

    /// Packets received (or sent) so far
    pub fn progress(&self) -> usize {
        self.present.iter().filter(|&&p| p).count()
    }

    pub fn is_complete(&self) -> bool {
        self.present.iter().all(|&p| p)
    }

    /// True when every packet of `batch` is accounted for
    pub fn covers(&self, batch: Batch) -> bool {
        (0..batch.count).all(|i| self.contains(batch.start.saturating_add(i)))
    }

    /// First run of missing packets, at most `limit` long
    pub fn first_missing_run(&self, limit: u8) -> Batch {
        let Some(first) = self.present.iter().position(|&p| !p) else {
            return Batch { start: 0, count: 0 };
        };
        let run = self.present[first..]
            .iter()
            .take_while(|&&p| !p)
            .count()
            .min(limit.max(1) as usize);
        Batch {
            start: (first + 1) as u8,
            count: run as u8,
        }
    }

    /// Data carried by packet `sequence` of an outgoing message (empty when out of range)
    pub fn chunk(&self, sequence: u8) -> &[u8] {
        let Some(index) = self.index(sequence) else {
            return &[];
        };
        let start = (index * PACKET_PAYLOAD).min(self.buffer.len());
        let end = (start + PACKET_PAYLOAD).min(self.buffer.len());
        &self.buffer[start..end]
    }

    /// Reassembled frame from the peer; the buffer is truncated to the announced size
    pub fn into_frame(mut self, priority: u8, timestamp: Option<DateTime<Utc>>) -> Frame {
        self.buffer.truncate(self.total_bytes);
        let frame = Frame::addressed(
            priority,
            self.key.pgn,
            self.destination,
            self.key.peer,
            self.buffer,
        );
        match timestamp {
            Some(ts) => frame.with_timestamp(ts),
            None => frame.stamped(),
        }
    }

    fn index(&self, sequence: u8) -> Option<usize> {
        let index = (sequence as usize).checked_sub(1)?;
        (index < self.present.len()).then_some(index)
    }
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("key", &self.key)
            .field("destination", &self.destination)
            .field("total_bytes", &self.total_bytes)
            .field("progress", &format_args!("{}/{}", self.progress(), self.total_packets))
            .field("state", &self.state)
            .finish()
    }
}

//! TP.CM and TP.DT frame layouts
//!
//! Connection management (PGN 0xEC00), first byte is the control byte:
//!
//! ```text
//! RTS      10 | size lo | size hi | packets | max/CTS | PGN (3)
//! CTS      11 | packets | next    | FF      | FF      | PGN (3)
//! EOM_ACK  13 | size lo | size hi | packets | FF      | PGN (3)
//! BAM      20 | size lo | size hi | packets | FF      | PGN (3)
//! Abort    FF | reason  | FF      | FF      | FF      | PGN (3)
//! ```
//!
//! Data transfer (PGN 0xEB00): sequence number (1-255) followed by 7 bytes.

use std::fmt;

use crate::frame::{Frame, GLOBAL_ADDRESS};
use crate::pgn;

/// Priority of every TP frame this stack emits
pub const TP_PRIORITY: u8 = 7;
/// Payload bytes carried by one TP.DT packet
pub const PACKET_PAYLOAD: usize = 7;

const RTS: u8 = 0x10;
const CTS: u8 = 0x11;
const EOM_ACK: u8 = 0x13;
const BAM: u8 = 0x20;
const ABORT: u8 = 0xFF;

/// Connection abort reasons (J1939-21)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    ExistingSession,
    SystemResources,
    Timeout,
    CtsDuringTransfer,
    MaxRetryLimit,
    UnexpectedDataTransfer,
    BadSequenceNumber,
    DuplicateSequenceNumber,
    MessageTooLarge,
    Other(u8),
}

impl From<u8> for AbortReason {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::ExistingSession,
            2 => Self::SystemResources,
            3 => Self::Timeout,
            4 => Self::CtsDuringTransfer,
            5 => Self::MaxRetryLimit,
            6 => Self::UnexpectedDataTransfer,
            7 => Self::BadSequenceNumber,
            8 => Self::DuplicateSequenceNumber,
            9 => Self::MessageTooLarge,
            other => Self::Other(other),
        }
    }
}

impl From<AbortReason> for u8 {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::ExistingSession => 1,
            AbortReason::SystemResources => 2,
            AbortReason::Timeout => 3,
            AbortReason::CtsDuringTransfer => 4,
            AbortReason::MaxRetryLimit => 5,
            AbortReason::UnexpectedDataTransfer => 6,
            AbortReason::BadSequenceNumber => 7,
            AbortReason::DuplicateSequenceNumber => 8,
            AbortReason::MessageTooLarge => 9,
            AbortReason::Other(code) => code,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ExistingSession => "already in a connection",
            Self::SystemResources => "system resources needed",
            Self::Timeout => "timeout",
            Self::CtsDuringTransfer => "CTS received while sending data",
            Self::MaxRetryLimit => "maximum retransmit limit reached",
            Self::UnexpectedDataTransfer => "unexpected data transfer",
            Self::BadSequenceNumber => "bad sequence number",
            Self::DuplicateSequenceNumber => "duplicate sequence number",
            Self::MessageTooLarge => "message too large",
            Self::Other(code) => return write!(f, "reason {}", code),
        };
        f.write_str(text)
    }
}

/// Parsed TP.CM payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    RequestToSend {
        total_bytes: u16,
        total_packets: u8,
        max_packets: u8,
        pgn: u32,
    },
    ClearToSend {
        packets: u8,
        next_packet: u8,
        /// Bytes 4-5, expected to be FFFF
        reserved: u16,
        pgn: u32,
    },
    EndOfMessageAck {
        total_bytes: u16,
        total_packets: u8,
        pgn: u32,
    },
    Broadcast {
        total_bytes: u16,
        total_packets: u8,
        pgn: u32,
    },
    Abort {
        reason: AbortReason,
        pgn: u32,
    },
}

impl ControlMessage {
    /// Parse a TP.CM payload; reserved control bytes and short payloads yield `None`
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let total_bytes = u16::from_le_bytes([data[1], data[2]]);
        let pgn = data[5] as u32 | (data[6] as u32) << 8 | (data[7] as u32) << 16;

        let message = match data[0] {
            RTS => Self::RequestToSend {
                total_bytes,
                total_packets: data[3],
                max_packets: data[4],
                pgn,
            },
            CTS => Self::ClearToSend {
                packets: data[1],
                next_packet: data[2],
                reserved: (data[3] as u16) << 8 | data[4] as u16,
                pgn,
            },
            EOM_ACK => Self::EndOfMessageAck {
                total_bytes,
                total_packets: data[3],
                pgn,
            },
            BAM => Self::Broadcast {
                total_bytes,
                total_packets: data[3],
                pgn,
            },
            ABORT => Self::Abort {
                reason: AbortReason::from(data[1]),
                pgn,
            },
            _ => return None,
        };
        Some(message)
    }

    /// Transported PGN named in the trailing three bytes
    pub fn pgn(&self) -> u32 {
        match *self {
            Self::RequestToSend { pgn, .. }
            | Self::ClearToSend { pgn, .. }
            | Self::EndOfMessageAck { pgn, .. }
            | Self::Broadcast { pgn, .. }
            | Self::Abort { pgn, .. } => pgn,
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut data = [0xFF; 8];
        let (control, pgn) = match *self {
            Self::RequestToSend {
                total_bytes,
                total_packets,
                max_packets,
                pgn,
            } => {
                data[1..3].copy_from_slice(&total_bytes.to_le_bytes());
                data[3] = total_packets;
                data[4] = max_packets;
                (RTS, pgn)
            }
            Self::ClearToSend {
                packets,
                next_packet,
                reserved,
                pgn,
            } => {
                data[1] = packets;
                data[2] = next_packet;
                data[3] = (reserved >> 8) as u8;
                data[4] = (reserved & 0xFF) as u8;
                (CTS, pgn)
            }
            Self::EndOfMessageAck {
                total_bytes,
                total_packets,
                pgn,
            } => {
                data[1..3].copy_from_slice(&total_bytes.to_le_bytes());
                data[3] = total_packets;
                (EOM_ACK, pgn)
            }
            Self::Broadcast {
                total_bytes,
                total_packets,
                pgn,
            } => {
                data[1..3].copy_from_slice(&total_bytes.to_le_bytes());
                data[3] = total_packets;
                (BAM, pgn)
            }
            Self::Abort { reason, pgn } => {
                data[1] = reason.into();
                (ABORT, pgn)
            }
        };
        data[0] = control;
        data[5] = (pgn & 0xFF) as u8;
        data[6] = ((pgn >> 8) & 0xFF) as u8;
        data[7] = ((pgn >> 16) & 0xFF) as u8;
        data
    }

    /// Wrap into a TP.CM frame from `source` to `destination`
    pub fn to_frame(&self, source: u8, destination: u8) -> Frame {
        Frame::addressed(
            TP_PRIORITY,
            pgn::TP_CM,
            destination,
            source,
            self.encode().to_vec(),
        )
    }

    /// Well-formed CTS requesting `packets` starting at `next_packet`
    pub fn clear_to_send(packets: u8, next_packet: u8, pgn: u32) -> Self {
        Self::ClearToSend {
            packets,
            next_packet,
            reserved: 0xFFFF,
            pgn,
        }
    }
}

/// One TP.DT packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTransfer<'a> {
    pub sequence: u8,
    pub payload: &'a [u8],
}

impl<'a> DataTransfer<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        let (&sequence, payload) = data.split_first()?;
        if sequence == 0 {
            return None;
        }
        Some(Self { sequence, payload })
    }
}

/// Build the TP.DT frame carrying `chunk` (at most 7 bytes, padded with FF)
pub fn data_transfer_frame(source: u8, destination: u8, sequence: u8, chunk: &[u8]) -> Frame {
    let mut data = [0xFF; 8];
    data[0] = sequence;
    let len = chunk.len().min(PACKET_PAYLOAD);
    data[1..1 + len].copy_from_slice(&chunk[..len]);
    Frame::addressed(TP_PRIORITY, pgn::TP_DT, destination, source, data.to_vec())
}

/// Number of TP.DT packets needed for `bytes`
pub fn packet_count(bytes: usize) -> usize {
    bytes.div_ceil(PACKET_PAYLOAD)
}

/// True when the frame is addressed to `local` or broadcast
pub fn is_for(frame: &Frame, local: u8) -> bool {
    let destination = frame.destination();
    destination == local || destination == GLOBAL_ADDRESS
}

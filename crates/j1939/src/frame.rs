//! J1939 frame value and its raw wire encoding
//!
//! A [`Frame`] is immutable once built. Equality and hashing only look at the
//! protocol content (priority, identifier, source, payload); the capture
//! timestamp and the echo flag are informational.
//!
//! Raw buffer layout handled by [`Frame::decode`] / [`Frame::encode`]:
//!
//! ```text
//! offset 0      control bits (bit 0 = transmitted by the local node)
//! offset 1..=3  PGN, LSB first (PDU1: byte 1 is the destination address)
//! offset 4      priority (low 3 bits)
//! offset 5      source address
//! offset 6..    payload, 0-8 bytes
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{DecodeError, EncodeError};
use crate::pgn;

/// Global (broadcast) destination address
pub const GLOBAL_ADDRESS: u8 = 0xFF;
/// Priority used for requests and most diagnostic traffic
pub const DEFAULT_PRIORITY: u8 = 6;
/// Payload limit of a raw CAN frame
pub const MAX_RAW_DATA: usize = 8;
/// Payload limit of a Transport Protocol message (255 packets x 7 bytes)
pub const MAX_TP_DATA: usize = 1785;

const HEADER_LEN: usize = 6;
const ECHO_BIT: u8 = 0x01;

/// One J1939 parameter group as seen on (or destined for) the bus
#[derive(Debug, Clone)]
pub struct Frame {
    priority: u8,
    id: u32,
    source: u8,
    data: Bytes,
    transmitted: bool,
    timestamp: Option<DateTime<Utc>>,
}

impl Frame {
    /// Build a frame from its wire identifier (PGN with any PDU1 destination already folded in)
    pub fn new(priority: u8, id: u32, source: u8, data: impl Into<Bytes>) -> Self {
        Self {
            priority: priority & 0x07,
            id: id & pgn::MAX,
            source,
            data: data.into(),
            transmitted: false,
            timestamp: None,
        }
    }

    /// Build a frame for `pgn`, folding `destination` into the identifier for PDU1 PGNs.
    ///
    /// PDU2 PGNs are always global, so `destination` is ignored for them.
    pub fn addressed(
        priority: u8,
        pgn: u32,
        destination: u8,
        source: u8,
        data: impl Into<Bytes>,
    ) -> Self {
        let id = if pgn::is_pdu1(pgn) {
            (pgn & 0x3FF00) | destination as u32
        } else {
            pgn
        };
        Self::new(priority, id, source, data)
    }

    /// Rebuild a raw frame from a 29-bit extended CAN identifier
    pub fn from_can_id(can_id: u32, data: &[u8]) -> Result<Self, DecodeError> {
        if can_id > 0x1FFF_FFFF {
            return Err(DecodeError::CanIdOutOfRange(can_id));
        }
        if data.len() > MAX_RAW_DATA {
            return Err(DecodeError::TooLong {
                len: data.len(),
                max: MAX_RAW_DATA,
            });
        }
        let priority = ((can_id >> 26) & 0x07) as u8;
        let id = (can_id >> 8) & pgn::MAX;
        let source = (can_id & 0xFF) as u8;
        Ok(Self::new(priority, id, source, Bytes::copy_from_slice(data)))
    }

    /// Parse a raw adapter buffer
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::TooShort {
                len: buf.len(),
                needed: HEADER_LEN,
            });
        }
        if buf.len() > HEADER_LEN + MAX_RAW_DATA {
            return Err(DecodeError::TooLong {
                len: buf.len(),
                max: HEADER_LEN + MAX_RAW_DATA,
            });
        }

        let id = buf[1] as u32 | (buf[2] as u32) << 8 | (buf[3] as u32) << 16;
        if id > pgn::MAX {
            return Err(DecodeError::PgnOutOfRange(id));
        }

        let mut frame = Self::new(
            buf[4] & 0x07,
            id,
            buf[5],
            Bytes::copy_from_slice(&buf[HEADER_LEN..]),
        );
        frame.transmitted = buf[0] & ECHO_BIT != 0;
        Ok(frame)
    }

    /// Inverse of [`Frame::decode`]; only raw frames (at most 8 payload bytes) are encodable
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        if self.data.len() > MAX_RAW_DATA {
            return Err(EncodeError::PayloadTooLong(self.data.len()));
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len());
        buf.push(if self.transmitted { ECHO_BIT } else { 0 });
        buf.push((self.id & 0xFF) as u8);
        buf.push(((self.id >> 8) & 0xFF) as u8);
        buf.push(((self.id >> 16) & 0x03) as u8);
        buf.push(self.priority);
        buf.push(self.source);
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    /// Mark the frame as transmitted by the local node
    pub fn into_transmitted(mut self) -> Self {
        self.transmitted = true;
        self
    }

    /// Attach a capture timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attach the current wall-clock time as capture timestamp
    pub fn stamped(self) -> Self {
        self.with_timestamp(Utc::now())
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Identifier as carried on the wire (PDU1 destination included)
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Parameter group number with the PDU1 destination masked off
    pub fn pgn(&self) -> u32 {
        pgn::mask(self.id)
    }

    /// Destination address; PDU2 frames are always global
    pub fn destination(&self) -> u8 {
        if pgn::is_pdu1(self.id) {
            (self.id & 0xFF) as u8
        } else {
            GLOBAL_ADDRESS
        }
    }

    pub fn source(&self) -> u8 {
        self.source
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload as a cheaply cloneable buffer
    pub fn payload(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_transmitted(&self) -> bool {
        self.transmitted
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// 29-bit extended CAN identifier (priority, PGN, source)
    pub fn can_id(&self) -> u32 {
        (self.priority as u32) << 26 | self.id << 8 | self.source as u32
    }

    /// Little-endian 16-bit value at `offset`, if present
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.data.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Little-endian 24-bit value at `offset`, if present
    pub fn u24_at(&self, offset: usize) -> Option<u32> {
        let bytes = self.data.get(offset..offset + 3)?;
        Some(bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16)
    }

    /// Text rendering prefixed with the capture time, as written to logs
    pub fn to_timestamped_string(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("{} {}", ts.format("%H:%M:%S%.4f"), self),
            None => self.to_string(),
        }
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
            && self.id == other.id
            && self.source == other.source
            && self.data == other.data
    }
}

impl Eq for Frame {}

impl Hash for Frame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.priority.hash(state);
        self.id.hash(state);
        self.source.hash(state);
        self.data.hash(state);
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X} [{}]", self.can_id(), self.data.len())?;
        for byte in self.data.iter() {
            write!(f, " {:02X}", byte)?;
        }
        if self.transmitted {
            write!(f, " (TX)")?;
        }
        Ok(())
    }
}

//! Acknowledgment (PGN 0xE800)
//!
//! ```text
//! byte 0     control: 0 ACK, 1 NACK, 2 access denied, 3 busy
//! byte 1     group function value
//! bytes 2-3  reserved (FF)
//! byte 4     address being acknowledged
//! bytes 5-7  acknowledged PGN, LSB first
//! ```

use std::fmt;

use crate::frame::{Frame, DEFAULT_PRIORITY};
use crate::pgn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AckCode {
    Acknowledged = 0,
    NegativeAcknowledged = 1,
    AccessDenied = 2,
    Busy = 3,
}

impl TryFrom<u8> for AckCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Acknowledged),
            1 => Ok(Self::NegativeAcknowledged),
            2 => Ok(Self::AccessDenied),
            3 => Ok(Self::Busy),
            other => Err(other),
        }
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Acknowledged => "ACK",
            Self::NegativeAcknowledged => "NACK",
            Self::AccessDenied => "access denied",
            Self::Busy => "busy",
        };
        f.write_str(name)
    }
}

/// Decoded acknowledgment frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgment {
    pub code: AckCode,
    pub group_function: u8,
    pub address: u8,
    pub pgn: u32,
    pub source: u8,
}

impl Acknowledgment {
    pub fn new(code: AckCode, pgn: u32, address: u8, source: u8) -> Self {
        Self {
            code,
            group_function: 0xFF,
            address,
            pgn,
            source,
        }
    }

    pub fn parse(frame: &Frame) -> Option<Self> {
        if frame.pgn() != pgn::ACKNOWLEDGMENT || frame.len() < 8 {
            return None;
        }
        let data = frame.data();
        Some(Self {
            code: AckCode::try_from(data[0]).ok()?,
            group_function: data[1],
            address: data[4],
            pgn: frame.u24_at(5)?,
            source: frame.source(),
        })
    }

    pub fn to_frame(&self, destination: u8) -> Frame {
        let data = vec![
            self.code as u8,
            self.group_function,
            0xFF,
            0xFF,
            self.address,
            (self.pgn & 0xFF) as u8,
            ((self.pgn >> 8) & 0xFF) as u8,
            ((self.pgn >> 16) & 0xFF) as u8,
        ];
        Frame::addressed(
            DEFAULT_PRIORITY,
            pgn::ACKNOWLEDGMENT,
            destination,
            self.source,
            data,
        )
    }

    pub fn is_busy(&self) -> bool {
        self.code == AckCode::Busy
    }
}

impl fmt::Display for Acknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for PGN {:06X} from {:02X}", self.code, self.pgn, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::GLOBAL_ADDRESS;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0, AckCode::Acknowledged)]
    #[case(1, AckCode::NegativeAcknowledged)]
    #[case(2, AckCode::AccessDenied)]
    #[case(3, AckCode::Busy)]
    fn test_parse_codes(#[case] control: u8, #[case] code: AckCode) {
        let frame = Frame::addressed(
            6,
            pgn::ACKNOWLEDGMENT,
            GLOBAL_ADDRESS,
            0x00,
            vec![control, 0xFF, 0xFF, 0xFF, 0xF9, 0xEC, 0xFE, 0x00],
        );
        let ack = Acknowledgment::parse(&frame).unwrap();
        assert_eq!(ack.code, code);
        assert_eq!(ack.pgn, 0xFEEC);
        assert_eq!(ack.address, 0xF9);
        assert_eq!(ack.source, 0x00);
    }

    #[test]
    fn test_rejects_reserved_code() {
        let frame = Frame::new(6, 0xE8FF, 0x00, vec![4, 0xFF, 0xFF, 0xFF, 0xF9, 0xEC, 0xFE, 0x00]);
        assert_eq!(Acknowledgment::parse(&frame), None);
    }

    #[test]
    fn test_to_frame() {
        let ack = Acknowledgment::new(AckCode::Busy, 0xD300, 0xF9, 0x00);
        let frame = ack.to_frame(GLOBAL_ADDRESS);
        assert_eq!(frame.to_string(), "18E8FF00 [8] 03 FF FF FF F9 00 D3 00");
        assert_eq!(Acknowledgment::parse(&frame), Some(ack));
    }
}

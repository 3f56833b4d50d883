//! Frame codec errors

use thiserror::Error;

/// Raw frame buffer could not be turned into a [`Frame`](crate::Frame)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame buffer too short: {len} bytes, header needs {needed}")]
    TooShort { len: usize, needed: usize },

    #[error("Frame buffer too long: {len} bytes, at most {max} allowed")]
    TooLong { len: usize, max: usize },

    #[error("PGN 0x{0:X} exceeds 18 bits")]
    PgnOutOfRange(u32),

    #[error("CAN identifier 0x{0:X} exceeds 29 bits")]
    CanIdOutOfRange(u32),
}

/// Frame cannot be represented as a single raw CAN buffer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Payload of {0} bytes does not fit a single CAN frame")]
    PayloadTooLong(usize),
}

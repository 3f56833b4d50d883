//! DM7 command non-continuously monitored test / DM30 scaled test results

use super::decoder::PgnMessage;
use crate::frame::{Frame, DEFAULT_PRIORITY};
use crate::pgn;

/// FMI value asking for every failure mode of an SPN
pub const ALL_FMI: u8 = 0x1F;

const RESULT_LEN: usize = 12;

fn encode_spn(spn: u32, fmi: u8) -> [u8; 3] {
    [
        (spn & 0xFF) as u8,
        ((spn >> 8) & 0xFF) as u8,
        (((spn >> 16) & 0x07) as u8) << 5 | (fmi & 0x1F),
    ]
}

fn decode_spn(bytes: &[u8]) -> (u32, u8) {
    let spn = bytes[0] as u32 | (bytes[1] as u32) << 8 | ((bytes[2] >> 5) as u32) << 16;
    (spn, bytes[2] & 0x1F)
}

/// DM7: ask a module to run (or report) test `test_id` for `spn`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dm7Command {
    pub test_id: u8,
    pub spn: u32,
    pub fmi: u8,
}

impl Dm7Command {
    pub fn new(test_id: u8, spn: u32) -> Self {
        Self {
            test_id,
            spn,
            fmi: ALL_FMI,
        }
    }

    pub fn to_frame(&self, destination: u8, source: u8) -> Frame {
        let mut data = [0xFF; 8];
        data[0] = self.test_id;
        data[1..4].copy_from_slice(&encode_spn(self.spn, self.fmi));
        Frame::addressed(DEFAULT_PRIORITY, pgn::DM7, destination, source, data.to_vec())
    }

    pub fn parse(frame: &Frame) -> Option<Self> {
        if frame.pgn() != pgn::DM7 || frame.len() < 4 {
            return None;
        }
        let data = frame.data();
        let (spn, fmi) = decode_spn(&data[1..4]);
        Some(Self {
            test_id: data[0],
            spn,
            fmi,
        })
    }

    /// True when `result` answers this command
    pub fn matches(&self, result: &ScaledTestResult) -> bool {
        result.test_id == self.test_id && result.spn == self.spn
    }
}

/// One DM30 entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledTestResult {
    pub test_id: u8,
    pub spn: u32,
    pub fmi: u8,
    pub slot: u16,
    pub value: u16,
    pub max: u16,
    pub min: u16,
}

impl ScaledTestResult {
    pub fn encode(&self) -> [u8; RESULT_LEN] {
        let mut bytes = [0u8; RESULT_LEN];
        bytes[0] = self.test_id;
        bytes[1..4].copy_from_slice(&encode_spn(self.spn, self.fmi));
        bytes[4..6].copy_from_slice(&self.slot.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.value.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.max.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.min.to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8]) -> Self {
        let word = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let (spn, fmi) = decode_spn(&bytes[1..4]);
        Self {
            test_id: bytes[0],
            spn,
            fmi,
            slot: word(4),
            value: word(6),
            max: word(8),
            min: word(10),
        }
    }
}

/// DM30 message: one or more scaled test results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dm30 {
    pub results: Vec<ScaledTestResult>,
}

impl Dm30 {
    pub fn to_frame(&self, destination: u8, source: u8) -> Frame {
        let data: Vec<u8> = self.results.iter().flat_map(|r| r.encode()).collect();
        Frame::addressed(DEFAULT_PRIORITY, pgn::DM30, destination, source, data)
    }

    /// Result answering `command`, if present
    pub fn find(&self, command: &Dm7Command) -> Option<&ScaledTestResult> {
        self.results.iter().find(|r| command.matches(r))
    }
}

impl PgnMessage for Dm30 {
    const PGN: u32 = pgn::DM30;

    fn decode(frame: &Frame) -> Option<Self> {
        let results = frame
            .data()
            .chunks_exact(RESULT_LEN)
            .map(ScaledTestResult::decode)
            .collect();
        Some(Self { results })
    }

    fn is_valid(frame: &Frame) -> bool {
        !frame.is_empty() && frame.len() % RESULT_LEN == 0
    }
}

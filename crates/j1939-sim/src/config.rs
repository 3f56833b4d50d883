//! Simulated ECU configuration
//!
//! Data-driven description of what the ECU answers. PGNs and addresses can be
//! written as hex strings ("0xFEEC") or integers; payloads are hex strings.
//!
//! ```toml
//! address = "0x00"
//!
//! [[responses]]
//! pgn = "0xFEEC"
//! data = "31484756313233"
//!
//! [[responses]]
//! pgn = "0xD300"
//! ack = "busy"
//!
//! [[tests]]
//! test_id = 12
//! spn = 102
//! value = 1200
//! ```

use std::path::Path;
use std::time::Duration;

use j1939::AckCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Complete simulated ECU configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimConfig {
    /// Source address of the simulated node
    #[serde(default = "default_address", deserialize_with = "deserialize_hex_u8")]
    pub address: u8,

    /// Name used in log output
    #[serde(default = "default_name")]
    pub name: String,

    /// Request handling per PGN
    #[serde(default)]
    pub responses: Vec<ResponseDef>,

    /// DM30 results reported for DM7 commands
    #[serde(default)]
    pub tests: Vec<TestResultDef>,
}

fn default_address() -> u8 {
    0x00
}

fn default_name() -> String {
    "engine".to_string()
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            name: default_name(),
            responses: Vec::new(),
            tests: Vec::new(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SimError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SimError> {
        let config: Self = toml::from_str(content).map_err(|e| SimError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every payload decodes and fits a Transport Protocol message
    pub fn validate(&self) -> Result<(), SimError> {
        for response in &self.responses {
            response.payload()?;
        }
        Ok(())
    }

    pub fn with_response(mut self, response: ResponseDef) -> Self {
        self.responses.push(response);
        self
    }

    pub fn with_test(mut self, test: TestResultDef) -> Self {
        self.tests.push(test);
        self
    }

    pub fn response(&self, pgn: u32) -> Option<&ResponseDef> {
        self.responses.iter().find(|r| r.pgn == pgn)
    }
}

// =============================================================================
// Responses
// =============================================================================

/// How the ECU reacts to requests for one PGN
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseDef {
    #[serde(deserialize_with = "deserialize_hex_u32")]
    pub pgn: u32,

    /// Payload as hex; longer than 8 bytes goes out via TP
    #[serde(default)]
    pub data: String,

    /// Answer with an acknowledgment instead of data
    #[serde(default)]
    pub ack: Option<AckDef>,

    /// Busy acknowledgments sent before answering normally
    #[serde(default)]
    pub busy_replies: u32,

    /// Requests ignored before answering at all
    #[serde(default)]
    pub silent_requests: u32,

    /// Latency before each answer goes out
    #[serde(default)]
    pub delay_ms: u64,
}

impl ResponseDef {
    pub fn data(pgn: u32, payload: &[u8]) -> Self {
        Self {
            pgn,
            data: hex::encode_upper(payload),
            ack: None,
            busy_replies: 0,
            silent_requests: 0,
            delay_ms: 0,
        }
    }

    pub fn ack(pgn: u32, ack: AckDef) -> Self {
        Self {
            ack: Some(ack),
            ..Self::data(pgn, &[])
        }
    }

    pub fn with_busy_replies(mut self, count: u32) -> Self {
        self.busy_replies = count;
        self
    }

    pub fn with_silent_requests(mut self, count: u32) -> Self {
        self.silent_requests = count;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn payload(&self) -> Result<Vec<u8>, SimError> {
        let payload = hex::decode(self.data.trim()).map_err(|e| SimError::Payload {
            pgn: self.pgn,
            message: e.to_string(),
        })?;
        if payload.len() > j1939::frame::MAX_TP_DATA {
            return Err(SimError::Payload {
                pgn: self.pgn,
                message: format!("{} bytes exceeds the TP limit", payload.len()),
            });
        }
        Ok(payload)
    }
}

/// Acknowledgment codes as written in configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckDef {
    Ack,
    Nack,
    Denied,
    Busy,
}

impl From<AckDef> for AckCode {
    fn from(def: AckDef) -> Self {
        match def {
            AckDef::Ack => AckCode::Acknowledged,
            AckDef::Nack => AckCode::NegativeAcknowledged,
            AckDef::Denied => AckCode::AccessDenied,
            AckDef::Busy => AckCode::Busy,
        }
    }
}

// =============================================================================
// Test Results
// =============================================================================

/// One DM30 scaled test result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResultDef {
    pub test_id: u8,
    pub spn: u32,
    #[serde(default = "default_fmi")]
    pub fmi: u8,
    #[serde(default)]
    pub slot: u16,
    #[serde(default)]
    pub value: u16,
    #[serde(default = "default_limit_max")]
    pub max: u16,
    #[serde(default)]
    pub min: u16,
}

fn default_fmi() -> u8 {
    j1939::request::diagnostic::ALL_FMI
}

fn default_limit_max() -> u16 {
    0xFB00
}

impl From<&TestResultDef> for j1939::ScaledTestResult {
    fn from(def: &TestResultDef) -> Self {
        Self {
            test_id: def.test_id,
            spn: def.spn,
            fmi: def.fmi,
            slot: def.slot,
            value: def.value,
            max: def.max,
            min: def.min,
        }
    }
}

/// Simulator errors
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid payload for PGN {pgn:06X}: {message}")]
    Payload { pgn: u32, message: String },
}

// =============================================================================
// Hex Deserializers
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Hex(String),
    Int(u32),
}

fn parse_hex(s: &str) -> Result<u32, std::num::ParseIntError> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(s, 16)
}

/// Deserialize a hex u32 (supports "0xFEEC" or 65260)
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Hex(s) => parse_hex(&s).map_err(|e| D::Error::custom(e.to_string())),
    }
}

/// Deserialize a hex u8 (supports "0xF9" or 249)
fn deserialize_hex_u8<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = deserialize_hex_u32(deserializer)?;
    u8::try_from(value).map_err(|_| D::Error::custom(format!("address {:#X} out of range", value)))
}

//! Output formatting for j1939-cli (text, json)

use clap::ValueEnum;
use j1939::{Acknowledgment, Frame, Response, ScaledTestResult};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One line per frame, candump style (default)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Serializable view of a frame
#[derive(Debug, Serialize)]
pub struct FrameRecord {
    pub timestamp: Option<String>,
    pub can_id: String,
    pub pgn: String,
    pub priority: u8,
    pub source: u8,
    pub destination: u8,
    pub data: String,
    pub transmitted: bool,
}

impl From<&Frame> for FrameRecord {
    fn from(frame: &Frame) -> Self {
        Self {
            timestamp: frame.timestamp().map(|ts| ts.to_rfc3339()),
            can_id: format!("{:08X}", frame.can_id()),
            pgn: format!("{:06X}", frame.pgn()),
            priority: frame.priority(),
            source: frame.source(),
            destination: frame.destination(),
            data: hex::encode_upper(frame.data()),
            transmitted: frame.is_transmitted(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AckRecord {
    ack: String,
    pgn: String,
    source: u8,
}

impl From<&Acknowledgment> for AckRecord {
    fn from(ack: &Acknowledgment) -> Self {
        Self {
            ack: ack.code.to_string(),
            pgn: format!("{:06X}", ack.pgn),
            source: ack.source,
        }
    }
}

/// Serializable view of a DM30 test result
#[derive(Debug, Serialize)]
pub struct TestResultRecord {
    pub test_id: u8,
    pub spn: u32,
    pub fmi: u8,
    pub slot: u16,
    pub value: u16,
    pub max: u16,
    pub min: u16,
}

impl From<&ScaledTestResult> for TestResultRecord {
    fn from(result: &ScaledTestResult) -> Self {
        Self {
            test_id: result.test_id,
            spn: result.spn,
            fmi: result.fmi,
            slot: result.slot,
            value: result.value,
            max: result.max,
            min: result.min,
        }
    }
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self { format, quiet }
    }

    /// Print an info message (unless in quiet mode or emitting JSON)
    pub fn info(&self, msg: &str) {
        if !self.quiet && self.format == OutputFormat::Text {
            println!("{}", msg);
        }
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg);
    }

    pub fn frame(&self, frame: &Frame) {
        match self.format {
            OutputFormat::Text => println!("{}", frame.to_timestamped_string()),
            OutputFormat::Json => print_json(&FrameRecord::from(frame)),
        }
    }

    pub fn response(&self, response: &Response<Frame>) {
        match response {
            Response::Data(frame) => self.frame(frame),
            Response::Ack(ack) => match self.format {
                OutputFormat::Text => println!("{}", ack),
                OutputFormat::Json => print_json(&AckRecord::from(ack)),
            },
        }
    }

    /// Results are printed even in quiet mode
    pub fn test_result(&self, result: &ScaledTestResult) {
        match self.format {
            OutputFormat::Text => println!(
                "SPN {} FMI {}: value {} (limits {}..{}, slot {})",
                result.spn, result.fmi, result.value, result.min, result.max, result.slot
            ),
            OutputFormat::Json => print_json(&TestResultRecord::from(result)),
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

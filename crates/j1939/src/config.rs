//! Stack configuration
//!
//! Request timing and Transport Protocol policy. The J1939-21 timers
//! (T1-T4) are protocol constants and live in [`crate::tp`], not here.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source address conventionally used by an off-board diagnostic tool
pub const OFF_BOARD_DIAGNOSTIC_TOOL: u8 = 0xF9;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackConfig {
    /// Source address of the local node
    #[serde(default = "default_local_address")]
    pub local_address: u8,
    /// Request/response policy
    #[serde(default)]
    pub request: RequestConfig,
    /// Transport Protocol policy
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_local_address() -> u8 {
    OFF_BOARD_DIAGNOSTIC_TOOL
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            local_address: default_local_address(),
            request: RequestConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl StackConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

// =============================================================================
// Request Configuration
// =============================================================================

/// Per-call request/response policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestConfig {
    /// How long to listen for responses after each send
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Sends per request when nothing answers
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Pause before resending after a Busy acknowledgment
    #[serde(default = "default_busy_retry_interval_ms")]
    pub busy_retry_interval_ms: u64,
    /// Busy acknowledgments tolerated before giving up
    #[serde(default = "default_busy_retry_limit")]
    pub busy_retry_limit: u32,
}

fn default_window_ms() -> u64 {
    2500
}

fn default_attempts() -> u32 {
    3
}

fn default_busy_retry_interval_ms() -> u64 {
    200
}

fn default_busy_retry_limit() -> u32 {
    10
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            attempts: default_attempts(),
            busy_retry_interval_ms: default_busy_retry_interval_ms(),
            busy_retry_limit: default_busy_retry_limit(),
        }
    }
}

impl RequestConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn busy_retry_interval(&self) -> Duration {
        Duration::from_millis(self.busy_retry_interval_ms)
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_busy_retry_interval(mut self, interval: Duration) -> Self {
        self.busy_retry_interval_ms = interval.as_millis() as u64;
        self
    }
}

// =============================================================================
// Transport Protocol Configuration
// =============================================================================

/// Transport Protocol policy knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound on packets requested by one CTS (the RTS limit also applies)
    #[serde(default = "default_max_packets_per_cts")]
    pub max_packets_per_cts: u8,
    /// CTS re-issues after a T1/T2 expiry before the receiver gives up
    #[serde(default = "default_cts_retries")]
    pub cts_retries: u32,
    /// Gap between data packets of a BAM transmission
    #[serde(default = "default_bam_packet_interval_ms")]
    pub bam_packet_interval_ms: u64,
}

fn default_max_packets_per_cts() -> u8 {
    0xFF
}

fn default_cts_retries() -> u32 {
    3
}

fn default_bam_packet_interval_ms() -> u64 {
    50
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_packets_per_cts: default_max_packets_per_cts(),
            cts_retries: default_cts_retries(),
            bam_packet_interval_ms: default_bam_packet_interval_ms(),
        }
    }
}

impl TransportConfig {
    pub fn bam_packet_interval(&self) -> Duration {
        Duration::from_millis(self.bam_packet_interval_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StackConfig::default();
        assert_eq!(config.local_address, 0xF9);
        assert_eq!(config.request.window(), Duration::from_millis(2500));
        assert_eq!(config.request.attempts, 3);
        assert_eq!(config.transport.cts_retries, 3);
        assert_eq!(config.transport.max_packets_per_cts, 0xFF);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = StackConfig::from_toml(
            r#"
            local_address = 241

            [request]
            busy_retry_interval_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.local_address, 0xF1);
        assert_eq!(config.request.busy_retry_interval(), Duration::from_millis(50));
        assert_eq!(config.request.attempts, 3);
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transport]\nmax_packets_per_cts = 4").unwrap();

        let config = StackConfig::load(file.path()).unwrap();
        assert_eq!(config.transport.max_packets_per_cts, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let err = StackConfig::load("/nonexistent/j1939.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_parse_error() {
        let err = StackConfig::from_toml("local_address = \"tool\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

//! Configuration file handling for j1939-cli

use std::path::Path;

use anyhow::{Context, Result};
use j1939::StackConfig;
use j1939_sim::{ResponseDef, SimConfig, TestResultDef};
use serde::{Deserialize, Serialize};

/// Configuration for the CLI tool: the local stack plus the simulated ECU
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub stack: StackConfig,
    /// Simulated ECU; a small demo ECU is used when absent
    pub sim: Option<SimConfig>,
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        if let Some(sim) = &config.sim {
            sim.validate()
                .with_context(|| format!("Invalid simulator config in {}", path.display()))?;
        }
        Ok(config)
    }

    pub fn sim_or_demo(&self) -> SimConfig {
        self.sim.clone().unwrap_or_else(demo_ecu)
    }
}

/// Engine ECU answering VIN, engine hours and one DM7 test
fn demo_ecu() -> SimConfig {
    SimConfig::default()
        .with_response(ResponseDef::data(0xFEEC, b"1XKWD49X0RJ123456*"))
        .with_response(ResponseDef::data(
            0xFEE5,
            &[0x10, 0x27, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF],
        ))
        .with_test(TestResultDef {
            test_id: 247,
            spn: 3226,
            fmi: 0x1F,
            slot: 0x0101,
            value: 512,
            max: 1000,
            min: 100,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_stack_and_sim() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[stack]
local_address = 241

[stack.request]
window_ms = 1000

[sim]
address = "0x03"

[[sim.responses]]
pgn = "0xFEEC"
data = "4142"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.stack.local_address, 0xF1);
        assert_eq!(config.stack.request.window_ms, 1000);
        assert_eq!(config.sim_or_demo().address, 0x03);
    }

    #[test]
    fn test_demo_when_no_sim() {
        let config = Config::default();
        let sim = config.sim_or_demo();
        assert!(sim.response(0xFEEC).is_some());
        assert_eq!(sim.tests.len(), 1);
    }

    #[test]
    fn test_invalid_payload_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[[sim.responses]]\npgn = 65260\ndata = \"ZZ\"\n").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }
}

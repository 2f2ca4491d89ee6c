use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_ROM_PATH: &str = "6502_functional_test.bin";

/// What the run loop does when decode meets an undocumented opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownOpcodePolicy {
    /// Stop the run and report the opcode.
    #[default]
    Halt,
    /// Report the opcode and resume at the following byte.
    Skip,
}

/// Host configuration for a run.
///
/// Loaded from JSON with [`RunConfig::from_json_file`]; any field missing
/// from the file takes its default. Command-line flags are applied on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub rom_path: PathBuf,
    /// Replaces the reset-vector PC right after reset.
    pub start_address: Option<u16>,
    pub max_steps: Option<u64>,
    /// Stop before executing the instruction at this address.
    pub break_at: Option<u16>,
    /// Trap address that counts as a pass.
    pub success_address: Option<u16>,
    pub stop_on_trap: bool,
    pub unknown_opcode: UnknownOpcodePolicy,
    /// Serve the HTTP monitor here instead of running to completion.
    pub serve: Option<SocketAddr>,
    pub print_metrics: bool,
    pub snapshot_out: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            rom_path: PathBuf::from(DEFAULT_ROM_PATH),
            start_address: None,
            max_steps: None,
            break_at: None,
            success_address: None,
            stop_on_trap: true,
            unknown_opcode: UnknownOpcodePolicy::Halt,
            serve: None,
            print_metrics: false,
            snapshot_out: None,
        }
    }
}

impl RunConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = RunConfig::from_json(r#"{ "max_steps": 1000, "unknown_opcode": "skip" }"#).unwrap();
        assert_eq!(config.max_steps, Some(1000));
        assert_eq!(config.unknown_opcode, UnknownOpcodePolicy::Skip);
        assert_eq!(config.rom_path, PathBuf::from(DEFAULT_ROM_PATH));
        assert!(config.stop_on_trap);
    }

    #[test]
    fn test_addresses_and_socket() {
        let config = RunConfig::from_json(
            r#"{ "start_address": 1024, "success_address": 13417, "serve": "127.0.0.1:3030" }"#,
        )
        .unwrap();
        assert_eq!(config.start_address, Some(0x0400));
        assert_eq!(config.success_address, Some(0x3469));
        assert_eq!(config.serve, Some(([127, 0, 0, 1], 3030).into()));
    }

    #[test]
    fn test_unreadable_config_file() {
        let result = RunConfig::from_json_file("/no/such/config.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}

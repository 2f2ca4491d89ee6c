use std::fmt;
use std::io;
use std::path::PathBuf;

/// A word access that would run past the end of the 64K address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    OutOfRange { address: u16 },
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::OutOfRange { address } => write!(
                f,
                "word access at ${:04X} runs past the end of the address space",
                address
            ),
        }
    }
}

impl std::error::Error for AddressError {}

/// Failure to place a binary image into memory. Memory is never partially written.
#[derive(Debug)]
pub enum LoadError {
    ImageUnreadable { path: PathBuf, source: io::Error },
    ImageTooLarge { size: usize, limit: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::ImageUnreadable { path, source } => {
                write!(f, "cannot read image {}: {}", path.display(), source)
            }
            LoadError::ImageTooLarge { size, limit } => {
                write!(f, "image of {} bytes exceeds the {} bytes available", size, limit)
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::ImageUnreadable { source, .. } => Some(source),
            LoadError::ImageTooLarge { .. } => None,
        }
    }
}

/// Conditions that stop a single instruction from executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    /// The byte at `pc` is not a documented opcode. PC has already moved past it.
    UnknownOpcode { opcode: u8, pc: u16 },
    Address(AddressError),
}

impl fmt::Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuError::UnknownOpcode { opcode, pc } => {
                write!(f, "unknown opcode ${:02X} at ${:04X}", opcode, pc)
            }
            CpuError::Address(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CpuError::Address(err) => Some(err),
            CpuError::UnknownOpcode { .. } => None,
        }
    }
}

impl From<AddressError> for CpuError {
    fn from(err: AddressError) -> Self {
        CpuError::Address(err)
    }
}

#[derive(Debug)]
pub enum SnapshotError {
    Io(io::Error),
    Json(serde_json::Error),
    Encoding(String),
    Corrupt(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(err) => write!(f, "snapshot I/O failed: {}", err),
            SnapshotError::Json(err) => write!(f, "snapshot is not valid JSON: {}", err),
            SnapshotError::Encoding(msg) => write!(f, "snapshot memory encoding: {}", msg),
            SnapshotError::Corrupt(msg) => write!(f, "snapshot rejected: {}", msg),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Io(err) => Some(err),
            SnapshotError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(err: io::Error) -> Self {
        SnapshotError::Io(err)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Json(err)
    }
}

/// Failure to read a JSON run configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

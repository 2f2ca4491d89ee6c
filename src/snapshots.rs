use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::cpu::CPU;
use crate::error::SnapshotError;
use crate::flags::StatusFlags;
use crate::memory::{Memory, MEMORY_SIZE};

const RLE_MARKER: u8 = 0xFF;

/// Full machine state: registers, flags and all 64 KiB of memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub cpu: CpuSnapshot,
    /// Run-length encoded memory, base64 text.
    pub memory: String,
    /// SHA-256 of the raw 64 KiB image, lowercase hex.
    pub memory_sha256: String,
    pub instruction_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub pc: u16,
    pub sp: u8,
    pub status: u8,
}

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    pub name: Option<String>,
}

impl Snapshot {
    pub fn capture(name: impl Into<String>, cpu: &CPU, memory: &Memory) -> Self {
        let image = memory.as_slice();
        let compressed = compress_memory(image);
        debug!(
            "snapshot compressed {} bytes of memory to {}",
            image.len(),
            compressed.len()
        );

        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            cpu: CpuSnapshot {
                a: cpu.get_register_a(),
                x: cpu.get_register_x(),
                y: cpu.get_register_y(),
                pc: cpu.get_pc(),
                sp: cpu.get_sp(),
                status: cpu.get_status(),
            },
            memory: STANDARD.encode(compressed),
            memory_sha256: sha256_hex(image),
            instruction_count: cpu.instructions_executed,
        }
    }

    /// Writes the snapshot into `cpu` and `memory`. Both are left untouched
    /// if the memory image fails to decode or verify.
    pub fn restore(&self, cpu: &mut CPU, memory: &mut Memory) -> Result<(), SnapshotError> {
        let image = self.decode_memory()?;

        memory
            .load_image(&image)
            .map_err(|err| SnapshotError::Corrupt(err.to_string()))?;
        cpu.a = self.cpu.a;
        cpu.x = self.cpu.x;
        cpu.y = self.cpu.y;
        cpu.pc = self.cpu.pc;
        cpu.sp = self.cpu.sp;
        cpu.flags = StatusFlags::from_byte(self.cpu.status);
        cpu.instructions_executed = self.instruction_count;

        debug!("restored snapshot {} ({}) at PC ${:04X}", self.id, self.name, cpu.pc);
        Ok(())
    }

    fn decode_memory(&self) -> Result<Vec<u8>, SnapshotError> {
        let compressed = STANDARD
            .decode(&self.memory)
            .map_err(|err| SnapshotError::Encoding(err.to_string()))?;
        let image = decompress_memory(&compressed)?;

        let digest = sha256_hex(&image);
        if digest != self.memory_sha256 {
            return Err(SnapshotError::Corrupt(format!(
                "memory digest {} does not match recorded {}",
                digest, self.memory_sha256
            )));
        }
        Ok(image)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

// Runs of four or more, and any run of zeros, become MARKER count value.
// A literal 0xFF is escaped as MARKER 0x00.
fn compress_memory(memory: &[u8]) -> Vec<u8> {
    let mut compressed = Vec::new();
    let mut i = 0;

    while i < memory.len() {
        let current = memory[i];
        let mut count = 1;
        while i + count < memory.len() && memory[i + count] == current && count < 255 {
            count += 1;
        }

        if count > 3 || current == 0 {
            compressed.extend_from_slice(&[RLE_MARKER, count as u8, current]);
        } else if current == RLE_MARKER {
            for _ in 0..count {
                compressed.extend_from_slice(&[RLE_MARKER, 0x00]);
            }
        } else {
            compressed.extend(std::iter::repeat(current).take(count));
        }

        i += count;
    }

    compressed
}

fn decompress_memory(compressed: &[u8]) -> Result<Vec<u8>, SnapshotError> {
    let mut decompressed = Vec::with_capacity(MEMORY_SIZE);
    let mut i = 0;

    while i < compressed.len() {
        if compressed[i] != RLE_MARKER {
            decompressed.push(compressed[i]);
            i += 1;
            continue;
        }

        match compressed.get(i + 1) {
            None => return Err(SnapshotError::Corrupt("truncated RLE data".to_string())),
            Some(0x00) => {
                decompressed.push(RLE_MARKER);
                i += 2;
            }
            Some(&count) => {
                let value = *compressed
                    .get(i + 2)
                    .ok_or_else(|| SnapshotError::Corrupt("truncated RLE run".to_string()))?;
                decompressed.extend(std::iter::repeat(value).take(count as usize));
                i += 3;
            }
        }

        if decompressed.len() > MEMORY_SIZE {
            break;
        }
    }

    if decompressed.len() != MEMORY_SIZE {
        return Err(SnapshotError::Corrupt(format!(
            "decompressed size {} != {}",
            decompressed.len(),
            MEMORY_SIZE
        )));
    }

    Ok(decompressed)
}

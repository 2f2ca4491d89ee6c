//! # MOS 6502 CPU Emulator
//!
//! An instruction-level implementation of the NMOS 6502 with a flat 64 KiB
//! address space. Every documented opcode is decoded through a static table
//! and executed with full flag semantics; decimal-mode arithmetic is not
//! modelled.
//!
//! ## Features
//!
//! - All 151 documented opcodes and 13 addressing modes
//! - Historic quirks: JMP indirect page wrap, zero-page pointer wrap
//! - Trap detection for self-jumping test ROMs
//! - Run driver with breakpoints, step limits and a cooperative stop signal
//! - Machine snapshots, Prometheus metrics and an optional HTTP monitor
//!
//! ## Example
//!
//! ```rust
//! use mos6502_core::cpu::CPU;
//! use mos6502_core::memory::Memory;
//!
//! let mut memory = Memory::new();
//!
//! // LDA #$05, ADC #$03, BRK
//! memory.load_at(0x0600, &[0xA9, 0x05, 0x69, 0x03, 0x00]).unwrap();
//! memory.load_at(0xFFFC, &[0x00, 0x06]).unwrap();
//!
//! let mut cpu = CPU::with_reset(&memory);
//! cpu.step(&mut memory).unwrap();
//! cpu.step(&mut memory).unwrap();
//!
//! assert_eq!(cpu.get_register_a(), 0x08);
//! assert!(!cpu.flags.carry);
//! ```

#![recursion_limit = "2048"]

pub mod config;
pub mod cpu;
pub mod emulator;
pub mod error;
pub mod flags;
pub mod memory;
pub mod metrics;
pub mod opcodes;
pub mod server;
pub mod snapshots;

pub use config::{RunConfig, UnknownOpcodePolicy};
pub use cpu::{StepResult, CPU};
pub use emulator::{Emulator, RunSummary, StopReason, StopSignal};
pub use error::{AddressError, CpuError, LoadError, SnapshotError};
pub use flags::StatusFlags;
pub use memory::Memory;
pub use opcodes::{decode, Instruction};

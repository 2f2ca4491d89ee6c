//! Run-loop driver around the processor core.
//!
//! [`CPU::step`] executes exactly one instruction; everything about when to
//! stop (traps, breakpoints, step limits, unknown opcodes, an external stop
//! request) lives here.

use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RunConfig, UnknownOpcodePolicy};
use crate::cpu::{StepResult, CPU};
use crate::error::{AddressError, CpuError, LoadError};
use crate::flags::StatusFlags;
use crate::memory::Memory;
use crate::metrics::{record_image_load, update_cpu_registers, Timer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub pc: u16,
    pub sp: u8,
    pub status: u8,
    pub flags: StatusFlags,
    pub instructions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Trapped { pc: u16 },
    BreakpointReached { pc: u16 },
    StepLimit,
    Interrupted,
    UnknownOpcode { opcode: u8, pc: u16 },
    AddressFault { address: u16 },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Trapped { pc } => write!(f, "trapped at ${:04X}", pc),
            StopReason::BreakpointReached { pc } => write!(f, "breakpoint at ${:04X}", pc),
            StopReason::StepLimit => write!(f, "step limit reached"),
            StopReason::Interrupted => write!(f, "stop requested"),
            StopReason::UnknownOpcode { opcode, pc } => {
                write!(f, "unknown opcode ${:02X} at ${:04X}", opcode, pc)
            }
            StopReason::AddressFault { address } => {
                write!(f, "word access past end of memory at ${:04X}", address)
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub steps_executed: u64,
    pub stopped: Option<StopReason>,
    pub final_state: CpuState,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub steps: u64,
    pub reason: StopReason,
    pub elapsed: Duration,
    pub success_address: Option<u16>,
    pub final_state: CpuState,
}

impl RunSummary {
    /// With a success address, only a trap there passes. Without one, any
    /// stop other than a decode or address fault passes.
    pub fn passed(&self) -> bool {
        match (self.success_address, self.reason) {
            (Some(expected), StopReason::Trapped { pc }) => pc == expected,
            (Some(_), _) => false,
            (None, StopReason::UnknownOpcode { .. }) | (None, StopReason::AddressFault { .. }) => false,
            (None, _) => true,
        }
    }
}

/// Cooperative stop flag, checked once per instruction by [`Emulator::run`].
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One processor with exclusive ownership of its address space.
pub struct Emulator {
    pub cpu: CPU,
    pub memory: Memory,
}

impl Emulator {
    pub fn new() -> Self {
        Self::with_memory(Memory::new())
    }

    /// Takes ownership of `memory` and resets the processor against it.
    pub fn with_memory(memory: Memory) -> Self {
        let cpu = CPU::with_reset(&memory);
        Self { cpu, memory }
    }

    pub fn load_image_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, LoadError> {
        let result = self.memory.load_file(path);
        record_image_load(result.is_ok());
        result
    }

    pub fn load_program(&mut self, address: u16, data: &[u8]) -> Result<(), LoadError> {
        let result = self.memory.load_at(address, data);
        record_image_load(result.is_ok());
        result
    }

    pub fn reset(&mut self) {
        self.cpu.reset(&self.memory);
    }

    /// Resets, then optionally overrides the reset-vector PC.
    pub fn reset_to(&mut self, start: Option<u16>) {
        self.reset();
        if let Some(pc) = start {
            self.cpu.pc = pc;
        }
    }

    pub fn step(&mut self) -> Result<StepResult, CpuError> {
        self.cpu.step(&mut self.memory)
    }

    /// Executes up to `steps` instructions, stopping early on a trap or any fault.
    pub fn execute_steps(&mut self, steps: u64) -> ExecutionResult {
        let mut executed = 0;
        let mut stopped = None;

        while executed < steps {
            executed += 1;
            if let Some(reason) = self.advance(true, UnknownOpcodePolicy::Halt) {
                stopped = Some(reason);
                break;
            }
        }

        self.publish_registers();
        ExecutionResult {
            steps_executed: executed,
            stopped,
            final_state: self.get_state(),
        }
    }

    /// Runs until a stop condition from `config` or `stop` fires.
    pub fn run(&mut self, config: &RunConfig, stop: &StopSignal) -> RunSummary {
        let timer = Timer::new();
        let mut steps = 0u64;

        let reason = loop {
            if stop.is_stop_requested() {
                break StopReason::Interrupted;
            }
            if config.max_steps.is_some_and(|limit| steps >= limit) {
                break StopReason::StepLimit;
            }
            if steps > 0 && config.break_at == Some(self.cpu.pc) {
                break StopReason::BreakpointReached { pc: self.cpu.pc };
            }

            steps += 1;
            if let Some(reason) = self.advance(config.stop_on_trap, config.unknown_opcode) {
                break reason;
            }
        };

        self.publish_registers();
        let elapsed = timer.elapsed();
        info!("stopped after {} steps in {:?}: {}", steps, elapsed, reason);

        RunSummary {
            steps,
            reason,
            elapsed,
            success_address: config.success_address,
            final_state: self.get_state(),
        }
    }

    fn advance(&mut self, stop_on_trap: bool, policy: UnknownOpcodePolicy) -> Option<StopReason> {
        match self.cpu.step(&mut self.memory) {
            Ok(StepResult::Executed(_)) => None,
            Ok(StepResult::Trapped { pc }) => stop_on_trap.then_some(StopReason::Trapped { pc }),
            Err(CpuError::UnknownOpcode { opcode, pc }) => {
                warn!("unknown opcode ${:02X} at ${:04X} ({:?})", opcode, pc, policy);
                match policy {
                    UnknownOpcodePolicy::Halt => Some(StopReason::UnknownOpcode { opcode, pc }),
                    UnknownOpcodePolicy::Skip => None,
                }
            }
            Err(CpuError::Address(AddressError::OutOfRange { address })) => {
                error!("operand fetch ran past end of memory at ${:04X}", address);
                Some(StopReason::AddressFault { address })
            }
        }
    }

    fn publish_registers(&self) {
        let cpu = &self.cpu;
        update_cpu_registers(cpu.a, cpu.x, cpu.y, cpu.pc, cpu.sp, cpu.flags);
    }

    pub fn get_state(&self) -> CpuState {
        CpuState {
            a: self.cpu.get_register_a(),
            x: self.cpu.get_register_x(),
            y: self.cpu.get_register_y(),
            pc: self.cpu.get_pc(),
            sp: self.cpu.get_sp(),
            status: self.cpu.get_status(),
            flags: self.cpu.get_flags(),
            instructions: self.cpu.instructions_executed,
        }
    }

    pub fn read_memory(&self, address: u16, length: u16) -> Vec<u8> {
        (0..length)
            .map(|i| self.memory.read(address.wrapping_add(i)))
            .collect()
    }

    pub fn write_memory(&mut self, address: u16, value: u8) {
        self.memory.write(address, value);
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

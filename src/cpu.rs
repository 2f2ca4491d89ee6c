use log::{debug, trace};

use crate::error::{AddressError, CpuError};
use crate::flags::StatusFlags;
use crate::memory::Memory;
use crate::metrics::{record_instruction, record_reset, record_unknown_opcode, Timer};
use crate::opcodes::{decode, AddressingMode, Instruction, Mnemonic};

pub const STACK_BASE: u16 = 0x0100;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_BRK_VECTOR: u16 = 0xFFFE;
pub const RESET_STACK_POINTER: u8 = 0xFD;

#[derive(Debug, Clone)]
pub struct CPU {
    // Registers (public for snapshot support)
    pub a: u8,      // Accumulator
    pub x: u8,      // X Index Register
    pub y: u8,      // Y Index Register
    pub pc: u16,    // Program Counter
    pub sp: u8,     // Stack Pointer
    pub flags: StatusFlags,

    pub instructions_executed: u64,
}

/// What a single [`CPU::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Executed(Instruction),
    /// A jump or taken branch landed back on its own first byte. Test ROMs
    /// use this as their pass/fail trap; stepping again changes nothing.
    Trapped { pc: u16 },
}

/// Operand of the instruction being executed, after its addressing mode
/// has consumed the bytes following the opcode.
#[derive(Debug, Clone, Copy)]
enum Operand {
    Implied,
    Accumulator,
    Immediate(u8),
    Relative(i8),
    Address(u16),
}

impl CPU {
    /// Power-on register file without the reset sequence: PC is `$0000` and
    /// the reset vector is not read. Use [`CPU::with_reset`] to start a
    /// processor the way hardware does.
    pub fn new() -> Self {
        CPU {
            a: 0,
            x: 0,
            y: 0,
            pc: 0,
            sp: RESET_STACK_POINTER,
            flags: StatusFlags {
                interrupt_disable: true,
                ..StatusFlags::default()
            },
            instructions_executed: 0,
        }
    }

    /// Creates a CPU and runs the reset sequence against `memory`.
    pub fn with_reset(memory: &Memory) -> Self {
        let mut cpu = CPU::new();
        cpu.reset(memory);
        cpu
    }

    /// Hardware reset: PC from the reset vector, I set, B and D clear,
    /// S at `$FD`. A, X and Y keep their values.
    pub fn reset(&mut self, memory: &Memory) {
        self.pc = read_vector(memory, RESET_VECTOR);
        self.sp = RESET_STACK_POINTER;
        self.flags.interrupt_disable = true;
        self.flags.break_command = false;
        self.flags.decimal_mode = false;
        self.instructions_executed = 0;
        record_reset();
        debug!("reset: PC=${:04X}", self.pc);
    }

    /// Fetches, decodes and executes exactly one instruction.
    pub fn step(&mut self, memory: &mut Memory) -> Result<StepResult, CpuError> {
        let start = self.pc;
        let opcode = self.fetch_byte(memory);

        let instruction = match decode(opcode) {
            Some(instruction) => instruction,
            None => {
                record_unknown_opcode(opcode);
                return Err(CpuError::UnknownOpcode { opcode, pc: start });
            }
        };

        trace!(
            "${:04X}: {:02X} {} A={:02X} X={:02X} Y={:02X} S={:02X} P={:02X}",
            start,
            opcode,
            instruction,
            self.a,
            self.x,
            self.y,
            self.sp,
            self.get_status()
        );

        let timer = Timer::new();
        self.execute(instruction, memory)?;
        self.instructions_executed += 1;

        record_instruction(opcode, timer.elapsed());

        let redirects = instruction.mnemonic == Mnemonic::Jmp || instruction.mnemonic.is_branch();
        if redirects && self.pc == start {
            return Ok(StepResult::Trapped { pc: start });
        }
        Ok(StepResult::Executed(instruction))
    }

    fn execute(&mut self, instruction: Instruction, memory: &mut Memory) -> Result<(), CpuError> {
        use Mnemonic::*;

        let operand = self.resolve(memory, instruction.mode)?;

        match instruction.mnemonic {
            // Arithmetic
            Adc => {
                let value = self.read_operand(memory, operand);
                self.adc(value);
            }
            Sbc => {
                let value = self.read_operand(memory, operand);
                self.sbc(value);
            }

            // Logical
            And => {
                self.a &= self.read_operand(memory, operand);
                self.update_zero_and_negative_flags(self.a);
            }
            Ora => {
                self.a |= self.read_operand(memory, operand);
                self.update_zero_and_negative_flags(self.a);
            }
            Eor => {
                self.a ^= self.read_operand(memory, operand);
                self.update_zero_and_negative_flags(self.a);
            }
            Bit => {
                let value = self.read_operand(memory, operand);
                self.bit(value);
            }

            // Load/Store
            Lda => {
                self.a = self.read_operand(memory, operand);
                self.update_zero_and_negative_flags(self.a);
            }
            Ldx => {
                self.x = self.read_operand(memory, operand);
                self.update_zero_and_negative_flags(self.x);
            }
            Ldy => {
                self.y = self.read_operand(memory, operand);
                self.update_zero_and_negative_flags(self.y);
            }
            Sta => self.write_operand(memory, operand, self.a),
            Stx => self.write_operand(memory, operand, self.x),
            Sty => self.write_operand(memory, operand, self.y),

            // Shifts and rotates (accumulator or read-modify-write)
            Asl => self.modify(memory, operand, |cpu, value| {
                cpu.flags.carry = value & 0x80 != 0;
                value << 1
            }),
            Lsr => self.modify(memory, operand, |cpu, value| {
                cpu.flags.carry = value & 0x01 != 0;
                value >> 1
            }),
            Rol => self.modify(memory, operand, |cpu, value| {
                let carry_in = cpu.flags.carry as u8;
                cpu.flags.carry = value & 0x80 != 0;
                (value << 1) | carry_in
            }),
            Ror => self.modify(memory, operand, |cpu, value| {
                let carry_in = (cpu.flags.carry as u8) << 7;
                cpu.flags.carry = value & 0x01 != 0;
                (value >> 1) | carry_in
            }),

            // Compare
            Cmp => {
                let value = self.read_operand(memory, operand);
                self.compare(self.a, value);
            }
            Cpx => {
                let value = self.read_operand(memory, operand);
                self.compare(self.x, value);
            }
            Cpy => {
                let value = self.read_operand(memory, operand);
                self.compare(self.y, value);
            }

            // Increment/Decrement
            Inc => self.modify(memory, operand, |_, value| value.wrapping_add(1)),
            Dec => self.modify(memory, operand, |_, value| value.wrapping_sub(1)),
            Inx => {
                self.x = self.x.wrapping_add(1);
                self.update_zero_and_negative_flags(self.x);
            }
            Iny => {
                self.y = self.y.wrapping_add(1);
                self.update_zero_and_negative_flags(self.y);
            }
            Dex => {
                self.x = self.x.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.x);
            }
            Dey => {
                self.y = self.y.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.y);
            }

            // Branch
            Bcc => self.branch_if(operand, !self.flags.carry),
            Bcs => self.branch_if(operand, self.flags.carry),
            Beq => self.branch_if(operand, self.flags.zero),
            Bne => self.branch_if(operand, !self.flags.zero),
            Bmi => self.branch_if(operand, self.flags.negative),
            Bpl => self.branch_if(operand, !self.flags.negative),
            Bvc => self.branch_if(operand, !self.flags.overflow),
            Bvs => self.branch_if(operand, self.flags.overflow),

            // Jump/Call/Return
            Jmp => self.pc = operand_address(operand),
            Jsr => self.jsr(memory, operand_address(operand)),
            Rts => self.rts(memory),
            Rti => self.rti(memory),
            Brk => self.brk(memory),

            // Stack
            Pha => self.push(memory, self.a),
            Pla => {
                self.a = self.pop(memory);
                self.update_zero_and_negative_flags(self.a);
            }
            Php => {
                let status = self.get_status() | crate::flags::BREAK_COMMAND;
                self.push(memory, status);
            }
            Plp => {
                let status = self.pop(memory);
                self.flags = StatusFlags::from_byte(status);
            }

            // Flag manipulation
            Clc => self.flags.carry = false,
            Sec => self.flags.carry = true,
            Cli => self.flags.interrupt_disable = false,
            Sei => self.flags.interrupt_disable = true,
            Cld => self.flags.decimal_mode = false,
            Sed => self.flags.decimal_mode = true,
            Clv => self.flags.overflow = false,

            // Transfer
            Tax => {
                self.x = self.a;
                self.update_zero_and_negative_flags(self.x);
            }
            Tay => {
                self.y = self.a;
                self.update_zero_and_negative_flags(self.y);
            }
            Txa => {
                self.a = self.x;
                self.update_zero_and_negative_flags(self.a);
            }
            Tya => {
                self.a = self.y;
                self.update_zero_and_negative_flags(self.a);
            }
            Tsx => {
                self.x = self.sp;
                self.update_zero_and_negative_flags(self.x);
            }
            Txs => self.sp = self.x,

            Nop => {}
        }

        Ok(())
    }

    // Getters
    pub fn get_register_a(&self) -> u8 { self.a }
    pub fn get_register_x(&self) -> u8 { self.x }
    pub fn get_register_y(&self) -> u8 { self.y }
    pub fn get_pc(&self) -> u16 { self.pc }
    pub fn get_sp(&self) -> u8 { self.sp }
    pub fn get_status(&self) -> u8 { self.flags.to_byte() }
    pub fn get_flags(&self) -> StatusFlags { self.flags }

    // Flag operations
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        self.flags.set(flag, value);
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        self.flags.get(flag)
    }

    fn update_zero_and_negative_flags(&mut self, value: u8) {
        self.flags.zero = value == 0;
        self.flags.negative = value & 0x80 != 0;
    }

    // Fetch primitives
    pub fn fetch_byte(&mut self, memory: &Memory) -> u8 {
        let value = memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    pub fn fetch_word(&mut self, memory: &Memory) -> Result<u16, AddressError> {
        let value = memory.read_u16(self.pc)?;
        self.pc = self.pc.wrapping_add(2);
        Ok(value)
    }

    fn resolve(&mut self, memory: &Memory, mode: AddressingMode) -> Result<Operand, AddressError> {
        use AddressingMode::*;

        let operand = match mode {
            Implicit => Operand::Implied,
            Accumulator => Operand::Accumulator,
            Immediate => Operand::Immediate(self.fetch_byte(memory)),
            Relative => Operand::Relative(self.fetch_byte(memory) as i8),
            ZeroPage => Operand::Address(self.zero_page_address(memory)),
            ZeroPageX => Operand::Address(self.zero_page_x_address(memory)),
            ZeroPageY => Operand::Address(self.zero_page_y_address(memory)),
            Absolute => Operand::Address(self.absolute_address(memory)?),
            AbsoluteX => Operand::Address(self.absolute_x_address(memory)?),
            AbsoluteY => Operand::Address(self.absolute_y_address(memory)?),
            Indirect => Operand::Address(self.indirect_address(memory)?),
            IndexedIndirect => Operand::Address(self.indexed_indirect_address(memory)),
            IndirectIndexed => Operand::Address(self.indirect_indexed_address(memory)),
        };
        Ok(operand)
    }

    // Addressing mode implementations
    fn zero_page_address(&mut self, memory: &Memory) -> u16 {
        self.fetch_byte(memory) as u16
    }

    fn zero_page_x_address(&mut self, memory: &Memory) -> u16 {
        self.fetch_byte(memory).wrapping_add(self.x) as u16
    }

    fn zero_page_y_address(&mut self, memory: &Memory) -> u16 {
        self.fetch_byte(memory).wrapping_add(self.y) as u16
    }

    fn absolute_address(&mut self, memory: &Memory) -> Result<u16, AddressError> {
        self.fetch_word(memory)
    }

    fn absolute_x_address(&mut self, memory: &Memory) -> Result<u16, AddressError> {
        Ok(self.fetch_word(memory)?.wrapping_add(self.x as u16))
    }

    fn absolute_y_address(&mut self, memory: &Memory) -> Result<u16, AddressError> {
        Ok(self.fetch_word(memory)?.wrapping_add(self.y as u16))
    }

    // ($zp,X): the pointer itself wraps within page zero
    fn indexed_indirect_address(&mut self, memory: &Memory) -> u16 {
        let ptr = self.fetch_byte(memory).wrapping_add(self.x);
        read_zero_page_pointer(memory, ptr)
    }

    // ($zp),Y: pointer wraps within page zero, the indexed result does not
    fn indirect_indexed_address(&mut self, memory: &Memory) -> u16 {
        let ptr = self.fetch_byte(memory);
        read_zero_page_pointer(memory, ptr).wrapping_add(self.y as u16)
    }

    fn indirect_address(&mut self, memory: &Memory) -> Result<u16, AddressError> {
        let ptr = self.fetch_word(memory)?;

        // 6502 bug: the high byte never crosses into the next page
        let low = memory.read(ptr) as u16;
        let high = memory.read((ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF)) as u16;
        Ok((high << 8) | low)
    }

    fn read_operand(&self, memory: &Memory, operand: Operand) -> u8 {
        match operand {
            Operand::Immediate(value) => value,
            Operand::Address(address) => memory.read(address),
            Operand::Accumulator => self.a,
            Operand::Implied | Operand::Relative(_) => {
                unreachable!("{:?} does not carry a data operand", operand)
            }
        }
    }

    fn write_operand(&mut self, memory: &mut Memory, operand: Operand, value: u8) {
        match operand {
            Operand::Address(address) => memory.write(address, value),
            Operand::Accumulator => self.a = value,
            Operand::Implied | Operand::Immediate(_) | Operand::Relative(_) => {
                unreachable!("{:?} is not writable", operand)
            }
        }
    }

    // Read-modify-write through the decoded operand, then N/Z from the result
    fn modify<F>(&mut self, memory: &mut Memory, operand: Operand, op: F)
    where
        F: FnOnce(&mut CPU, u8) -> u8,
    {
        let value = self.read_operand(memory, operand);
        let result = op(self, value);
        self.write_operand(memory, operand, result);
        self.update_zero_and_negative_flags(result);
    }

    // Arithmetic operations
    fn adc(&mut self, value: u8) {
        let carry = self.flags.carry as u16;
        let sum = self.a as u16 + value as u16 + carry;
        let result = sum as u8;

        self.flags.carry = sum > 0xFF;
        self.flags.overflow = (self.a ^ result) & (value ^ result) & 0x80 != 0;

        self.a = result;
        self.update_zero_and_negative_flags(self.a);
    }

    // A - M - (1 - C) == A + !M + C
    fn sbc(&mut self, value: u8) {
        self.adc(!value);
    }

    fn bit(&mut self, value: u8) {
        self.flags.zero = self.a & value == 0;
        self.flags.negative = value & 0x80 != 0;
        self.flags.overflow = value & 0x40 != 0;
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.flags.carry = register >= value;
        self.update_zero_and_negative_flags(result);
    }

    fn branch_if(&mut self, operand: Operand, condition: bool) {
        if let Operand::Relative(offset) = operand {
            if condition {
                self.pc = self.pc.wrapping_add(offset as i16 as u16);
            }
        }
    }

    fn jsr(&mut self, memory: &mut Memory, target: u16) {
        // Return address is the last byte of the JSR itself
        let return_addr = self.pc.wrapping_sub(1);
        self.push_u16(memory, return_addr);
        self.pc = target;
    }

    fn rts(&mut self, memory: &Memory) {
        self.pc = self.pop_u16(memory).wrapping_add(1);
    }

    fn rti(&mut self, memory: &Memory) {
        let status = self.pop(memory);
        self.flags = StatusFlags::from_byte(status);
        self.pc = self.pop_u16(memory);
    }

    fn brk(&mut self, memory: &mut Memory) {
        // Skip the padding byte so RTI resumes after it
        let return_addr = self.pc.wrapping_add(1);
        self.push_u16(memory, return_addr);

        self.flags.break_command = true;
        let status = self.get_status();
        self.push(memory, status);

        self.flags.interrupt_disable = true;
        self.pc = read_vector(memory, IRQ_BRK_VECTOR);
    }

    // Stack operations
    pub fn push(&mut self, memory: &mut Memory, value: u8) {
        memory.write(STACK_BASE + self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub fn pop(&mut self, memory: &Memory) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        memory.read(STACK_BASE + self.sp as u16)
    }

    fn push_u16(&mut self, memory: &mut Memory, value: u16) {
        self.push(memory, (value >> 8) as u8);
        self.push(memory, (value & 0xFF) as u8);
    }

    fn pop_u16(&mut self, memory: &Memory) -> u16 {
        let low = self.pop(memory) as u16;
        let high = self.pop(memory) as u16;
        (high << 8) | low
    }
}

impl Default for CPU {
    fn default() -> Self {
        Self::new()
    }
}

fn operand_address(operand: Operand) -> u16 {
    match operand {
        Operand::Address(address) => address,
        other => unreachable!("{:?} is not an address operand", other),
    }
}

// Vectors sit below $FFFF, so they are composed bytewise
fn read_vector(memory: &Memory, vector: u16) -> u16 {
    let low = memory.read(vector) as u16;
    let high = memory.read(vector + 1) as u16;
    (high << 8) | low
}

fn read_zero_page_pointer(memory: &Memory, ptr: u8) -> u16 {
    let low = memory.read(ptr as u16) as u16;
    let high = memory.read(ptr.wrapping_add(1) as u16) as u16;
    (high << 8) | low
}

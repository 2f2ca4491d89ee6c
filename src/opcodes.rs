//! Opcode decoding.
//!
//! Every documented NMOS 6502 opcode maps to exactly one [`Instruction`]:
//! a mnemonic paired with the addressing mode that selects its operand.
//! The mapping is built once into [`OPCODE_TABLE`]; undocumented opcodes
//! decode to `None`.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
}

impl Mnemonic {
    pub fn name(self) -> &'static str {
        use Mnemonic::*;
        match self {
            Adc => "ADC", And => "AND", Asl => "ASL", Bcc => "BCC", Bcs => "BCS",
            Beq => "BEQ", Bit => "BIT", Bmi => "BMI", Bne => "BNE", Bpl => "BPL",
            Brk => "BRK", Bvc => "BVC", Bvs => "BVS", Clc => "CLC", Cld => "CLD",
            Cli => "CLI", Clv => "CLV", Cmp => "CMP", Cpx => "CPX", Cpy => "CPY",
            Dec => "DEC", Dex => "DEX", Dey => "DEY", Eor => "EOR", Inc => "INC",
            Inx => "INX", Iny => "INY", Jmp => "JMP", Jsr => "JSR", Lda => "LDA",
            Ldx => "LDX", Ldy => "LDY", Lsr => "LSR", Nop => "NOP", Ora => "ORA",
            Pha => "PHA", Php => "PHP", Pla => "PLA", Plp => "PLP", Rol => "ROL",
            Ror => "ROR", Rti => "RTI", Rts => "RTS", Sbc => "SBC", Sec => "SEC",
            Sed => "SED", Sei => "SEI", Sta => "STA", Stx => "STX", Sty => "STY",
            Tax => "TAX", Tay => "TAY", Tsx => "TSX", Txa => "TXA", Txs => "TXS",
            Tya => "TYA",
        }
    }

    /// Conditional branches, all of which use relative addressing.
    pub fn is_branch(self) -> bool {
        use Mnemonic::*;
        matches!(self, Bcc | Bcs | Beq | Bne | Bmi | Bpl | Bvc | Bvs)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AddressingMode {
    Implicit,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
}

impl AddressingMode {
    /// Operand bytes that follow the opcode.
    pub fn operand_bytes(self) -> u16 {
        use AddressingMode::*;
        match self {
            Implicit | Accumulator => 0,
            Immediate | ZeroPage | ZeroPageX | ZeroPageY | Relative | IndexedIndirect
            | IndirectIndexed => 1,
            Absolute | AbsoluteX | AbsoluteY | Indirect => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
}

impl Instruction {
    const fn new(mnemonic: Mnemonic, mode: AddressingMode) -> Self {
        Instruction { mnemonic, mode }
    }

    /// Total encoded length, opcode included.
    pub fn size(self) -> u16 {
        1 + self.mode.operand_bytes()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.mnemonic, self.mode)
    }
}

/// Decode table indexed by opcode byte.
pub static OPCODE_TABLE: [Option<Instruction>; 256] = build_table();

pub fn decode(opcode: u8) -> Option<Instruction> {
    OPCODE_TABLE[opcode as usize]
}

const fn build_table() -> [Option<Instruction>; 256] {
    let mut table = [None; 256];
    let mut opcode = 0;
    while opcode < 256 {
        table[opcode] = lookup(opcode as u8);
        opcode += 1;
    }
    table
}

const fn lookup(opcode: u8) -> Option<Instruction> {
    use AddressingMode::*;
    use Mnemonic::*;

    let (mnemonic, mode) = match opcode {
        // Load instructions
        0xA9 => (Lda, Immediate),
        0xA5 => (Lda, ZeroPage),
        0xB5 => (Lda, ZeroPageX),
        0xAD => (Lda, Absolute),
        0xBD => (Lda, AbsoluteX),
        0xB9 => (Lda, AbsoluteY),
        0xA1 => (Lda, IndexedIndirect),
        0xB1 => (Lda, IndirectIndexed),
        0xA2 => (Ldx, Immediate),
        0xA6 => (Ldx, ZeroPage),
        0xB6 => (Ldx, ZeroPageY),
        0xAE => (Ldx, Absolute),
        0xBE => (Ldx, AbsoluteY),
        0xA0 => (Ldy, Immediate),
        0xA4 => (Ldy, ZeroPage),
        0xB4 => (Ldy, ZeroPageX),
        0xAC => (Ldy, Absolute),
        0xBC => (Ldy, AbsoluteX),

        // Store instructions
        0x85 => (Sta, ZeroPage),
        0x95 => (Sta, ZeroPageX),
        0x8D => (Sta, Absolute),
        0x9D => (Sta, AbsoluteX),
        0x99 => (Sta, AbsoluteY),
        0x81 => (Sta, IndexedIndirect),
        0x91 => (Sta, IndirectIndexed),
        0x86 => (Stx, ZeroPage),
        0x96 => (Stx, ZeroPageY),
        0x8E => (Stx, Absolute),
        0x84 => (Sty, ZeroPage),
        0x94 => (Sty, ZeroPageX),
        0x8C => (Sty, Absolute),

        // Arithmetic
        0x69 => (Adc, Immediate),
        0x65 => (Adc, ZeroPage),
        0x75 => (Adc, ZeroPageX),
        0x6D => (Adc, Absolute),
        0x7D => (Adc, AbsoluteX),
        0x79 => (Adc, AbsoluteY),
        0x61 => (Adc, IndexedIndirect),
        0x71 => (Adc, IndirectIndexed),
        0xE9 => (Sbc, Immediate),
        0xE5 => (Sbc, ZeroPage),
        0xF5 => (Sbc, ZeroPageX),
        0xED => (Sbc, Absolute),
        0xFD => (Sbc, AbsoluteX),
        0xF9 => (Sbc, AbsoluteY),
        0xE1 => (Sbc, IndexedIndirect),
        0xF1 => (Sbc, IndirectIndexed),

        // Compare
        0xC9 => (Cmp, Immediate),
        0xC5 => (Cmp, ZeroPage),
        0xD5 => (Cmp, ZeroPageX),
        0xCD => (Cmp, Absolute),
        0xDD => (Cmp, AbsoluteX),
        0xD9 => (Cmp, AbsoluteY),
        0xC1 => (Cmp, IndexedIndirect),
        0xD1 => (Cmp, IndirectIndexed),
        0xE0 => (Cpx, Immediate),
        0xE4 => (Cpx, ZeroPage),
        0xEC => (Cpx, Absolute),
        0xC0 => (Cpy, Immediate),
        0xC4 => (Cpy, ZeroPage),
        0xCC => (Cpy, Absolute),

        // Logical
        0x29 => (And, Immediate),
        0x25 => (And, ZeroPage),
        0x35 => (And, ZeroPageX),
        0x2D => (And, Absolute),
        0x3D => (And, AbsoluteX),
        0x39 => (And, AbsoluteY),
        0x21 => (And, IndexedIndirect),
        0x31 => (And, IndirectIndexed),
        0x09 => (Ora, Immediate),
        0x05 => (Ora, ZeroPage),
        0x15 => (Ora, ZeroPageX),
        0x0D => (Ora, Absolute),
        0x1D => (Ora, AbsoluteX),
        0x19 => (Ora, AbsoluteY),
        0x01 => (Ora, IndexedIndirect),
        0x11 => (Ora, IndirectIndexed),
        0x49 => (Eor, Immediate),
        0x45 => (Eor, ZeroPage),
        0x55 => (Eor, ZeroPageX),
        0x4D => (Eor, Absolute),
        0x5D => (Eor, AbsoluteX),
        0x59 => (Eor, AbsoluteY),
        0x41 => (Eor, IndexedIndirect),
        0x51 => (Eor, IndirectIndexed),
        0x24 => (Bit, ZeroPage),
        0x2C => (Bit, Absolute),

        // Shifts and rotates
        0x0A => (Asl, Accumulator),
        0x06 => (Asl, ZeroPage),
        0x16 => (Asl, ZeroPageX),
        0x0E => (Asl, Absolute),
        0x1E => (Asl, AbsoluteX),
        0x4A => (Lsr, Accumulator),
        0x46 => (Lsr, ZeroPage),
        0x56 => (Lsr, ZeroPageX),
        0x4E => (Lsr, Absolute),
        0x5E => (Lsr, AbsoluteX),
        0x2A => (Rol, Accumulator),
        0x26 => (Rol, ZeroPage),
        0x36 => (Rol, ZeroPageX),
        0x2E => (Rol, Absolute),
        0x3E => (Rol, AbsoluteX),
        0x6A => (Ror, Accumulator),
        0x66 => (Ror, ZeroPage),
        0x76 => (Ror, ZeroPageX),
        0x6E => (Ror, Absolute),
        0x7E => (Ror, AbsoluteX),

        // Increment/Decrement
        0xE6 => (Inc, ZeroPage),
        0xF6 => (Inc, ZeroPageX),
        0xEE => (Inc, Absolute),
        0xFE => (Inc, AbsoluteX),
        0xC6 => (Dec, ZeroPage),
        0xD6 => (Dec, ZeroPageX),
        0xCE => (Dec, Absolute),
        0xDE => (Dec, AbsoluteX),
        0xE8 => (Inx, Implicit),
        0xC8 => (Iny, Implicit),
        0xCA => (Dex, Implicit),
        0x88 => (Dey, Implicit),

        // Transfer
        0xAA => (Tax, Implicit),
        0xA8 => (Tay, Implicit),
        0x8A => (Txa, Implicit),
        0x98 => (Tya, Implicit),
        0xBA => (Tsx, Implicit),
        0x9A => (Txs, Implicit),

        // Stack
        0x48 => (Pha, Implicit),
        0x68 => (Pla, Implicit),
        0x08 => (Php, Implicit),
        0x28 => (Plp, Implicit),

        // Jump/Call
        0x4C => (Jmp, Absolute),
        0x6C => (Jmp, Indirect),
        0x20 => (Jsr, Absolute),
        0x60 => (Rts, Implicit),
        0x40 => (Rti, Implicit),
        0x00 => (Brk, Implicit),

        // Flag manipulation
        0x18 => (Clc, Implicit),
        0x38 => (Sec, Implicit),
        0x58 => (Cli, Implicit),
        0x78 => (Sei, Implicit),
        0xD8 => (Cld, Implicit),
        0xF8 => (Sed, Implicit),
        0xB8 => (Clv, Implicit),

        // Branch
        0x90 => (Bcc, Relative),
        0xB0 => (Bcs, Relative),
        0xF0 => (Beq, Relative),
        0xD0 => (Bne, Relative),
        0x30 => (Bmi, Relative),
        0x10 => (Bpl, Relative),
        0x50 => (Bvc, Relative),
        0x70 => (Bvs, Relative),

        0xEA => (Nop, Implicit),

        _ => return None,
    };
    Some(Instruction::new(mnemonic, mode))
}

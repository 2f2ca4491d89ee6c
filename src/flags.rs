use serde::{Deserialize, Serialize};

// Status register flags
pub const CARRY_FLAG: u8 = 0x01;
pub const ZERO_FLAG: u8 = 0x02;
pub const INTERRUPT_DISABLE: u8 = 0x04;
pub const DECIMAL_MODE: u8 = 0x08;
pub const BREAK_COMMAND: u8 = 0x10;
pub const UNUSED_FLAG: u8 = 0x20;
pub const OVERFLOW_FLAG: u8 = 0x40;
pub const NEGATIVE_FLAG: u8 = 0x80;

/// The seven processor status flags, held as independent booleans.
///
/// The packed byte form only exists where the hardware exposes it
/// (PHP, PLP, BRK, RTI); see [`StatusFlags::to_byte`] and
/// [`StatusFlags::from_byte`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    pub negative: bool,
    pub overflow: bool,
    pub break_command: bool,
    pub decimal_mode: bool,
    pub interrupt_disable: bool,
    pub zero: bool,
    pub carry: bool,
}

impl StatusFlags {
    /// Packs the flags as `NV1BDIZC`. Bit 5 always reads as 1.
    pub fn to_byte(self) -> u8 {
        let mut status = UNUSED_FLAG;
        for (mask, set) in self.bits() {
            if set {
                status |= mask;
            }
        }
        status
    }

    /// Unpacks all seven flags from a status byte. Bit 5 is ignored.
    pub fn from_byte(status: u8) -> Self {
        StatusFlags {
            negative: status & NEGATIVE_FLAG != 0,
            overflow: status & OVERFLOW_FLAG != 0,
            break_command: status & BREAK_COMMAND != 0,
            decimal_mode: status & DECIMAL_MODE != 0,
            interrupt_disable: status & INTERRUPT_DISABLE != 0,
            zero: status & ZERO_FLAG != 0,
            carry: status & CARRY_FLAG != 0,
        }
    }

    /// Reads one flag by its status-byte mask. Unknown masks read as clear.
    pub fn get(&self, flag: u8) -> bool {
        match flag {
            CARRY_FLAG => self.carry,
            ZERO_FLAG => self.zero,
            INTERRUPT_DISABLE => self.interrupt_disable,
            DECIMAL_MODE => self.decimal_mode,
            BREAK_COMMAND => self.break_command,
            UNUSED_FLAG => true,
            OVERFLOW_FLAG => self.overflow,
            NEGATIVE_FLAG => self.negative,
            _ => false,
        }
    }

    /// Sets one flag by its status-byte mask. Writes to bit 5 or
    /// multi-bit masks are ignored.
    pub fn set(&mut self, flag: u8, value: bool) {
        match flag {
            CARRY_FLAG => self.carry = value,
            ZERO_FLAG => self.zero = value,
            INTERRUPT_DISABLE => self.interrupt_disable = value,
            DECIMAL_MODE => self.decimal_mode = value,
            BREAK_COMMAND => self.break_command = value,
            OVERFLOW_FLAG => self.overflow = value,
            NEGATIVE_FLAG => self.negative = value,
            _ => {}
        }
    }

    /// `(mask, state)` for every real flag, in bit order.
    pub fn bits(&self) -> [(u8, bool); 7] {
        [
            (CARRY_FLAG, self.carry),
            (ZERO_FLAG, self.zero),
            (INTERRUPT_DISABLE, self.interrupt_disable),
            (DECIMAL_MODE, self.decimal_mode),
            (BREAK_COMMAND, self.break_command),
            (OVERFLOW_FLAG, self.overflow),
            (NEGATIVE_FLAG, self.negative),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_layout() {
        let flags = StatusFlags {
            carry: true,
            negative: true,
            ..StatusFlags::default()
        };
        assert_eq!(flags.to_byte(), 0b1010_0001);

        let flags = StatusFlags {
            zero: true,
            interrupt_disable: true,
            decimal_mode: true,
            break_command: true,
            overflow: true,
            ..StatusFlags::default()
        };
        assert_eq!(flags.to_byte(), 0b0111_1110);
    }

    #[test]
    fn test_unpack_ignores_bit_five() {
        assert_eq!(StatusFlags::from_byte(UNUSED_FLAG), StatusFlags::default());
        let flags = StatusFlags::from_byte(0xFF);
        assert_eq!(flags.to_byte(), 0xFF);
        assert!(flags.break_command);
    }

    #[test]
    fn test_mask_accessors() {
        let mut flags = StatusFlags::default();
        flags.set(OVERFLOW_FLAG, true);
        assert!(flags.overflow);
        assert!(flags.get(OVERFLOW_FLAG));
        flags.set(UNUSED_FLAG, false);
        assert!(flags.get(UNUSED_FLAG));
        flags.set(CARRY_FLAG | ZERO_FLAG, true);
        assert!(!flags.carry && !flags.zero);
    }
}

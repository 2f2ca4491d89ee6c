use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{AddressError, LoadError};

/// Size of the flat 6502 address space.
pub const MEMORY_SIZE: usize = 0x1_0000;

/// Flat 64KB address space. Every byte address is legal; word accesses
/// that would need a byte past `$FFFF` are rejected.
#[derive(Clone)]
pub struct Memory {
    data: Box<[u8]>, // 64KB memory space
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            data: vec![0; MEMORY_SIZE].into_boxed_slice(),
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        self.data[address as usize]
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.data[address as usize] = value;
    }

    // Read a 16-bit value in little-endian format
    pub fn read_u16(&self, address: u16) -> Result<u16, AddressError> {
        let high_address = address
            .checked_add(1)
            .ok_or(AddressError::OutOfRange { address })?;
        let low = self.read(address) as u16;
        let high = self.read(high_address) as u16;
        Ok((high << 8) | low)
    }

    // Write a 16-bit value in little-endian format
    pub fn write_u16(&mut self, address: u16, value: u16) -> Result<(), AddressError> {
        let high_address = address
            .checked_add(1)
            .ok_or(AddressError::OutOfRange { address })?;
        self.write(address, (value & 0xFF) as u8);
        self.write(high_address, (value >> 8) as u8);
        Ok(())
    }

    /// Copies `image` verbatim to `$0000` upward.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), LoadError> {
        self.load_at(0x0000, image)
    }

    /// Copies `bytes` starting at `start`. Nothing is written unless the
    /// whole slice fits below the end of the address space.
    pub fn load_at(&mut self, start: u16, bytes: &[u8]) -> Result<(), LoadError> {
        let start = start as usize;
        let limit = MEMORY_SIZE - start;
        if bytes.len() > limit {
            return Err(LoadError::ImageTooLarge {
                size: bytes.len(),
                limit,
            });
        }
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Loads a raw binary image from disk into `$0000` upward and returns its length.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, LoadError> {
        let path = path.as_ref();
        let unreadable = |source| LoadError::ImageUnreadable {
            path: path.to_path_buf(),
            source,
        };

        let size = fs::metadata(path).map_err(unreadable)?.len();
        if size > MEMORY_SIZE as u64 {
            return Err(LoadError::ImageTooLarge {
                size: usize::try_from(size).unwrap_or(usize::MAX),
                limit: MEMORY_SIZE,
            });
        }

        let image = fs::read(path).map_err(unreadable)?;
        self.load_image(&image)?;
        debug!("loaded {} bytes from {}", image.len(), path.display());
        Ok(image.len())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_access_is_little_endian() {
        let mut memory = Memory::new();
        memory.write_u16(0x1234, 0xBEEF).unwrap();
        assert_eq!(memory.read(0x1234), 0xEF);
        assert_eq!(memory.read(0x1235), 0xBE);
        assert_eq!(memory.read_u16(0x1234).unwrap(), 0xBEEF);
    }

    #[test]
    fn test_word_access_at_top_of_memory_fails() {
        let mut memory = Memory::new();
        memory.write(0xFFFF, 0x12);
        memory.write(0x0000, 0x34);

        assert_eq!(
            memory.read_u16(0xFFFF),
            Err(AddressError::OutOfRange { address: 0xFFFF })
        );
        assert!(memory.write_u16(0xFFFF, 0xAAAA).is_err());
        assert_eq!(memory.read(0xFFFF), 0x12);
        assert_eq!(memory.read(0x0000), 0x34);

        // The last legal word straddles $FFFE/$FFFF
        memory.write_u16(0xFFFE, 0x5678).unwrap();
        assert_eq!(memory.read_u16(0xFFFE).unwrap(), 0x5678);
    }

    #[test]
    fn test_full_size_image_loads() {
        let mut memory = Memory::new();
        let image: Vec<u8> = (0..MEMORY_SIZE).map(|i| (i % 251) as u8).collect();
        memory.load_image(&image).unwrap();
        assert_eq!(memory.as_slice(), &image[..]);
    }

    #[test]
    fn test_oversized_image_leaves_memory_untouched() {
        let mut memory = Memory::new();
        memory.write(0x0000, 0x77);
        memory.write(0xFFFF, 0x88);

        let image = vec![0xEA; MEMORY_SIZE + 1];
        match memory.load_image(&image) {
            Err(LoadError::ImageTooLarge { size, limit }) => {
                assert_eq!(size, MEMORY_SIZE + 1);
                assert_eq!(limit, MEMORY_SIZE);
            }
            other => panic!("expected ImageTooLarge, got {:?}", other),
        }
        assert_eq!(memory.read(0x0000), 0x77);
        assert_eq!(memory.read(0xFFFF), 0x88);
    }

    #[test]
    fn test_load_at_rejects_overflow_past_end() {
        let mut memory = Memory::new();
        assert!(memory.load_at(0xFFFE, &[1, 2]).is_ok());
        assert!(memory.load_at(0xFFFE, &[1, 2, 3]).is_err());
        assert_eq!(memory.read(0xFFFE), 1);
        assert_eq!(memory.read(0xFFFF), 2);
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let mut memory = Memory::new();
        let result = memory.load_file("/definitely/not/here/image.bin");
        assert!(matches!(result, Err(LoadError::ImageUnreadable { .. })));
    }
}

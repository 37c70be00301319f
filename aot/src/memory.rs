// memory.rs - Read-only memory sources
//
// The translator only ever reads code and operand bytes. Anything that can
// answer "which byte lives at this 16-bit address" can back it.

/// A read-only, byte addressable 16-bit address space.
pub trait Memory {
    /// Read one byte. Addresses the source does not cover read as 0.
    fn read_word(&self, addr: u16) -> u8;

    /// Does this source actually back `addr`?
    fn contains(&self, _addr: u16) -> bool {
        true
    }

    /// Read a little-endian address. The high byte address wraps at 0xFFFF.
    fn read_addr(&self, addr: u16) -> u16 {
        let lo = self.read_word(addr) as u16;
        let hi = self.read_word(addr.wrapping_add(1)) as u16;
        lo | (hi << 8)
    }

    fn reset_vector(&self) -> u16 {
        self.read_addr(0xFFFC)
    }
}

impl<M: Memory + ?Sized> Memory for &M {
    fn read_word(&self, addr: u16) -> u8 {
        (**self).read_word(addr)
    }

    fn contains(&self, addr: u16) -> bool {
        (**self).contains(addr)
    }
}

/// A flat image of bytes mapped at `base`
#[derive(Debug, Clone)]
pub struct Image {
    /// Address of the first byte
    pub base: u16,
    /// Image contents
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(base: u16, data: Vec<u8>) -> Self {
        Self { base, data }
    }

    /// Offset of `addr` into the image, if mapped
    fn offset(&self, addr: u16) -> Option<usize> {
        let offset = addr.checked_sub(self.base)? as usize;
        (offset < self.data.len()).then_some(offset)
    }
}

impl Memory for Image {
    fn read_word(&self, addr: u16) -> u8 {
        self.offset(addr).map(|o| self.data[o]).unwrap_or(0)
    }

    fn contains(&self, addr: u16) -> bool {
        self.offset(addr).is_some()
    }
}

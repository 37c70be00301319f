// rom.rs - iNES cartridge parsing
//
// Validates the header and maps PRG ROM so that it ends at 0xFFFF, which is
// where the CPU finds its interrupt vectors. Bank switched carts are not
// supported; only what fits in the 32K window at 0x8000 is translated.

use crate::error::RomError;
use crate::memory::{Image, Memory};

const MAGIC: &[u8; 4] = b"NES\x1a";
const HEADER_LEN: usize = 16;
const TRAINER_LEN: usize = 512;
const PRG_BANK: usize = 16 * 1024;
const CHR_BANK: usize = 8 * 1024;
const PRG_WINDOW: usize = 32 * 1024;

/// Nametable mirroring wired on the cartridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
}

/// Decoded iNES header
#[derive(Debug, Clone)]
pub struct Header {
    pub prg_rom_size: usize,
    pub chr_rom_size: usize,
    pub mapper: u8,
    pub mirroring: Mirroring,
    pub battery: bool,
    pub trainer: bool,
}

/// A loaded cartridge
#[derive(Debug, Clone)]
pub struct Rom {
    pub header: Header,
    /// PRG ROM mapped at the top of the address space
    pub prg: Image,
}

impl Rom {
    /// First address backed by PRG ROM
    pub fn prg_offset(&self) -> u16 {
        self.prg.base
    }
}

impl Memory for Rom {
    fn read_word(&self, addr: u16) -> u8 {
        self.prg.read_word(addr)
    }

    fn contains(&self, addr: u16) -> bool {
        self.prg.contains(addr)
    }
}

/// Parse an iNES image
pub fn parse(data: &[u8]) -> Result<Rom, RomError> {
    if data.len() < HEADER_LEN {
        return Err(RomError::Truncated {
            needed: HEADER_LEN,
            actual: data.len(),
        });
    }
    if &data[0..4] != MAGIC {
        return Err(RomError::BadMagic);
    }

    let flags6 = data[6];
    let flags7 = data[7];
    let header = Header {
        prg_rom_size: data[4] as usize * PRG_BANK,
        chr_rom_size: data[5] as usize * CHR_BANK,
        mapper: (flags7 & 0xF0) | (flags6 >> 4),
        mirroring: if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        },
        battery: flags6 & 0x02 != 0,
        trainer: flags6 & 0x04 != 0,
    };

    if header.prg_rom_size == 0 {
        return Err(RomError::NoPrgRom);
    }
    if header.prg_rom_size > PRG_WINDOW {
        return Err(RomError::PrgTooLarge {
            size: header.prg_rom_size,
        });
    }

    let start = HEADER_LEN + if header.trainer { TRAINER_LEN } else { 0 };
    let end = start + header.prg_rom_size;
    if end > data.len() {
        return Err(RomError::Truncated {
            needed: end,
            actual: data.len(),
        });
    }

    let base = (0x10000 - header.prg_rom_size) as u16;
    Ok(Rom {
        prg: Image::new(base, data[start..end].to_vec()),
        header,
    })
}

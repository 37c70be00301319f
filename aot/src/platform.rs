// platform.rs - Platform memory models
//
// The code generator never decides what an address means. It asks the
// platform to load or store, either at an address known at translation time
// or at one computed from registers.

use crate::ir::{Builder, Module, Type, ValueId};
use std::fmt;
use std::str::FromStr;

const RAM: &str = "ram";

/// How loads and stores reach memory
pub trait Platform {
    /// One-time module setup: globals and external accessors
    fn declare(&self, module: &mut Module);

    fn load(&self, b: &mut Builder<'_>, addr: u16) -> ValueId;

    /// `addr` is an i16 value
    fn load_computed(&self, b: &mut Builder<'_>, addr: ValueId) -> ValueId;

    fn store(&self, b: &mut Builder<'_>, addr: u16, value: ValueId);

    fn store_computed(&self, b: &mut Builder<'_>, addr: ValueId, value: ValueId);
}

/// The whole 64K address space is plain RAM
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatPlatform;

impl Platform for FlatPlatform {
    fn declare(&self, module: &mut Module) {
        module.add_global(RAM, Type::I8, 0x10000);
    }

    fn load(&self, b: &mut Builder<'_>, addr: u16) -> ValueId {
        let index = b.addr(addr);
        self.load_computed(b, index)
    }

    fn load_computed(&self, b: &mut Builder<'_>, addr: ValueId) -> ValueId {
        b.load(RAM, Type::I8, addr)
    }

    fn store(&self, b: &mut Builder<'_>, addr: u16, value: ValueId) {
        let index = b.addr(addr);
        self.store_computed(b, index, value)
    }

    fn store_computed(&self, b: &mut Builder<'_>, addr: ValueId, value: ValueId) {
        b.store(RAM, addr, value)
    }
}

/// NES CPU memory map. Every access, CPU RAM included, goes through the
/// host's `nes_read` and `nes_write`, so constant and computed addresses
/// always reach the same store. Constant RAM addresses are folded onto the
/// canonical 2K mirror.
#[derive(Debug, Clone, Copy, Default)]
pub struct NesPlatform;

impl NesPlatform {
    pub const RAM_SIZE: u16 = 0x800;
    pub const RAM_END: u16 = 0x2000;
    pub const READ: &'static str = "nes_read";
    pub const WRITE: &'static str = "nes_write";

    /// Canonical address of `addr` (RAM mirrors collapse onto 0x0000-0x07FF)
    pub fn canonical(addr: u16) -> u16 {
        if addr < Self::RAM_END {
            addr & (Self::RAM_SIZE - 1)
        } else {
            addr
        }
    }
}

impl Platform for NesPlatform {
    fn declare(&self, module: &mut Module) {
        module.declare_extern(Self::READ, &[Type::I16], Type::I8);
        module.declare_extern(Self::WRITE, &[Type::I16, Type::I8], Type::Void);
    }

    fn load(&self, b: &mut Builder<'_>, addr: u16) -> ValueId {
        let addr = b.addr(Self::canonical(addr));
        self.load_computed(b, addr)
    }

    fn load_computed(&self, b: &mut Builder<'_>, addr: ValueId) -> ValueId {
        b.call(Self::READ, Type::I8, &[addr])
    }

    fn store(&self, b: &mut Builder<'_>, addr: u16, value: ValueId) {
        let addr = b.addr(Self::canonical(addr));
        self.store_computed(b, addr, value)
    }

    fn store_computed(&self, b: &mut Builder<'_>, addr: ValueId, value: ValueId) {
        b.call(Self::WRITE, Type::Void, &[addr, value]);
    }
}

/// Selectable platform models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlatformKind {
    Flat,
    #[default]
    Nes,
}

impl PlatformKind {
    pub fn build(self) -> Box<dyn Platform> {
        match self {
            PlatformKind::Flat => Box::new(FlatPlatform),
            PlatformKind::Nes => Box::new(NesPlatform),
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Flat => f.write_str("flat"),
            PlatformKind::Nes => f.write_str("nes"),
        }
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(PlatformKind::Flat),
            "nes" => Ok(PlatformKind::Nes),
            other => Err(format!("unknown platform '{}' (expected flat or nes)", other)),
        }
    }
}

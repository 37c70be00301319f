// rec6502 - 6502 static recompiler
//
// This library translates 6502 machine code (NES cartridges in particular)
// ahead of time into a typed SSA IR, one function per reachable subroutine.
// Nothing is interpreted: every instruction is lowered once.
//
// # Architecture
//
// The translator works in several phases:
//
// 1. **ROM Parsing** (`rom.rs`): Validate the iNES header, map PRG ROM below 0xFFFF
// 2. **Disassembly** (`disasm.rs`): Decode opcodes and addressing modes
// 3. **Control Flow** (`cfg.rs`): Find functions, block boundaries and the call graph
// 4. **Translation** (`translate.rs`): Lower each function into IR, threading the
//    register state (`state.rs`) through phis at every block
// 5. **IR** (`ir.rs`): Module, builder with constant folding, printer, verifier
//
// # Register Model
//
// Translated functions take A, X, Y and the N, V, Z, C flags as parameters
// and return them as one `%regs` aggregate. The stack pointer, decimal mode
// and interrupt mask are not modeled.
//
// # Memory Model
//
// Loads and stores go through a `Platform` (`platform.rs`). The flat model
// treats all 64K as RAM; the NES model hands every address, CPU RAM
// included, to the host through `nes_read`/`nes_write`.

pub mod cfg;
pub mod disasm;
pub mod error;
pub mod ir;
pub mod memory;
pub mod platform;
pub mod rom;
pub mod state;
pub mod translate;

pub use cfg::{find_reachable_functions, identify_blocks, identify_function, listing};
pub use disasm::{
    decode, Argument, DecodeConfig, Decoder, Instruction, Kind, Mnemonic, OutOfRangePolicy,
    UnsupportedOpcodePolicy,
};
pub use error::{DecodeError, RomError, TranslateError};
pub use ir::{Function, Module};
pub use memory::{Image, Memory};
pub use platform::{FlatPlatform, NesPlatform, Platform, PlatformKind};
pub use rom::Rom;
pub use state::{Register, RegisterState};
pub use translate::{translate, translate_function};

use anyhow::Context;

/// Recompilation settings
#[derive(Debug, Clone)]
pub struct Options {
    /// Program entry; the reset vector when unset
    pub entry: Option<u16>,
    pub platform: PlatformKind,
    pub decode: DecodeConfig,
    pub module_name: String,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            entry: None,
            platform: PlatformKind::default(),
            decode: DecodeConfig::default(),
            module_name: "rom".to_string(),
        }
    }
}

/// Recompile an iNES image into an IR module
pub fn recompile(rom_data: &[u8], options: &Options) -> anyhow::Result<Module> {
    let rom = rom::parse(rom_data).context("Failed to parse iNES image")?;
    let entry = options.entry.unwrap_or_else(|| rom.reset_vector());

    let decoder = Decoder::with_config(&rom, options.decode);
    let platform = options.platform.build();
    let module = translate(&decoder, platform.as_ref(), entry, &options.module_name)
        .with_context(|| format!("Failed to translate from entry 0x{:04X}", entry))?;

    Ok(module)
}

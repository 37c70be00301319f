// error.rs - Error types
//
// Decode failures are user facing (they depend on the ROM). Translation
// failures are broken invariants in the translator itself.

use thiserror::Error;

/// Errors raised while decoding instructions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unsupported opcode 0x{opcode:02X} at 0x{addr:04X}")]
    UnsupportedOpcode { addr: u16, opcode: u8 },

    #[error("Instruction at 0x{addr:04X} reads unmapped byte 0x{byte_addr:04X}")]
    OutOfRange { addr: u16, byte_addr: u16 },
}

/// Broken invariants found while assembling or verifying a function.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("No block starts at 0x{target:04X} (edge from 0x{from:04X})")]
    MissingBlock { from: u16, target: u16 },

    #[error("Fallthrough from 0x{addr:04X} leaves function f_{entry:04X}")]
    LeavesFunction { entry: u16, addr: u16 },

    #[error("Instruction at 0x{addr:04X} runs over the block starting at 0x{boundary:04X}")]
    OverlappingInstruction { addr: u16, boundary: u16 },

    #[error("Instruction at 0x{addr:04X} has no usable operand")]
    InvalidOperand { addr: u16 },

    #[error("{function}: block {block} has no terminator")]
    Unterminated { function: String, block: String },

    #[error("{function}: phi {value} in block {block} has {incoming} incoming values for {edges} predecessor edges")]
    PhiArity {
        function: String,
        block: String,
        value: String,
        incoming: usize,
        edges: usize,
    },

    #[error("{function}: phi {value} in block {block} does not match its predecessor edges")]
    PhiPredecessors {
        function: String,
        block: String,
        value: String,
    },

    #[error("{function}: reference to undeclared symbol @{symbol}")]
    UndeclaredSymbol { function: String, symbol: String },
}

/// Errors raised while reading an iNES container.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RomError {
    #[error("Not an iNES image (bad magic)")]
    BadMagic,

    #[error("Image truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("PRG ROM of {size} bytes needs bank switching (max 32768)")]
    PrgTooLarge { size: usize },

    #[error("Image has no PRG ROM")]
    NoPrgRom,
}

pub type TranslateResult<T> = Result<T, TranslateError>;

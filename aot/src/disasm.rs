// disasm.rs - 6502 disassembler
//
// Decodes one instruction at a time out of a read-only memory source. Operand
// bytes are resolved into an addressing mode up front; anything that depends
// on a register is left for the code generator.

use crate::error::DecodeError;
use crate::memory::Memory;
use crate::state::Register;
use log::warn;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;

/// Decoded operand, one variant per supported addressing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argument {
    /// `$1234`
    Absolute(u16),
    /// `$1234,X`
    AbsoluteX(u16),
    /// `$1234,Y`
    AbsoluteY(u16),
    /// `#$12`
    Immediate(u8),
    /// `($12),Y`
    IndirectY(u8),
    /// Signed offset from the following instruction
    Relative(i8),
    /// `$12`
    ZeroPage(u8),
}

impl Argument {
    pub fn encoded_length(&self) -> u16 {
        match self {
            Argument::Absolute(_) | Argument::AbsoluteX(_) | Argument::AbsoluteY(_) => 2,
            Argument::Immediate(_)
            | Argument::IndirectY(_)
            | Argument::Relative(_)
            | Argument::ZeroPage(_) => 1,
        }
    }

    /// Address known at decode time. `following` is the address of the next
    /// instruction, which relative offsets count from.
    pub fn static_address(&self, following: u16) -> Option<u16> {
        match *self {
            Argument::Absolute(addr) => Some(addr),
            Argument::ZeroPage(addr) => Some(addr as u16),
            Argument::Relative(offset) => Some(following.wrapping_add(offset as i16 as u16)),
            _ => None,
        }
    }

    /// Value known at decode time
    pub fn static_value(&self) -> Option<u8> {
        match *self {
            Argument::Immediate(value) => Some(value),
            _ => None,
        }
    }

    /// Is the effective address a constant?
    pub fn is_absolute(&self) -> bool {
        matches!(self, Argument::Absolute(_) | Argument::ZeroPage(_))
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Argument::Absolute(addr) => write!(f, "${:04X}", addr),
            Argument::AbsoluteX(addr) => write!(f, "${:04X},X", addr),
            Argument::AbsoluteY(addr) => write!(f, "${:04X},Y", addr),
            Argument::Immediate(value) => write!(f, "#${:02X}", value),
            Argument::IndirectY(zp) => write!(f, "(${:02X}),Y", zp),
            Argument::Relative(offset) => write!(f, "${:02X}", offset as u8),
            Argument::ZeroPage(zp) => write!(f, "${:02X}", zp),
        }
    }
}

/// Operand encoding named by the opcode table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Implied,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Immediate,
    IndirectY,
    Relative,
    ZeroPage,
}

/// Supported 6502 mnemonics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Adc,
    And,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Nop,
    Ora,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Txa,
    Txs,
    Tya,
}

/// Bitwise accumulator operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    Or,
    And,
    Xor,
}

/// What an instruction does to the modeled machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Load(Register),
    Store(Register),
    Compare(Register),
    Increment(Register),
    Decrement(Register),
    IncrementMemory,
    DecrementMemory,
    Logic(LogicOp),
    BitTest,
    AddWithCarry,
    SubtractWithCarry,
    Transfer { from: Register, to: Register },
    SetFlag { flag: Register, value: bool },
    /// Taken when `flag` is set, or clear if `inverse`
    Branch { flag: Register, inverse: bool },
    Jump,
    Call,
    Return,
    /// No effect on the modeled registers
    Nop,
}

impl Mnemonic {
    pub fn kind(self) -> Kind {
        use Register::*;
        match self {
            Mnemonic::Lda => Kind::Load(A),
            Mnemonic::Ldx => Kind::Load(X),
            Mnemonic::Ldy => Kind::Load(Y),
            Mnemonic::Sta => Kind::Store(A),
            Mnemonic::Stx => Kind::Store(X),
            Mnemonic::Sty => Kind::Store(Y),
            Mnemonic::Cmp => Kind::Compare(A),
            Mnemonic::Cpx => Kind::Compare(X),
            Mnemonic::Cpy => Kind::Compare(Y),
            Mnemonic::Inx => Kind::Increment(X),
            Mnemonic::Iny => Kind::Increment(Y),
            Mnemonic::Dex => Kind::Decrement(X),
            Mnemonic::Dey => Kind::Decrement(Y),
            Mnemonic::Inc => Kind::IncrementMemory,
            Mnemonic::Dec => Kind::DecrementMemory,
            Mnemonic::Ora => Kind::Logic(LogicOp::Or),
            Mnemonic::And => Kind::Logic(LogicOp::And),
            Mnemonic::Eor => Kind::Logic(LogicOp::Xor),
            Mnemonic::Bit => Kind::BitTest,
            Mnemonic::Adc => Kind::AddWithCarry,
            Mnemonic::Sbc => Kind::SubtractWithCarry,
            Mnemonic::Tax => Kind::Transfer { from: A, to: X },
            Mnemonic::Tay => Kind::Transfer { from: A, to: Y },
            Mnemonic::Txa => Kind::Transfer { from: X, to: A },
            Mnemonic::Tya => Kind::Transfer { from: Y, to: A },
            Mnemonic::Clc => Kind::SetFlag { flag: C, value: false },
            Mnemonic::Sec => Kind::SetFlag { flag: C, value: true },
            Mnemonic::Clv => Kind::SetFlag { flag: V, value: false },
            Mnemonic::Bpl => Kind::Branch { flag: N, inverse: true },
            Mnemonic::Bmi => Kind::Branch { flag: N, inverse: false },
            Mnemonic::Bvc => Kind::Branch { flag: V, inverse: true },
            Mnemonic::Bvs => Kind::Branch { flag: V, inverse: false },
            Mnemonic::Bcc => Kind::Branch { flag: C, inverse: true },
            Mnemonic::Bcs => Kind::Branch { flag: C, inverse: false },
            Mnemonic::Bne => Kind::Branch { flag: Z, inverse: true },
            Mnemonic::Beq => Kind::Branch { flag: Z, inverse: false },
            Mnemonic::Jmp => Kind::Jump,
            Mnemonic::Jsr => Kind::Call,
            Mnemonic::Rts => Kind::Return,
            // Interrupt mask, decimal mode and the stack pointer are not modeled
            Mnemonic::Sei
            | Mnemonic::Cli
            | Mnemonic::Cld
            | Mnemonic::Sed
            | Mnemonic::Txs
            | Mnemonic::Nop => Kind::Nop,
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format!("{:?}", self).to_uppercase())
    }
}

/// Opcode table
fn lookup(opcode: u8) -> Option<(Mnemonic, Mode)> {
    use Mnemonic::*;
    use Mode::*;
    let entry = match opcode {
        0x05 => (Ora, ZeroPage),
        0x09 => (Ora, Immediate),
        0x0D => (Ora, Absolute),
        0x10 => (Bpl, Relative),
        0x11 => (Ora, IndirectY),
        0x18 => (Clc, Implied),
        0x19 => (Ora, AbsoluteY),
        0x1D => (Ora, AbsoluteX),
        0x20 => (Jsr, Absolute),
        0x24 => (Bit, ZeroPage),
        0x25 => (And, ZeroPage),
        0x29 => (And, Immediate),
        0x2C => (Bit, Absolute),
        0x2D => (And, Absolute),
        0x30 => (Bmi, Relative),
        0x31 => (And, IndirectY),
        0x38 => (Sec, Implied),
        0x39 => (And, AbsoluteY),
        0x3D => (And, AbsoluteX),
        0x45 => (Eor, ZeroPage),
        0x49 => (Eor, Immediate),
        0x4C => (Jmp, Absolute),
        0x4D => (Eor, Absolute),
        0x50 => (Bvc, Relative),
        0x51 => (Eor, IndirectY),
        0x58 => (Cli, Implied),
        0x59 => (Eor, AbsoluteY),
        0x5D => (Eor, AbsoluteX),
        0x60 => (Rts, Implied),
        0x65 => (Adc, ZeroPage),
        0x69 => (Adc, Immediate),
        0x6D => (Adc, Absolute),
        0x70 => (Bvs, Relative),
        0x71 => (Adc, IndirectY),
        0x78 => (Sei, Implied),
        0x79 => (Adc, AbsoluteY),
        0x7D => (Adc, AbsoluteX),
        0x84 => (Sty, ZeroPage),
        0x85 => (Sta, ZeroPage),
        0x86 => (Stx, ZeroPage),
        0x88 => (Dey, Implied),
        0x8A => (Txa, Implied),
        0x8C => (Sty, Absolute),
        0x8D => (Sta, Absolute),
        0x8E => (Stx, Absolute),
        0x90 => (Bcc, Relative),
        0x91 => (Sta, IndirectY),
        0x98 => (Tya, Implied),
        0x99 => (Sta, AbsoluteY),
        0x9A => (Txs, Implied),
        0x9D => (Sta, AbsoluteX),
        0xA0 => (Ldy, Immediate),
        0xA2 => (Ldx, Immediate),
        0xA4 => (Ldy, ZeroPage),
        0xA5 => (Lda, ZeroPage),
        0xA6 => (Ldx, ZeroPage),
        0xA8 => (Tay, Implied),
        0xA9 => (Lda, Immediate),
        0xAA => (Tax, Implied),
        0xAC => (Ldy, Absolute),
        0xAD => (Lda, Absolute),
        0xAE => (Ldx, Absolute),
        0xB0 => (Bcs, Relative),
        0xB1 => (Lda, IndirectY),
        0xB8 => (Clv, Implied),
        0xB9 => (Lda, AbsoluteY),
        0xBC => (Ldy, AbsoluteX),
        0xBD => (Lda, AbsoluteX),
        0xBE => (Ldx, AbsoluteY),
        0xC0 => (Cpy, Immediate),
        0xC4 => (Cpy, ZeroPage),
        0xC5 => (Cmp, ZeroPage),
        0xC6 => (Dec, ZeroPage),
        0xC8 => (Iny, Implied),
        0xC9 => (Cmp, Immediate),
        0xCA => (Dex, Implied),
        0xCC => (Cpy, Absolute),
        0xCD => (Cmp, Absolute),
        0xCE => (Dec, Absolute),
        0xD0 => (Bne, Relative),
        0xD1 => (Cmp, IndirectY),
        0xD8 => (Cld, Implied),
        0xD9 => (Cmp, AbsoluteY),
        0xDD => (Cmp, AbsoluteX),
        0xDE => (Dec, AbsoluteX),
        0xE0 => (Cpx, Immediate),
        0xE4 => (Cpx, ZeroPage),
        0xE5 => (Sbc, ZeroPage),
        0xE6 => (Inc, ZeroPage),
        0xE8 => (Inx, Implied),
        0xE9 => (Sbc, Immediate),
        0xEA => (Nop, Implied),
        0xEC => (Cpx, Absolute),
        0xED => (Sbc, Absolute),
        0xEE => (Inc, Absolute),
        0xF0 => (Beq, Relative),
        0xF1 => (Sbc, IndirectY),
        0xF8 => (Sed, Implied),
        0xF9 => (Sbc, AbsoluteY),
        0xFD => (Sbc, AbsoluteX),
        0xFE => (Inc, AbsoluteX),
        _ => return None,
    };
    Some(entry)
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Address of the opcode byte
    pub location: u16,
    pub mnemonic: Mnemonic,
    pub operand: Option<Argument>,
    /// Original opcode when an unsupported one was replaced by RTS
    pub substituted: Option<u8>,
}

impl Instruction {
    pub fn kind(&self) -> Kind {
        self.mnemonic.kind()
    }

    pub fn encoded_length(&self) -> u16 {
        1 + self.operand.map_or(0, |arg| arg.encoded_length())
    }

    /// Address of the next instruction in memory
    pub fn following(&self) -> u16 {
        self.location.wrapping_add(self.encoded_length())
    }

    /// Control never falls through to the next instruction
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind(), Kind::Jump | Kind::Return)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind(), Kind::Branch { .. })
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind(), Kind::Call)
    }

    fn target(&self) -> Option<u16> {
        self.operand?.static_address(self.following())
    }

    pub fn branch_target(&self) -> Option<u16> {
        self.is_branch().then(|| self.target()).flatten()
    }

    pub fn jump_target(&self) -> Option<u16> {
        matches!(self.kind(), Kind::Jump)
            .then(|| self.target())
            .flatten()
    }

    pub fn call_target(&self) -> Option<u16> {
        self.is_call().then(|| self.target()).flatten()
    }

    /// Addresses control can reach next within the same function
    pub fn successors(&self) -> Vec<u16> {
        let mut successors = Vec::new();
        if let Some(target) = self.branch_target().or(self.jump_target()) {
            successors.push(target);
        }
        if !self.is_terminal() {
            successors.push(self.following());
        }
        successors
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}: {}", self.location, self.mnemonic)?;
        match self.operand {
            Some(Argument::Relative(_)) => {
                write!(f, " ${:04X}", self.target().unwrap_or_default())?
            }
            Some(arg) => write!(f, " {}", arg)?,
            None => {}
        }
        if let Some(opcode) = self.substituted {
            write!(f, "  ; unsupported opcode ${:02X}", opcode)?;
        }
        Ok(())
    }
}

/// What to do with an opcode outside the table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnsupportedOpcodePolicy {
    /// Log it and decode an RTS in its place
    #[default]
    SubstituteReturn,
    Fail,
}

/// What to do when an instruction reads a byte the memory source does not back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutOfRangePolicy {
    /// Use the 0 the memory source returns
    #[default]
    Zero,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeConfig {
    pub unsupported: UnsupportedOpcodePolicy,
    pub out_of_range: OutOfRangePolicy,
}

impl DecodeConfig {
    /// Refuse to guess
    pub fn strict() -> Self {
        DecodeConfig {
            unsupported: UnsupportedOpcodePolicy::Fail,
            out_of_range: OutOfRangePolicy::Fail,
        }
    }
}

/// Decodes instructions out of a memory source
#[derive(Debug, Clone)]
pub struct Decoder<M> {
    memory: M,
    config: DecodeConfig,
    /// Unbacked bytes read so far; each is reported once
    unmapped: RefCell<BTreeSet<u16>>,
}

impl<M: Memory> Decoder<M> {
    pub fn new(memory: M) -> Self {
        Self::with_config(memory, DecodeConfig::default())
    }

    pub fn with_config(memory: M, config: DecodeConfig) -> Self {
        Decoder {
            memory,
            config,
            unmapped: RefCell::new(BTreeSet::new()),
        }
    }

    /// Addresses the decoder read as 0 because nothing backs them
    pub fn unmapped_reads(&self) -> Vec<u16> {
        self.unmapped.borrow().iter().copied().collect()
    }

    /// Decode the instruction at `addr`
    pub fn decode(&self, addr: u16) -> Result<Instruction, DecodeError> {
        let opcode = self.byte(addr, addr)?;

        let Some((mnemonic, mode)) = lookup(opcode) else {
            return match self.config.unsupported {
                UnsupportedOpcodePolicy::Fail => {
                    Err(DecodeError::UnsupportedOpcode { addr, opcode })
                }
                UnsupportedOpcodePolicy::SubstituteReturn => {
                    warn!("Unknown instruction {:02X} at {:04X}, treating as RTS", opcode, addr);
                    Ok(Instruction {
                        location: addr,
                        mnemonic: Mnemonic::Rts,
                        operand: None,
                        substituted: Some(opcode),
                    })
                }
            };
        };

        let operand = self.argument(addr, mode)?;
        Ok(Instruction {
            location: addr,
            mnemonic,
            operand,
            substituted: None,
        })
    }

    /// Resolve the operand bytes following the opcode at `addr`
    fn argument(&self, addr: u16, mode: Mode) -> Result<Option<Argument>, DecodeError> {
        let at = addr.wrapping_add(1);
        let arg = match mode {
            Mode::Implied => return Ok(None),
            Mode::Absolute => Argument::Absolute(self.address(addr, at)?),
            Mode::AbsoluteX => Argument::AbsoluteX(self.address(addr, at)?),
            Mode::AbsoluteY => Argument::AbsoluteY(self.address(addr, at)?),
            Mode::Immediate => Argument::Immediate(self.byte(addr, at)?),
            Mode::IndirectY => Argument::IndirectY(self.byte(addr, at)?),
            // Two's complement: 0xFE is -2, not +254
            Mode::Relative => Argument::Relative(self.byte(addr, at)? as i8),
            Mode::ZeroPage => Argument::ZeroPage(self.byte(addr, at)?),
        };
        Ok(Some(arg))
    }

    fn address(&self, insn: u16, at: u16) -> Result<u16, DecodeError> {
        let lo = self.byte(insn, at)? as u16;
        let hi = self.byte(insn, at.wrapping_add(1))? as u16;
        Ok(lo | (hi << 8))
    }

    /// Read one byte of the instruction at `insn`, applying the range policy
    fn byte(&self, insn: u16, at: u16) -> Result<u8, DecodeError> {
        if !self.memory.contains(at) {
            if self.config.out_of_range == OutOfRangePolicy::Fail {
                return Err(DecodeError::OutOfRange {
                    addr: insn,
                    byte_addr: at,
                });
            }
            let first = self.unmapped.borrow_mut().insert(at);
            if first && self.config.out_of_range == OutOfRangePolicy::Warn {
                warn!("Instruction at {:04X} reads unmapped byte {:04X}", insn, at);
            }
        }
        Ok(self.memory.read_word(at))
    }
}

/// Decode one instruction with the default (lenient) policies
pub fn decode<M: Memory + ?Sized>(addr: u16, memory: &M) -> Result<Instruction, DecodeError> {
    Decoder::new(memory).decode(addr)
}

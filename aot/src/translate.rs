// translate.rs - 6502 to SSA translation
//
// Builds one IR function per reachable subroutine. Each function takes the
// seven registers as parameters and returns them as a `regs` aggregate, so a
// JSR becomes a call followed by unpacking the callee's exit state.
//
// Layout of a translated function:
//
//   start:    br l_<entry>          ; parameters feed the entry block's phis
//   l_XXXX:   phis for A X Y N V Z C
//             lowered instructions
//             br / br cond / ret
//
// Blocks are created up front for every boundary address, so lowering can
// link to any block (including ones further ahead) by address.

use crate::cfg::{find_reachable_functions, identify_blocks, identify_function};
use crate::disasm::{Argument, Decoder, Instruction, Kind, LogicOp};
use crate::error::{TranslateError, TranslateResult};
use crate::ir::{BlockId, Builder, Function, Linkage, Module, Predicate, Type, ValueId};
use crate::memory::Memory;
use crate::platform::Platform;
use crate::state::{Register, RegisterState};
use log::{debug, trace};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Name of the translated function for the subroutine at `addr`
pub fn function_name(addr: u16) -> String {
    format!("f_{:04X}", addr)
}

fn block_label(addr: u16) -> String {
    format!("l_{:04X}", addr)
}

/// Translate every function reachable from `entry` into a new module
pub fn translate<M: Memory>(
    decoder: &Decoder<M>,
    platform: &dyn Platform,
    entry: u16,
    module_name: &str,
) -> TranslateResult<Module> {
    let mut module = Module::new(module_name);
    platform.declare(&mut module);

    let reachable = find_reachable_functions(entry, decoder)?;
    debug!("{} reachable functions from {:04X}", reachable.len(), entry);

    for &addr in &reachable {
        let linkage = if addr == entry {
            Linkage::External
        } else {
            Linkage::Private
        };
        module
            .functions
            .push(translate_function(decoder, platform, addr, linkage)?);
    }

    module.verify()?;
    Ok(module)
}

/// A block's handle and its seeded register state
#[derive(Debug, Clone, Copy)]
struct Target {
    id: BlockId,
    state: RegisterState,
}

type BlockTable = BTreeMap<u16, Target>;

/// Translate the subroutine at `entry` into a verified IR function
pub fn translate_function<M: Memory>(
    decoder: &Decoder<M>,
    platform: &dyn Platform,
    entry: u16,
    linkage: Linkage,
) -> TranslateResult<Function> {
    let body = identify_function(entry, decoder)?;
    let boundaries = identify_blocks(entry, &body, decoder)?;

    let params: Vec<(&str, Type)> = Register::ALL.iter().map(|r| (r.name(), r.ty())).collect();
    let mut func = Function::new(function_name(entry), linkage, &params, Type::Regs);

    let start = func.add_block("start");
    let mut blocks = BlockTable::new();
    for &addr in &boundaries {
        let id = func.add_block(block_label(addr));
        let state = RegisterState::seed(&mut func, id, addr);
        blocks.insert(addr, Target { id, state });
    }

    // Entry trampoline: the parameters are the entry block's incoming state
    let head = blocks[&entry];
    let args: [ValueId; 7] = Register::ALL.map(|reg| func.params[reg.index()]);
    head.state.receive(&mut func, args, start);
    Builder::new(&mut func, start).br(head.id);

    // One past the last instruction of the function
    let last_end = match body.last() {
        Some(&addr) => addr as u32 + decoder.decode(addr)?.encoded_length() as u32,
        None => entry as u32,
    };

    for (&addr, &target) in &blocks {
        let end = boundaries
            .range((Bound::Excluded(addr), Bound::Unbounded))
            .next()
            .map_or(last_end, |&next| next as u32);

        let mut gen = CodeGen {
            b: Builder::new(&mut func, target.id),
            state: target.state,
            platform,
            blocks: &blocks,
        };
        gen.lower_block(decoder, entry, addr, end)?;
    }

    debug!("Assembled {} ({} blocks)", func.name, func.blocks.len());
    func.verify()?;
    Ok(func)
}

/// Where a memory operand lives
#[derive(Debug, Clone, Copy)]
enum Location {
    Static(u16),
    /// i16 address computed at run time
    Computed(ValueId),
}

/// Lowers the instructions of one block against its register state
struct CodeGen<'a, 'f> {
    b: Builder<'f>,
    state: RegisterState,
    platform: &'a dyn Platform,
    blocks: &'a BlockTable,
}

impl CodeGen<'_, '_> {
    /// Lower `[start, end)` and terminate the block
    fn lower_block<M: Memory>(
        &mut self,
        decoder: &Decoder<M>,
        entry: u16,
        start: u16,
        end: u32,
    ) -> TranslateResult<()> {
        let mut pc = start as u32;
        let mut last = start;

        while pc < end {
            let inst = decoder.decode(pc as u16)?;
            trace!("  {}", inst);
            self.lower(&inst)?;
            if inst.is_branch() || inst.is_terminal() {
                return Ok(());
            }
            last = inst.location;
            pc = inst.location as u32 + inst.encoded_length() as u32;
        }

        // Ran into the next block without a transfer
        if pc > 0xFFFF {
            return Err(TranslateError::LeavesFunction { entry, addr: last });
        }
        if pc != end {
            return Err(TranslateError::OverlappingInstruction {
                addr: last,
                boundary: end as u16,
            });
        }
        let next = self.edge(last, pc as u16)?;
        self.b.br(next);
        Ok(())
    }

    fn lower(&mut self, inst: &Instruction) -> TranslateResult<()> {
        match inst.kind() {
            Kind::Load(reg) => {
                let value = self.read(inst)?;
                self.state.set(reg, value);
                self.set_nz(value);
            }
            Kind::Store(reg) => {
                let loc = self.location(inst)?;
                self.write(loc, self.state.get(reg));
            }
            Kind::Compare(reg) => {
                let lhs = self.state.get(reg);
                let rhs = self.read(inst)?;
                let diff = self.b.sub(lhs, rhs);
                self.set_nz(diff);
                let carry = self.b.icmp(Predicate::Uge, lhs, rhs);
                self.state.set(Register::C, carry);
            }
            Kind::Increment(reg) => {
                let one = self.b.word(1);
                let value = self.b.add(self.state.get(reg), one);
                self.state.set(reg, value);
                self.set_nz(value);
            }
            Kind::Decrement(reg) => {
                let one = self.b.word(1);
                let value = self.b.sub(self.state.get(reg), one);
                self.state.set(reg, value);
                self.set_nz(value);
            }
            Kind::IncrementMemory | Kind::DecrementMemory => {
                let loc = self.location(inst)?;
                let old = self.load(loc);
                let one = self.b.word(1);
                let new = if inst.kind() == Kind::IncrementMemory {
                    self.b.add(old, one)
                } else {
                    self.b.sub(old, one)
                };
                self.write(loc, new);
                self.set_nz(new);
            }
            Kind::Logic(op) => {
                let a = self.state.get(Register::A);
                let m = self.read(inst)?;
                let value = match op {
                    LogicOp::Or => self.b.or(a, m),
                    LogicOp::And => self.b.and(a, m),
                    LogicOp::Xor => self.b.xor(a, m),
                };
                self.state.set(Register::A, value);
                self.set_nz(value);
            }
            Kind::BitTest => {
                let m = self.read(inst)?;
                let zero = self.b.word(0);
                let bit6 = self.b.word(0x40);
                let n = self.b.icmp(Predicate::Slt, m, zero);
                let masked = self.b.and(m, bit6);
                let v = self.b.icmp(Predicate::Ne, masked, zero);
                let tested = self.b.and(self.state.get(Register::A), m);
                let z = self.b.icmp(Predicate::Eq, tested, zero);
                self.state.set(Register::N, n);
                self.state.set(Register::V, v);
                self.state.set(Register::Z, z);
            }
            Kind::AddWithCarry => {
                let m = self.read(inst)?;
                self.add_with_carry(m);
            }
            Kind::SubtractWithCarry => {
                // A - M - !C == A + !M + C
                let m = self.read(inst)?;
                let ones = self.b.word(0xFF);
                let inverted = self.b.xor(m, ones);
                self.add_with_carry(inverted);
            }
            Kind::Transfer { from, to } => {
                let value = self.state.get(from);
                self.state.set(to, value);
                self.set_nz(value);
            }
            Kind::SetFlag { flag, value } => {
                let value = self.b.flag(value);
                self.state.set(flag, value);
            }
            Kind::Branch { flag, inverse } => {
                let target = inst
                    .branch_target()
                    .ok_or(TranslateError::InvalidOperand { addr: inst.location })?;
                let taken = self.edge(inst.location, target)?;
                let not_taken = self.edge(inst.location, inst.following())?;
                let cond = self.state.get(flag);
                if inverse {
                    self.b.cond_br(cond, not_taken, taken);
                } else {
                    self.b.cond_br(cond, taken, not_taken);
                }
            }
            Kind::Jump => {
                let target = inst
                    .jump_target()
                    .ok_or(TranslateError::InvalidOperand { addr: inst.location })?;
                let dest = self.edge(inst.location, target)?;
                self.b.br(dest);
            }
            Kind::Call => {
                let target = inst
                    .call_target()
                    .ok_or(TranslateError::InvalidOperand { addr: inst.location })?;
                let regs = self
                    .b
                    .call(&function_name(target), Type::Regs, &self.state.values());
                for reg in Register::ALL {
                    let value = self.b.extract_reg(regs, reg.index(), reg.ty());
                    self.state.set(reg, value);
                }
            }
            Kind::Return => {
                let regs = self.b.make_regs(self.state.values());
                self.b.ret(regs);
            }
            Kind::Nop => {}
        }
        Ok(())
    }

    /// Binary mode ADC of `m` into A
    fn add_with_carry(&mut self, m: ValueId) {
        let a = self.state.get(Register::A);
        let wide_a = self.b.zext(a, Type::I16);
        let wide_m = self.b.zext(m, Type::I16);
        let carry_in = self.b.zext(self.state.get(Register::C), Type::I16);
        let partial = self.b.add(wide_a, wide_m);
        let sum = self.b.add(partial, carry_in);

        let byte_max = self.b.addr(0xFF);
        let carry = self.b.icmp(Predicate::Ugt, sum, byte_max);
        let result = self.b.trunc(sum, Type::I8);

        // Overflow when both inputs share a sign the result does not
        let from_a = self.b.xor(a, result);
        let from_m = self.b.xor(m, result);
        let both = self.b.and(from_a, from_m);
        let zero = self.b.word(0);
        let overflow = self.b.icmp(Predicate::Slt, both, zero);

        self.state.set(Register::A, result);
        self.state.set(Register::C, carry);
        self.state.set(Register::V, overflow);
        self.set_nz(result);
    }

    fn set_nz(&mut self, value: ValueId) {
        let zero = self.b.word(0);
        let n = self.b.icmp(Predicate::Slt, value, zero);
        let z = self.b.icmp(Predicate::Eq, value, zero);
        self.state.set(Register::N, n);
        self.state.set(Register::Z, z);
    }

    /// Hand the current state to the block at `target` and return its handle
    fn edge(&mut self, from: u16, target: u16) -> TranslateResult<BlockId> {
        let blocks = self.blocks;
        let dest = *blocks
            .get(&target)
            .ok_or(TranslateError::MissingBlock { from, target })?;
        let here = self.b.block();
        self.state.propagate(self.b.func_mut(), here, &dest.state);
        Ok(dest.id)
    }

    /// Value operand: an immediate or a memory read
    fn read(&mut self, inst: &Instruction) -> TranslateResult<ValueId> {
        if let Some(value) = inst.operand.and_then(|arg| arg.static_value()) {
            return Ok(self.b.word(value));
        }
        let loc = self.location(inst)?;
        Ok(self.load(loc))
    }

    fn location(&mut self, inst: &Instruction) -> TranslateResult<Location> {
        let invalid = TranslateError::InvalidOperand { addr: inst.location };
        let Some(arg) = inst.operand else {
            return Err(invalid);
        };
        let loc = match arg {
            Argument::Absolute(addr) => Location::Static(addr),
            Argument::ZeroPage(zp) => Location::Static(zp as u16),
            Argument::AbsoluteX(base) => Location::Computed(self.indexed(base, Register::X)),
            Argument::AbsoluteY(base) => Location::Computed(self.indexed(base, Register::Y)),
            Argument::IndirectY(zp) => {
                // Pointer high byte wraps within the zero page
                let lo = self.platform.load(&mut self.b, zp as u16);
                let hi = self.platform.load(&mut self.b, zp.wrapping_add(1) as u16);
                let lo = self.b.zext(lo, Type::I16);
                let hi = self.b.zext(hi, Type::I16);
                let eight = self.b.addr(8);
                let hi = self.b.shl(hi, eight);
                let pointer = self.b.or(hi, lo);
                let y = self.b.zext(self.state.get(Register::Y), Type::I16);
                Location::Computed(self.b.add(pointer, y))
            }
            Argument::Immediate(_) | Argument::Relative(_) => return Err(invalid),
        };
        Ok(loc)
    }

    fn indexed(&mut self, base: u16, reg: Register) -> ValueId {
        let index = self.b.zext(self.state.get(reg), Type::I16);
        let base = self.b.addr(base);
        self.b.add(base, index)
    }

    fn load(&mut self, loc: Location) -> ValueId {
        match loc {
            Location::Static(addr) => self.platform.load(&mut self.b, addr),
            Location::Computed(addr) => self.platform.load_computed(&mut self.b, addr),
        }
    }

    fn write(&mut self, loc: Location, value: ValueId) {
        match loc {
            Location::Static(addr) => self.platform.store(&mut self.b, addr, value),
            Location::Computed(addr) => self.platform.store_computed(&mut self.b, addr, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::DecodeConfig;
    use crate::error::DecodeError;
    use crate::ir::{BinOp, Inst, Terminator};
    use crate::memory::Image;
    use crate::platform::{FlatPlatform, NesPlatform};

    fn decoder(bytes: &[u8]) -> Decoder<Image> {
        Decoder::new(Image::new(0x8000, bytes.to_vec()))
    }

    fn assemble(bytes: &[u8]) -> Function {
        translate_function(&decoder(bytes), &FlatPlatform, 0x8000, Linkage::External).unwrap()
    }

    /// Register values handed to `ret` by the block labelled `label`
    fn exit_state(func: &Function, label: &str) -> [ValueId; 7] {
        let block = func.block(func.block_by_label(label).unwrap());
        let Some(Terminator::Ret { value }) = block.terminator else {
            panic!("{} does not return", label);
        };
        match func.value(value).inst {
            Inst::MakeRegs { fields } => fields,
            ref other => panic!("expected regs, got {:?}", other),
        }
    }

    fn constant(func: &Function, value: ValueId) -> Option<u16> {
        func.const_value(value)
    }

    #[test]
    fn test_compare_leaves_register() {
        // LDA #$05; CMP #$05; RTS
        let func = assemble(&[0xA9, 0x05, 0xC9, 0x05, 0x60]);
        let regs = exit_state(&func, "l_8000");
        assert_eq!(constant(&func, regs[Register::A.index()]), Some(5));
        assert_eq!(constant(&func, regs[Register::Z.index()]), Some(1));
        assert_eq!(constant(&func, regs[Register::N.index()]), Some(0));
        assert_eq!(constant(&func, regs[Register::C.index()]), Some(1));
        // X was never written, so it is still the block's phi
        assert!(matches!(
            func.value(regs[Register::X.index()]).inst,
            Inst::Phi { .. }
        ));
    }

    #[test]
    fn test_branch_merge() {
        // LDA #$00; BEQ +2; LDA #$01; RTS
        let func = assemble(&[0xA9, 0x00, 0xF0, 0x02, 0xA9, 0x01, 0x60]);
        let labels: Vec<&str> = func.blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["start", "l_8000", "l_8004", "l_8006"]);

        let join = func.block_by_label("l_8006").unwrap();
        let phi_a = func.block(join).insts[Register::A.index()];
        let incoming: Vec<(Option<u16>, &str)> = func
            .incoming(phi_a)
            .iter()
            .map(|&(v, b)| (constant(&func, v), func.block(b).label.as_str()))
            .collect();
        assert_eq!(incoming, vec![(Some(0), "l_8000"), (Some(1), "l_8004")]);

        // The fallthrough block ends in an implicit jump
        let fall = func.block_by_label("l_8004").unwrap();
        assert_eq!(
            func.block(fall).terminator,
            Some(Terminator::Br { target: join })
        );
    }

    #[test]
    fn test_entry_phis_fed_by_params() {
        let func = assemble(&[0xE8, 0x60]);
        let start = func.block_by_label("start").unwrap();
        let head = func.block_by_label("l_8000").unwrap();
        for reg in Register::ALL {
            let phi = func.block(head).insts[reg.index()];
            assert_eq!(func.incoming(phi), &[(func.params[reg.index()], start)]);
        }
        assert!(func.to_string().contains("add i8 %X_8000, 1"));
    }

    #[test]
    fn test_self_loop_branch() {
        // 8000 BNE $8000; 8002 RTS
        let func = assemble(&[0xD0, 0xFE, 0x60]);
        let head = func.block_by_label("l_8000").unwrap();
        let exit = func.block_by_label("l_8002").unwrap();
        let z = func.block(head).insts[Register::Z.index()];
        // BNE loops while Z is clear
        assert_eq!(
            func.block(head).terminator,
            Some(Terminator::CondBr {
                cond: z,
                then_block: exit,
                else_block: head
            })
        );
        assert_eq!(func.incoming(z).len(), 2);
    }

    #[test]
    fn test_add_with_carry_flags() {
        // CLC; LDA #$7F; ADC #$01; RTS
        let func = assemble(&[0x18, 0xA9, 0x7F, 0x69, 0x01, 0x60]);
        let regs = exit_state(&func, "l_8000");
        let flag = |reg: Register| constant(&func, regs[reg.index()]);
        assert_eq!(flag(Register::A), Some(0x80));
        assert_eq!(flag(Register::V), Some(1));
        assert_eq!(flag(Register::C), Some(0));
        assert_eq!(flag(Register::N), Some(1));
        assert_eq!(flag(Register::Z), Some(0));
    }

    #[test]
    fn test_subtract_borrows() {
        // SEC; LDA #$00; SBC #$01; RTS
        let func = assemble(&[0x38, 0xA9, 0x00, 0xE9, 0x01, 0x60]);
        let regs = exit_state(&func, "l_8000");
        assert_eq!(constant(&func, regs[Register::A.index()]), Some(0xFF));
        assert_eq!(constant(&func, regs[Register::C.index()]), Some(0));
        assert_eq!(constant(&func, regs[Register::N.index()]), Some(1));
        assert_eq!(constant(&func, regs[Register::V.index()]), Some(0));
    }

    #[test]
    fn test_indexed_store_is_computed() {
        // LDA #$07; STA $0200,X; RTS
        let code = [0xA9, 0x07, 0x9D, 0x00, 0x02, 0x60];
        let func = translate_function(&decoder(&code), &NesPlatform, 0x8000, Linkage::External)
            .unwrap();
        let head = func.block(func.block_by_label("l_8000").unwrap());
        let write = head
            .insts
            .iter()
            .find_map(|&id| match &func.value(id).inst {
                Inst::Call { callee, args } if callee == NesPlatform::WRITE => Some(args.clone()),
                _ => None,
            })
            .expect("nes_write call");
        assert!(matches!(
            func.value(write[0]).inst,
            Inst::Binary { .. }
        ));
        assert_eq!(constant(&func, write[1]), Some(7));
    }

    #[test]
    fn test_call_unpacks_callee_state() {
        // 8000 JSR $8004; RTS
        // 8004 INX; RTS
        let code = [0x20, 0x04, 0x80, 0x60, 0xE8, 0x60];
        let module = translate(&decoder(&code), &FlatPlatform, 0x8000, "test").unwrap();
        assert_eq!(module.function_count(), 2);
        assert_eq!(module.function("f_8000").unwrap().linkage, Linkage::External);
        assert_eq!(module.function("f_8004").unwrap().linkage, Linkage::Private);

        let caller = module.function("f_8000").unwrap();
        let regs = exit_state(caller, "l_8000");
        for reg in Register::ALL {
            assert!(matches!(
                caller.value(regs[reg.index()]).inst,
                Inst::ExtractReg { field, .. } if field == reg.index()
            ));
        }
        let text = module.to_string();
        assert!(text.contains("call %regs @f_8004(i8 %A_8000"), "{}", text);
        assert!(text.contains("define private %regs @f_8004("), "{}", text);
    }

    #[test]
    fn test_jump_links_blocks() {
        // 8000 JMP $8004; 8003 (data); 8004 DEY; RTS
        let func = assemble(&[0x4C, 0x04, 0x80, 0xFF, 0x88, 0x60]);
        let head = func.block_by_label("l_8000").unwrap();
        let target = func.block_by_label("l_8004").unwrap();
        assert_eq!(
            func.block(head).terminator,
            Some(Terminator::Br { target })
        );
    }

    #[test]
    fn test_indirect_y_load() {
        // LDA ($10),Y; RTS
        let code = [0xB1, 0x10, 0x60];
        let func = assemble(&code);
        let text = func.to_string();
        assert!(text.contains("load i8, @ram[i16 16]"), "{}", text);
        assert!(text.contains("load i8, @ram[i16 17]"), "{}", text);
        assert!(text.contains("zext i8 %Y_8000 to i16"), "{}", text);
    }

    #[test]
    fn test_strict_decode_aborts() {
        let mem = Image::new(0x8000, vec![0xA9, 0x01, 0x02]);
        let dec = Decoder::with_config(mem, DecodeConfig::strict());
        let err = translate(&dec, &FlatPlatform, 0x8000, "test").unwrap_err();
        assert!(matches!(
            err,
            TranslateError::Decode(DecodeError::UnsupportedOpcode { addr: 0x8002, opcode: 0x02 })
        ));
    }

    #[test]
    fn test_substituted_return_still_translates() {
        let func = assemble(&[0xA9, 0x01, 0x02]);
        let regs = exit_state(&func, "l_8000");
        assert_eq!(constant(&func, regs[Register::A.index()]), Some(1));
    }

    /// Arguments of every call to `callee` in the block labelled `label`
    fn calls<'f>(func: &'f Function, label: &str, callee: &str) -> Vec<&'f [ValueId]> {
        let block = func.block(func.block_by_label(label).unwrap());
        block
            .insts
            .iter()
            .filter_map(|&id| match &func.value(id).inst {
                Inst::Call { callee: name, args } if name == callee => Some(args.as_slice()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_store_then_indexed_load_share_memory() {
        // LDA #$07; STA $0300; LDX #$00; LDA $0300,X; RTS
        let code = [0xA9, 0x07, 0x8D, 0x00, 0x03, 0xA2, 0x00, 0xBD, 0x00, 0x03, 0x60];
        let func = translate_function(&decoder(&code), &NesPlatform, 0x8000, Linkage::External)
            .unwrap();

        let writes = calls(&func, "l_8000", NesPlatform::WRITE);
        assert_eq!(writes.len(), 1);
        assert_eq!(constant(&func, writes[0][0]), Some(0x0300));
        assert_eq!(constant(&func, writes[0][1]), Some(7));

        let regs = exit_state(&func, "l_8000");
        match &func.value(regs[Register::A.index()]).inst {
            Inst::Call { callee, args } => {
                assert_eq!(callee, NesPlatform::READ);
                assert_eq!(constant(&func, args[0]), Some(0x0300));
            }
            other => panic!("expected nes_read, got {:?}", other),
        }

        // Same program on flat memory indexes the one array both ways
        let text = assemble(&code).to_string();
        assert!(text.contains("store i8 7, @ram[i16 768]"), "{}", text);
        assert!(text.contains("load i8, @ram[i16 768]"), "{}", text);
    }

    #[test]
    fn test_mirrored_ram_and_indexed_reads_use_host() {
        // STA $0B00; LDA $0300,Y; RTS
        let code = [0x8D, 0x00, 0x0B, 0xB9, 0x00, 0x03, 0x60];
        let func = translate_function(&decoder(&code), &NesPlatform, 0x8000, Linkage::External)
            .unwrap();
        let writes = calls(&func, "l_8000", NesPlatform::WRITE);
        assert_eq!(constant(&func, writes[0][0]), Some(0x0300));
        let reads = calls(&func, "l_8000", NesPlatform::READ);
        assert_eq!(reads.len(), 1);
        assert!(matches!(
            func.value(reads[0][0]).inst,
            Inst::Binary { op: BinOp::Add, .. }
        ));
    }

    #[test]
    fn test_logic_ops() {
        // LDA #$F0; ORA #$0F; RTS
        let func = assemble(&[0xA9, 0xF0, 0x09, 0x0F, 0x60]);
        let regs = exit_state(&func, "l_8000");
        assert_eq!(constant(&func, regs[Register::A.index()]), Some(0xFF));
        assert_eq!(constant(&func, regs[Register::N.index()]), Some(1));
        assert_eq!(constant(&func, regs[Register::Z.index()]), Some(0));

        // LDA #$F0; AND #$0F; RTS
        let func = assemble(&[0xA9, 0xF0, 0x29, 0x0F, 0x60]);
        let regs = exit_state(&func, "l_8000");
        assert_eq!(constant(&func, regs[Register::A.index()]), Some(0x00));
        assert_eq!(constant(&func, regs[Register::N.index()]), Some(0));
        assert_eq!(constant(&func, regs[Register::Z.index()]), Some(1));

        // LDA #$FF; EOR #$0F; RTS
        let func = assemble(&[0xA9, 0xFF, 0x49, 0x0F, 0x60]);
        let regs = exit_state(&func, "l_8000");
        assert_eq!(constant(&func, regs[Register::A.index()]), Some(0xF0));
        assert_eq!(constant(&func, regs[Register::N.index()]), Some(1));
        assert_eq!(constant(&func, regs[Register::Z.index()]), Some(0));
    }

    #[test]
    fn test_bit_test_flags() {
        // LDA #$0F; BIT $10; RTS
        let func = assemble(&[0xA9, 0x0F, 0x24, 0x10, 0x60]);
        let regs = exit_state(&func, "l_8000");
        assert_eq!(constant(&func, regs[Register::A.index()]), Some(0x0F));

        // N is bit 7 of the operand
        let Inst::ICmp { pred: Predicate::Slt, lhs: m, .. } = func.value(regs[Register::N.index()]).inst
        else {
            panic!("N is not a sign test");
        };
        assert!(matches!(
            &func.value(m).inst,
            Inst::Load { global, index } if global == "ram" && constant(&func, *index) == Some(0x10)
        ));

        // V is bit 6 of the operand
        let Inst::ICmp { pred: Predicate::Ne, lhs: masked, .. } =
            func.value(regs[Register::V.index()]).inst
        else {
            panic!("V is not a bit test");
        };
        let Inst::Binary { op: BinOp::And, lhs, rhs } = func.value(masked).inst else {
            panic!("V does not mask the operand");
        };
        assert_eq!((lhs, constant(&func, rhs)), (m, Some(0x40)));

        // Z tests A & M without touching A
        let Inst::ICmp { pred: Predicate::Eq, lhs: tested, .. } =
            func.value(regs[Register::Z.index()]).inst
        else {
            panic!("Z is not a zero test");
        };
        let Inst::Binary { op: BinOp::And, lhs, rhs } = func.value(tested).inst else {
            panic!("Z does not mask A");
        };
        assert_eq!((constant(&func, lhs), rhs), (Some(0x0F), m));
    }

    #[test]
    fn test_memory_increment_round_trips_platform() {
        // INC $10; RTS
        let func = assemble(&[0xE6, 0x10, 0x60]);
        let block = func.block(func.block_by_label("l_8000").unwrap());
        let stored = block
            .insts
            .iter()
            .find_map(|&id| match &func.value(id).inst {
                Inst::Store { global, index, value } if global == "ram" => {
                    assert_eq!(constant(&func, *index), Some(0x10));
                    Some(*value)
                }
                _ => None,
            })
            .expect("store to ram");
        let Inst::Binary { op: BinOp::Add, lhs: old, rhs: one } = func.value(stored).inst else {
            panic!("INC does not add");
        };
        assert_eq!(constant(&func, one), Some(1));
        assert!(matches!(
            &func.value(old).inst,
            Inst::Load { index, .. } if constant(&func, *index) == Some(0x10)
        ));

        let regs = exit_state(&func, "l_8000");
        assert!(matches!(
            func.value(regs[Register::Z.index()]).inst,
            Inst::ICmp { pred: Predicate::Eq, lhs, .. } if lhs == stored
        ));
    }

    #[test]
    fn test_memory_decrement_round_trips_host() {
        // DEC $10; RTS
        let code = [0xC6, 0x10, 0x60];
        let func = translate_function(&decoder(&code), &NesPlatform, 0x8000, Linkage::External)
            .unwrap();
        let reads = calls(&func, "l_8000", NesPlatform::READ);
        let writes = calls(&func, "l_8000", NesPlatform::WRITE);
        assert_eq!((reads.len(), writes.len()), (1, 1));
        assert_eq!(constant(&func, reads[0][0]), Some(0x10));
        assert_eq!(constant(&func, writes[0][0]), Some(0x10));

        let Inst::Binary { op: BinOp::Sub, lhs, rhs } = func.value(writes[0][1]).inst else {
            panic!("DEC does not subtract");
        };
        assert_eq!(constant(&func, rhs), Some(1));
        assert!(matches!(
            &func.value(lhs).inst,
            Inst::Call { callee, .. } if callee == NesPlatform::READ
        ));
    }

    #[test]
    fn test_transfers_set_flags() {
        // LDY #$90; TYA; TAX; LDA #$00; TAY; RTS
        let func = assemble(&[0xA0, 0x90, 0x98, 0xAA, 0xA9, 0x00, 0xA8, 0x60]);
        let regs = exit_state(&func, "l_8000");
        let value = |reg: Register| constant(&func, regs[reg.index()]);
        assert_eq!(value(Register::A), Some(0x00));
        assert_eq!(value(Register::X), Some(0x90));
        assert_eq!(value(Register::Y), Some(0x00));
        assert_eq!(value(Register::Z), Some(1));
        assert_eq!(value(Register::N), Some(0));

        // LDX #$80; TXA; RTS
        let func = assemble(&[0xA2, 0x80, 0x8A, 0x60]);
        let regs = exit_state(&func, "l_8000");
        assert_eq!(constant(&func, regs[Register::A.index()]), Some(0x80));
        assert_eq!(constant(&func, regs[Register::N.index()]), Some(1));
        assert_eq!(constant(&func, regs[Register::Z.index()]), Some(0));
    }

    #[test]
    fn test_clear_overflow() {
        // CLC; LDA #$7F; ADC #$01; CLV; RTS
        let func = assemble(&[0x18, 0xA9, 0x7F, 0x69, 0x01, 0xB8, 0x60]);
        let regs = exit_state(&func, "l_8000");
        assert_eq!(constant(&func, regs[Register::V.index()]), Some(0));
        assert_eq!(constant(&func, regs[Register::A.index()]), Some(0x80));
    }

    #[test]
    fn test_overlapping_instruction_is_named() {
        // 8000 BEQ $8005
        // 8002 LDA #$01
        // 8004 .byte $2C (BIT $02A9 when falling through)
        // 8005 LDA #$02
        // 8007 RTS
        let code = [0xF0, 0x03, 0xA9, 0x01, 0x2C, 0xA9, 0x02, 0x60];
        let err = translate_function(&decoder(&code), &FlatPlatform, 0x8000, Linkage::External)
            .unwrap_err();
        assert!(matches!(
            err,
            TranslateError::OverlappingInstruction {
                addr: 0x8004,
                boundary: 0x8005
            }
        ));
    }
}

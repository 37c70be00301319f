// ir.rs - Target SSA intermediate representation
//
// A small typed SSA form in the spirit of LLVM IR: a module owns globals,
// external declarations and functions; a function owns a value arena and a
// list of blocks, each ending in exactly one terminator. Phi nodes merge
// values at block entry, one incoming value per predecessor edge.
//
// The builder folds integer operations on constants, so straight-line code
// working on immediates produces constants rather than instructions.

use crate::error::{TranslateError, TranslateResult};
use std::collections::BTreeSet;
use std::fmt;

/// Value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// Condition flag
    I1,
    /// Machine word
    I8,
    /// Machine address
    I16,
    /// The seven register aggregate returned by translated functions
    Regs,
}

impl Type {
    /// Mask covering the value bits of an integer type
    pub fn mask(self) -> u16 {
        match self {
            Type::I1 => 0x1,
            Type::I8 => 0xFF,
            Type::I16 => 0xFFFF,
            Type::Void | Type::Regs => 0,
        }
    }

    fn sign_bit(self) -> u16 {
        (self.mask() >> 1) + 1
    }

    /// Sign-extend a masked constant of this type
    fn signed(self, value: u16) -> i32 {
        let value = (value & self.mask()) as i32;
        if value as u16 & self.sign_bit() != 0 {
            value - (self.mask() as i32 + 1)
        } else {
            value
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::Regs => write!(f, "%regs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl ValueId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
}

impl BinOp {
    fn fold(self, lhs: u16, rhs: u16, ty: Type) -> u16 {
        let value = match self {
            BinOp::Add => lhs.wrapping_add(rhs),
            BinOp::Sub => lhs.wrapping_sub(rhs),
            BinOp::And => lhs & rhs,
            BinOp::Or => lhs | rhs,
            BinOp::Xor => lhs ^ rhs,
            BinOp::Shl => lhs.checked_shl(rhs as u32).unwrap_or(0),
        };
        value & ty.mask()
    }

    fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
        }
    }
}

/// Integer comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Uge,
    Ugt,
}

impl Predicate {
    fn fold(self, lhs: u16, rhs: u16, ty: Type) -> bool {
        let (lhs, rhs) = (lhs & ty.mask(), rhs & ty.mask());
        match self {
            Predicate::Eq => lhs == rhs,
            Predicate::Ne => lhs != rhs,
            Predicate::Slt => ty.signed(lhs) < ty.signed(rhs),
            Predicate::Uge => lhs >= rhs,
            Predicate::Ugt => lhs > rhs,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Slt => "slt",
            Predicate::Uge => "uge",
            Predicate::Ugt => "ugt",
        }
    }
}

/// Instructions (each defines at most one value)
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Param { index: usize },
    Const { value: u16 },
    Phi { incoming: Vec<(ValueId, BlockId)> },
    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    ICmp { pred: Predicate, lhs: ValueId, rhs: ValueId },
    ZExt { value: ValueId },
    Trunc { value: ValueId },
    Load { global: String, index: ValueId },
    Store { global: String, index: ValueId, value: ValueId },
    Call { callee: String, args: Vec<ValueId> },
    MakeRegs { fields: [ValueId; 7] },
    ExtractReg { regs: ValueId, field: usize },
}

/// One entry in a function's value arena
#[derive(Debug, Clone)]
pub struct ValueData {
    pub inst: Inst,
    pub ty: Type,
    pub name: Option<String>,
}

/// Block terminators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Br {
        target: BlockId,
    },
    CondBr {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret {
        value: ValueId,
    },
}

impl Terminator {
    /// Successor edges, one entry per edge
    pub fn successors(&self) -> Vec<BlockId> {
        match *self {
            Terminator::Br { target } => vec![target],
            Terminator::CondBr {
                then_block,
                else_block,
                ..
            } => vec![then_block, else_block],
            Terminator::Ret { .. } => Vec::new(),
        }
    }
}

/// A basic block
#[derive(Debug, Clone)]
pub struct Block {
    pub label: String,
    /// Instructions in order, phis first
    pub insts: Vec<ValueId>,
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    Private,
}

/// A function
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub linkage: Linkage,
    pub params: Vec<ValueId>,
    pub ret: Type,
    pub values: Vec<ValueData>,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn new(name: impl Into<String>, linkage: Linkage, params: &[(&str, Type)], ret: Type) -> Self {
        let mut func = Function {
            name: name.into(),
            linkage,
            params: Vec::new(),
            ret,
            values: Vec::new(),
            blocks: Vec::new(),
        };
        for (index, &(name, ty)) in params.iter().enumerate() {
            let param = func.push_value(Inst::Param { index }, ty, Some(name.to_string()));
            func.params.push(param);
        }
        func
    }

    pub fn add_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            label: label.into(),
            insts: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_by_label(&self, label: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.label == label)
            .map(|i| BlockId(i as u32))
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    pub fn ty(&self, id: ValueId) -> Type {
        self.value(id).ty
    }

    /// The constant behind `id`, if it is one
    pub fn const_value(&self, id: ValueId) -> Option<u16> {
        match self.value(id).inst {
            Inst::Const { value } => Some(value),
            _ => None,
        }
    }

    fn push_value(&mut self, inst: Inst, ty: Type, name: Option<String>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData { inst, ty, name });
        id
    }

    /// Add an empty phi after the existing phis of `block`
    pub fn add_phi(&mut self, block: BlockId, ty: Type, name: impl Into<String>) -> ValueId {
        let phi = self.push_value(Inst::Phi { incoming: Vec::new() }, ty, Some(name.into()));
        let at = self.blocks[block.index()]
            .insts
            .iter()
            .take_while(|&&v| matches!(self.values[v.index()].inst, Inst::Phi { .. }))
            .count();
        self.blocks[block.index()].insts.insert(at, phi);
        phi
    }

    /// Record `value` as the phi's input along the edge from `from`
    pub fn add_incoming(&mut self, phi: ValueId, value: ValueId, from: BlockId) {
        match &mut self.values[phi.index()].inst {
            Inst::Phi { incoming } => incoming.push((value, from)),
            other => panic!("add_incoming on non-phi {:?}", other),
        }
    }

    /// Incoming values of a phi (empty for anything else)
    pub fn incoming(&self, phi: ValueId) -> &[(ValueId, BlockId)] {
        match &self.value(phi).inst {
            Inst::Phi { incoming } => incoming,
            _ => &[],
        }
    }

    /// Predecessor edges of every block, one entry per edge
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (idx, block) in self.blocks.iter().enumerate() {
            if let Some(term) = &block.terminator {
                for succ in term.successors() {
                    preds[succ.index()].push(BlockId(idx as u32));
                }
            }
        }
        preds
    }

    /// Check structural invariants: every block terminated, every phi fed
    /// exactly once per predecessor edge.
    pub fn verify(&self) -> TranslateResult<()> {
        for block in &self.blocks {
            if block.terminator.is_none() {
                return Err(TranslateError::Unterminated {
                    function: self.name.clone(),
                    block: block.label.clone(),
                });
            }
        }

        let preds = self.predecessors();
        for (idx, block) in self.blocks.iter().enumerate() {
            let mut edges = preds[idx].clone();
            edges.sort();
            for &id in &block.insts {
                let Inst::Phi { incoming } = &self.value(id).inst else {
                    continue;
                };
                if incoming.len() != edges.len() {
                    return Err(TranslateError::PhiArity {
                        function: self.name.clone(),
                        block: block.label.clone(),
                        value: self.value_name(id),
                        incoming: incoming.len(),
                        edges: edges.len(),
                    });
                }
                let mut sources: Vec<BlockId> = incoming.iter().map(|&(_, b)| b).collect();
                sources.sort();
                if sources != edges {
                    return Err(TranslateError::PhiPredecessors {
                        function: self.name.clone(),
                        block: block.label.clone(),
                        value: self.value_name(id),
                    });
                }
            }
        }
        Ok(())
    }

    fn value_name(&self, id: ValueId) -> String {
        match &self.value(id).name {
            Some(name) => format!("%{}", name),
            None => format!("%v{}", id.0),
        }
    }

    fn operand(&self, id: ValueId) -> String {
        match self.value(id).inst {
            Inst::Const { value } if self.ty(id) == Type::I1 => {
                let text = if value != 0 { "true" } else { "false" };
                text.to_string()
            }
            Inst::Const { value } => value.to_string(),
            _ => self.value_name(id),
        }
    }

    fn typed(&self, id: ValueId) -> String {
        format!("{} {}", self.ty(id), self.operand(id))
    }

    fn write_inst(&self, f: &mut fmt::Formatter<'_>, id: ValueId) -> fmt::Result {
        let data = self.value(id);
        let body = match &data.inst {
            Inst::Param { .. } | Inst::Const { .. } => return Ok(()),
            Inst::Phi { incoming } => {
                let arms: Vec<String> = incoming
                    .iter()
                    .map(|&(v, b)| format!("[ {}, %{} ]", self.operand(v), self.block(b).label))
                    .collect();
                format!("phi {} {}", data.ty, arms.join(", "))
            }
            Inst::Binary { op, lhs, rhs } => format!(
                "{} {}, {}",
                op.name(),
                self.typed(*lhs),
                self.operand(*rhs)
            ),
            Inst::ICmp { pred, lhs, rhs } => format!(
                "icmp {} {}, {}",
                pred.name(),
                self.typed(*lhs),
                self.operand(*rhs)
            ),
            Inst::ZExt { value } => format!("zext {} to {}", self.typed(*value), data.ty),
            Inst::Trunc { value } => format!("trunc {} to {}", self.typed(*value), data.ty),
            Inst::Load { global, index } => {
                format!("load {}, @{}[{}]", data.ty, global, self.typed(*index))
            }
            Inst::Store {
                global,
                index,
                value,
            } => format!(
                "store {}, @{}[{}]",
                self.typed(*value),
                global,
                self.typed(*index)
            ),
            Inst::Call { callee, args } => {
                let args: Vec<String> = args.iter().map(|&a| self.typed(a)).collect();
                format!("call {} @{}({})", data.ty, callee, args.join(", "))
            }
            Inst::MakeRegs { fields } => {
                let fields: Vec<String> = fields.iter().map(|&v| self.typed(v)).collect();
                format!("regs {{ {} }}", fields.join(", "))
            }
            Inst::ExtractReg { regs, field } => {
                format!("extractvalue {}, {}", self.typed(*regs), field)
            }
        };
        if data.ty == Type::Void {
            writeln!(f, "  {}", body)
        } else {
            writeln!(f, "  {} = {}", self.value_name(id), body)
        }
    }

    fn write_terminator(&self, f: &mut fmt::Formatter<'_>, term: &Terminator) -> fmt::Result {
        match *term {
            Terminator::Br { target } => writeln!(f, "  br label %{}", self.block(target).label),
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            } => writeln!(
                f,
                "  br {}, label %{}, label %{}",
                self.typed(cond),
                self.block(then_block).label,
                self.block(else_block).label
            ),
            Terminator::Ret { value } => writeln!(f, "  ret {}", self.typed(value)),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|&p| self.typed(p)).collect();
        let linkage = match self.linkage {
            Linkage::External => "",
            Linkage::Private => "private ",
        };
        writeln!(
            f,
            "define {}{} @{}({}) {{",
            linkage,
            self.ret,
            self.name,
            params.join(", ")
        )?;
        for (idx, block) in self.blocks.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.label)?;
            for &id in &block.insts {
                self.write_inst(f, id)?;
            }
            match &block.terminator {
                Some(term) => self.write_terminator(f, term)?,
                None => writeln!(f, "  ; missing terminator")?,
            }
        }
        writeln!(f, "}}")
    }
}

/// A global array
#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    pub elem: Type,
    pub len: usize,
}

/// An externally provided function
#[derive(Debug, Clone)]
pub struct Extern {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// A translation unit
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub globals: Vec<Global>,
    pub externs: Vec<Extern>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            globals: Vec::new(),
            externs: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn add_global(&mut self, name: impl Into<String>, elem: Type, len: usize) {
        self.globals.push(Global {
            name: name.into(),
            elem,
            len,
        });
    }

    pub fn declare_extern(&mut self, name: impl Into<String>, params: &[Type], ret: Type) {
        self.externs.push(Extern {
            name: name.into(),
            params: params.to_vec(),
            ret,
        });
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Verify every function and every symbol reference
    pub fn verify(&self) -> TranslateResult<()> {
        let callable: BTreeSet<&str> = self
            .externs
            .iter()
            .map(|e| e.name.as_str())
            .chain(self.functions.iter().map(|f| f.name.as_str()))
            .collect();
        let globals: BTreeSet<&str> = self.globals.iter().map(|g| g.name.as_str()).collect();

        for func in &self.functions {
            func.verify()?;
            for data in &func.values {
                let (symbol, known) = match &data.inst {
                    Inst::Call { callee, .. } => (callee, callable.contains(callee.as_str())),
                    Inst::Load { global, .. } | Inst::Store { global, .. } => {
                        (global, globals.contains(global.as_str()))
                    }
                    _ => continue,
                };
                if !known {
                    return Err(TranslateError::UndeclaredSymbol {
                        function: func.name.clone(),
                        symbol: symbol.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "%regs = type {{ i8, i8, i8, i1, i1, i1, i1 }}")?;
        if !self.globals.is_empty() {
            writeln!(f)?;
        }
        for global in &self.globals {
            writeln!(
                f,
                "@{} = private global [{} x {}] zeroinitializer",
                global.name, global.len, global.elem
            )?;
        }
        if !self.externs.is_empty() {
            writeln!(f)?;
        }
        for ext in &self.externs {
            let params: Vec<String> = ext.params.iter().map(|t| t.to_string()).collect();
            writeln!(f, "declare {} @{}({})", ext.ret, ext.name, params.join(", "))?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

/// Appends instructions to one block of a function
pub struct Builder<'f> {
    func: &'f mut Function,
    block: BlockId,
}

impl<'f> Builder<'f> {
    pub fn new(func: &'f mut Function, block: BlockId) -> Self {
        Builder { func, block }
    }

    pub fn func(&self) -> &Function {
        &*self.func
    }

    pub fn func_mut(&mut self) -> &mut Function {
        &mut *self.func
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    fn emit(&mut self, inst: Inst, ty: Type) -> ValueId {
        let id = self.func.push_value(inst, ty, None);
        self.func.blocks[self.block.index()].insts.push(id);
        id
    }

    /// Constants live in the arena but not in any block
    pub fn const_int(&mut self, ty: Type, value: u16) -> ValueId {
        self.func
            .push_value(Inst::Const { value: value & ty.mask() }, ty, None)
    }

    pub fn word(&mut self, value: u8) -> ValueId {
        self.const_int(Type::I8, value as u16)
    }

    pub fn addr(&mut self, value: u16) -> ValueId {
        self.const_int(Type::I16, value)
    }

    pub fn flag(&mut self, value: bool) -> ValueId {
        self.const_int(Type::I1, value as u16)
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.ty(lhs);
        debug_assert_eq!(ty, self.func.ty(rhs), "{:?} operand types differ", op);
        match (self.func.const_value(lhs), self.func.const_value(rhs)) {
            (Some(l), Some(r)) => self.const_int(ty, op.fold(l, r, ty)),
            _ => self.emit(Inst::Binary { op, lhs, rhs }, ty),
        }
    }

    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    pub fn and(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::And, lhs, rhs)
    }

    pub fn or(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Or, lhs, rhs)
    }

    pub fn xor(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Xor, lhs, rhs)
    }

    pub fn shl(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Shl, lhs, rhs)
    }

    pub fn icmp(&mut self, pred: Predicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.ty(lhs);
        match (self.func.const_value(lhs), self.func.const_value(rhs)) {
            (Some(l), Some(r)) => self.flag(pred.fold(l, r, ty)),
            _ => self.emit(Inst::ICmp { pred, lhs, rhs }, Type::I1),
        }
    }

    pub fn zext(&mut self, value: ValueId, ty: Type) -> ValueId {
        match self.func.const_value(value) {
            Some(v) => self.const_int(ty, v),
            None => self.emit(Inst::ZExt { value }, ty),
        }
    }

    pub fn trunc(&mut self, value: ValueId, ty: Type) -> ValueId {
        match self.func.const_value(value) {
            Some(v) => self.const_int(ty, v),
            None => self.emit(Inst::Trunc { value }, ty),
        }
    }

    pub fn load(&mut self, global: &str, ty: Type, index: ValueId) -> ValueId {
        self.emit(
            Inst::Load {
                global: global.to_string(),
                index,
            },
            ty,
        )
    }

    pub fn store(&mut self, global: &str, index: ValueId, value: ValueId) {
        self.emit(
            Inst::Store {
                global: global.to_string(),
                index,
                value,
            },
            Type::Void,
        );
    }

    pub fn call(&mut self, callee: &str, ret: Type, args: &[ValueId]) -> ValueId {
        self.emit(
            Inst::Call {
                callee: callee.to_string(),
                args: args.to_vec(),
            },
            ret,
        )
    }

    pub fn make_regs(&mut self, fields: [ValueId; 7]) -> ValueId {
        self.emit(Inst::MakeRegs { fields }, Type::Regs)
    }

    pub fn extract_reg(&mut self, regs: ValueId, field: usize, ty: Type) -> ValueId {
        self.emit(Inst::ExtractReg { regs, field }, ty)
    }

    fn terminate(&mut self, term: Terminator) {
        let block = &mut self.func.blocks[self.block.index()];
        assert!(
            block.terminator.is_none(),
            "block {} terminated twice",
            block.label
        );
        block.terminator = Some(term);
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br { target });
    }

    pub fn cond_br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: ValueId) {
        self.terminate(Terminator::Ret { value });
    }
}

// state.rs - Symbolic register state
//
// Every block starts with one phi per register. Lowering reads and writes the
// block's current values; control transfers hand those values to the phis of
// the destination block, one incoming entry per edge.

use crate::ir::{BlockId, Function, Type, ValueId};
use std::fmt;

/// Registers and condition flags tracked through translated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    A,
    X,
    Y,
    /// Negative
    N,
    /// Overflow
    V,
    /// Zero
    Z,
    /// Carry
    C,
}

impl Register {
    /// Field order of the register aggregate and of function parameters
    pub const ALL: [Register; 7] = [
        Register::A,
        Register::X,
        Register::Y,
        Register::N,
        Register::V,
        Register::Z,
        Register::C,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::A => "A",
            Register::X => "X",
            Register::Y => "Y",
            Register::N => "N",
            Register::V => "V",
            Register::Z => "Z",
            Register::C => "C",
        }
    }

    pub fn is_flag(self) -> bool {
        matches!(self, Register::N | Register::V | Register::Z | Register::C)
    }

    pub fn ty(self) -> Type {
        if self.is_flag() {
            Type::I1
        } else {
            Type::I8
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Current value of every register within one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterState {
    phis: [ValueId; 7],
    values: [ValueId; 7],
}

impl RegisterState {
    /// Seed a block with one merge placeholder per register
    pub fn seed(func: &mut Function, block: BlockId, addr: u16) -> Self {
        let phis = Register::ALL
            .map(|reg| func.add_phi(block, reg.ty(), format!("{}_{:04X}", reg, addr)));
        RegisterState { phis, values: phis }
    }

    pub fn get(&self, reg: Register) -> ValueId {
        self.values[reg.index()]
    }

    pub fn set(&mut self, reg: Register, value: ValueId) {
        self.values[reg.index()] = value;
    }

    /// The block's merge placeholder for `reg`
    pub fn phi(&self, reg: Register) -> ValueId {
        self.phis[reg.index()]
    }

    /// Current values in `Register::ALL` order
    pub fn values(&self) -> [ValueId; 7] {
        self.values
    }

    /// Feed `values` into this block's phis along the edge from `from`
    pub fn receive(&self, func: &mut Function, values: [ValueId; 7], from: BlockId) {
        for reg in Register::ALL {
            func.add_incoming(self.phi(reg), values[reg.index()], from);
        }
    }

    /// Hand the current values to `dest` along the edge from `from`
    pub fn propagate(&self, func: &mut Function, from: BlockId, dest: &RegisterState) {
        dest.receive(func, self.values, from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Linkage};

    #[test]
    fn test_reads_fall_back_to_phi() {
        let mut func = Function::new("f", Linkage::Private, &[], Type::I8);
        let block = func.add_block("l_8000");
        let mut state = RegisterState::seed(&mut func, block, 0x8000);
        assert_eq!(state.get(Register::X), state.phi(Register::X));
        assert_eq!(func.ty(state.phi(Register::Z)), Type::I1);
        assert_eq!(func.block(block).insts.len(), 7);

        let five = Builder::new(&mut func, block).word(5);
        state.set(Register::X, five);
        assert_eq!(state.get(Register::X), five);
        assert_eq!(state.get(Register::A), state.phi(Register::A));
        assert_eq!(func.value(state.phi(Register::A)).name.as_deref(), Some("A_8000"));
    }

    #[test]
    fn test_propagate_fills_every_phi_once() {
        let mut func = Function::new("f", Linkage::Private, &[], Type::I8);
        let src = func.add_block("l_8000");
        let dst = func.add_block("l_8002");
        let mut from = RegisterState::seed(&mut func, src, 0x8000);
        let to = RegisterState::seed(&mut func, dst, 0x8002);
        let one = Builder::new(&mut func, src).word(1);
        from.set(Register::A, one);
        from.propagate(&mut func, src, &to);

        for reg in Register::ALL {
            let incoming = func.incoming(to.phi(reg));
            assert_eq!(incoming.len(), 1);
            assert_eq!(incoming[0].1, src);
        }
        assert_eq!(func.incoming(to.phi(Register::A))[0].0, one);
        assert_eq!(
            func.incoming(to.phi(Register::Y))[0].0,
            from.phi(Register::Y)
        );
    }
}

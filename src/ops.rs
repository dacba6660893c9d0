use std::fmt;

use crate::symbol::Register;

/// Operation identifiers for the supported ARM subset.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    Add,
    Sub,
    /// Reverse subtract: dest = op2 - op1.
    Rsb,
    Mov,
    /// Load low halfword, preserving the high half.
    Movw,
    /// Load high halfword, preserving the low half.
    Movt,
    Str,
    Ldr,
    Strb,
    Ldrb,
    /// Push a register list, full descending.
    Stmfd,
    /// Pop a register list, full descending.
    Ldmfd,
    Cmp,
    B,
    Bl,
    Bx,
    Ble,
    /// Unsigned "lower or same" by convention; shares ble's flag test here.
    Bls,
    Bne,
    /// Signed 32x32 -> 64 multiply, split across two destinations.
    Smull,
}

/// Mnemonic lookup table. Mnemonics are case-sensitive lowercase.
const MNEMONICS: [(&str, Opcode); 20] = [
    ("add", Opcode::Add),
    ("sub", Opcode::Sub),
    ("rsb", Opcode::Rsb),
    ("mov", Opcode::Mov),
    ("movw", Opcode::Movw),
    ("movt", Opcode::Movt),
    ("str", Opcode::Str),
    ("ldr", Opcode::Ldr),
    ("strb", Opcode::Strb),
    ("ldrb", Opcode::Ldrb),
    ("stmfd", Opcode::Stmfd),
    ("ldmfd", Opcode::Ldmfd),
    ("cmp", Opcode::Cmp),
    ("b", Opcode::B),
    ("bl", Opcode::Bl),
    ("bx", Opcode::Bx),
    ("ble", Opcode::Ble),
    ("bls", Opcode::Bls),
    ("bne", Opcode::Bne),
    ("smull", Opcode::Smull),
];

impl Opcode {
    pub fn from_mnemonic(s: &str) -> Option<Opcode> {
        MNEMONICS
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, op)| *op)
    }

    /// Branch-family opcodes take their whole remaining line as one label.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::B | Opcode::Bl | Opcode::Ble | Opcode::Bls | Opcode::Bne
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = MNEMONICS
            .iter()
            .find(|(_, op)| op == self)
            .map(|(name, _)| *name)
            .unwrap_or("?");
        f.write_str(name)
    }
}

/// Handle for a branch-target label, allocated on first reference so forward
/// branches assemble before their target is seen. Resolved by
/// [`crate::program::Program::backpatch`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct JumpSlot(pub usize);

/// A resolved addressing descriptor.
///
/// The tagged variants replace the original implementation's `-1` register
/// sentinel, so "is this an immediate" is never a magic-number comparison.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operand {
    /// Pure immediate value.
    Imm(i32),
    /// Register, optionally displaced and/or shifted.
    Reg {
        reg: Register,
        /// Base+offset displacement for `[reg, #off]` addressing.
        offs: i32,
        /// Negative = logical shift right, positive = logical shift left.
        shift: i32,
    },
    /// Branch target, only present on branch-family instructions.
    Target(JumpSlot),
}

impl Operand {
    pub fn reg(reg: Register) -> Operand {
        Operand::Reg {
            reg,
            offs: 0,
            shift: 0,
        }
    }
}

/// An assembled instruction: opcode plus operands whose count and meaning
/// are opcode-specific. Immutable once appended to a program.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Instruction {
    pub op: Opcode,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(op: Opcode, operands: Vec<Operand>) -> Self {
        Instruction { op, operands }
    }
}

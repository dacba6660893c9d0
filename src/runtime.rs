use std::io::{self, stdout, Write};

use colored::Colorize;
use miette::{bail, Result};

use crate::ops::{Instruction, JumpSlot, Opcode, Operand};
use crate::program::{LabelState, Program, DATA_BASE};
use crate::symbol::{Register, REGISTER_COUNT, REGISTER_NAMES};

/// The machine addresses 32 KiB of memory as 8192 words.
pub const MEMORY_WORDS: usize = 8192;
const MEMORY_BYTES: i32 = (MEMORY_WORDS * 4) as i32;
/// Initial stack top, a byte address below the static-data boundary.
const STACK_TOP: i32 = 1024;
/// Return-address sentinel past any valid instruction index, so a `bx lr`
/// at the top level terminates the run.
const HALT_ADDR: i32 = MEMORY_WORDS as i32;

/// Jump slot resolved for execution.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum JumpTarget {
    /// Instruction index of the label definition.
    Index(usize),
    /// Reserved system-call id.
    Syscall(i32),
}

/// Condition flags recomputed destructively by `cmp`.
///
/// Overflow is tracked but never set by any operation; no opcode computes
/// it.
#[derive(Clone, Copy, Default, Debug)]
struct CondFlags {
    zero: bool,
    negative: bool,
    overflow: bool,
}

/// Owns an assembled program and the state it executes against.
pub struct Machine {
    program: Vec<Instruction>,
    state: RunState,
    /// Instruction index of `main`.
    entry: usize,
    /// Block on a line of stdin before each instruction. Debug aid only;
    /// never affects computed results.
    step: bool,
}

/// Complete mutable state during execution: register file, word-oriented
/// memory, condition flags, and the resolved jump table.
pub struct RunState {
    /// Word-oriented backing store, byte-addressed through the multiplexer.
    mem: Box<[i32; MEMORY_WORDS]>,
    regs: [i32; REGISTER_COUNT],
    flags: CondFlags,
    /// Slot id -> resolved target, read-only during execution.
    jumps: Vec<JumpTarget>,
}

impl Machine {
    /// Build a machine from a backpatched program: resolve every jump slot,
    /// locate `main`, and load the static data image.
    pub fn try_from(program: Program, step: bool) -> Result<Machine> {
        let mut jumps = Vec::with_capacity(program.label_count());
        for i in 0..program.label_count() {
            jumps.push(match program.label_state(JumpSlot(i)) {
                LabelState::At(idx) => JumpTarget::Index(idx),
                LabelState::Syscall(id) => JumpTarget::Syscall(id),
                LabelState::Unresolved(_) => bail!(
                    code = "run::unresolved",
                    "Program was not backpatched before execution"
                ),
            });
        }

        let entry = match program.lookup("main") {
            Some(LabelState::At(idx)) => idx,
            _ => bail!(
                code = "run::no_entry",
                help = "define a code label named `main` in the .text section",
                "Program has no `main` entry point"
            ),
        };

        let mut state = RunState {
            mem: Box::new([0; MEMORY_WORDS]),
            regs: [0; REGISTER_COUNT],
            flags: CondFlags::default(),
            jumps,
        };
        state.regs[Register::Sp.index()] = STACK_TOP;

        for (i, byte) in program.data().iter().enumerate() {
            state.write_byte(DATA_BASE + i as i32, *byte as i32)?;
        }

        Ok(Machine {
            program: program.instructions().to_vec(),
            state,
            entry,
            step,
        })
    }

    /// Fetch/decode/execute until the program counter leaves the program.
    pub fn run(&mut self) -> Result<()> {
        *self.state.reg_mut(Register::Pc) = self.entry as i32;
        *self.state.reg_mut(Register::Lr) = HALT_ADDR;
        loop {
            let pc = self.state.reg(Register::Pc);
            let Ok(idx) = usize::try_from(pc) else { break };
            if idx >= self.program.len() {
                break;
            }
            if self.step {
                self.step_prompt(idx);
            }
            self.state.exec(&self.program[idx])?;
            // Redirecting instructions set pc to target - 1 so this
            // increment lands on the target
            *self.state.reg_mut(Register::Pc) += 1;
        }
        Ok(())
    }

    /// Final register values in canonical order, for the post-run dump.
    pub fn registers(&self) -> impl Iterator<Item = (&'static str, i32)> + '_ {
        REGISTER_NAMES.iter().copied().zip(self.state.regs)
    }

    fn step_prompt(&self, idx: usize) {
        let f = self.state.flags;
        eprint!(
            "{:>12} [{idx}] {} (z={} n={} v={}) ",
            "Step".cyan(),
            self.program[idx].op,
            f.zero as u8,
            f.negative as u8,
            f.overflow as u8
        );
        let _ = io::stderr().flush();
        let mut line = String::new();
        let _ = io::stdin().read_line(&mut line);
    }
}

/// Operand at a fixed position, opcode-specific.
fn param(i: &Instruction, n: usize) -> Result<&Operand> {
    match i.operands.get(n) {
        Some(op) => Ok(op),
        None => bail!(
            code = "run::missing_operand",
            "Instruction `{}` is missing operand {}",
            i.op,
            n
        ),
    }
}

impl RunState {
    #[inline]
    fn reg(&self, r: Register) -> i32 {
        self.regs[r.index()]
    }

    #[inline]
    fn reg_mut(&mut self, r: Register) -> &mut i32 {
        &mut self.regs[r.index()]
    }

    /// Resolve an operand to a value: a pure immediate, or register value
    /// plus displacement.
    fn value(&self, op: &Operand) -> Result<i32> {
        match op {
            Operand::Imm(v) => Ok(*v),
            Operand::Reg { reg, offs, .. } => Ok(self.reg(*reg).wrapping_add(*offs)),
            Operand::Target(_) => bail!(
                code = "run::bad_operand",
                "Branch target used as a value operand"
            ),
        }
    }

    /// Storage cell for a destination operand, which must name a register.
    fn dest(&mut self, op: &Operand) -> Result<&mut i32> {
        match op {
            Operand::Reg { reg, .. } => Ok(self.reg_mut(*reg)),
            _ => bail!(
                code = "run::bad_operand",
                help = "this operand position must name a register",
                "Register required, found an immediate"
            ),
        }
    }

    // --- Byte/word memory multiplexer ---------------------------------

    fn word_index(addr: i32) -> Result<usize> {
        if !(0..MEMORY_BYTES).contains(&addr) {
            bail!(
                code = "run::oob",
                "Memory access at {addr} is outside the {MEMORY_BYTES}-byte store"
            )
        }
        if addr % 4 != 0 {
            bail!(
                code = "run::misaligned",
                help = "word accesses require a 4-byte aligned address; use ldrb/strb for bytes",
                "Misaligned word access at address {addr}"
            )
        }
        Ok((addr / 4) as usize)
    }

    fn byte_slot(addr: i32) -> Result<(usize, u32)> {
        if !(0..MEMORY_BYTES).contains(&addr) {
            bail!(
                code = "run::oob",
                "Memory access at {addr} is outside the {MEMORY_BYTES}-byte store"
            )
        }
        Ok(((addr / 4) as usize, (addr % 4) as u32 * 8))
    }

    fn read_word(&self, addr: i32) -> Result<i32> {
        Ok(self.mem[Self::word_index(addr)?])
    }

    fn write_word(&mut self, addr: i32, val: i32) -> Result<()> {
        self.mem[Self::word_index(addr)?] = val;
        Ok(())
    }

    fn read_byte(&self, addr: i32) -> Result<i32> {
        let (idx, shift) = Self::byte_slot(addr)?;
        Ok(((self.mem[idx] as u32 >> shift) & 0xff) as i32)
    }

    /// Writes one byte within a word, preserving the other three.
    fn write_byte(&mut self, addr: i32, val: i32) -> Result<()> {
        let (idx, shift) = Self::byte_slot(addr)?;
        let word = self.mem[idx] as u32;
        let mask = 0xffu32 << shift;
        self.mem[idx] = ((word & !mask) | ((val as u32 & 0xff) << shift)) as i32;
        Ok(())
    }

    // --- Per-opcode semantics -----------------------------------------

    fn exec(&mut self, i: &Instruction) -> Result<()> {
        match i.op {
            Opcode::Add => self.arith(i, |a, b| a.wrapping_add(b)),
            Opcode::Sub => self.arith(i, |a, b| a.wrapping_sub(b)),
            Opcode::Rsb => self.arith(i, |a, b| b.wrapping_sub(a)),
            Opcode::Mov => self.mov(i),
            Opcode::Movw => self.movw(i),
            Opcode::Movt => self.movt(i),
            Opcode::Str => self.str(i),
            Opcode::Ldr => self.ldr(i),
            Opcode::Strb => self.strb(i),
            Opcode::Ldrb => self.ldrb(i),
            Opcode::Stmfd => self.stmfd(i),
            Opcode::Ldmfd => self.ldmfd(i),
            Opcode::Cmp => self.cmp(i),
            Opcode::B => self.branch(i, false),
            Opcode::Bl => self.branch(i, true),
            // bls is documented as the unsigned variant but shares ble's
            // flag test; no unsigned comparison path exists
            Opcode::Ble | Opcode::Bls => self.branch_if(i, self.flags.zero || self.flags.negative),
            Opcode::Bne => self.branch_if(i, !self.flags.zero),
            Opcode::Bx => self.bx(i),
            Opcode::Smull => self.smull(i),
        }
    }

    fn arith(&mut self, i: &Instruction, f: impl Fn(i32, i32) -> i32) -> Result<()> {
        let a = self.value(param(i, 1)?)?;
        let b = self.value(param(i, 2)?)?;
        *self.dest(param(i, 0)?)? = f(a, b);
        Ok(())
    }

    fn mov(&mut self, i: &Instruction) -> Result<()> {
        let src = param(i, 1)?;
        let mut v = self.value(src)?;
        if let Operand::Reg { shift, .. } = src {
            // Negative = logical right, positive = logical left
            if *shift < 0 {
                v = (v as u32).checked_shr(shift.unsigned_abs()).unwrap_or(0) as i32;
            } else if *shift > 0 {
                v = (v as u32).checked_shl(*shift as u32).unwrap_or(0) as i32;
            }
        }
        *self.dest(param(i, 0)?)? = v;
        Ok(())
    }

    /// Set the low halfword, preserving the high half.
    fn movw(&mut self, i: &Instruction) -> Result<()> {
        let imm = self.value(param(i, 1)?)?;
        let dest = self.dest(param(i, 0)?)?;
        *dest = (*dest & !0xffff) | (imm & 0xffff);
        Ok(())
    }

    /// Set the high halfword, preserving the low half.
    fn movt(&mut self, i: &Instruction) -> Result<()> {
        let imm = self.value(param(i, 1)?)?;
        let dest = self.dest(param(i, 0)?)?;
        *dest = (*dest & 0xffff) | (((imm as u32) << 16) as i32);
        Ok(())
    }

    fn str(&mut self, i: &Instruction) -> Result<()> {
        let val = self.value(param(i, 0)?)?;
        let addr = self.value(param(i, 1)?)?;
        self.write_word(addr, val)
    }

    fn ldr(&mut self, i: &Instruction) -> Result<()> {
        let addr = self.value(param(i, 1)?)?;
        let val = self.read_word(addr)?;
        *self.dest(param(i, 0)?)? = val;
        Ok(())
    }

    fn strb(&mut self, i: &Instruction) -> Result<()> {
        let val = self.value(param(i, 0)?)?;
        let addr = self.value(param(i, 1)?)?;
        self.write_byte(addr, val)
    }

    fn ldrb(&mut self, i: &Instruction) -> Result<()> {
        let addr = self.value(param(i, 1)?)?;
        let val = self.read_byte(addr)?;
        *self.dest(param(i, 0)?)? = val;
        Ok(())
    }

    /// Push a register list, full descending: pre-decrement per register,
    /// list in given order, base left at the lowest address.
    fn stmfd(&mut self, i: &Instruction) -> Result<()> {
        let base = self.register_operand(i, 0)?;
        let mut addr = self.reg(base);
        for op in &i.operands[1..] {
            let Operand::Reg { reg, .. } = op else {
                bail!(
                    code = "run::bad_operand",
                    "stmfd register list may only contain registers"
                )
            };
            addr -= 4;
            self.write_word(addr, self.reg(*reg))?;
        }
        *self.reg_mut(base) = addr;
        Ok(())
    }

    /// Pop mirror of [`stmfd`]: ascending reads assign the list in reverse
    /// order, base left at the highest address.
    ///
    /// [`stmfd`]: RunState::stmfd
    fn ldmfd(&mut self, i: &Instruction) -> Result<()> {
        let base = self.register_operand(i, 0)?;
        let mut addr = self.reg(base);
        for op in i.operands[1..].iter().rev() {
            let Operand::Reg { reg, .. } = op else {
                bail!(
                    code = "run::bad_operand",
                    "ldmfd register list may only contain registers"
                )
            };
            *self.reg_mut(*reg) = self.read_word(addr)?;
            addr += 4;
        }
        *self.reg_mut(base) = addr;
        Ok(())
    }

    /// Recompute flags from a - b. The difference is taken in 64 bits so
    /// INT32_MIN comparisons keep their sign. Overflow is always cleared.
    fn cmp(&mut self, i: &Instruction) -> Result<()> {
        let a = self.value(param(i, 0)?)? as i64;
        let b = self.value(param(i, 1)?)? as i64;
        let diff = a - b;
        self.flags = CondFlags {
            zero: diff == 0,
            negative: diff < 0,
            overflow: false,
        };
        Ok(())
    }

    fn branch(&mut self, i: &Instruction, save_lr: bool) -> Result<()> {
        let Operand::Target(slot) = *param(i, 0)? else {
            bail!(
                code = "run::bad_operand",
                "Branch instruction without a resolved target"
            )
        };
        let target = self.jumps[slot.0];
        match target {
            JumpTarget::Syscall(id) => self.syscall(id),
            JumpTarget::Index(idx) => {
                if save_lr {
                    *self.reg_mut(Register::Lr) = self.reg(Register::Pc);
                }
                *self.reg_mut(Register::Pc) = idx as i32 - 1;
            }
        }
        Ok(())
    }

    fn branch_if(&mut self, i: &Instruction, taken: bool) -> Result<()> {
        if taken {
            self.branch(i, false)?;
        }
        Ok(())
    }

    /// Subroutine return: load the counter from the named register. `bl`
    /// saved the call site's own index, so the loop increment resumes at
    /// the following instruction.
    fn bx(&mut self, i: &Instruction) -> Result<()> {
        let target = self.register_operand(i, 0)?;
        *self.reg_mut(Register::Pc) = self.reg(target);
        Ok(())
    }

    /// Widen both operands to 64 bits, multiply, split the product.
    fn smull(&mut self, i: &Instruction) -> Result<()> {
        let a = self.value(param(i, 2)?)? as i64;
        let b = self.value(param(i, 3)?)? as i64;
        let prod = a * b;
        *self.dest(param(i, 0)?)? = prod as i32;
        *self.dest(param(i, 1)?)? = (prod >> 32) as i32;
        Ok(())
    }

    fn register_operand(&self, i: &Instruction, n: usize) -> Result<Register> {
        match param(i, n)? {
            Operand::Reg { reg, .. } => Ok(*reg),
            _ => bail!(
                code = "run::bad_operand",
                help = "this operand position must name a register",
                "Instruction `{}` requires a register operand",
                i.op
            ),
        }
    }

    /// System-call shim: reserved negative targets map to host-visible
    /// effects. Only `putc` is defined; unknown ids are ignored.
    fn syscall(&mut self, id: i32) {
        match id {
            // putc: write the character held in r0 to stdout
            -1 => {
                if let Some(chr) = char::from_u32(self.reg(Register::R0) as u32) {
                    print!("{chr}");
                    let _ = stdout().flush();
                }
            }
            _ => eprintln!("{:>12} unknown syscall id {id}", "Warning".yellow()),
        }
    }
}

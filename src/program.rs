use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use miette::{bail, LabeledSpan, Result, Severity};

use crate::ops::{Instruction, JumpSlot};
use crate::span::Span;

type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Byte address where the static-data cursor starts. The stack lives below
/// this boundary, rodata above it.
pub const DATA_BASE: i32 = 4096;

/// Resolution state of a branch-target label.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LabelState {
    /// Referenced but not yet defined; span of the first reference.
    Unresolved(Span),
    /// Defined; resolves to the index of the next real instruction.
    At(usize),
    /// Reserved system-call pseudo-target, never resolved to code.
    Syscall(i32),
}

/// The assembled artifact: instruction stream, label tables, and the static
/// data image. Built once by the parser, then finalized with [`backpatch`]
/// before execution.
///
/// [`backpatch`]: Program::backpatch
pub struct Program {
    instrs: Vec<Instruction>,
    /// Jump-label table. A label's slot id is its index in this map, so
    /// slots are allocated on first reference in insertion order.
    labels: FxMap<String, LabelState>,
    /// Data-section label -> resolved byte address.
    data_labels: FxMap<String, i32>,
    /// Bytes assembled by `.ascii`, contiguous from [`DATA_BASE`].
    data: Vec<u8>,
}

impl Program {
    pub fn new() -> Self {
        let mut labels = IndexMap::with_hasher(FxBuildHasher::default());
        // Reserved pseudo-targets
        labels.insert("putc".to_string(), LabelState::Syscall(-1));
        Program {
            instrs: Vec::new(),
            labels,
            data_labels: IndexMap::with_hasher(FxBuildHasher::default()),
            data: Vec::new(),
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instrs
    }

    pub fn add_instr(&mut self, instr: Instruction) {
        self.instrs.push(instr);
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Slot for a branch-target label, allocated on first reference so that
    /// forward branches assemble before their definition is seen.
    pub fn slot(&mut self, name: &str, span: Span) -> JumpSlot {
        if let Some(idx) = self.labels.get_index_of(name) {
            return JumpSlot(idx);
        }
        let (idx, _) = self
            .labels
            .insert_full(name.to_string(), LabelState::Unresolved(span));
        JumpSlot(idx)
    }

    /// Define a code label at the current end of the program, i.e. the index
    /// of the next real instruction.
    pub fn define_code_label(&mut self, name: &str, span: Span) -> Result<JumpSlot> {
        let at = LabelState::At(self.instrs.len());
        match self.labels.entry(name.to_string()) {
            indexmap::map::Entry::Occupied(mut entry) => match entry.get() {
                LabelState::Unresolved(_) => {
                    entry.insert(at);
                }
                LabelState::At(_) | LabelState::Syscall(_) => bail!(
                    severity = Severity::Error,
                    code = "asm::duplicate_label",
                    help = "each code label may only be defined once",
                    labels = vec![LabeledSpan::at(span, "duplicate label")],
                    "Duplicate definition of label '{name}'"
                ),
            },
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(at);
            }
        }
        Ok(JumpSlot(self.labels.get_index_of(name).unwrap()))
    }

    /// State for a slot handle. Panics on a slot not produced by this
    /// program, which cannot happen through the parser.
    pub fn label_state(&self, slot: JumpSlot) -> LabelState {
        *self.labels.get_index(slot.0).unwrap().1
    }

    pub fn lookup(&self, name: &str) -> Option<LabelState> {
        self.labels.get(name).copied()
    }

    /// Number of allocated jump slots.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Finalization pass: every referenced label must have been defined.
    /// Reports the first unresolved label as a named error instead of
    /// silently branching to instruction zero.
    pub fn backpatch(&self) -> Result<()> {
        for (name, state) in &self.labels {
            if let LabelState::Unresolved(span) = state {
                bail!(
                    severity = Severity::Error,
                    code = "asm::undefined_label",
                    help = "branch targets must be defined somewhere in the file",
                    labels = vec![LabeledSpan::at(*span, "undefined label")],
                    "Branch to undefined label '{name}'"
                )
            }
        }
        Ok(())
    }

    pub fn define_data_label(&mut self, name: &str, addr: i32) {
        self.data_labels.insert(name.to_string(), addr);
    }

    pub fn data_label(&self, name: &str) -> Option<i32> {
        self.data_labels.get(name).copied()
    }

    /// Next free byte address in the static-data region.
    pub fn data_cursor(&self) -> i32 {
        DATA_BASE + self.data.len() as i32
    }

    pub fn push_data(&mut self, byte: u8) {
        self.data.push(byte);
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Default for Program {
    fn default() -> Self {
        Program::new()
    }
}

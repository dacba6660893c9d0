use colored::Colorize;
use miette::{bail, LabeledSpan, Result, Severity};

use crate::lexer;
use crate::ops::{Instruction, Opcode, Operand};
use crate::program::Program;
use crate::span::Span;
use crate::symbol::Register;

/// Which section the assembler is currently filling. Labels mean different
/// things in each.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Section {
    Text,
    Data,
}

/// Transforms GNU-style ARM assembly source into a [`Program`].
///
/// Line-driven: the first word of each line is a directive, a label
/// definition, a comment, or a mnemonic. Unknown mnemonics and register
/// names warn and degrade instead of aborting, so partial programs still
/// assemble.
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    /// Program being assembled
    program: Program,
    /// Current section
    section: Section,
    /// Byte offset of the current line within `src`
    line_offs: usize,
    /// 1-based line number, for warnings
    line: usize,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            src,
            program: Program::new(),
            section: Section::Text,
            line_offs: 0,
            line: 1,
        }
    }

    /// Assemble the whole source. Errors carry the source text for
    /// rendering.
    pub fn parse(mut self) -> Result<Program> {
        let src = self.src;
        let mut offs = 0;
        for raw_line in src.split('\n') {
            self.line_offs = offs;
            self.parse_line(raw_line.trim_end_matches('\r'))
                .map_err(|e| e.with_source_code(src.to_string()))?;
            offs += raw_line.len() + 1;
            self.line += 1;
        }
        Ok(self.program)
    }

    fn parse_line(&mut self, line: &str) -> Result<()> {
        let is_pad = |c: char| c == ' ' || c == '\t';
        let trimmed = line.trim_matches(is_pad);
        if trimmed.is_empty() {
            return Ok(());
        }
        let lead = line.len() - line.trim_start_matches(is_pad).len();

        let (head, rest, rest_offs) = match trimmed.find([' ', '\t']) {
            Some(i) => (&trimmed[..i], &trimmed[i + 1..], i + 1),
            None => (trimmed, "", trimmed.len()),
        };
        let head_span = Span::new(self.line_offs + lead, head.len());
        let rest_base = self.line_offs + lead + rest_offs;

        // Comment lines are ignored entirely
        if head.starts_with('@') {
            return Ok(());
        }

        match head {
            ".text" => {
                self.section = Section::Text;
                return Ok(());
            }
            ".section" => {
                match rest.trim_matches(is_pad) {
                    ".rodata" => self.section = Section::Data,
                    other => self.warn(&format!("unknown section '{other}'")),
                }
                return Ok(());
            }
            ".ascii" => {
                let lit = rest.trim_matches(is_pad);
                let lit_base = rest_base + (rest.len() - rest.trim_start_matches(is_pad).len());
                return self.parse_ascii(lit, lit_base);
            }
            // Accepted and ignored
            ".global" | ".arch" | ".fpu" | ".file" | ".eabi_attribute" | ".ident" | ".align" => {
                return Ok(());
            }
            _ => {}
        }

        // Label definition
        if let Some(name) = head.strip_suffix(':') {
            match self.section {
                Section::Data => {
                    let addr = self.program.data_cursor();
                    self.program.define_data_label(name, addr);
                }
                Section::Text => {
                    self.program.define_code_label(name, head_span)?;
                }
            }
            return Ok(());
        }

        let Some(op) = Opcode::from_mnemonic(head) else {
            self.warn(&format!("unknown mnemonic '{head}', line skipped"));
            return Ok(());
        };

        // Branch mnemonics take the whole remaining line as one label,
        // resolved through the jump table
        let operands = if op.is_branch() {
            let label = rest.trim_matches(is_pad);
            let label_base = rest_base + (rest.len() - rest.trim_start_matches(is_pad).len());
            let span = Span::new(label_base, label.len());
            vec![Operand::Target(self.program.slot(label, span))]
        } else {
            self.parse_operands(rest, rest_base)?
        };

        self.program.add_instr(Instruction::new(op, operands));
        Ok(())
    }

    /// Decode an `.ascii "literal"` directive into bytes at the data
    /// cursor. Only the `\000` (dropped) and `\012` (newline) escapes the
    /// compiler emits are understood.
    fn parse_ascii(&mut self, lit: &str, base: usize) -> Result<()> {
        let span = Span::new(base, lit.len());
        let inner = lit.strip_prefix('"').and_then(|s| s.strip_suffix('"'));
        let Some(inner) = inner else {
            bail!(
                severity = Severity::Error,
                code = "asm::ascii",
                help = ".ascii requires a double-quoted string literal",
                labels = vec![LabeledSpan::at(span, "not a string literal")],
                "Malformed .ascii directive"
            )
        };
        let decoded = inner.replace("\\000", "").replace("\\012", "\n");
        for byte in decoded.bytes() {
            self.program.push_data(byte);
        }
        Ok(())
    }

    /// Resolve the operand text of one non-branch instruction. A two-token
    /// lookahead folds `reg, asr #n` / `reg, asl #n` into a shifted
    /// register operand.
    fn parse_operands(&mut self, text: &str, base: usize) -> Result<Vec<Operand>> {
        let toks = lexer::tokenize(text);
        let mut operands = Vec::new();
        let mut i = 0;
        while i < toks.len() {
            if i + 2 < toks.len() {
                let dir = match toks[i + 1].text {
                    "asr" => Some(-1),
                    "asl" => Some(1),
                    _ => None,
                };
                if let Some(dir) = dir {
                    let count =
                        self.parse_immediate(toks[i + 2].text, toks[i + 2].span.rebase(base))?;
                    let span = toks[i].span.rebase(base);
                    let mut vals = self.parse_value(toks[i].text, span)?;
                    match vals.first_mut() {
                        Some(Operand::Reg { shift, .. }) => *shift = dir * count,
                        _ => bail!(
                            severity = Severity::Error,
                            code = "asm::shift_operand",
                            help = "asr/asl modifiers only apply to register operands",
                            labels = vec![LabeledSpan::at(span, "not a register")],
                            "Shift modifier on a non-register operand"
                        ),
                    }
                    operands.extend(vals);
                    i += 3;
                    continue;
                }
            }
            let span = toks[i].span.rebase(base);
            operands.extend(self.parse_value(toks[i].text, span)?);
            i += 1;
        }
        Ok(operands)
    }

    /// Resolve one token into operands. Register lists expand recursively,
    /// everything else produces exactly one operand.
    fn parse_value(&mut self, s: &str, span: Span) -> Result<Vec<Operand>> {
        let s = s.trim_matches(' ');
        let first = s.as_bytes().first().copied().unwrap_or(0);

        if first == b'#' || first.is_ascii_digit() {
            return Ok(vec![Operand::Imm(self.parse_immediate(s, span)?)]);
        }
        if first == b'[' {
            let inner = s[1..].strip_suffix(']').unwrap_or(&s[1..]);
            let mut parts = inner.splitn(2, ',');
            let base = parts.next().unwrap_or("").trim_matches(' ');
            let offs = match parts.next() {
                Some(off) => self.parse_immediate(off, span)?,
                None => 0,
            };
            let operand = match self.reg_value(base) {
                Some(reg) => Operand::Reg {
                    reg,
                    offs,
                    shift: 0,
                },
                // Unknown base degrades to the plain offset
                None => Operand::Imm(offs),
            };
            return Ok(vec![operand]);
        }
        if first == b'{' {
            let inner = s[1..].strip_suffix('}').unwrap_or(&s[1..]);
            let mut vals = Vec::new();
            for part in inner.split(',') {
                vals.extend(self.parse_value(part, span)?);
            }
            return Ok(vals);
        }
        Ok(vec![match self.reg_value(s) {
            Some(reg) => Operand::reg(reg),
            None => Operand::Imm(0),
        }])
    }

    /// Resolve a bare register name, accepting and stripping a trailing
    /// writeback `!`. Unknown names warn and return `None` so the caller
    /// can degrade rather than abort.
    fn reg_value(&self, s: &str) -> Option<Register> {
        let s = s.strip_suffix('!').unwrap_or(s);
        match s.parse::<Register>() {
            Ok(reg) => Some(reg),
            Err(()) => {
                self.warn(&format!("invalid register '{s}'"));
                None
            }
        }
    }

    /// Resolve an immediate token: a literal integer, or a
    /// `:lower16:`/`:upper16:` relocation against a data label.
    fn parse_immediate(&mut self, s: &str, span: Span) -> Result<i32> {
        let s = s.trim_matches(' ');
        let s = s.strip_prefix('#').unwrap_or(s);

        if s.starts_with(':') {
            let parts: Vec<&str> = s.split(':').collect();
            // ":lower16:sym" splits as ["", "lower16", "sym"]
            if parts.len() < 3 {
                bail!(
                    severity = Severity::Error,
                    code = "asm::relocation",
                    help = "relocations look like :lower16:label or :upper16:label",
                    labels = vec![LabeledSpan::at(span, "malformed relocation")],
                    "Malformed relocation immediate"
                )
            }
            let addr = match self.program.data_label(parts[2]) {
                Some(addr) => addr,
                None => bail!(
                    severity = Severity::Error,
                    code = "asm::relocation",
                    help = "the symbol must be a label defined in the data section",
                    labels = vec![LabeledSpan::at(span, "unknown data label")],
                    "Relocation against unknown data label '{}'",
                    parts[2]
                ),
            };
            return match parts[1] {
                "lower16" => Ok(addr & 0xffff),
                // Arithmetic shift keeps parity with the original
                "upper16" => Ok(addr >> 16),
                other => bail!(
                    severity = Severity::Error,
                    code = "asm::relocation",
                    help = "only :lower16: and :upper16: are supported",
                    labels = vec![LabeledSpan::at(span, "unknown relocation kind")],
                    "Unknown relocation kind '{other}'"
                ),
            };
        }

        match s.parse::<i32>() {
            Ok(n) => Ok(n),
            Err(e) => bail!(
                severity = Severity::Error,
                code = "asm::bad_immediate",
                help = "immediates are decimal integers like #42 or #-8",
                labels = vec![LabeledSpan::at(span, "invalid immediate")],
                "Invalid immediate: {e}"
            ),
        }
    }

    fn warn(&self, msg: &str) {
        eprintln!("{:>12} line {}: {}", "Warning".yellow(), self.line, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{LabelState, DATA_BASE};
    use crate::symbol::Register::*;

    fn assemble(src: &str) -> Program {
        AsmParser::new(src).parse().unwrap()
    }

    fn reg(reg: crate::symbol::Register) -> Operand {
        Operand::reg(reg)
    }

    #[test]
    fn parse_add_basic() {
        let prog = assemble("add r0, r1, r2");
        assert_eq!(
            prog.instructions()[0],
            Instruction::new(Opcode::Add, vec![reg(R0), reg(R1), reg(R2)])
        );
    }

    #[test]
    fn parse_add_imm() {
        let prog = assemble("add r0, r1, #-16");
        assert_eq!(
            prog.instructions()[0],
            Instruction::new(Opcode::Add, vec![reg(R0), reg(R1), Operand::Imm(-16)])
        );
    }

    #[test]
    fn parse_base_offset() {
        let prog = assemble("ldr r3, [fp, #-8]");
        assert_eq!(
            prog.instructions()[0],
            Instruction::new(
                Opcode::Ldr,
                vec![
                    reg(R3),
                    Operand::Reg {
                        reg: R12,
                        offs: -8,
                        shift: 0
                    }
                ]
            )
        );
    }

    #[test]
    fn parse_base_without_offset() {
        let prog = assemble("ldr r0, [sp]");
        assert_eq!(
            prog.instructions()[0],
            Instruction::new(
                Opcode::Ldr,
                vec![
                    reg(R0),
                    Operand::Reg {
                        reg: Sp,
                        offs: 0,
                        shift: 0
                    }
                ]
            )
        );
    }

    #[test]
    fn parse_register_list() {
        let prog = assemble("stmfd sp!, {r4, fp, lr}");
        assert_eq!(
            prog.instructions()[0],
            Instruction::new(Opcode::Stmfd, vec![reg(Sp), reg(R4), reg(R12), reg(Lr)])
        );
    }

    #[test]
    fn parse_shift_modifiers() {
        let prog = assemble("mov r2, r3, asr #16\nmov r4, r5, asl #2");
        assert_eq!(
            prog.instructions()[0],
            Instruction::new(
                Opcode::Mov,
                vec![
                    reg(R2),
                    Operand::Reg {
                        reg: R3,
                        offs: 0,
                        shift: -16
                    }
                ]
            )
        );
        assert_eq!(
            prog.instructions()[1],
            Instruction::new(
                Opcode::Mov,
                vec![
                    reg(R4),
                    Operand::Reg {
                        reg: R5,
                        offs: 0,
                        shift: 2
                    }
                ]
            )
        );
    }

    #[test]
    fn parse_shift_on_immediate_rejected() {
        assert!(AsmParser::new("mov r0, #4, asr #1").parse().is_err());
    }

    #[test]
    fn forward_branch_resolves() {
        let prog = assemble("bl target\nmov r0, #1\ntarget:\nmov r1, #2");
        assert!(prog.backpatch().is_ok());
        let Operand::Target(slot) = prog.instructions()[0].operands[0] else {
            panic!("expected branch target");
        };
        // Label defined after two real instructions
        assert_eq!(prog.label_state(slot), LabelState::At(2));
    }

    #[test]
    fn undefined_branch_target_fails_backpatch() {
        let prog = assemble("b nowhere");
        assert!(prog.backpatch().is_err());
    }

    #[test]
    fn branch_to_putc_is_syscall() {
        let prog = assemble("bl putc");
        let Operand::Target(slot) = prog.instructions()[0].operands[0] else {
            panic!("expected branch target");
        };
        assert_eq!(prog.label_state(slot), LabelState::Syscall(-1));
    }

    #[test]
    fn unknown_mnemonic_skipped() {
        let prog = assemble("vmul r0, r1\nmov r0, #1");
        assert_eq!(prog.len(), 1);
        assert_eq!(prog.instructions()[0].op, Opcode::Mov);
    }

    #[test]
    fn unknown_register_degrades_to_immediate() {
        let prog = assemble("mov r0, r95");
        assert_eq!(
            prog.instructions()[0],
            Instruction::new(Opcode::Mov, vec![reg(R0), Operand::Imm(0)])
        );
    }

    #[test]
    fn comment_and_blank_lines_skipped() {
        let prog = assemble("@ a comment\n\n   \nmov r0, #1");
        assert_eq!(prog.len(), 1);
    }

    #[test]
    fn noop_directives_accepted() {
        let prog = assemble(".arch armv6\n.global main\n.align 2\n.ident \"GCC\"\nmov r0, #1");
        assert_eq!(prog.len(), 1);
    }

    #[test]
    fn ascii_writes_data_with_escapes() {
        let prog = assemble(".section .rodata\nmsg:\n.ascii \"hi\\012\\000\"");
        assert_eq!(prog.data(), b"hi\n");
        assert_eq!(prog.data_label("msg"), Some(DATA_BASE));
    }

    #[test]
    fn ascii_without_quotes_rejected() {
        assert!(AsmParser::new(".ascii hello").parse().is_err());
    }

    #[test]
    fn data_labels_track_cursor() {
        let prog = assemble(
            ".section .rodata\na:\n.ascii \"one\"\nb:\n.ascii \"two\"",
        );
        assert_eq!(prog.data_label("a"), Some(DATA_BASE));
        assert_eq!(prog.data_label("b"), Some(DATA_BASE + 3));
    }

    #[test]
    fn relocation_halves() {
        let prog = assemble(
            ".section .rodata\nmsg:\n.ascii \"x\"\n.text\nmovw r0, #:lower16:msg\nmovt r0, #:upper16:msg",
        );
        assert_eq!(
            prog.instructions()[0],
            Instruction::new(Opcode::Movw, vec![reg(R0), Operand::Imm(DATA_BASE & 0xffff)])
        );
        assert_eq!(
            prog.instructions()[1],
            Instruction::new(Opcode::Movt, vec![reg(R0), Operand::Imm(DATA_BASE >> 16)])
        );
    }

    #[test]
    fn malformed_relocation_rejected() {
        assert!(AsmParser::new("movw r0, #:lower16").parse().is_err());
        assert!(AsmParser::new("movw r0, #:middle16:msg").parse().is_err());
        // Unknown symbol is a named error, not a silent zero
        assert!(AsmParser::new("movw r0, #:lower16:ghost").parse().is_err());
    }

    #[test]
    fn duplicate_code_label_rejected() {
        assert!(AsmParser::new("a:\nmov r0, #1\na:").parse().is_err());
    }

    #[test]
    fn unknown_section_keeps_mode() {
        let prog = assemble(".section .data\nlab:\nmov r0, #1");
        // Still in text mode, so `lab:` defines a code label
        assert_eq!(prog.lookup("lab"), Some(LabelState::At(0)));
    }

    #[test]
    fn labels_resolve_to_next_instruction() {
        let prog = assemble("mov r0, #1\nhere:\nmov r1, #2");
        assert_eq!(prog.lookup("here"), Some(LabelState::At(1)));
    }
}

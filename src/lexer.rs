//! Operand tokenizer.
//!
//! Splits the remainder of an instruction line (everything after the
//! mnemonic) into tokens. Separators are spaces and commas, except inside a
//! `[...]` or `{...}` group, which is returned as one token including its
//! internal commas. Shift modifiers like `r3, asr #2` therefore arrive as
//! three separate tokens for the parser to recombine.

use crate::span::Span;

/// A single operand token with its position relative to the tokenized text.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token<'a> {
    pub text: &'a str,
    pub span: Span,
}

impl<'a> Token<'a> {
    fn new(text: &'a str, offs: usize) -> Self {
        Token {
            text,
            span: Span::new(offs, text.len()),
        }
    }
}

/// Scanner over the operand text of one line.
pub struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str) -> Cursor<'a> {
        Cursor { src, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    /// Read the next token, or `None` once the text is exhausted.
    /// Never returns an empty token.
    pub fn read_token(&mut self) -> Option<Token<'a>> {
        // Skip leading separators
        while matches!(self.peek(), Some(b' ') | Some(b',') | Some(b'\t')) {
            self.bump();
        }
        let start = self.pos;
        let mut grouped = false;
        while let Some(b) = self.peek() {
            match b {
                b']' | b'}' if grouped => {
                    self.bump();
                    break;
                }
                _ if grouped => self.bump(),
                b' ' | b',' | b'\t' => break,
                b'[' | b'{' => {
                    grouped = true;
                    self.bump();
                }
                _ => self.bump(),
            }
        }
        if self.pos == start {
            return None;
        }
        Some(Token::new(&self.src[start..self.pos], start))
    }
}

/// Tokenize a full operand string at once.
pub fn tokenize(src: &str) -> Vec<Token<'_>> {
    let mut cur = Cursor::new(src);
    let mut toks = Vec::new();
    while let Some(tok) = cur.read_token() {
        toks.push(tok);
    }
    toks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<&str> {
        tokenize(src).iter().map(|t| t.text).collect()
    }

    #[test]
    fn splits_on_space_and_comma() {
        assert_eq!(texts("r0, r1, #4"), vec!["r0", "r1", "#4"]);
        assert_eq!(texts("r0 r1 #4"), vec!["r0", "r1", "#4"]);
    }

    #[test]
    fn bracket_group_is_atomic() {
        assert_eq!(texts("r3, [fp, #-8]"), vec!["r3", "[fp, #-8]"]);
        assert_eq!(texts("r0, [sp]"), vec!["r0", "[sp]"]);
    }

    #[test]
    fn brace_group_is_atomic() {
        assert_eq!(texts("sp!, {r4, r5, fp, lr}"), vec!["sp!", "{r4, r5, fp, lr}"]);
    }

    #[test]
    fn shift_modifier_arrives_as_separate_tokens() {
        assert_eq!(texts("r2, r3, asr #16"), vec!["r2", "r3", "asr", "#16"]);
    }

    #[test]
    fn no_empty_tokens() {
        assert_eq!(texts("  ,  , "), Vec::<&str>::new());
        assert_eq!(texts(""), Vec::<&str>::new());
        assert_eq!(texts(" r0 ,, r1 "), vec!["r0", "r1"]);
    }

    #[test]
    fn spans_index_source() {
        let src = "r0, [fp, #4]";
        for tok in tokenize(src) {
            assert_eq!(&src[std::ops::Range::from(tok.span)], tok.text);
        }
    }
}

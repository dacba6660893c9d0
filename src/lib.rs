// Assembling
mod parser;
pub use parser::AsmParser;
mod program;
pub use program::Program;

// Running
mod runtime;
pub use runtime::Machine;

mod lexer;
mod ops;
mod span;
mod symbol;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 4;

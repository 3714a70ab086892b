pub mod ast;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod span;
pub mod token;

pub use diagnostics::{RuntimeError, VesperError};
pub use runtime::value::Value;
pub use runtime::{Interpreter, RuntimeResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lex, parse, and interpret a source string as a root program, returning
/// the last statement's value.
pub fn run_script(source: &str) -> Result<Value, VesperError> {
    let program = parser::parse(source)?;
    let mut interpreter = Interpreter::new();
    interpreter.interpret(&program).map_err(VesperError::from)
}

#[cfg(test)]
mod interpreter_tests;

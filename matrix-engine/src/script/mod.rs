// Run Scripts
// YAML loading and validation of steps and matrices

pub mod error;
pub mod parser;

pub use error::{ParseError, ParseErrorKind, ParseResult, ValidationError};
pub use parser::{RunScript, ScriptParser, ScriptValidator};

//! weft - a small macro language for producing and manipulating strings
//!
//! The only datatype is the string. A program is a document of definitions
//! and expressions; evaluating the document in order emits a concatenated
//! string:
//!
//! ```text
//! let greet(name) => "hello " .. name
//! greet("world")
//! ```
//!
//! The language supports parameterised functions overloaded by arity,
//! memoised variables, pattern-match expressions, block expressions,
//! name-prefix scopes, re-evaluation of generated source, and a fixed set of
//! string-and-shell intrinsics (`slice`, `find`, `eval`, `run`, ...).
//!
//! ## Pipeline
//!
//! - `lexer`: tokenises source text, tracking line/column positions
//! - `parser`: recursive descent over the token stream into a node arena
//! - `evaluator`: reduces arena nodes to strings, mutating the environment
//! - `intrinsics`: the built-in operations invoked by the evaluator
//! - `sexpr`: renders the arena as an S-expression for inspection
//!
//! The parser and evaluator share one [`ast::Arena`] per run: the `eval` and
//! `source` intrinsics re-enter the parser and append to the same arena.
//!
//! ```
//! use weft::evaluator::{self, Environment, WARN_ALL};
//! use weft::parser::parse_into;
//!
//! let mut env = Environment::new(std::env::temp_dir(), WARN_ALL);
//! let source = r#"let greet(x) => "hello " .. x; greet("world")"#;
//! let root = parse_into("<doc>", source, &mut env.arena).unwrap();
//! assert_eq!(evaluator::eval(root, &mut env).unwrap(), "hello world");
//! ```
//!
//! ## Strictness
//!
//! Failures are never papered over: an unknown function, a wrong-arity
//! intrinsic call, an out-of-range `slice` or a `match` with no matching arm
//! and no default all abort evaluation with a positioned error rather than
//! producing a surprising value.

use std::fmt;

use crate::ast::Position;

/// Maximum evaluation depth to prevent stack overflow in recursive
/// evaluation. User programs may recurse arbitrarily through function calls;
/// exceeding the limit is surfaced as a regular evaluation failure.
pub const MAX_EVAL_DEPTH: usize = 1024;

/// A structured error describing a lexing or parsing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Where in the source the failure occurred
    pub pos: Position,
    pub message: String,
    /// The problematic token encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(pos: Position, message: impl Into<String>) -> Self {
        ParseError {
            pos,
            message: message.into(),
            found: None,
        }
    }

    pub fn with_found(pos: Position, message: impl Into<String>, found: impl Into<String>) -> Self {
        ParseError {
            pos,
            message: message.into(),
            found: Some(found.into()),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)?;
        if let Some(found) = &self.found {
            write!(f, ", found {found}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Classifies an evaluation failure by its cause. The class never changes the
/// user-visible message; it exists so callers and tests can distinguish, say,
/// a missing function from a failed `assert` without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorCause {
    /// Unknown function, parameter called with arguments, bad `drop` target
    Resolution,
    /// Intrinsic called with the wrong number of arguments
    Arity,
    /// Invalid `slice` range, `match` with no matching arm and no default
    Domain,
    /// Filesystem failure in `file` or `source`
    Io,
    /// Non-zero exit status, or subprocess support compiled out
    Subprocess,
    /// The `error` intrinsic, or a failed `assert`
    User,
    /// Evaluation depth limit exceeded
    Limit,
    /// A failure inside re-entrant `eval` or `source`, wrapped with context
    Nested,
}

/// An evaluation failure: a source position plus a message. Aborts the
/// current evaluation and unwinds to the driver, which prints the formatted
/// diagnostic and exits non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub pos: Position,
    pub cause: EvalErrorCause,
    pub message: String,
}

impl EvalError {
    pub fn new(pos: Position, cause: EvalErrorCause, message: impl Into<String>) -> Self {
        EvalError {
            pos,
            cause,
            message: message.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

impl std::error::Error for EvalError {}

pub mod ast;
pub mod evaluator;
pub mod intrinsics;
pub mod lexer;
pub mod parser;
pub mod sexpr;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Position;

    #[test]
    fn test_parse_error_display() {
        let pos = Position::new("demo.weft", 3, 7);
        let plain = ParseError::new(pos.clone(), "expected expression");
        assert_eq!(plain.to_string(), "demo.weft:3:7: expected expression");

        let with_found = ParseError::with_found(pos, "expected expression", "')'");
        assert_eq!(
            with_found.to_string(),
            "demo.weft:3:7: expected expression, found ')'"
        );
    }

    #[test]
    fn test_eval_error_display() {
        let err = EvalError::new(
            Position::new("<repl>", 1, 1),
            EvalErrorCause::Resolution,
            "func not found: greet.",
        );
        assert_eq!(err.to_string(), "<repl>:1:1: func not found: greet.");
    }
}

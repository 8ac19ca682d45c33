//! Compile errors
//!
//! Every failure the toolkit can report is a compile-time error carrying
//! a category, a human-readable message, and (when known) the byte offset
//! of the offending token in the source line. The REPL uses the offset to
//! draw a caret. Nothing partial is ever installed in a vocabulary after
//! an error: compilation unwinds the whole unit.

use std::fmt;
use tails_core::EffectError;

/// Category of compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    StackUnderflow,
    StackOverflow,
    TypeMismatch,
    UnknownWord,
    /// A magic (compiler-internal) word appeared in parsed source.
    MagicWord,
    /// `ELSE`/`THEN`/`REPEAT` without a matching opener.
    UnmatchedControlFlow,
    /// An opener left unclosed at the end of the unit.
    UnfinishedControlFlow,
    BadAnnotation,
    LocalAlreadyDefined,
    /// Control paths join with different stack depths.
    InconsistentStack,
    /// Declared and actual result counts disagree.
    WrongResultCount,
    /// Any other syntax problem.
    Syntax,
}

/// A compile error with source position.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    /// Byte offset of the offending token in the compilation unit.
    pub position: Option<usize>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> CompileError {
        CompileError {
            kind,
            message: message.into(),
            position: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, position: usize) -> CompileError {
        CompileError {
            kind,
            message: message.into(),
            position: Some(position),
        }
    }

    /// Attaches a position if the error does not already carry one.
    pub fn with_position(mut self, position: Option<usize>) -> CompileError {
        if self.position.is_none() {
            self.position = position;
        }
        self
    }

    pub fn underflow(message: impl Into<String>) -> CompileError {
        CompileError::new(ErrorKind::StackUnderflow, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> CompileError {
        CompileError::new(ErrorKind::TypeMismatch, message)
    }

    pub fn syntax(message: impl Into<String>) -> CompileError {
        CompileError::new(ErrorKind::Syntax, message)
    }
}

impl From<EffectError> for CompileError {
    fn from(err: EffectError) -> CompileError {
        let kind = match err {
            EffectError::Underflow => ErrorKind::StackUnderflow,
            EffectError::TypeMismatch => ErrorKind::TypeMismatch,
            EffectError::BadAnnotation(_) => ErrorKind::BadAnnotation,
        };
        CompileError::new(kind, err.to_string())
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CompileError {}

pub type Result<T> = std::result::Result<T, CompileError>;

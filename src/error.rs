use std::fmt;

use itertools::Itertools;
use strum::Display;
use thiserror::Error;

/// The pipeline stage that produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    Lexer,
    Parser,
    Resolver,
    Checker,
}

/// A user facing problem with the program being compiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub stage: Stage,
    pub line: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: Stage, line: usize, message: impl Into<String>) -> Self {
        Self {
            stage,
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} on line {}", self.stage, self.message, self.line)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Lexer and parser diagnostics, collected over the whole file
    #[error("{}", .0.iter().join("\n"))]
    Syntax(Vec<Diagnostic>),

    #[error("{0}")]
    Resolve(Diagnostic),

    #[error("{0}")]
    Type(Diagnostic),

    /// A lowering invariant was violated. Always a compiler defect.
    #[error("internal compiler error: {0}")]
    Internal(String),

    #[error("ran out of registers while generating code for `{function}`")]
    OutOfRegisters { function: String },
}

impl CompileError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The diagnostics carried by this error, if it is user facing
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Syntax(diagnostics) => diagnostics,
            Self::Resolve(diagnostic) | Self::Type(diagnostic) => std::slice::from_ref(diagnostic),
            Self::Internal(_) | Self::OutOfRegisters { .. } => &[],
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

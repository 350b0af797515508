//! Code generation errors.
//!
//! Unlike the parser's collected diagnostics, codegen errors are single
//! fatal errors naming the source location.

use thiserror::Error;
use velo_parser::token::Span;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{line}:{column}: undefined identifier `{name}`")]
    UndefinedIdentifier {
        name: String,
        line: u32,
        column: u32,
    },

    #[error("{line}:{column}: ambiguous call to `{name}`")]
    AmbiguousCall {
        name: String,
        line: u32,
        column: u32,
    },

    #[error("{line}:{column}: construct not supported on {target}: {what}")]
    Unsupported {
        what: String,
        target: String,
        line: u32,
        column: u32,
    },

    #[error("{line}:{column}: register pressure overflow (expression too deep)")]
    RegisterPressure { line: u32, column: u32 },

    #[error("{line}:{column}: call to unreachable function `{name}`")]
    UnreachableFunction {
        name: String,
        line: u32,
        column: u32,
    },

    #[error("{line}:{column}: too many arguments ({count}, limit {limit})")]
    TooManyArguments {
        count: usize,
        limit: usize,
        line: u32,
        column: u32,
    },

    #[error("{line}:{column}: unknown register `{name}` in unsafe block")]
    UnknownRegister {
        name: String,
        line: u32,
        column: u32,
    },
}

impl CompileError {
    pub fn undefined(name: &str, span: &Span) -> Self {
        CompileError::UndefinedIdentifier {
            name: name.to_string(),
            line: span.line,
            column: span.column,
        }
    }

    pub fn unsupported(what: impl Into<String>, target: impl ToString, span: &Span) -> Self {
        CompileError::Unsupported {
            what: what.into(),
            target: target.to_string(),
            line: span.line,
            column: span.column,
        }
    }

    pub fn register_pressure(span: &Span) -> Self {
        CompileError::RegisterPressure {
            line: span.line,
            column: span.column,
        }
    }
}

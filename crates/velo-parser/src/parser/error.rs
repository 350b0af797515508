//! Parse error types and error reporting.

use crate::lexer::LexError;
use crate::token::{Span, Token};
use std::fmt;

/// The parser aborts after collecting this many errors.
pub const MAX_PARSE_ERRORS: usize = 20;

/// A parse error with location and contextual information.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// The kind of error that occurred
    pub kind: ParseErrorKind,

    /// Source location of the error
    pub span: Span,

    /// Human-readable error message
    pub message: String,

    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
}

/// The kind of parse error.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    /// Unexpected token found
    UnexpectedToken { expected: Vec<Token>, found: Token },

    /// Unexpected end of file
    UnexpectedEof { expected: Vec<Token> },

    /// Invalid syntax
    InvalidSyntax { reason: String },

    /// Recursive call without a `max N` / `max inf` cap
    MissingRecursionCap { function: String },

    /// Loop without a provable bound and no `max N`
    MissingLoopCap,

    /// Inner binding hides an outer one without `shadow`
    ShadowRequired { name: String },

    /// `shadow` used with no outer binding to hide
    ShadowWithoutOuter { name: String },

    /// Name already declared in this scope
    DuplicateDeclaration { name: String },

    /// Unknown type annotation
    UnknownType { name: String },

    /// Lexer error surfaced through the parse interface
    Lex { message: String },

    /// Error ceiling reached; compilation aborted
    TooManyErrors,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, span: Span) -> Self {
        let message = kind.describe();
        Self {
            kind,
            span,
            message,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn invalid_syntax(reason: impl Into<String>, span: Span) -> Self {
        Self::new(
            ParseErrorKind::InvalidSyntax {
                reason: reason.into(),
            },
            span,
        )
    }

    pub fn from_lex(err: LexError) -> Self {
        let span = err.span();
        Self::new(
            ParseErrorKind::Lex {
                message: err.to_string(),
            },
            span,
        )
    }
}

impl ParseErrorKind {
    fn describe(&self) -> String {
        match self {
            ParseErrorKind::UnexpectedToken { expected, found } => {
                if expected.len() == 1 {
                    format!("unexpected token `{found}`, expected `{}`", expected[0])
                } else {
                    let names: Vec<String> =
                        expected.iter().map(|t| format!("`{t}`")).collect();
                    format!("unexpected token `{found}`, expected one of {}", names.join(", "))
                }
            }
            ParseErrorKind::UnexpectedEof { expected } => {
                let names: Vec<String> = expected.iter().map(|t| format!("`{t}`")).collect();
                format!("unexpected end of file, expected {}", names.join(", "))
            }
            ParseErrorKind::InvalidSyntax { reason } => reason.clone(),
            ParseErrorKind::MissingRecursionCap { function } => {
                format!("recursive call to `{function}` requires `max N` or `max inf`")
            }
            ParseErrorKind::MissingLoopCap => {
                "loop bound is not provable; add `max N`".to_string()
            }
            ParseErrorKind::ShadowRequired { name } => {
                format!("`{name}` hides an outer binding; use `shadow {name} = ...`")
            }
            ParseErrorKind::ShadowWithoutOuter { name } => {
                format!("`shadow {name}` has no outer binding to hide")
            }
            ParseErrorKind::DuplicateDeclaration { name } => {
                format!("`{name}` is already declared in this scope")
            }
            ParseErrorKind::UnknownType { name } => {
                format!("unknown type annotation `{name}`")
            }
            ParseErrorKind::Lex { message } => message.clone(),
            ParseErrorKind::TooManyErrors => {
                format!("aborting after {MAX_PARSE_ERRORS} errors")
            }
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.span.line, self.span.column, self.message)
    }
}

impl std::error::Error for ParseError {}

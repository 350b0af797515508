//! Lexer and parser for the Velo programming language.
//!
//! Velo is a small dynamically-typed, statically-compiled language whose
//! single runtime value is a mapping from 64-bit unsigned keys to 64-bit
//! floats. This crate turns source text into a fully analysed AST:
//!
//! ```text
//! source text
//!   → Lexer        (token stream, newlines significant)
//!   → Parser       (AST + scope/shadow metadata + constants table)
//!   → fold         (constant folding + FMA fusion)
//!   → DepGraph     (reachable callables from the entry roots)
//! ```
//!
//! The parser is recursive descent with one-token lookahead and explicit
//! saved-state backtracking for the handful of ambiguous constructs
//! (pattern lambdas, non-parenthesised lambdas, map-vs-match-vs-block).

pub mod ast;
pub mod constfold;
pub mod depgraph;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod token;

pub use ast::Module;
pub use depgraph::DepGraph;
pub use lexer::{LexError, Lexer};
pub use parser::{ParseError, ParseErrorKind, Parser};
pub use token::{Span, Token};

/// Parse a complete source file, run constant folding, and return the
/// analysed module.
pub fn parse(source: &str) -> Result<Module, Vec<ParseError>> {
    let parser = Parser::new(source).map_err(|errs| {
        errs.into_iter().map(ParseError::from_lex).collect::<Vec<_>>()
    })?;
    let mut module = parser.parse()?;
    constfold::fold_module(&mut module);
    Ok(module)
}

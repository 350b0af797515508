//! Parser for the Velo language.
//!
//! Recursive descent with operator precedence, one-token lookahead, and
//! explicit saved-state backtracking for the ambiguous constructs
//! (parenthesised lambdas, pattern lambdas, map-vs-match-vs-block).
//!
//! Alongside the tree itself, the parser maintains:
//! - a scope stack for shadow analysis,
//! - a constants table substituting UPPERCASE literal bindings,
//! - inferred semantic type tags guiding FFI marshalling,
//! - the lambda registry (every lambda lifted to a synthesized top-level
//!   callable with its capture list),
//! - the cstruct registry with computed field offsets.

pub mod block;
pub mod error;
pub mod expr;
pub mod recovery;
pub mod stmt;

use crate::ast::*;
use crate::lexer::{LexError, Lexer};
use crate::scope::ScopeStack;
use crate::token::{Span, Token};
use rustc_hash::{FxHashMap, FxHashSet};

pub use error::{ParseError, ParseErrorKind, MAX_PARSE_ERRORS};

/// Parser state.
pub struct Parser {
    /// Pre-tokenized input
    tokens: Vec<(Token, Span)>,

    /// Current position in token stream
    pos: usize,

    /// Accumulated parse errors (allows continuing after errors)
    pub(crate) errors: Vec<ParseError>,

    /// Scope stack for shadow detection
    pub(crate) scopes: ScopeStack,

    /// Names bound with `:=` (reassignable)
    pub(crate) mutables: FxHashSet<String>,

    /// UPPERCASE name → literal expression, substituted at parse time
    pub(crate) constants: FxHashMap<String, Expression>,

    /// name → inferred semantic type tag
    pub(crate) var_types: FxHashMap<String, TypeTag>,

    /// Import aliases visible as FFI namespaces
    pub(crate) imports: Vec<(String, String)>,

    /// Lifted lambdas, in lift order
    pub(crate) lambdas: Vec<LiftedLambda>,

    /// cstruct registry with computed layouts
    pub(crate) cstructs: Vec<CStructLayout>,

    /// Names of function bindings currently being parsed; a call to one
    /// of these is (potentially) recursive and must carry `max`
    pub(crate) fn_stack: Vec<String>,

    /// Monotonic counter for synthesized lambda names
    pub(crate) lambda_counter: usize,

    /// True while parsing a loop header, where a `{` must be the body
    /// rather than a scrutinee-attached match block
    pub(crate) no_block: bool,
}

impl Parser {
    /// Create a new parser from source code.
    pub fn new(source: &str) -> Result<Self, Vec<LexError>> {
        let lexer = Lexer::new(source);
        let tokens = lexer.tokenize()?;

        Ok(Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
            scopes: ScopeStack::new(),
            mutables: FxHashSet::default(),
            constants: FxHashMap::default(),
            var_types: FxHashMap::default(),
            imports: Vec::new(),
            lambdas: Vec::new(),
            cstructs: Vec::new(),
            fn_stack: Vec::new(),
            lambda_counter: 0,
            no_block: false,
        })
    }

    /// Parse the entire source file into a Module AST.
    pub fn parse(mut self) -> Result<Module, Vec<ParseError>> {
        let start_span = self.current_span();
        let mut statements = Vec::new();

        self.skip_newlines();
        while !self.at_eof() {
            if self.errors.len() >= MAX_PARSE_ERRORS {
                self.errors
                    .push(ParseError::new(ParseErrorKind::TooManyErrors, self.current_span()));
                break;
            }

            match stmt::parse_statement(&mut self) {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    recovery::sync_to_statement_boundary(&mut self);
                }
            }
            self.skip_newlines();
        }

        if !self.errors.is_empty() {
            return Err(self.errors);
        }

        let span = statements
            .last()
            .map(|s| start_span.to(s.span()))
            .unwrap_or(start_span);

        Ok(Module {
            statements,
            lambdas: self.lambdas,
            cstructs: self.cstructs,
            var_types: self.var_types.into_iter().collect(),
            imports: self.imports,
            span,
        })
    }

    // ========================================================================
    // Token management
    // ========================================================================

    #[inline(always)]
    pub fn current(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    #[inline(always)]
    pub fn current_span(&self) -> Span {
        self.tokens[self.pos].1
    }

    #[inline(always)]
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1).map(|(tok, _)| tok)
    }

    /// Peek n tokens ahead (0 = current).
    #[inline]
    pub fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(tok, _)| tok)
    }

    #[inline]
    pub fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].0.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    #[inline(always)]
    pub fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(expected)
    }

    /// Consume the current token when it matches, returning whether it did.
    #[inline]
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    #[inline(always)]
    pub fn at_eof(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    /// Consume the current token if it matches the expected kind.
    #[inline]
    pub fn expect(&mut self, expected: Token) -> Result<Token, ParseError> {
        if self.check(&expected) {
            Ok(self.advance())
        } else {
            Err(self.unexpected_token(&[expected]))
        }
    }

    /// Skip any run of newline/semicolon separators.
    pub fn skip_newlines(&mut self) {
        while matches!(self.current(), Token::Newline | Token::Semicolon) {
            self.advance();
        }
    }

    /// Require a statement terminator (newline, `;`, `}` or EOF).
    pub fn expect_terminator(&mut self) -> Result<(), ParseError> {
        match self.current() {
            Token::Newline | Token::Semicolon => {
                self.advance();
                Ok(())
            }
            Token::RBrace | Token::Eof => Ok(()),
            _ => Err(self.unexpected_token(&[Token::Newline])),
        }
    }

    // ========================================================================
    // Backtracking
    // ========================================================================

    /// Save the current position for later rewind. Only the token cursor
    /// is saved; callers must not commit scope or registry mutations
    /// before deciding whether to rewind.
    #[inline]
    pub fn snapshot(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn rewind(&mut self, snapshot: usize) {
        self.pos = snapshot;
    }

    // ========================================================================
    // Error handling
    // ========================================================================

    pub fn unexpected_token(&self, expected: &[Token]) -> ParseError {
        let span = self.current_span();
        if self.at_eof() {
            ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: expected.to_vec(),
                },
                span,
            )
        } else {
            ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: expected.to_vec(),
                    found: self.current().clone(),
                },
                span,
            )
        }
    }

    // ========================================================================
    // Registries
    // ========================================================================

    /// Allocate the next synthesized lambda name.
    pub(crate) fn next_lambda_name(&mut self) -> String {
        let name = format!("__lambda_{}", self.lambda_counter);
        self.lambda_counter += 1;
        name
    }

    /// Record a lambda in the registry, computing its capture list from
    /// the free variables visible in enclosing (non-module) scopes.
    pub(crate) fn lift_lambda(&mut self, lambda: &LambdaExpression) {
        let mut captures = Vec::new();
        let mut bound: FxHashSet<String> = FxHashSet::default();
        for clause in &lambda.clauses {
            for p in &clause.params {
                bound.insert(p.name.clone());
            }
        }
        let mut seen = FxHashSet::default();
        for clause in &lambda.clauses {
            free_vars(&clause.body, &mut bound.clone(), &mut |name| {
                if self.scopes.depth() > 1
                    && self.scopes.visible(name)
                    && !self.constants.contains_key(name)
                    && seen.insert(name.to_string())
                {
                    captures.push(name.to_string());
                }
            });
        }
        self.lambdas.push(LiftedLambda {
            name: lambda.name.clone(),
            lambda: lambda.clone(),
            captures,
        });
    }

    /// Record an inferred type tag for a binding.
    pub(crate) fn infer_type(&mut self, name: &str, value: &Expression) {
        let tag = match value {
            Expression::Number(_) => Some(TypeTag::Num),
            Expression::Str(_) | Expression::FString(_) => Some(TypeTag::Str),
            Expression::List(_) => Some(TypeTag::List),
            Expression::Map(_) => Some(TypeTag::Map),
            Expression::Cast(c) => Some(c.ty),
            _ => None,
        };
        if let Some(tag) = tag {
            self.var_types.insert(name.to_string(), tag);
        }
    }

    /// Is this name an import alias (an FFI namespace)?
    pub(crate) fn is_namespace(&self, name: &str) -> bool {
        self.imports.iter().any(|(alias, _)| alias == name)
    }
}

/// Walk an expression calling `visit` for every identifier that is free
/// with respect to `bound`.
fn free_vars(
    expr: &Expression,
    bound: &mut FxHashSet<String>,
    visit: &mut impl FnMut(&str),
) {
    match expr {
        Expression::Identifier(id) => {
            if !bound.contains(&id.name) {
                visit(&id.name);
            }
        }
        Expression::Call(c) => {
            free_vars(&c.callee, bound, visit);
            for a in &c.arguments {
                free_vars(a, bound, visit);
            }
        }
        Expression::Binary(b) => {
            free_vars(&b.left, bound, visit);
            free_vars(&b.right, bound, visit);
        }
        Expression::Unary(u) => free_vars(&u.operand, bound, visit),
        Expression::Postfix(p) => free_vars(&p.operand, bound, visit),
        Expression::Index(i) => {
            free_vars(&i.object, bound, visit);
            free_vars(&i.index, bound, visit);
        }
        Expression::Range(r) => {
            free_vars(&r.start, bound, visit);
            free_vars(&r.end, bound, visit);
        }
        Expression::List(l) => {
            for e in &l.elements {
                free_vars(e, bound, visit);
            }
        }
        Expression::Map(m) => {
            for (k, v) in &m.entries {
                free_vars(k, bound, visit);
                free_vars(v, bound, visit);
            }
        }
        Expression::Match(m) => {
            if let Some(s) = &m.scrutinee {
                free_vars(s, bound, visit);
            }
            for clause in &m.clauses {
                if let Some(p) = &clause.pattern {
                    free_vars(p, bound, visit);
                }
                if let Some(g) = &clause.guard {
                    free_vars(g, bound, visit);
                }
                free_vars(&clause.body, bound, visit);
            }
        }
        Expression::Block(b) => {
            for stmt in &b.block.statements {
                free_vars_stmt(stmt, bound, visit);
            }
        }
        Expression::Lambda(l) => {
            let mut inner = bound.clone();
            for clause in &l.clauses {
                for p in &clause.params {
                    inner.insert(p.name.clone());
                }
            }
            for clause in &l.clauses {
                free_vars(&clause.body, &mut inner, visit);
            }
        }
        Expression::FString(f) => {
            for part in &f.parts {
                if let FStringPart::Expr(e) = part {
                    free_vars(e, bound, visit);
                }
            }
        }
        Expression::Send(s) => {
            free_vars(&s.channel, bound, visit);
            free_vars(&s.value, bound, visit);
        }
        Expression::Receive(r) => free_vars(&r.channel, bound, visit),
        Expression::Spawn(s) => free_vars(&s.call, bound, visit),
        Expression::Cast(c) => free_vars(&c.operand, bound, visit),
        Expression::Move(m) => free_vars(&m.operand, bound, visit),
        Expression::Length(l) => free_vars(&l.operand, bound, visit),
        Expression::LoopExpr(l) => {
            free_vars(&l.iterable, bound, visit);
            if let Some(b) = &l.binder {
                bound.insert(b.clone());
            }
            for stmt in &l.body.statements {
                free_vars_stmt(stmt, bound, visit);
            }
        }
        Expression::Vector(v) => {
            for e in &v.elements {
                free_vars(e, bound, visit);
            }
        }
        Expression::Fma(f) => {
            free_vars(&f.a, bound, visit);
            free_vars(&f.b, bound, visit);
            free_vars(&f.c, bound, visit);
        }
        Expression::Number(_)
        | Expression::Str(_)
        | Expression::Namespaced(_)
        | Expression::UnsafeBlock(_) => {}
    }
}

fn free_vars_stmt(
    stmt: &Statement,
    bound: &mut FxHashSet<String>,
    visit: &mut impl FnMut(&str),
) {
    match stmt {
        Statement::Binding(b) => {
            free_vars(&b.value, bound, visit);
            bound.insert(b.name.clone());
        }
        Statement::IndexedUpdate(u) => {
            free_vars(&u.target.object, bound, visit);
            free_vars(&u.target.index, bound, visit);
            free_vars(&u.value, bound, visit);
        }
        Statement::Loop(l) => {
            free_vars(&l.iterable, bound, visit);
            if let Some(b) = &l.binder {
                bound.insert(b.clone());
            }
            for s in &l.body.statements {
                free_vars_stmt(s, bound, visit);
            }
        }
        Statement::Return(r) => {
            if let Some(v) = &r.value {
                free_vars(v, bound, visit);
            }
        }
        Statement::Defer(d) => free_vars(&d.expression, bound, visit),
        Statement::ArenaBlock(a) => {
            for s in &a.body.statements {
                free_vars_stmt(s, bound, visit);
            }
        }
        Statement::Receive(r) => {
            free_vars(&r.channel, bound, visit);
            bound.insert(r.name.clone());
        }
        Statement::Expression(e) => free_vars(&e.expression, bound, visit),
        Statement::Jump(_)
        | Statement::ClassDecl(_)
        | Statement::CStructDecl(_)
        | Statement::Import(_)
        | Statement::Export(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_new() {
        let source = "x = 42";
        let parser = Parser::new(source).unwrap();
        assert!(matches!(parser.current(), Token::Identifier(_)));
    }

    #[test]
    fn test_parser_snapshot_rewind() {
        let source = "a b c";
        let mut parser = Parser::new(source).unwrap();
        let snap = parser.snapshot();
        parser.advance();
        parser.advance();
        parser.rewind(snap);
        assert!(matches!(parser.current(), Token::Identifier(n) if n == "a"));
    }

    #[test]
    fn test_parser_at_eof() {
        let parser = Parser::new("").unwrap();
        assert!(parser.at_eof());
    }
}

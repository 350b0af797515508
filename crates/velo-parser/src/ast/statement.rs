//! Statement AST nodes.
//!
//! Velo has no `fn` keyword: functions are bindings whose right-hand side
//! is a lambda. Bindings, indexed updates, loops and the block statements
//! (defer/arena/unsafe) make up almost every program.

use super::expression::*;
use super::{Block, TypeTag};
use crate::token::Span;
use serde::Serialize;

/// Top-level or block-level statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Statement {
    /// Name binding: `x = 42`, `y := 0`, `shadow x = 1`
    Binding(BindingStatement),

    /// Indexed update: `m[k] = v`
    IndexedUpdate(IndexedUpdateStatement),

    /// Loop: `@ i: 0..10 { … }`, `@@ i: xs { … }`, `4 @ i: xs { … }`
    Loop(LoopStatement),

    /// `break` / `continue`
    Jump(JumpStatement),

    /// Early return: `ret expr`
    Return(ReturnStatement),

    /// `defer expr`: runs LIFO on scope exit
    Defer(DeferStatement),

    /// `arena { … }`: scoped allocation frame
    ArenaBlock(ArenaBlockStatement),

    /// `class Name { … }`: desugars to a map of closures
    ClassDecl(ClassDeclStatement),

    /// `cstruct Name { … }`: FFI struct layout
    CStructDecl(CStructDeclStatement),

    /// `import "path"` / `import name`
    Import(ImportStatement),

    /// `export name`
    Export(ExportStatement),

    /// Channel receive binding: `value <= addr`
    Receive(ReceiveStatement),

    /// Expression in statement position (calls, sends, unsafe blocks)
    Expression(ExpressionStatement),
}

impl Statement {
    pub fn span(&self) -> &Span {
        match self {
            Statement::Binding(s) => &s.span,
            Statement::IndexedUpdate(s) => &s.span,
            Statement::Loop(s) => &s.span,
            Statement::Jump(s) => &s.span,
            Statement::Return(s) => &s.span,
            Statement::Defer(s) => &s.span,
            Statement::ArenaBlock(s) => &s.span,
            Statement::ClassDecl(s) => &s.span,
            Statement::CStructDecl(s) => &s.span,
            Statement::Import(s) => &s.span,
            Statement::Export(s) => &s.span,
            Statement::Receive(s) => &s.span,
            Statement::Expression(s) => &s.span,
        }
    }
}

/// `x = expr` or `x := expr`, optionally marked `shadow`.
///
/// An UPPERCASE name bound with `=` to a literal enters the constants
/// table and is substituted at parse time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingStatement {
    pub name: String,
    pub value: Expression,
    /// Present when the source carried the `shadow` keyword.
    pub shadow: bool,
    /// `:=` (reassignable) vs `=` (single assignment).
    pub mutable: bool,
    /// True when this re-assigns an existing binding rather than
    /// declaring a new one.
    pub reassign: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedUpdateStatement {
    pub target: IndexExpression,
    pub value: Expression,
    pub span: Span,
}

/// Loop iteration bound. Every loop carries one: either the compiler
/// proved it from a literal range/list, or the source supplied `max N`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum LoopCap {
    /// Bound proved at compile time (literal range or literal list).
    Proved(u64),
    /// `max N`: runtime cap counter emitted into the loop.
    Explicit(u64),
}

impl LoopCap {
    pub fn bound(&self) -> u64 {
        match self {
            LoopCap::Proved(n) | LoopCap::Explicit(n) => *n,
        }
    }
}

/// Parallelism marker on a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Parallelism {
    /// `@`: sequential.
    None,
    /// `@@`: one process per iteration.
    AllCores,
    /// `N @`: capped worker count.
    Workers(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopStatement {
    /// Iteration binder; absent for bare counted loops (`@ 10 { … }`).
    pub binder: Option<String>,
    /// Range, list, or count expression.
    pub iterable: Expression,
    pub body: Block,
    pub cap: LoopCap,
    pub parallel: Parallelism,
    /// Reducer lambda merging per-worker results of a parallel loop.
    pub reducer: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JumpKind {
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JumpStatement {
    pub kind: JumpKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnStatement {
    pub value: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeferStatement {
    pub expression: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArenaBlockStatement {
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDeclStatement {
    pub name: String,
    /// Method name → lambda. Dispatch is a map lookup at runtime.
    pub methods: Vec<(String, LambdaExpression)>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CStructField {
    pub name: String,
    pub ty: TypeTag,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CStructDeclStatement {
    pub name: String,
    pub fields: Vec<CStructField>,
    pub packed: bool,
    /// `aligned(N)` override.
    pub align: Option<u32>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportStatement {
    /// File path, directory, library name, or git URL. Resolution is the
    /// driver's job; the parser records the text.
    pub target: String,
    /// Namespace alias the import is reachable under.
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportStatement {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiveStatement {
    pub name: String,
    pub channel: Expression,
    pub shadow: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressionStatement {
    pub expression: Expression,
    pub span: Span,
}

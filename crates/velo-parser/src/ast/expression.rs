//! Expression AST nodes.
//!
//! Everything that produces a value, including the match forms, the
//! lambda surface forms, channels, and the architecture-tagged unsafe
//! blocks.

use super::{Block, TypeTag};
use crate::token::Span;
use serde::Serialize;

/// Expression (produces a value).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expression {
    /// Number literal. The single numeric type is f64.
    Number(NumberLiteral),

    /// String literal: "hello"
    Str(StringLiteral),

    /// F-string with interpolation holes: f"sum: {a + b}"
    FString(FStringLiteral),

    /// Identifier
    Identifier(Identifier),

    /// Namespaced identifier for FFI: ns.func
    Namespaced(NamespacedIdentifier),

    /// Call: f(1, 2) max 100
    Call(CallExpression),

    /// Binary expression: x + y, a | f, e or! 0
    Binary(BinaryExpression),

    /// Unary expression: -x, !x, ~b x
    Unary(UnaryExpression),

    /// Postfix expression: x++, x--
    Postfix(PostfixExpression),

    /// Index access: m[k]
    Index(IndexExpression),

    /// Range: a..b
    Range(RangeExpression),

    /// List literal: [1, 2, 3]
    List(ListExpression),

    /// Map literal: { x: 1, y: 2 }
    Map(MapExpression),

    /// Match block, value or guard form.
    Match(MatchExpression),

    /// Statement block in expression position.
    Block(BlockExpression),

    /// Lambda in any surface form, including pattern and multi clauses.
    Lambda(LambdaExpression),

    /// Channel send: addr <- value
    Send(SendExpression),

    /// Channel receive: <= addr (blocks)
    Receive(ReceiveExpression),

    /// Process spawn: spawn f(args)
    Spawn(SpawnExpression),

    /// Cast: expr as int32
    Cast(CastExpression),

    /// Ownership transfer into a child process: move expr
    Move(MoveExpression),

    /// Length: #expr
    Length(LengthExpression),

    /// Loop in expression position, yielding its final value.
    LoopExpr(Box<super::LoopStatement>),

    /// SIMD vector literal: simd(a, b, c, d)
    Vector(VectorExpression),

    /// Fused multiply-add, produced by the folding pass from a*b + c.
    Fma(FmaExpression),

    /// Architecture-tagged unsafe block triple.
    UnsafeBlock(UnsafeBlockExpression),
}

impl Expression {
    pub fn span(&self) -> &Span {
        match self {
            Expression::Number(e) => &e.span,
            Expression::Str(e) => &e.span,
            Expression::FString(e) => &e.span,
            Expression::Identifier(e) => &e.span,
            Expression::Namespaced(e) => &e.span,
            Expression::Call(e) => &e.span,
            Expression::Binary(e) => &e.span,
            Expression::Unary(e) => &e.span,
            Expression::Postfix(e) => &e.span,
            Expression::Index(e) => &e.span,
            Expression::Range(e) => &e.span,
            Expression::List(e) => &e.span,
            Expression::Map(e) => &e.span,
            Expression::Match(e) => &e.span,
            Expression::Block(e) => &e.block.span,
            Expression::Lambda(e) => &e.span,
            Expression::Send(e) => &e.span,
            Expression::Receive(e) => &e.span,
            Expression::Spawn(e) => &e.span,
            Expression::Cast(e) => &e.span,
            Expression::Move(e) => &e.span,
            Expression::Length(e) => &e.span,
            Expression::LoopExpr(e) => &e.span,
            Expression::Vector(e) => &e.span,
            Expression::Fma(e) => &e.span,
            Expression::UnsafeBlock(e) => &e.span,
        }
    }

    /// True if this expression is a literal the folding pass can consume.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expression::Number(n) => Some(n.value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberLiteral {
    pub value: f64,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StringLiteral {
    pub value: String,
    pub span: Span,
}

/// One segment of an f-string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FStringPart {
    Text(String),
    /// A `{…}` hole, re-lexed and parsed as a full expression.
    Expr(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FStringLiteral {
    pub parts: Vec<FStringPart>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
}

/// `ns.func`: the namespace names an imported FFI library.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespacedIdentifier {
    pub namespace: String,
    pub name: String,
    pub span: Span,
}

/// A recursion-depth cap attached to a (possibly) recursive call site.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RecursionCap {
    Bounded(u64),
    Infinite,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallExpression {
    pub callee: Box<Expression>,
    pub arguments: Vec<Expression>,
    /// Mandatory on recursive call sites, absent otherwise.
    pub cap: Option<RecursionCap>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `^`: power.
    Pow,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    And,
    Or,
    /// `or!`: error recovery; RHS evaluated only on NaN-tagged LHS.
    OrElse,
    /// `|`: pipe the LHS as the sole argument of the RHS callable.
    Pipe,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    /// `?b`: test a single bit, yields 0 or 1.
    BitTest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinaryExpression {
    pub op: BinaryOp,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnaryExpression {
    pub op: UnaryOp,
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PostfixOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostfixExpression {
    pub op: PostfixOp,
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexExpression {
    pub object: Box<Expression>,
    pub index: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeExpression {
    pub start: Box<Expression>,
    pub end: Box<Expression>,
    pub span: Span,
}

impl RangeExpression {
    /// Iteration count when both endpoints are literals.
    pub fn literal_bound(&self) -> Option<u64> {
        match (self.start.as_number(), self.end.as_number()) {
            (Some(a), Some(b)) if b >= a => Some((b - a) as u64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListExpression {
    pub elements: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapExpression {
    pub entries: Vec<(Expression, Expression)>,
    pub span: Span,
}

/// One clause of a match block.
///
/// Value matches carry `pattern`; guard matches carry `guard`; the
/// default clause carries neither. `~>` clauses fall through into the
/// next clause body instead of jumping to the end label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchClause {
    pub pattern: Option<Expression>,
    pub guard: Option<Expression>,
    pub body: Expression,
    pub fallthrough: bool,
    pub span: Span,
}

impl MatchClause {
    pub fn is_default(&self) -> bool {
        self.pattern.is_none() && self.guard.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchExpression {
    /// Present for value matches, absent for guard matches.
    pub scrutinee: Option<Box<Expression>>,
    pub clauses: Vec<MatchClause>,
    /// Whether the source spelled out a `_ =>` default. An implicit
    /// default yields zero.
    pub explicit_default: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockExpression {
    pub block: Block,
}

/// A lambda parameter: a binder, a literal pattern, or the variadic tail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    /// For pattern lambdas: the clause only applies when the argument
    /// equals this literal.
    pub pattern: Option<f64>,
    /// Trailing `rest...` collects remaining arguments into a list.
    pub variadic: bool,
    /// FFI-facing type annotation (`x: int32`).
    pub ty: Option<TypeTag>,
    pub span: Span,
}

/// One clause of a lambda. Plain lambdas have exactly one clause; a
/// multi-lambda (pattern lambda) has several tried in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LambdaClause {
    pub params: Vec<Param>,
    pub body: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LambdaExpression {
    /// Synthesized top-level name assigned at lift time (`__lambda_3`).
    pub name: String,
    pub clauses: Vec<LambdaClause>,
    pub span: Span,
}

impl LambdaExpression {
    /// Arity of the lambda (variadics count their minimum).
    pub fn arity(&self) -> usize {
        self.clauses
            .first()
            .map(|c| c.params.iter().filter(|p| !p.variadic).count())
            .unwrap_or(0)
    }

    pub fn is_variadic(&self) -> bool {
        self.clauses
            .first()
            .map(|c| c.params.last().is_some_and(|p| p.variadic))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendExpression {
    pub channel: Box<Expression>,
    pub value: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiveExpression {
    pub channel: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpawnExpression {
    pub call: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CastExpression {
    pub operand: Box<Expression>,
    pub ty: TypeTag,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveExpression {
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LengthExpression {
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorExpression {
    pub elements: Vec<Expression>,
    pub span: Span,
}

/// `a*b + c`, fused by the folding pass when all operands are numeric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FmaExpression {
    pub a: Box<Expression>,
    pub b: Box<Expression>,
    pub c: Box<Expression>,
    pub span: Span,
}

// ============================================================================
// Unsafe blocks
// ============================================================================

/// Target architecture tag inside an unsafe triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnsafeArch {
    X86,
    Arm64,
    RiscV64,
}

/// Operand of an unsafe-block instruction: a named machine register, an
/// immediate, or a register-indirect memory reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AsmOperand {
    Reg(String),
    Imm(i64),
    Mem { base: String, offset: i64 },
}

/// The restricted instruction forms an unsafe block may contain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AsmInstr {
    /// `dst = src` register-to-register or register-from-immediate move.
    Mov { dst: AsmOperand, src: AsmOperand },
    /// Memory load with optional `as type` sizing.
    Load { dst: AsmOperand, src: AsmOperand, ty: Option<TypeTag> },
    /// Memory store with optional `as type` sizing.
    Store { dst: AsmOperand, src: AsmOperand, ty: Option<TypeTag> },
    /// `syscall` / `svc` / `ecall` for the block's architecture.
    Syscall,
}

/// One architecture's body inside the triple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnsafeArm {
    pub arch: UnsafeArch,
    pub instructions: Vec<AsmInstr>,
    pub span: Span,
}

/// `unsafe { x86 … } { arm64 … } { riscv64 … } as T`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnsafeBlockExpression {
    pub arms: Vec<UnsafeArm>,
    /// Result typing of rax/x0/a0 after the block.
    pub result: TypeTag,
    pub span: Span,
}

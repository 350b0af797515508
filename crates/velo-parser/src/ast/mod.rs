//! AST node definitions for Velo.
//!
//! The tree is built once by the parser, mutated only by the constant
//! folding pass, and then handed to the code generator. Statement and
//! expression variants live in their own modules; shared leaf types
//! (spans, type tags, blocks) live here.

pub mod expression;
pub mod statement;

pub use expression::*;
pub use statement::*;

use crate::token::Span;
use serde::Serialize;

/// A parsed source file: the top-level statement sequence plus the
/// metadata the analysis passes attach to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    pub statements: Vec<Statement>,
    /// Lambdas lifted to synthesized top-level callables.
    pub lambdas: Vec<LiftedLambda>,
    /// cstruct declarations with computed field offsets.
    pub cstructs: Vec<CStructLayout>,
    /// Inferred semantic type tags, used to guide FFI marshalling.
    pub var_types: Vec<(String, TypeTag)>,
    /// Import aliases (namespace → import target).
    pub imports: Vec<(String, String)>,
    pub span: Span,
}

/// A lambda lifted out of its defining expression. The body keeps a
/// reference into the AST by synthesized name; captures are read from the
/// defining scope at the call site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiftedLambda {
    /// Synthesized name, unique per module (`__lambda_3`).
    pub name: String,
    pub lambda: LambdaExpression,
    /// Free variables captured from enclosing scopes, in binding order.
    pub captures: Vec<String>,
}

/// A cstruct with field offsets resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CStructLayout {
    pub name: String,
    pub fields: Vec<CStructFieldLayout>,
    pub size: u32,
    pub align: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CStructFieldLayout {
    pub name: String,
    pub ty: TypeTag,
    pub offset: u32,
}

/// Semantic type tags. Velo itself is dynamically typed; tags guide FFI
/// marshalling and the handful of `as` casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeTag {
    Num,
    Str,
    List,
    Map,
    Bool,
    /// Null-terminated C string pointer.
    CStr,
    /// Opaque C pointer.
    CPtr,
    /// FFI: 32-bit signed integer.
    I32,
    /// FFI: 64-bit signed integer.
    I64,
    /// FFI: double.
    F64,
}

impl TypeTag {
    /// Parse a type annotation name. Returns `None` for unknown names so
    /// the caller can fall back to treating the text as an identifier.
    pub fn from_name(name: &str) -> Option<TypeTag> {
        Some(match name {
            "num" => TypeTag::Num,
            "str" => TypeTag::Str,
            "list" => TypeTag::List,
            "map" => TypeTag::Map,
            "bool" => TypeTag::Bool,
            "cstr" => TypeTag::CStr,
            "cptr" => TypeTag::CPtr,
            "int32" => TypeTag::I32,
            "int64" => TypeTag::I64,
            "double" => TypeTag::F64,
            _ => return None,
        })
    }

    /// Size in bytes when used as a cstruct field.
    pub fn size(&self) -> u32 {
        match self {
            TypeTag::I32 => 4,
            _ => 8,
        }
    }
}

/// A `{ … }` statement block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub span: Span,
}

impl Block {
    /// The trailing expression whose value the block yields, if any.
    pub fn tail_expression(&self) -> Option<&Expression> {
        match self.statements.last() {
            Some(Statement::Expression(stmt)) => Some(&stmt.expression),
            _ => None,
        }
    }
}

//! Constant folding and FMA fusion.
//!
//! A post-order walk over the parsed module replaces subtrees whose
//! operands are literals with their computed literal, and rewrites
//! `a*b + c` / `c + a*b` into a dedicated FMA node when the operands are
//! numeric. Division by a literal zero is left alone so the runtime's
//! NaN-tagged `dv0 ` error surfaces as specified.

use crate::ast::*;

/// Fold every expression in the module, including the lifted lambda
/// registry so both views of a lambda body stay identical.
pub fn fold_module(module: &mut Module) {
    for stmt in &mut module.statements {
        fold_stmt(stmt);
    }
    for lifted in &mut module.lambdas {
        for clause in &mut lifted.lambda.clauses {
            fold_expr(&mut clause.body);
        }
    }
}

fn fold_stmt(stmt: &mut Statement) {
    match stmt {
        Statement::Binding(b) => fold_expr(&mut b.value),
        Statement::IndexedUpdate(u) => {
            fold_expr(&mut u.target.object);
            fold_expr(&mut u.target.index);
            fold_expr(&mut u.value);
        }
        Statement::Loop(l) => {
            fold_expr(&mut l.iterable);
            for s in &mut l.body.statements {
                fold_stmt(s);
            }
            if let Some(r) = &mut l.reducer {
                fold_expr(r);
            }
        }
        Statement::Return(r) => {
            if let Some(v) = &mut r.value {
                fold_expr(v);
            }
        }
        Statement::Defer(d) => fold_expr(&mut d.expression),
        Statement::ArenaBlock(a) => {
            for s in &mut a.body.statements {
                fold_stmt(s);
            }
        }
        Statement::ClassDecl(c) => {
            for (_, lambda) in &mut c.methods {
                for clause in &mut lambda.clauses {
                    fold_expr(&mut clause.body);
                }
            }
        }
        Statement::Receive(r) => fold_expr(&mut r.channel),
        Statement::Expression(e) => fold_expr(&mut e.expression),
        Statement::Jump(_)
        | Statement::CStructDecl(_)
        | Statement::Import(_)
        | Statement::Export(_) => {}
    }
}

pub fn fold_expr(expr: &mut Expression) {
    // Children first
    match expr {
        Expression::Binary(b) => {
            fold_expr(&mut b.left);
            fold_expr(&mut b.right);
        }
        Expression::Unary(u) => fold_expr(&mut u.operand),
        Expression::Postfix(p) => fold_expr(&mut p.operand),
        Expression::Call(c) => {
            fold_expr(&mut c.callee);
            for a in &mut c.arguments {
                fold_expr(a);
            }
        }
        Expression::Index(i) => {
            fold_expr(&mut i.object);
            fold_expr(&mut i.index);
        }
        Expression::Range(r) => {
            fold_expr(&mut r.start);
            fold_expr(&mut r.end);
        }
        Expression::List(l) => {
            for e in &mut l.elements {
                fold_expr(e);
            }
        }
        Expression::Map(m) => {
            for (k, v) in &mut m.entries {
                fold_expr(k);
                fold_expr(v);
            }
        }
        Expression::Match(m) => {
            if let Some(s) = &mut m.scrutinee {
                fold_expr(s);
            }
            for clause in &mut m.clauses {
                if let Some(p) = &mut clause.pattern {
                    fold_expr(p);
                }
                if let Some(g) = &mut clause.guard {
                    fold_expr(g);
                }
                fold_expr(&mut clause.body);
            }
        }
        Expression::Block(b) => {
            for s in &mut b.block.statements {
                fold_stmt(s);
            }
        }
        Expression::Lambda(l) => {
            for clause in &mut l.clauses {
                fold_expr(&mut clause.body);
            }
        }
        Expression::FString(f) => {
            for part in &mut f.parts {
                if let FStringPart::Expr(e) = part {
                    fold_expr(e);
                }
            }
        }
        Expression::Send(s) => {
            fold_expr(&mut s.channel);
            fold_expr(&mut s.value);
        }
        Expression::Receive(r) => fold_expr(&mut r.channel),
        Expression::Spawn(s) => fold_expr(&mut s.call),
        Expression::Cast(c) => fold_expr(&mut c.operand),
        Expression::Move(m) => fold_expr(&mut m.operand),
        Expression::Length(l) => fold_expr(&mut l.operand),
        Expression::LoopExpr(l) => {
            fold_expr(&mut l.iterable);
            for s in &mut l.body.statements {
                fold_stmt(s);
            }
        }
        Expression::Vector(v) => {
            for e in &mut v.elements {
                fold_expr(e);
            }
        }
        Expression::Fma(f) => {
            fold_expr(&mut f.a);
            fold_expr(&mut f.b);
            fold_expr(&mut f.c);
        }
        Expression::Number(_)
        | Expression::Str(_)
        | Expression::Identifier(_)
        | Expression::Namespaced(_)
        | Expression::UnsafeBlock(_) => {}
    }

    // Then this node
    if let Some(folded) = fold_node(expr) {
        *expr = folded;
    }
}

fn fold_node(expr: &Expression) -> Option<Expression> {
    match expr {
        Expression::Binary(b) => fold_binary(b),
        Expression::Unary(u) => {
            let n = u.operand.as_number()?;
            let value = match u.op {
                UnaryOp::Neg => -n,
                UnaryOp::Not => {
                    if n == 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                UnaryOp::BitNot => !(n as u64) as f64,
            };
            Some(Expression::Number(NumberLiteral { value, span: u.span }))
        }
        _ => None,
    }
}

fn fold_binary(b: &BinaryExpression) -> Option<Expression> {
    // String concatenation of two literals
    if b.op == BinaryOp::Add {
        if let (Expression::Str(l), Expression::Str(r)) = (b.left.as_ref(), b.right.as_ref()) {
            return Some(Expression::Str(StringLiteral {
                value: format!("{}{}", l.value, r.value),
                span: b.span,
            }));
        }
    }

    match (b.left.as_number(), b.right.as_number()) {
        (Some(l), Some(r)) => {
            let value = match b.op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                // Literal zero divisors keep runtime error semantics
                BinaryOp::Div if r != 0.0 => l / r,
                BinaryOp::Mod if r != 0.0 => l % r,
                BinaryOp::Pow => l.powf(r),
                BinaryOp::Eq => bool_num(l == r),
                BinaryOp::NotEq => bool_num(l != r),
                BinaryOp::Less => bool_num(l < r),
                BinaryOp::LessEq => bool_num(l <= r),
                BinaryOp::Greater => bool_num(l > r),
                BinaryOp::GreaterEq => bool_num(l >= r),
                BinaryOp::And => bool_num(l != 0.0 && r != 0.0),
                BinaryOp::Or => bool_num(l != 0.0 || r != 0.0),
                BinaryOp::BitAnd => ((l as u64) & (r as u64)) as f64,
                BinaryOp::BitOr => ((l as u64) | (r as u64)) as f64,
                BinaryOp::BitXor => ((l as u64) ^ (r as u64)) as f64,
                BinaryOp::Shl => ((l as u64) << (r as u64 & 63)) as f64,
                BinaryOp::Shr => ((l as u64) >> (r as u64 & 63)) as f64,
                BinaryOp::BitTest => bool_num((l as u64) >> (r as u64 & 63) & 1 == 1),
                _ => return fuse_fma(b),
            };
            Some(Expression::Number(NumberLiteral { value, span: b.span }))
        }
        _ => fuse_fma(b),
    }
}

/// Rewrite `a*b + c` and `c + a*b` into an FMA node, numbers only.
fn fuse_fma(b: &BinaryExpression) -> Option<Expression> {
    if b.op != BinaryOp::Add {
        return None;
    }

    let (mul, addend) = match (b.left.as_ref(), b.right.as_ref()) {
        (Expression::Binary(m), c) if m.op == BinaryOp::Mul => (m, c),
        (c, Expression::Binary(m)) if m.op == BinaryOp::Mul => (m, c),
        _ => return None,
    };

    if !is_numeric(&mul.left) || !is_numeric(&mul.right) || !is_numeric(addend) {
        return None;
    }

    Some(Expression::Fma(FmaExpression {
        a: mul.left.clone(),
        b: mul.right.clone(),
        c: Box::new(addend.clone()),
        span: b.span,
    }))
}

/// Conservatively numeric: anything that cannot be a string, list, map
/// or lambda value.
fn is_numeric(expr: &Expression) -> bool {
    !matches!(
        expr,
        Expression::Str(_)
            | Expression::FString(_)
            | Expression::List(_)
            | Expression::Map(_)
            | Expression::Lambda(_)
            | Expression::Vector(_)
    )
}

fn bool_num(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Span;

    fn num(value: f64) -> Expression {
        Expression::Number(NumberLiteral {
            value,
            span: Span::synthetic(),
        })
    }

    fn ident(name: &str) -> Expression {
        Expression::Identifier(Identifier {
            name: name.into(),
            span: Span::synthetic(),
        })
    }

    fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        Expression::Binary(BinaryExpression {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: Span::synthetic(),
        })
    }

    #[test]
    fn test_fold_arithmetic() {
        let mut e = binary(BinaryOp::Div, num(84.0), num(2.0));
        fold_expr(&mut e);
        assert_eq!(e.as_number(), Some(42.0));
    }

    #[test]
    fn test_division_by_literal_zero_not_folded() {
        let mut e = binary(BinaryOp::Div, num(1.0), num(0.0));
        fold_expr(&mut e);
        assert!(matches!(e, Expression::Binary(_)));
    }

    #[test]
    fn test_fold_nested() {
        // (2 + 3) * 4 → 20
        let mut e = binary(
            BinaryOp::Mul,
            binary(BinaryOp::Add, num(2.0), num(3.0)),
            num(4.0),
        );
        fold_expr(&mut e);
        assert_eq!(e.as_number(), Some(20.0));
    }

    #[test]
    fn test_fma_fusion() {
        // a*b + c with non-literal operands fuses
        let mut e = binary(
            BinaryOp::Add,
            binary(BinaryOp::Mul, ident("a"), ident("b")),
            ident("c"),
        );
        fold_expr(&mut e);
        assert!(matches!(e, Expression::Fma(_)));
    }

    #[test]
    fn test_fma_fusion_mirrored() {
        // c + a*b also fuses
        let mut e = binary(
            BinaryOp::Add,
            ident("c"),
            binary(BinaryOp::Mul, ident("a"), ident("b")),
        );
        fold_expr(&mut e);
        assert!(matches!(e, Expression::Fma(_)));
    }

    #[test]
    fn test_literal_fma_folds_to_number() {
        // All-literal a*b + c folds to a plain number instead
        let mut e = binary(
            BinaryOp::Add,
            binary(BinaryOp::Mul, num(2.0), num(3.0)),
            num(4.0),
        );
        fold_expr(&mut e);
        assert_eq!(e.as_number(), Some(10.0));
    }

    #[test]
    fn test_no_fma_for_strings() {
        let s = Expression::Str(StringLiteral {
            value: "x".into(),
            span: Span::synthetic(),
        });
        let mut e = binary(
            BinaryOp::Add,
            binary(BinaryOp::Mul, ident("a"), ident("b")),
            s,
        );
        fold_expr(&mut e);
        assert!(matches!(e, Expression::Binary(_)));
    }

    #[test]
    fn test_fold_string_concat() {
        let l = Expression::Str(StringLiteral {
            value: "foo".into(),
            span: Span::synthetic(),
        });
        let r = Expression::Str(StringLiteral {
            value: "bar".into(),
            span: Span::synthetic(),
        });
        let mut e = binary(BinaryOp::Add, l, r);
        fold_expr(&mut e);
        assert!(matches!(e, Expression::Str(s) if s.value == "foobar"));
    }
}

//! Expression-level parsing tests: precedence, the match forms, lambda
//! surface forms, f-strings, and unsafe blocks.

use velo_parser::ast::*;
use velo_parser::parse;
use velo_parser::parser::ParseErrorKind;

/// The value of the last binding in the source (helpers may precede it).
fn first_binding_value(source: &str) -> Expression {
    let module = parse(source).unwrap();
    module
        .statements
        .into_iter()
        .rev()
        .find_map(|stmt| match stmt {
            Statement::Binding(b) => Some(b.value),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no binding in {source:?}"))
}

#[test]
fn test_precedence_mul_over_add() {
    // 1 + 2 * 3 folds to 7, proving * bound tighter
    let value = first_binding_value("x = 1 + 2 * 3\n");
    assert_eq!(value.as_number(), Some(7.0));
}

#[test]
fn test_power_right_associative() {
    // 2 ^ 3 ^ 2 = 2 ^ 9 = 512
    let value = first_binding_value("x = 2 ^ 3 ^ 2\n");
    assert_eq!(value.as_number(), Some(512.0));
}

#[test]
fn test_bitwise_family() {
    assert_eq!(first_binding_value("x = 6 &b 3\n").as_number(), Some(2.0));
    assert_eq!(first_binding_value("x = 4 |b 1\n").as_number(), Some(5.0));
    assert_eq!(first_binding_value("x = 5 ^b 1\n").as_number(), Some(4.0));
    assert_eq!(first_binding_value("x = 1 <<b 4\n").as_number(), Some(16.0));
    assert_eq!(first_binding_value("x = 16 >>b 2\n").as_number(), Some(4.0));
    assert_eq!(first_binding_value("x = 5 ?b 2\n").as_number(), Some(1.0));
}

#[test]
fn test_pipe_operator() {
    let value = first_binding_value("double = v -> v * 2\nx = 5 | double\n");
    match value {
        Expression::Binary(b) => assert_eq!(b.op, BinaryOp::Pipe),
        other => panic!("expected pipe, got {other:?}"),
    }
}

#[test]
fn test_or_bang() {
    let value = first_binding_value("risky = () { 1 }\nx = risky() or! 0\n");
    match value {
        Expression::Binary(b) => assert_eq!(b.op, BinaryOp::OrElse),
        other => panic!("expected or!, got {other:?}"),
    }
}

#[test]
fn test_range_expression() {
    let value = first_binding_value("x = 0..10\n");
    match value {
        Expression::Range(r) => assert_eq!(r.literal_bound(), Some(10)),
        other => panic!("expected range, got {other:?}"),
    }
}

#[test]
fn test_map_literal_disambiguation() {
    let value = first_binding_value("x = { a: 1, b: 2 }\n");
    match value {
        Expression::Map(m) => assert_eq!(m.entries.len(), 2),
        other => panic!("expected map, got {other:?}"),
    }
}

#[test]
fn test_block_on_assignment_becomes_lambda() {
    // A bare statement block on the RHS wraps into a zero-arg lambda
    let value = first_binding_value("x = {\n    1\n}\n");
    match value {
        Expression::Lambda(l) => {
            assert_eq!(l.clauses.len(), 1);
            assert!(l.clauses[0].params.is_empty());
        }
        other => panic!("expected lambda, got {other:?}"),
    }
}

#[test]
fn test_value_match_attaches_scrutinee() {
    let value = first_binding_value("f = n -> n == 0 {\n    1 => 10\n    _ => 20\n}\n");
    match value {
        Expression::Lambda(l) => match l.clauses[0].body.as_ref() {
            Expression::Match(m) => {
                assert!(m.scrutinee.is_some());
                assert!(m.explicit_default);
                // The whole comparison is the scrutinee, not its last term
                assert!(matches!(
                    m.scrutinee.as_deref(),
                    Some(Expression::Binary(b)) if b.op == BinaryOp::Eq
                ));
            }
            other => panic!("expected match, got {other:?}"),
        },
        other => panic!("expected lambda, got {other:?}"),
    }
}

#[test]
fn test_guard_match() {
    let value = first_binding_value(
        "classify = age -> {\n    | age < 13 => 1\n    | age < 18 => 2\n    _ => 3\n}\n",
    );
    match value {
        Expression::Lambda(l) => match l.clauses[0].body.as_ref() {
            Expression::Match(m) => {
                assert!(m.scrutinee.is_none());
                assert_eq!(m.clauses.len(), 3);
                assert!(m.clauses[0].guard.is_some());
                assert!(m.clauses[0].pattern.is_none());
                assert!(m.clauses[2].is_default());
                assert!(m.explicit_default);
            }
            other => panic!("expected match, got {other:?}"),
        },
        other => panic!("expected lambda, got {other:?}"),
    }
}

#[test]
fn test_implicit_default_flagged() {
    let value = first_binding_value("f = n -> n {\n    0 => 1\n}\n");
    match value {
        Expression::Lambda(l) => match l.clauses[0].body.as_ref() {
            Expression::Match(m) => assert!(!m.explicit_default),
            other => panic!("expected match, got {other:?}"),
        },
        other => panic!("expected lambda, got {other:?}"),
    }
}

#[test]
fn test_fallthrough_arrow() {
    let value = first_binding_value("f = n -> n {\n    0 ~> 1\n    _ => 2\n}\n");
    match value {
        Expression::Lambda(l) => match l.clauses[0].body.as_ref() {
            Expression::Match(m) => assert!(m.clauses[0].fallthrough),
            other => panic!("expected match, got {other:?}"),
        },
        other => panic!("expected lambda, got {other:?}"),
    }
}

#[test]
fn test_lambda_surface_forms() {
    // x -> expr
    let v = first_binding_value("f = x -> x + 1\n");
    assert!(matches!(v, Expression::Lambda(ref l) if l.arity() == 1));

    // (x, y) -> expr
    let v = first_binding_value("f = (x, y) -> x + y\n");
    assert!(matches!(v, Expression::Lambda(ref l) if l.arity() == 2));

    // (x, y) { ... }
    let v = first_binding_value("f = (x, y) {\n    x + y\n}\n");
    assert!(matches!(v, Expression::Lambda(ref l) if l.arity() == 2));

    // variadic tail
    let v = first_binding_value("f = (x, rest...) -> x\n");
    assert!(matches!(v, Expression::Lambda(ref l) if l.is_variadic()));
}

#[test]
fn test_pattern_lambda_clauses() {
    let v = first_binding_value("fact = (0) -> 1 | (n) -> n * fact(n - 1) max inf\n");
    match v {
        Expression::Lambda(l) => {
            assert_eq!(l.clauses.len(), 2);
            assert_eq!(l.clauses[0].params[0].pattern, Some(0.0));
            assert!(l.clauses[1].params[0].pattern.is_none());
        }
        other => panic!("expected lambda, got {other:?}"),
    }
}

#[test]
fn test_lambda_registry_and_captures() {
    let module = parse("make = n -> {\n    inner = x -> x + n\n    inner\n}\n").unwrap();
    // Both make and inner are lifted
    assert_eq!(module.lambdas.len(), 2);
    let inner = module
        .lambdas
        .iter()
        .find(|l| l.captures.contains(&"n".to_string()))
        .expect("inner lambda should capture n");
    assert_eq!(inner.captures, vec!["n".to_string()]);
}

#[test]
fn test_recursion_requires_cap() {
    let errs = parse("f = n -> f(n - 1)\n").unwrap_err();
    assert!(errs
        .iter()
        .any(|e| matches!(e.kind, ParseErrorKind::MissingRecursionCap { .. })));
}

#[test]
fn test_recursion_cap_forms() {
    let v = first_binding_value("f = n -> f(n - 1) max 100\n");
    match v {
        Expression::Lambda(l) => match l.clauses[0].body.as_ref() {
            Expression::Call(c) => assert_eq!(c.cap, Some(RecursionCap::Bounded(100))),
            other => panic!("expected call, got {other:?}"),
        },
        other => panic!("expected lambda, got {other:?}"),
    }

    let v = first_binding_value("f = n -> f(n - 1) max inf\n");
    match v {
        Expression::Lambda(l) => match l.clauses[0].body.as_ref() {
            Expression::Call(c) => assert_eq!(c.cap, Some(RecursionCap::Infinite)),
            other => panic!("expected call, got {other:?}"),
        },
        other => panic!("expected lambda, got {other:?}"),
    }
}

#[test]
fn test_fstring_parts() {
    let v = first_binding_value("a = 1\nb = 2\nmsg = f\"sum: {a + b}!\"\n");
    match v {
        Expression::FString(f) => {
            assert_eq!(f.parts.len(), 3);
            assert!(matches!(&f.parts[0], FStringPart::Text(t) if t == "sum: "));
            assert!(matches!(&f.parts[1], FStringPart::Expr(_)));
            assert!(matches!(&f.parts[2], FStringPart::Text(t) if t == "!"));
        }
        other => panic!("expected f-string, got {other:?}"),
    }
}

#[test]
fn test_namespaced_call() {
    let module = parse("import \"vendor/libSDL2\" sdl\nsdl.init(0)\n").unwrap();
    match &module.statements[1] {
        Statement::Expression(e) => match &e.expression {
            Expression::Call(c) => {
                assert!(matches!(c.callee.as_ref(), Expression::Namespaced(n) if n.namespace == "sdl" && n.name == "init"));
            }
            other => panic!("expected call, got {other:?}"),
        },
        other => panic!("expected expression, got {other:?}"),
    }
}

#[test]
fn test_member_access_is_string_index() {
    let module = parse("m = { a: 1 }\nx = m.a\n").unwrap();
    match &module.statements[1] {
        Statement::Binding(b) => match &b.value {
            Expression::Index(i) => {
                assert!(matches!(i.index.as_ref(), Expression::Str(s) if s.value == "a"));
            }
            other => panic!("expected index, got {other:?}"),
        },
        other => panic!("expected binding, got {other:?}"),
    }
}

#[test]
fn test_cast_expression() {
    let v = first_binding_value("x = 3 as int32\n");
    match v {
        Expression::Cast(c) => assert_eq!(c.ty, TypeTag::I32),
        other => panic!("expected cast, got {other:?}"),
    }
}

#[test]
fn test_length_expression() {
    let v = first_binding_value("xs = [1, 2, 3]\nn = #xs\n");
    assert!(matches!(v, Expression::Length(_)));
}

#[test]
fn test_simd_vector_literal() {
    let v = first_binding_value("v = simd(1, 2, 3, 4)\n");
    match v {
        Expression::Vector(vec) => assert_eq!(vec.elements.len(), 4),
        other => panic!("expected vector, got {other:?}"),
    }
}

#[test]
fn test_spawn_and_channels() {
    let module = parse("worker = n -> n\nh = spawn worker(1)\nh <- 5\nr <= h\n").unwrap();
    assert!(matches!(
        &module.statements[1],
        Statement::Binding(b) if matches!(b.value, Expression::Spawn(_))
    ));
    assert!(matches!(&module.statements[3], Statement::Receive(_)));
}

#[test]
fn test_unsafe_block_triple() {
    let source = "r = unsafe {\n    x86\n    rax = 60\n    syscall\n} {\n    arm64\n    x0 = 60\n    svc\n} {\n    riscv64\n    a0 = 60\n    ecall\n} as num\n";
    let v = first_binding_value(source);
    match v {
        Expression::UnsafeBlock(u) => {
            assert_eq!(u.arms.len(), 3);
            assert_eq!(u.arms[0].arch, UnsafeArch::X86);
            assert_eq!(u.arms[1].arch, UnsafeArch::Arm64);
            assert_eq!(u.arms[2].arch, UnsafeArch::RiscV64);
            assert_eq!(u.result, TypeTag::Num);
            assert!(matches!(u.arms[0].instructions[1], AsmInstr::Syscall));
        }
        other => panic!("expected unsafe block, got {other:?}"),
    }
}

#[test]
fn test_unsafe_memory_forms() {
    let source = "r = unsafe {\n    x86\n    rax = [rdi + 8] as int32\n    [rsi] = rax as int64\n} as num\n";
    let v = first_binding_value(source);
    match v {
        Expression::UnsafeBlock(u) => {
            assert!(matches!(
                &u.arms[0].instructions[0],
                AsmInstr::Load { ty: Some(TypeTag::I32), .. }
            ));
            assert!(matches!(
                &u.arms[0].instructions[1],
                AsmInstr::Store { ty: Some(TypeTag::I64), .. }
            ));
        }
        other => panic!("expected unsafe block, got {other:?}"),
    }
}

#[test]
fn test_postfix_increment() {
    let module = parse("i := 0\ni++\n").unwrap();
    match &module.statements[1] {
        Statement::Expression(e) => assert!(matches!(
            e.expression,
            Expression::Postfix(PostfixExpression {
                op: PostfixOp::Increment,
                ..
            })
        )),
        other => panic!("expected postfix, got {other:?}"),
    }
}

#[test]
fn test_loop_expression_position() {
    let v = first_binding_value("total = @ i: 0..10 {\n    i\n}\n");
    assert!(matches!(v, Expression::LoopExpr(_)));
}

//! Statement-level parsing tests.

use velo_parser::ast::*;
use velo_parser::parse;
use velo_parser::parser::ParseErrorKind;

fn parse_err(source: &str) -> Vec<velo_parser::ParseError> {
    parse(source).unwrap_err()
}

#[test]
fn test_simple_binding() {
    let module = parse("x = 42\n").unwrap();
    assert_eq!(module.statements.len(), 1);
    match &module.statements[0] {
        Statement::Binding(b) => {
            assert_eq!(b.name, "x");
            assert!(!b.mutable);
            assert!(!b.shadow);
            assert_eq!(b.value.as_number(), Some(42.0));
        }
        other => panic!("expected binding, got {other:?}"),
    }
}

#[test]
fn test_mutable_binding_and_reassign() {
    let module = parse("acc := 0\nacc = acc + 1\n").unwrap();
    match &module.statements[1] {
        Statement::Binding(b) => {
            assert!(b.reassign);
        }
        other => panic!("expected binding, got {other:?}"),
    }
}

#[test]
fn test_duplicate_declaration_rejected() {
    let errs = parse_err("x = 1\nx = 2\n");
    assert!(errs
        .iter()
        .any(|e| matches!(e.kind, ParseErrorKind::DuplicateDeclaration { .. })));
}

#[test]
fn test_shadow_required_for_inner_redefinition() {
    let errs = parse_err("x = 1\n{\n    x = 2\n}\n");
    assert!(errs
        .iter()
        .any(|e| matches!(e.kind, ParseErrorKind::ShadowRequired { .. })));
}

#[test]
fn test_shadow_accepted() {
    let module = parse("x = 1\n{\n    shadow x = 2\n}\n").unwrap();
    assert_eq!(module.statements.len(), 2);
}

#[test]
fn test_shadow_without_outer_rejected() {
    let errs = parse_err("shadow y = 2\n");
    assert!(errs
        .iter()
        .any(|e| matches!(e.kind, ParseErrorKind::ShadowWithoutOuter { .. })));
}

#[test]
fn test_constant_substitution() {
    let module = parse("LIMIT = 100\nx = LIMIT + 1\n").unwrap();
    match &module.statements[1] {
        Statement::Binding(b) => {
            // Folded at parse time: LIMIT + 1 → 101
            assert_eq!(b.value.as_number(), Some(101.0));
        }
        other => panic!("expected binding, got {other:?}"),
    }
}

#[test]
fn test_loop_with_proved_bound() {
    let module = parse("total := 0\n@ i: 0..3 {\n    total = total + i\n}\n").unwrap();
    match &module.statements[1] {
        Statement::Loop(l) => {
            assert_eq!(l.binder.as_deref(), Some("i"));
            assert_eq!(l.cap, LoopCap::Proved(3));
            assert_eq!(l.parallel, Parallelism::None);
        }
        other => panic!("expected loop, got {other:?}"),
    }
}

#[test]
fn test_loop_needs_cap_without_literal_bound() {
    let errs = parse_err("xs = [1, 2]\nn = 3\n@ i: n {\n}\n");
    assert!(errs
        .iter()
        .any(|e| matches!(e.kind, ParseErrorKind::MissingLoopCap)));
}

#[test]
fn test_loop_with_explicit_cap() {
    let module = parse("n = 3\nm := 0\n@ i: n {\n    m = i\n} max 10\n").unwrap();
    match &module.statements[2] {
        Statement::Loop(l) => assert_eq!(l.cap, LoopCap::Explicit(10)),
        other => panic!("expected loop, got {other:?}"),
    }
}

#[test]
fn test_literal_list_bound_is_proved() {
    let module = parse("@ x: [1, 2, 3] {\n}\n").unwrap();
    match &module.statements[0] {
        Statement::Loop(l) => assert_eq!(l.cap, LoopCap::Proved(3)),
        other => panic!("expected loop, got {other:?}"),
    }
}

#[test]
fn test_parallel_loop_forms() {
    let module = parse("@@ i: 0..4 {\n}\n4 @ i: 0..100 {\n}\n").unwrap();
    match (&module.statements[0], &module.statements[1]) {
        (Statement::Loop(a), Statement::Loop(b)) => {
            assert_eq!(a.parallel, Parallelism::AllCores);
            assert_eq!(b.parallel, Parallelism::Workers(4));
        }
        other => panic!("expected loops, got {other:?}"),
    }
}

#[test]
fn test_parallel_loop_reducer() {
    let module = parse("@@ i: 0..4 {\n    i * 2\n} -> (a, b) -> a + b\n").unwrap();
    match &module.statements[0] {
        Statement::Loop(l) => assert!(l.reducer.is_some()),
        other => panic!("expected loop, got {other:?}"),
    }
}

#[test]
fn test_defer_statement() {
    let module = parse("f = () {\n    defer cleanup()\n    1\n}\ncleanup = () { 0 }\n");
    let module = module.unwrap();
    assert_eq!(module.statements.len(), 2);
}

#[test]
fn test_arena_block() {
    let module = parse("arena {\n    x = 1\n}\n").unwrap();
    assert!(matches!(module.statements[0], Statement::ArenaBlock(_)));
}

#[test]
fn test_ret_statement() {
    let module = parse("f = () {\n    ret 42\n}\n").unwrap();
    match &module.statements[0] {
        Statement::Binding(b) => assert!(matches!(b.value, Expression::Lambda(_))),
        other => panic!("expected binding, got {other:?}"),
    }
}

#[test]
fn test_indexed_update() {
    let module = parse("m = { a: 1 }\nm[\"b\"] = 2\n").unwrap();
    assert!(matches!(module.statements[1], Statement::IndexedUpdate(_)));
}

#[test]
fn test_import_and_export() {
    let module = parse("import \"vendor/libSDL2\" sdl\nexport run\nrun = () { 0 }\n").unwrap();
    assert!(matches!(module.statements[0], Statement::Import(_)));
    assert!(matches!(module.statements[1], Statement::Export(_)));
    assert_eq!(module.imports.len(), 1);
    assert_eq!(module.imports[0].0, "sdl");
}

#[test]
fn test_receive_statement() {
    let module = parse("msg <= remote\n").unwrap();
    match &module.statements[0] {
        Statement::Receive(r) => assert_eq!(r.name, "msg"),
        other => panic!("expected receive, got {other:?}"),
    }
}

#[test]
fn test_send_statement() {
    let module = parse("remote <- 42\n").unwrap();
    match &module.statements[0] {
        Statement::Expression(e) => assert!(matches!(e.expression, Expression::Send(_))),
        other => panic!("expected send expression, got {other:?}"),
    }
}

#[test]
fn test_cstruct_registry() {
    let module = parse("cstruct Event {\n    kind: int32\n    value: double\n}\n").unwrap();
    assert_eq!(module.cstructs.len(), 1);
    let layout = &module.cstructs[0];
    assert_eq!(layout.name, "Event");
    assert_eq!(layout.fields[0].offset, 0);
    assert_eq!(layout.fields[1].offset, 8);
    assert_eq!(layout.size, 16);
}

#[test]
fn test_packed_cstruct() {
    let module = parse("cstruct Wire packed {\n    kind: int32\n    value: double\n}\n").unwrap();
    let layout = &module.cstructs[0];
    assert_eq!(layout.fields[1].offset, 4);
    assert_eq!(layout.size, 12);
}

#[test]
fn test_class_desugars_to_methods() {
    let module = parse("class Counter {\n    bump = (n) -> n + 1\n}\n").unwrap();
    match &module.statements[0] {
        Statement::ClassDecl(c) => {
            assert_eq!(c.name, "Counter");
            assert_eq!(c.methods.len(), 1);
            assert_eq!(c.methods[0].0, "bump");
        }
        other => panic!("expected class, got {other:?}"),
    }
}

#[test]
fn test_error_recovery_collects_multiple() {
    // Two distinct statement-level errors should both be reported
    let errs = parse_err("x = 1\nx = 2\nshadow q = 3\n");
    assert!(errs.len() >= 2);
}

#[test]
fn test_jump_statements() {
    let module = parse("@ i: 0..10 {\n    break\n}\n").unwrap();
    match &module.statements[0] {
        Statement::Loop(l) => {
            assert!(matches!(
                l.body.statements[0],
                Statement::Jump(JumpStatement {
                    kind: JumpKind::Break,
                    ..
                })
            ));
        }
        other => panic!("expected loop, got {other:?}"),
    }
}

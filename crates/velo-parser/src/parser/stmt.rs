//! Statement parsing.
//!
//! Statements terminate at newlines (or `;`, `}`, EOF). Function
//! definitions are ordinary bindings whose right-hand side is a lambda;
//! while the RHS of a binding parses, the bound name sits on `fn_stack`
//! so recursive call sites can be required to carry `max`.

use super::{block, expr, ParseError, ParseErrorKind, Parser};
use crate::ast::*;
use crate::token::Token;

/// Parse a single statement.
pub fn parse_statement(parser: &mut Parser) -> Result<Statement, ParseError> {
    match parser.current() {
        Token::Import => parse_import(parser),
        Token::Export => parse_export(parser),
        Token::Class => parse_class(parser),
        Token::CStruct => parse_cstruct(parser),
        Token::Ret => parse_return(parser),
        Token::Break | Token::Continue => parse_jump(parser),
        Token::Shadow => {
            let span = parser.current_span();
            parser.advance();
            let name = expr::expect_identifier(parser)?;
            if parser.eat(&Token::LessEq) {
                let channel = expr::parse_expression(parser)?;
                let stmt_span = span.to(channel.span());
                declare_binding(parser, &name, true, stmt_span)?;
                parser.expect_terminator()?;
                return Ok(Statement::Receive(ReceiveStatement {
                    name,
                    channel,
                    shadow: true,
                    span: stmt_span,
                }));
            }
            parse_binding(parser, name, span, true)
        }
        Token::Defer if !matches!(parser.peek(), Some(Token::Assign | Token::DeclareAssign)) => {
            parse_defer(parser)
        }
        Token::Arena if matches!(parser.peek(), Some(Token::LBrace)) => parse_arena(parser),
        Token::At | Token::AtAt => {
            let stmt = parse_loop(parser, None)?;
            Ok(Statement::Loop(stmt))
        }
        Token::Number(n) if matches!(parser.peek(), Some(Token::At)) => {
            let workers = *n as u32;
            parser.advance(); // count
            let stmt = parse_loop(parser, Some(Parallelism::Workers(workers)))?;
            Ok(Statement::Loop(stmt))
        }
        Token::Identifier(_) => parse_identifier_statement(parser),
        _ => parse_expression_statement(parser),
    }
}

/// A statement that starts with an identifier: binding, reassignment,
/// receive, indexed update, or a plain expression.
fn parse_identifier_statement(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();

    match parser.peek() {
        Some(Token::Assign | Token::DeclareAssign) => {
            let name = expr::expect_identifier(parser)?;
            parse_binding(parser, name, span, false)
        }
        Some(Token::LessEq) => {
            // `value <= addr` at statement head is a channel receive
            let name = expr::expect_identifier(parser)?;
            parser.advance(); // <=
            let channel = expr::parse_expression(parser)?;
            let stmt_span = span.to(channel.span());
            declare_binding(parser, &name, false, stmt_span)?;
            parser.expect_terminator()?;
            Ok(Statement::Receive(ReceiveStatement {
                name,
                channel,
                shadow: false,
                span: stmt_span,
            }))
        }
        Some(Token::LBracket) => {
            // Either `m[k] = v` or an expression beginning with an index
            let snap = parser.snapshot();
            let target = expr::parse_postfix(parser)?;
            if parser.check(&Token::Assign) {
                if let Expression::Index(index) = target {
                    parser.advance(); // =
                    let value = expr::parse_expression(parser)?;
                    let stmt_span = span.to(value.span());
                    parser.expect_terminator()?;
                    return Ok(Statement::IndexedUpdate(IndexedUpdateStatement {
                        target: index,
                        value,
                        span: stmt_span,
                    }));
                }
            }
            parser.rewind(snap);
            parse_expression_statement(parser)
        }
        _ => parse_expression_statement(parser),
    }
}

/// Shared scope bookkeeping for name-introducing statements. Enforces
/// the shadow rule and duplicate detection; returns whether this is a
/// reassignment of an existing mutable binding.
fn declare_binding(
    parser: &mut Parser,
    name: &str,
    shadow: bool,
    span: crate::token::Span,
) -> Result<bool, ParseError> {
    if shadow {
        if !parser.scopes.declared_outer(name) {
            return Err(ParseError::new(
                ParseErrorKind::ShadowWithoutOuter { name: name.to_string() },
                span,
            ));
        }
        parser.scopes.declare(name);
        return Ok(false);
    }

    if parser.scopes.declared_here(name) {
        if parser.mutables.contains(name) {
            return Ok(true);
        }
        return Err(ParseError::new(
            ParseErrorKind::DuplicateDeclaration { name: name.to_string() },
            span,
        ));
    }

    if parser.scopes.declared_outer(name) {
        if parser.mutables.contains(name) {
            // Writing through to an outer mutable binding
            return Ok(true);
        }
        return Err(ParseError::new(
            ParseErrorKind::ShadowRequired { name: name.to_string() },
            span,
        )
        .with_suggestion(format!("shadow {name} = ...")));
    }

    parser.scopes.declare(name);
    Ok(false)
}

/// `name = expr`, `name := expr`, with optional leading `shadow`.
fn parse_binding(
    parser: &mut Parser,
    name: String,
    span: crate::token::Span,
    shadow: bool,
) -> Result<Statement, ParseError> {
    let mutable = match parser.advance() {
        Token::DeclareAssign => true,
        Token::Assign => false,
        _ => return Err(parser.unexpected_token(&[Token::Assign, Token::DeclareAssign])),
    };

    let reassign = declare_binding(parser, &name, shadow, span)?;
    if mutable && !reassign {
        parser.mutables.insert(name.clone());
    }

    // While the RHS parses, the name is a potential recursion target
    parser.fn_stack.push(name.clone());
    let value = expr::parse_expression(parser);
    parser.fn_stack.pop();
    let mut value = value?;

    // A bare statement block or scrutinee-less match on the RHS is a
    // zero-argument function body; a map literal is not.
    value = maybe_wrap_zero_arg_lambda(parser, value);

    // UPPERCASE names bound to literals join the constants table
    if !mutable && !reassign && is_constant_name(&name) {
        if let Expression::Number(_) | Expression::Str(_) = &value {
            parser.constants.insert(name.clone(), value.clone());
        }
    }

    parser.infer_type(&name, &value);

    let stmt_span = span.to(value.span());
    parser.expect_terminator()?;

    Ok(Statement::Binding(BindingStatement {
        name,
        value,
        shadow,
        mutable,
        reassign,
        span: stmt_span,
    }))
}

/// Wrap a bare block / guard match bound with `=` into a zero-argument
/// lambda so it becomes callable rather than immediately evaluated.
fn maybe_wrap_zero_arg_lambda(parser: &mut Parser, value: Expression) -> Expression {
    let wrap = matches!(&value, Expression::Block(_))
        || matches!(&value, Expression::Match(m) if m.scrutinee.is_none());
    if !wrap {
        return value;
    }

    let span = *value.span();
    let lambda = LambdaExpression {
        name: parser.next_lambda_name(),
        clauses: vec![LambdaClause {
            params: Vec::new(),
            body: Box::new(value),
            span,
        }],
        span,
    };
    parser.lift_lambda(&lambda);
    Expression::Lambda(lambda)
}

fn is_constant_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Loop statement. Forms:
///
/// ```text
/// @ i: 0..10 { body }            sequential
/// @ 10 { body }                  bare counted
/// @@ i: xs { body } -> reducer   one process per iteration
/// 4 @ i: xs { body }             capped worker count
/// ```
///
/// Every loop ends up with a bound: proved from a literal range/list/
/// count, or an explicit `max N`.
pub fn parse_loop(
    parser: &mut Parser,
    workers: Option<Parallelism>,
) -> Result<LoopStatement, ParseError> {
    let span = parser.current_span();

    let parallel = if let Some(w) = workers {
        parser.expect(Token::At)?;
        w
    } else if parser.eat(&Token::AtAt) {
        Parallelism::AllCores
    } else {
        parser.expect(Token::At)?;
        Parallelism::None
    };

    // `@ ident : iterable` vs `@ iterable`
    let binder = if parser.current().as_identifier().is_some()
        && matches!(parser.peek(), Some(Token::Colon))
    {
        let name = expr::expect_identifier(parser)?;
        parser.expect(Token::Colon)?;
        Some(name)
    } else {
        None
    };

    let was = parser.no_block;
    parser.no_block = true;
    let iterable = expr::parse_expression(parser);
    parser.no_block = was;
    let iterable = iterable?;

    parser.scopes.push();
    if let Some(b) = &binder {
        parser.scopes.declare(b);
    }
    let body = block::parse_block(parser);
    parser.scopes.pop();
    let body = body?;

    // Optional reducer for parallel loops
    let reducer = if parallel != Parallelism::None && parser.eat(&Token::Arrow) {
        Some(expr::parse_expression(parser)?)
    } else {
        None
    };

    // `max N` overrides; otherwise the bound must be provable
    let cap = if parser.eat(&Token::Max) {
        match parser.current().clone() {
            Token::Number(n) => {
                parser.advance();
                LoopCap::Explicit(n as u64)
            }
            _ => return Err(parser.unexpected_token(&[Token::Number(0.0)])),
        }
    } else {
        match proved_bound(&iterable) {
            Some(n) => LoopCap::Proved(n),
            None => {
                return Err(ParseError::new(ParseErrorKind::MissingLoopCap, span))
            }
        }
    };

    let stmt_span = span.to(&body.span);
    Ok(LoopStatement {
        binder,
        iterable,
        body,
        cap,
        parallel,
        reducer,
        span: stmt_span,
    })
}

/// Compile-time iteration bound: literal range, literal list, literal
/// count.
fn proved_bound(iterable: &Expression) -> Option<u64> {
    match iterable {
        Expression::Range(r) => r.literal_bound(),
        Expression::List(l) => Some(l.elements.len() as u64),
        Expression::Number(n) if n.value >= 0.0 => Some(n.value as u64),
        _ => None,
    }
}

fn parse_return(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::Ret)?;

    let value = if matches!(
        parser.current(),
        Token::Newline | Token::Semicolon | Token::RBrace | Token::Eof
    ) {
        None
    } else {
        Some(expr::parse_expression(parser)?)
    };

    let stmt_span = value
        .as_ref()
        .map(|v| span.to(v.span()))
        .unwrap_or(span);
    parser.expect_terminator()?;
    Ok(Statement::Return(ReturnStatement {
        value,
        span: stmt_span,
    }))
}

fn parse_jump(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    let kind = if parser.eat(&Token::Break) {
        JumpKind::Break
    } else {
        parser.expect(Token::Continue)?;
        JumpKind::Continue
    };
    parser.expect_terminator()?;
    Ok(Statement::Jump(JumpStatement { kind, span }))
}

fn parse_defer(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::Defer)?;
    let expression = expr::parse_expression(parser)?;
    let stmt_span = span.to(expression.span());
    parser.expect_terminator()?;
    Ok(Statement::Defer(DeferStatement {
        expression,
        span: stmt_span,
    }))
}

fn parse_arena(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::Arena)?;
    let body = block::parse_block(parser)?;
    let stmt_span = span.to(&body.span);
    Ok(Statement::ArenaBlock(ArenaBlockStatement {
        body,
        span: stmt_span,
    }))
}

fn parse_import(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::Import)?;

    let (target, default_alias) = match parser.current().clone() {
        Token::Str(path) => {
            parser.advance();
            let stem = path
                .rsplit('/')
                .next()
                .unwrap_or(&path)
                .trim_end_matches(".velo")
                .to_string();
            (path, stem)
        }
        tok => match tok.as_identifier() {
            Some(name) => {
                let name = name.to_string();
                parser.advance();
                (name.clone(), name)
            }
            None => {
                return Err(parser.unexpected_token(&[
                    Token::Str(String::new()),
                    Token::Identifier(String::new()),
                ]))
            }
        },
    };

    // `import sdl "libSDL2"` style alias
    let alias = if parser.current().as_identifier().is_some()
        && !matches!(parser.current(), Token::Max | Token::Inf)
    {
        Some(expr::expect_identifier(parser)?)
    } else {
        None
    };

    let ns = alias.clone().unwrap_or(default_alias);
    parser.imports.push((ns, target.clone()));
    parser.expect_terminator()?;

    Ok(Statement::Import(ImportStatement {
        target,
        alias,
        span,
    }))
}

fn parse_export(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::Export)?;
    let name = expr::expect_identifier(parser)?;
    parser.expect_terminator()?;
    Ok(Statement::Export(ExportStatement { name, span }))
}

/// `class Name { method = lambda … }`: desugars to a map of closures;
/// method dispatch is a map lookup.
fn parse_class(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::Class)?;
    let name = expr::expect_identifier(parser)?;
    declare_binding(parser, &name, false, span)?;

    parser.expect(Token::LBrace)?;
    parser.scopes.push();

    let mut methods = Vec::new();
    parser.skip_newlines();
    while !parser.check(&Token::RBrace) && !parser.at_eof() {
        let method_name = expr::expect_identifier(parser)?;
        parser.expect(Token::Assign)?;

        parser.fn_stack.push(method_name.clone());
        let value = expr::parse_expression(parser);
        parser.fn_stack.pop();
        let value = value?;

        match value {
            Expression::Lambda(lambda) => {
                parser.scopes.declare(&method_name);
                methods.push((method_name, lambda));
            }
            other => {
                parser.scopes.pop();
                return Err(ParseError::invalid_syntax(
                    format!("class member `{method_name}` must be a lambda"),
                    *other.span(),
                ));
            }
        }
        parser.skip_newlines();
    }

    parser.scopes.pop();
    let end = parser.current_span();
    parser.expect(Token::RBrace)?;

    Ok(Statement::ClassDecl(ClassDeclStatement {
        name,
        methods,
        span: span.to(&end),
    }))
}

/// `cstruct Name [packed] [aligned(N)] { field: type … }`
///
/// Field offsets and the total size are computed here and recorded in
/// the cstruct registry for FFI marshalling.
fn parse_cstruct(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::CStruct)?;
    let name = expr::expect_identifier(parser)?;

    let mut packed = false;
    let mut align = None;
    loop {
        if parser.eat(&Token::Packed) {
            packed = true;
        } else if parser.check(&Token::Aligned) {
            parser.advance();
            parser.expect(Token::LParen)?;
            match parser.current().clone() {
                Token::Number(n) => {
                    parser.advance();
                    align = Some(n as u32);
                }
                _ => return Err(parser.unexpected_token(&[Token::Number(0.0)])),
            }
            parser.expect(Token::RParen)?;
        } else {
            break;
        }
    }

    parser.expect(Token::LBrace)?;
    let mut fields = Vec::new();
    parser.skip_newlines();
    while !parser.check(&Token::RBrace) && !parser.at_eof() {
        let f_span = parser.current_span();
        let f_name = expr::expect_identifier(parser)?;
        parser.expect(Token::Colon)?;
        let ty_span = parser.current_span();
        let ty_name = expr::expect_identifier(parser)?;
        let ty = TypeTag::from_name(&ty_name).ok_or(ParseError::new(
            ParseErrorKind::UnknownType { name: ty_name },
            ty_span,
        ))?;
        fields.push(CStructField {
            name: f_name,
            ty,
            span: f_span,
        });
        parser.skip_newlines();
        parser.eat(&Token::Comma);
        parser.skip_newlines();
    }
    let end = parser.current_span();
    parser.expect(Token::RBrace)?;

    parser.cstructs.push(layout_cstruct(&name, &fields, packed, align));
    declare_binding(parser, &name, false, span)?;

    Ok(Statement::CStructDecl(CStructDeclStatement {
        name,
        fields,
        packed,
        align,
        span: span.to(&end),
    }))
}

/// Compute field offsets with C layout rules, honouring `packed` and
/// `aligned(N)`.
fn layout_cstruct(
    name: &str,
    fields: &[CStructField],
    packed: bool,
    align_override: Option<u32>,
) -> CStructLayout {
    let mut offset = 0u32;
    let mut max_align = 1u32;
    let mut out = Vec::with_capacity(fields.len());

    for field in fields {
        let size = field.ty.size();
        let field_align = if packed { 1 } else { size };
        max_align = max_align.max(field_align);
        offset = offset.next_multiple_of(field_align);
        out.push(CStructFieldLayout {
            name: field.name.clone(),
            ty: field.ty,
            offset,
        });
        offset += size;
    }

    let align = align_override.unwrap_or(max_align).max(1);
    let size = offset.next_multiple_of(align);

    CStructLayout {
        name: name.to_string(),
        fields: out,
        size,
        align,
    }
}

fn parse_expression_statement(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    let expression = expr::parse_expression(parser)?;
    let stmt_span = span.to(expression.span());
    parser.expect_terminator()?;
    Ok(Statement::Expression(ExpressionStatement {
        expression,
        span: stmt_span,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cstruct_layout() {
        let fields = vec![
            CStructField {
                name: "a".into(),
                ty: TypeTag::I32,
                span: crate::token::Span::synthetic(),
            },
            CStructField {
                name: "b".into(),
                ty: TypeTag::F64,
                span: crate::token::Span::synthetic(),
            },
        ];
        let layout = layout_cstruct("S", &fields, false, None);
        assert_eq!(layout.fields[0].offset, 0);
        assert_eq!(layout.fields[1].offset, 8);
        assert_eq!(layout.size, 16);
        assert_eq!(layout.align, 8);
    }

    #[test]
    fn test_cstruct_packed_layout() {
        let fields = vec![
            CStructField {
                name: "a".into(),
                ty: TypeTag::I32,
                span: crate::token::Span::synthetic(),
            },
            CStructField {
                name: "b".into(),
                ty: TypeTag::F64,
                span: crate::token::Span::synthetic(),
            },
        ];
        let layout = layout_cstruct("S", &fields, true, None);
        assert_eq!(layout.fields[1].offset, 4);
        assert_eq!(layout.size, 12);
    }
}

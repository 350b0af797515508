//! Expression parsing.
//!
//! Precedence, loosest first:
//!
//! ```text
//! <-  send
//! or! error recovery
//! |   pipe
//! ||  &&
//! ==  !=
//! <   <=  >  >=
//! ..  range
//! |b  ^b
//! &b
//! <<b >>b ?b
//! +   -
//! *   /  %
//! ^   power (right-assoc)
//! unary - ! ~b
//! postfix: call, index, member, ++ --, as, scrutinee-match
//! ```
//!
//! Pattern-lambda clause bodies parse one level above `|` so the pipe
//! token can separate clauses; pipe expressions inside a clause body need
//! parentheses.

use super::{block, stmt, ParseError, ParseErrorKind, Parser};
use crate::ast::*;
use crate::token::{Span, Token};

/// Parse a full expression.
pub fn parse_expression(parser: &mut Parser) -> Result<Expression, ParseError> {
    let expr = parse_send(parser)?;
    attach_match(parser, expr)
}

/// An expression directly before `{` attaches to the match block as its
/// scrutinee. The attachment binds loosest of all so the whole preceding
/// expression becomes the scrutinee.
fn attach_match(parser: &mut Parser, mut expr: Expression) -> Result<Expression, ParseError> {
    while !parser.no_block
        && parser.check(&Token::LBrace)
        && block::classify_block(parser) == block::BlockKind::Match
    {
        expr = block::parse_match(parser, Some(expr))?;
    }
    Ok(expr)
}

/// Clause bodies (lambda arrow bodies and match arm bodies) parse one
/// level above `|` so the pipe token can introduce the next clause; `or!`
/// and scrutinee attachment still apply. Pipe inside a clause body needs
/// parentheses.
pub(crate) fn parse_clause_expr(parser: &mut Parser) -> Result<Expression, ParseError> {
    let mut left = parse_logical_or(parser)?;

    while parser.check(&Token::OrBang) {
        parser.advance();
        let right = parse_logical_or(parser)?;
        let span = left.span().to(right.span());
        left = Expression::Binary(BinaryExpression {
            op: BinaryOp::OrElse,
            left: Box::new(left),
            right: Box::new(right),
            span,
        });
    }

    attach_match(parser, left)
}

fn parse_send(parser: &mut Parser) -> Result<Expression, ParseError> {
    let left = parse_or_else(parser)?;

    if parser.check(&Token::SendArrow) {
        parser.advance();
        let value = parse_send(parser)?;
        let span = left.span().to(value.span());
        return Ok(Expression::Send(SendExpression {
            channel: Box::new(left),
            value: Box::new(value),
            span,
        }));
    }

    Ok(left)
}

fn parse_or_else(parser: &mut Parser) -> Result<Expression, ParseError> {
    let mut left = parse_pipe(parser)?;

    while parser.check(&Token::OrBang) {
        parser.advance();
        let right = parse_pipe(parser)?;
        let span = left.span().to(right.span());
        left = Expression::Binary(BinaryExpression {
            op: BinaryOp::OrElse,
            left: Box::new(left),
            right: Box::new(right),
            span,
        });
    }

    Ok(left)
}

fn parse_pipe(parser: &mut Parser) -> Result<Expression, ParseError> {
    let mut left = parse_logical_or(parser)?;

    while parser.check(&Token::Pipe) {
        parser.advance();
        let right = parse_logical_or(parser)?;
        let span = left.span().to(right.span());
        left = Expression::Binary(BinaryExpression {
            op: BinaryOp::Pipe,
            left: Box::new(left),
            right: Box::new(right),
            span,
        });
    }

    Ok(left)
}

macro_rules! binary_level {
    ($name:ident, $next:ident, $($token:pat => $op:expr),+ $(,)?) => {
        fn $name(parser: &mut Parser) -> Result<Expression, ParseError> {
            let mut left = $next(parser)?;
            loop {
                let op = match parser.current() {
                    $($token => $op,)+
                    _ => break,
                };
                parser.advance();
                let right = $next(parser)?;
                let span = left.span().to(right.span());
                left = Expression::Binary(BinaryExpression {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                });
            }
            Ok(left)
        }
    };
}

binary_level!(parse_logical_or, parse_logical_and,
    Token::PipePipe => BinaryOp::Or,
);

binary_level!(parse_logical_and, parse_equality,
    Token::AmpAmp => BinaryOp::And,
);

binary_level!(parse_equality, parse_comparison,
    Token::EqEq => BinaryOp::Eq,
    Token::NotEq => BinaryOp::NotEq,
);

binary_level!(parse_comparison, parse_range,
    Token::Less => BinaryOp::Less,
    Token::LessEq => BinaryOp::LessEq,
    Token::Greater => BinaryOp::Greater,
    Token::GreaterEq => BinaryOp::GreaterEq,
);

fn parse_range(parser: &mut Parser) -> Result<Expression, ParseError> {
    let left = parse_bitor(parser)?;

    if parser.check(&Token::DotDot) {
        parser.advance();
        let end = parse_bitor(parser)?;
        let span = left.span().to(end.span());
        return Ok(Expression::Range(RangeExpression {
            start: Box::new(left),
            end: Box::new(end),
            span,
        }));
    }

    Ok(left)
}

binary_level!(parse_bitor, parse_bitand,
    Token::PipeB => BinaryOp::BitOr,
    Token::CaretB => BinaryOp::BitXor,
);

binary_level!(parse_bitand, parse_shift,
    Token::AmpB => BinaryOp::BitAnd,
);

binary_level!(parse_shift, parse_additive,
    Token::ShlB => BinaryOp::Shl,
    Token::ShrB => BinaryOp::Shr,
    Token::QuestB => BinaryOp::BitTest,
);

binary_level!(parse_additive, parse_multiplicative,
    Token::Plus => BinaryOp::Add,
    Token::Minus => BinaryOp::Sub,
);

binary_level!(parse_multiplicative, parse_power,
    Token::Star => BinaryOp::Mul,
    Token::Slash => BinaryOp::Div,
    Token::Percent => BinaryOp::Mod,
);

fn parse_power(parser: &mut Parser) -> Result<Expression, ParseError> {
    let left = parse_unary(parser)?;

    // Right-associative
    if parser.check(&Token::Caret) {
        parser.advance();
        let right = parse_power(parser)?;
        let span = left.span().to(right.span());
        return Ok(Expression::Binary(BinaryExpression {
            op: BinaryOp::Pow,
            left: Box::new(left),
            right: Box::new(right),
            span,
        }));
    }

    Ok(left)
}

fn parse_unary(parser: &mut Parser) -> Result<Expression, ParseError> {
    let span = parser.current_span();
    let op = match parser.current() {
        Token::Minus => Some(UnaryOp::Neg),
        Token::Bang => Some(UnaryOp::Not),
        Token::TildeB => Some(UnaryOp::BitNot),
        _ => None,
    };

    if let Some(op) = op {
        parser.advance();
        let operand = parse_unary(parser)?;
        let full = span.to(operand.span());
        return Ok(Expression::Unary(UnaryExpression {
            op,
            operand: Box::new(operand),
            span: full,
        }));
    }

    parse_postfix(parser)
}

pub(crate) fn parse_postfix(parser: &mut Parser) -> Result<Expression, ParseError> {
    let mut expr = parse_primary(parser)?;

    loop {
        match parser.current() {
            Token::LParen => {
                expr = parse_call(parser, expr)?;
            }
            Token::LBracket => {
                let start = *expr.span();
                parser.advance();
                let index = parse_expression(parser)?;
                let end = parser.current_span();
                parser.expect(Token::RBracket)?;
                expr = Expression::Index(IndexExpression {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span: start.to(&end),
                });
            }
            Token::Dot => {
                parser.advance();
                let name_span = parser.current_span();
                let name = expect_identifier(parser)?;
                let start = *expr.span();
                // `ns.func` is FFI when `ns` is an import alias; any other
                // member access is a map lookup by string key.
                if let Expression::Identifier(id) = &expr {
                    if parser.is_namespace(&id.name) {
                        expr = Expression::Namespaced(NamespacedIdentifier {
                            namespace: id.name.clone(),
                            name,
                            span: start.to(&name_span),
                        });
                        continue;
                    }
                }
                expr = Expression::Index(IndexExpression {
                    object: Box::new(expr),
                    index: Box::new(Expression::Str(StringLiteral {
                        value: name,
                        span: name_span,
                    })),
                    span: start.to(&name_span),
                });
            }
            Token::PlusPlus | Token::MinusMinus => {
                let op = if parser.check(&Token::PlusPlus) {
                    PostfixOp::Increment
                } else {
                    PostfixOp::Decrement
                };
                let end = parser.current_span();
                parser.advance();
                let start = *expr.span();
                expr = Expression::Postfix(PostfixExpression {
                    op,
                    operand: Box::new(expr),
                    span: start.to(&end),
                });
            }
            Token::As => {
                parser.advance();
                let name_span = parser.current_span();
                let name = expect_identifier(parser)?;
                let ty = TypeTag::from_name(&name).ok_or_else(|| {
                    ParseError::new(ParseErrorKind::UnknownType { name: name.clone() }, name_span)
                })?;
                let start = *expr.span();
                expr = Expression::Cast(CastExpression {
                    operand: Box::new(expr),
                    ty,
                    span: start.to(&name_span),
                });
            }
            _ => break,
        }
    }

    Ok(expr)
}

/// Parse a call's argument list and optional `max` recursion cap.
fn parse_call(parser: &mut Parser, callee: Expression) -> Result<Expression, ParseError> {
    let start = *callee.span();
    parser.expect(Token::LParen)?;

    let mut arguments = Vec::new();
    parser.skip_newlines();
    while !parser.check(&Token::RParen) {
        arguments.push(parse_expression(parser)?);
        parser.skip_newlines();
        if !parser.eat(&Token::Comma) {
            break;
        }
        parser.skip_newlines();
    }
    let end = parser.current_span();
    parser.expect(Token::RParen)?;

    let cap = parse_recursion_cap(parser)?;

    // A call to a function binding still being parsed is (potentially)
    // self-recursive and must carry a cap.
    if cap.is_none() {
        if let Expression::Identifier(id) = &callee {
            if parser.fn_stack.iter().any(|f| f == &id.name) {
                return Err(ParseError::new(
                    ParseErrorKind::MissingRecursionCap {
                        function: id.name.clone(),
                    },
                    start.to(&end),
                ));
            }
        }
    }

    Ok(Expression::Call(CallExpression {
        callee: Box::new(callee),
        arguments,
        cap,
        span: start.to(&end),
    }))
}

fn parse_recursion_cap(parser: &mut Parser) -> Result<Option<RecursionCap>, ParseError> {
    if !parser.check(&Token::Max) {
        return Ok(None);
    }
    parser.advance();
    match parser.current().clone() {
        Token::Number(n) => {
            parser.advance();
            Ok(Some(RecursionCap::Bounded(n as u64)))
        }
        Token::Inf => {
            parser.advance();
            Ok(Some(RecursionCap::Infinite))
        }
        _ => Err(parser.unexpected_token(&[Token::Number(0.0), Token::Inf])),
    }
}

fn parse_primary(parser: &mut Parser) -> Result<Expression, ParseError> {
    let span = parser.current_span();

    match parser.current().clone() {
        Token::Number(value) => {
            parser.advance();
            Ok(Expression::Number(NumberLiteral { value, span }))
        }
        Token::Str(value) => {
            parser.advance();
            Ok(Expression::Str(StringLiteral { value, span }))
        }
        Token::FString(payload) => {
            parser.advance();
            parse_fstring(parser, &payload, span)
        }
        Token::Identifier(name) => {
            // `simd(a, b, c, d)` is the vector literal surface form
            if name == "simd" && matches!(parser.peek(), Some(Token::LParen)) {
                return parse_vector(parser, span);
            }
            if matches!(parser.peek(), Some(Token::Arrow)) {
                return parse_ident_lambda(parser);
            }
            parser.advance();
            // Compile-time substitution of UPPERCASE constants
            if let Some(literal) = parser.constants.get(&name) {
                return Ok(literal.clone());
            }
            Ok(Expression::Identifier(Identifier { name, span }))
        }
        Token::LParen => parse_paren(parser),
        Token::LBrace => match block::classify_block(parser) {
            block::BlockKind::Map => block::parse_map_literal(parser),
            block::BlockKind::Match => block::parse_match(parser, None),
            block::BlockKind::Statements => {
                let blk = block::parse_block(parser)?;
                Ok(Expression::Block(BlockExpression { block: blk }))
            }
        },
        Token::LBracket => parse_list(parser),
        Token::LessEq => {
            // Prefix receive: `<= addr`
            parser.advance();
            let channel = parse_unary(parser)?;
            let full = span.to(channel.span());
            Ok(Expression::Receive(ReceiveExpression {
                channel: Box::new(channel),
                span: full,
            }))
        }
        Token::Spawn => {
            parser.advance();
            let call = parse_postfix(parser)?;
            let full = span.to(call.span());
            Ok(Expression::Spawn(SpawnExpression {
                call: Box::new(call),
                span: full,
            }))
        }
        Token::Move => {
            parser.advance();
            let operand = parse_unary(parser)?;
            let full = span.to(operand.span());
            Ok(Expression::Move(MoveExpression {
                operand: Box::new(operand),
                span: full,
            }))
        }
        Token::Hash => {
            parser.advance();
            let operand = parse_unary(parser)?;
            let full = span.to(operand.span());
            Ok(Expression::Length(LengthExpression {
                operand: Box::new(operand),
                span: full,
            }))
        }
        Token::Unsafe => block::parse_unsafe_block(parser),
        Token::At | Token::AtAt => {
            let stmt = stmt::parse_loop(parser, None)?;
            Ok(Expression::LoopExpr(Box::new(stmt)))
        }
        Token::Underscore => Err(ParseError::invalid_syntax(
            "`_` is only valid as a match default clause",
            span,
        )),
        tok => {
            // Contextual keywords fall back to identifier use
            if let Some(name) = tok.as_identifier() {
                let name = name.to_string();
                parser.advance();
                if let Some(literal) = parser.constants.get(&name) {
                    return Ok(literal.clone());
                }
                return Ok(Expression::Identifier(Identifier { name, span }));
            }
            Err(parser.unexpected_token(&[Token::Identifier(String::new())]))
        }
    }
}

/// `simd(a, b, c, d)`
fn parse_vector(parser: &mut Parser, span: Span) -> Result<Expression, ParseError> {
    parser.advance(); // simd
    parser.expect(Token::LParen)?;
    let mut elements = Vec::new();
    while !parser.check(&Token::RParen) {
        elements.push(parse_expression(parser)?);
        if !parser.eat(&Token::Comma) {
            break;
        }
    }
    let end = parser.current_span();
    parser.expect(Token::RParen)?;
    Ok(Expression::Vector(VectorExpression {
        elements,
        span: span.to(&end),
    }))
}

fn parse_list(parser: &mut Parser) -> Result<Expression, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::LBracket)?;
    let mut elements = Vec::new();
    parser.skip_newlines();
    while !parser.check(&Token::RBracket) {
        elements.push(parse_expression(parser)?);
        parser.skip_newlines();
        if !parser.eat(&Token::Comma) {
            break;
        }
        parser.skip_newlines();
    }
    let end = parser.current_span();
    parser.expect(Token::RBracket)?;
    Ok(Expression::List(ListExpression {
        elements,
        span: span.to(&end),
    }))
}

/// `x -> body`: single-identifier lambda.
fn parse_ident_lambda(parser: &mut Parser) -> Result<Expression, ParseError> {
    let span = parser.current_span();
    let name = expect_identifier(parser)?;
    parser.expect(Token::Arrow)?;

    parser.scopes.push();
    parser.scopes.declare(&name);
    let body = parse_expression(parser);
    parser.scopes.pop();
    let body = body?;

    let full = span.to(body.span());
    let lambda = LambdaExpression {
        name: parser.next_lambda_name(),
        clauses: vec![LambdaClause {
            params: vec![Param {
                name,
                pattern: None,
                variadic: false,
                ty: None,
                span,
            }],
            body: Box::new(body),
            span: full,
        }],
        span: full,
    };
    parser.lift_lambda(&lambda);
    Ok(Expression::Lambda(lambda))
}

/// At `(`: either a parenthesised expression or a lambda head. Resolved
/// by saved-state backtracking: try the lambda interpretation first.
fn parse_paren(parser: &mut Parser) -> Result<Expression, ParseError> {
    if let Some(lambda) = try_parse_paren_lambda(parser)? {
        return Ok(lambda);
    }

    parser.expect(Token::LParen)?;
    let expr = parse_expression(parser)?;
    parser.expect(Token::RParen)?;
    Ok(expr)
}

/// Attempt `(params) -> body`, `(params) { … }`, and pattern-lambda
/// clause chains. Returns None (with the cursor rewound) when the parens
/// do not form a lambda head.
fn try_parse_paren_lambda(parser: &mut Parser) -> Result<Option<Expression>, ParseError> {
    let snap = parser.snapshot();
    let span = parser.current_span();
    // Lambdas lifted during a failed attempt must not survive the rewind
    let lambda_mark = parser.lambdas.len();
    let counter_mark = parser.lambda_counter;

    let first = match parse_lambda_clause(parser) {
        Ok(Some(clause)) => clause,
        Ok(None) | Err(_) => {
            parser.rewind(snap);
            parser.lambdas.truncate(lambda_mark);
            parser.lambda_counter = counter_mark;
            return Ok(None);
        }
    };

    let mut clauses = vec![first];

    // Pattern lambda: further clauses separated by `|`
    while parser.check(&Token::Pipe) && matches!(parser.peek(), Some(Token::LParen)) {
        let clause_snap = parser.snapshot();
        let clause_mark = parser.lambdas.len();
        let clause_counter = parser.lambda_counter;
        parser.advance(); // |
        match parse_lambda_clause(parser) {
            Ok(Some(clause)) => clauses.push(clause),
            Ok(None) | Err(_) => {
                parser.rewind(clause_snap);
                parser.lambdas.truncate(clause_mark);
                parser.lambda_counter = clause_counter;
                break;
            }
        }
    }

    let full = span.to(&clauses.last().map(|c| c.span).unwrap_or(span));
    let lambda = LambdaExpression {
        name: parser.next_lambda_name(),
        clauses,
        span: full,
    };
    parser.lift_lambda(&lambda);
    Ok(Some(Expression::Lambda(lambda)))
}

/// One `(params) -> body` or `(params) { … }` clause, or None if the
/// token stream does not continue as a lambda after the closing paren.
fn parse_lambda_clause(parser: &mut Parser) -> Result<Option<LambdaClause>, ParseError> {
    let span = parser.current_span();
    if !parser.eat(&Token::LParen) {
        return Ok(None);
    }

    let mut params = Vec::new();
    let mut synth = 0usize;
    while !parser.check(&Token::RParen) {
        let p_span = parser.current_span();
        match parser.current().clone() {
            Token::Number(n) => {
                // Literal pattern parameter
                parser.advance();
                synth += 1;
                params.push(Param {
                    name: format!("__p{synth}"),
                    pattern: Some(n),
                    variadic: false,
                    ty: None,
                    span: p_span,
                });
            }
            tok => {
                let Some(name) = tok.as_identifier().map(str::to_string) else {
                    return Ok(None);
                };
                parser.advance();
                let mut ty = None;
                if parser.eat(&Token::Colon) {
                    let ty_span = parser.current_span();
                    let ty_name = match expect_identifier(parser) {
                        Ok(n) => n,
                        Err(_) => return Ok(None),
                    };
                    ty = Some(TypeTag::from_name(&ty_name).ok_or_else(|| {
                        ParseError::new(ParseErrorKind::UnknownType { name: ty_name }, ty_span)
                    })?);
                }
                let variadic = parser.eat(&Token::Ellipsis);
                params.push(Param {
                    name,
                    pattern: None,
                    variadic,
                    ty,
                    span: p_span,
                });
            }
        }
        if !parser.eat(&Token::Comma) {
            break;
        }
    }

    if !parser.eat(&Token::RParen) {
        return Ok(None);
    }

    // The head must be followed by `->` or a statement block
    let body = if parser.eat(&Token::Arrow) {
        parser.scopes.push();
        for p in &params {
            parser.scopes.declare(&p.name);
        }
        let body = parse_clause_expr(parser);
        parser.scopes.pop();
        body?
    } else if parser.check(&Token::LBrace)
        && block::classify_block(parser) != block::BlockKind::Map
    {
        parser.scopes.push();
        for p in &params {
            parser.scopes.declare(&p.name);
        }
        let body = match block::classify_block(parser) {
            block::BlockKind::Match => block::parse_match(parser, None),
            _ => block::parse_block(parser).map(|b| Expression::Block(BlockExpression { block: b })),
        };
        parser.scopes.pop();
        body?
    } else {
        return Ok(None);
    };

    let full = span.to(body.span());
    Ok(Some(LambdaClause {
        params,
        body: Box::new(body),
        span: full,
    }))
}

/// Split an f-string payload into text and `{…}` holes, re-parsing each
/// hole as a full expression.
fn parse_fstring(
    parser: &mut Parser,
    payload: &str,
    span: Span,
) -> Result<Expression, ParseError> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut chars = payload.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                // Keep the escape for the unescaper
                text.push('\\');
                if let Some(n) = chars.next() {
                    text.push(n);
                }
            }
            '{' => {
                if !text.is_empty() {
                    parts.push(FStringPart::Text(crate::lexer::unescape(&text)));
                    text.clear();
                }
                let mut depth = 1;
                let mut hole = String::new();
                for h in chars.by_ref() {
                    match h {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    hole.push(h);
                }
                if depth != 0 {
                    return Err(ParseError::invalid_syntax(
                        "unterminated `{` in f-string",
                        span,
                    ));
                }
                parts.push(FStringPart::Expr(parse_fragment(parser, &hole, span)?));
            }
            '}' => {
                return Err(ParseError::invalid_syntax(
                    "stray `}` in f-string (escape as \\})",
                    span,
                ));
            }
            _ => text.push(c),
        }
    }

    if !text.is_empty() {
        parts.push(FStringPart::Text(crate::lexer::unescape(&text)));
    }

    Ok(Expression::FString(FStringLiteral { parts, span }))
}

/// Parse an isolated source fragment (an f-string hole) as an expression.
fn parse_fragment(
    parser: &mut Parser,
    fragment: &str,
    span: Span,
) -> Result<Expression, ParseError> {
    let mut sub = Parser::new(fragment).map_err(|_| {
        ParseError::invalid_syntax(format!("invalid expression in f-string: `{fragment}`"), span)
    })?;
    // Holes see the same constants and namespaces as the enclosing scope
    sub.constants = parser.constants.clone();
    sub.imports = parser.imports.clone();
    let expr = parse_expression(&mut sub).map_err(|e| {
        ParseError::invalid_syntax(format!("in f-string hole: {}", e.message), span)
    })?;
    if !sub.at_eof() {
        return Err(ParseError::invalid_syntax(
            format!("trailing tokens in f-string hole: `{fragment}`"),
            span,
        ));
    }
    Ok(expr)
}

pub(crate) fn expect_identifier(parser: &mut Parser) -> Result<String, ParseError> {
    match parser.current().as_identifier() {
        Some(name) => {
            let name = name.to_string();
            parser.advance();
            Ok(name)
        }
        None => Err(parser.unexpected_token(&[Token::Identifier(String::new())])),
    }
}

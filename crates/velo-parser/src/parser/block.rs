//! Brace-block disambiguation and the three block parsers.
//!
//! Velo reuses `{` for map literals, match blocks, and statement blocks.
//! On encountering one, the parser scans forward at brace depth 1 until
//! the matching `}`:
//!
//! - a `:` before any `=>`/`~>` (and not in a loop header) → map literal
//! - `=>`, `~>`, or `_ =>` → match block
//! - otherwise → statement block
//!
//! The decision drives the body parse and is used uniformly everywhere a
//! `{` appears.

use super::{expr, stmt, ParseError, ParseErrorKind, Parser};
use crate::ast::*;
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Map,
    Match,
    Statements,
}

/// Classify the block starting at the current `{` without consuming it.
pub fn classify_block(parser: &Parser) -> BlockKind {
    debug_assert!(parser.check(&Token::LBrace));

    let mut depth = 0usize;
    let mut n = 0usize;
    // Loop headers (`@ i: xs`) put a colon at depth 1 that is not a map
    // key separator; track the two preceding significant tokens.
    let mut prev: Option<&Token> = None;
    let mut prev2: Option<&Token> = None;

    while let Some(tok) = parser.peek_at(n) {
        match tok {
            Token::LBrace | Token::LParen | Token::LBracket => depth += 1,
            Token::RBrace | Token::RParen | Token::RBracket => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Token::FatArrow | Token::TildeArrow if depth == 1 => return BlockKind::Match,
            Token::Colon if depth == 1 => {
                let in_loop_header = matches!(prev2, Some(Token::At) | Some(Token::AtAt))
                    && prev.is_some_and(|t| t.as_identifier().is_some());
                if !in_loop_header {
                    return BlockKind::Map;
                }
            }
            Token::Eof => break,
            _ => {}
        }
        if !matches!(tok, Token::Newline) {
            prev2 = prev;
            prev = Some(tok);
        }
        n += 1;
    }

    BlockKind::Statements
}

/// Parse `{ statements }` with its own scope.
pub fn parse_block(parser: &mut Parser) -> Result<Block, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::LBrace)?;
    parser.scopes.push();

    let mut statements = Vec::new();
    parser.skip_newlines();
    while !parser.check(&Token::RBrace) && !parser.at_eof() {
        match stmt::parse_statement(parser) {
            Ok(s) => statements.push(s),
            Err(e) => {
                parser.scopes.pop();
                return Err(e);
            }
        }
        parser.skip_newlines();
    }

    parser.scopes.pop();
    let end = parser.current_span();
    parser.expect(Token::RBrace)?;

    Ok(Block {
        statements,
        span: span.to(&end),
    })
}

/// Parse `{ key: value, … }`. Bare identifier keys become string keys.
pub fn parse_map_literal(parser: &mut Parser) -> Result<Expression, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::LBrace)?;

    let mut entries = Vec::new();
    parser.skip_newlines();
    while !parser.check(&Token::RBrace) && !parser.at_eof() {
        let key = parse_map_key(parser)?;
        parser.expect(Token::Colon)?;
        let value = expr::parse_expression(parser)?;
        entries.push((key, value));
        parser.skip_newlines();
        if !parser.eat(&Token::Comma) && !parser.check(&Token::RBrace) {
            // Newline-separated entries were already skipped above
        }
        parser.skip_newlines();
    }

    let end = parser.current_span();
    parser.expect(Token::RBrace)?;

    Ok(Expression::Map(MapExpression {
        entries,
        span: span.to(&end),
    }))
}

fn parse_map_key(parser: &mut Parser) -> Result<Expression, ParseError> {
    let span = parser.current_span();
    // `{ x: 1 }`: identifier keys are string keys, JS-style
    if let Some(name) = parser.current().as_identifier() {
        if matches!(parser.peek(), Some(Token::Colon)) {
            let name = name.to_string();
            parser.advance();
            return Ok(Expression::Str(StringLiteral { value: name, span }));
        }
    }
    expr::parse_expression(parser)
}

/// Parse a match block. With `scrutinee`, clauses are value patterns
/// rewritten to equality tests; without, each clause is an independent
/// boolean guard (optionally introduced by `|`).
pub fn parse_match(
    parser: &mut Parser,
    scrutinee: Option<Expression>,
) -> Result<Expression, ParseError> {
    let span = scrutinee
        .as_ref()
        .map(|s| *s.span())
        .unwrap_or_else(|| parser.current_span());
    parser.expect(Token::LBrace)?;

    let is_value_match = scrutinee.is_some();
    let mut clauses = Vec::new();
    let mut explicit_default = false;

    parser.skip_newlines();
    while !parser.check(&Token::RBrace) && !parser.at_eof() {
        let clause_span = parser.current_span();

        let clause = if parser.check(&Token::Underscore) {
            // `_ => body`: the explicit default
            parser.advance();
            let fallthrough = expect_arm_arrow(parser)?;
            let body = parse_clause_body(parser)?;
            explicit_default = true;
            MatchClause {
                pattern: None,
                guard: None,
                body,
                fallthrough,
                span: clause_span,
            }
        } else {
            // `|` is the guard marker at clause head; elsewhere it pipes
            parser.eat(&Token::Pipe);
            let test = expr::parse_expression(parser)?;
            let fallthrough = expect_arm_arrow(parser)?;
            let body = parse_clause_body(parser)?;
            if is_value_match {
                MatchClause {
                    pattern: Some(test),
                    guard: None,
                    body,
                    fallthrough,
                    span: clause_span,
                }
            } else {
                MatchClause {
                    pattern: None,
                    guard: Some(test),
                    body,
                    fallthrough,
                    span: clause_span,
                }
            }
        };

        clauses.push(clause);
        parser.skip_newlines();
        parser.eat(&Token::Comma);
        parser.skip_newlines();
    }

    let end = parser.current_span();
    parser.expect(Token::RBrace)?;

    if clauses.is_empty() {
        return Err(ParseError::invalid_syntax(
            "match block has no clauses",
            span.to(&end),
        ));
    }

    Ok(Expression::Match(MatchExpression {
        scrutinee: scrutinee.map(Box::new),
        clauses,
        explicit_default,
        span: span.to(&end),
    }))
}

/// `=>` or `~>`; returns true for the fallthrough arrow.
fn expect_arm_arrow(parser: &mut Parser) -> Result<bool, ParseError> {
    if parser.eat(&Token::FatArrow) {
        Ok(false)
    } else if parser.eat(&Token::TildeArrow) {
        Ok(true)
    } else {
        Err(parser.unexpected_token(&[Token::FatArrow, Token::TildeArrow]))
    }
}

/// A clause body: a block when `{` follows, otherwise a pipe-free
/// expression (so `|` can start the next guard clause).
fn parse_clause_body(parser: &mut Parser) -> Result<Expression, ParseError> {
    if parser.check(&Token::LBrace) && classify_block(parser) == BlockKind::Statements {
        let block = parse_block(parser)?;
        return Ok(Expression::Block(BlockExpression { block }));
    }
    expr::parse_clause_expr(parser)
}

// ============================================================================
// Unsafe blocks
// ============================================================================

/// `unsafe { x86 … } { arm64 … } { riscv64 … } as T`
///
/// The generator picks the arm matching the compile target and emits it
/// verbatim; `as T` types the value left in rax/x0/a0.
pub fn parse_unsafe_block(parser: &mut Parser) -> Result<Expression, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::Unsafe)?;

    let mut arms = Vec::new();
    while parser.check(&Token::LBrace) {
        arms.push(parse_unsafe_arm(parser)?);
        parser.skip_newlines();
    }

    if arms.is_empty() {
        return Err(ParseError::invalid_syntax(
            "unsafe block needs at least one architecture arm",
            span,
        ));
    }

    parser.expect(Token::As)?;
    let ty_span = parser.current_span();
    let ty_name = expr::expect_identifier(parser)?;
    let result = TypeTag::from_name(&ty_name).ok_or(ParseError::new(
        ParseErrorKind::UnknownType { name: ty_name },
        ty_span,
    ))?;

    let end = parser.current_span();
    Ok(Expression::UnsafeBlock(UnsafeBlockExpression {
        arms,
        result,
        span: span.to(&end),
    }))
}

fn parse_unsafe_arm(parser: &mut Parser) -> Result<UnsafeArm, ParseError> {
    let span = parser.current_span();
    parser.expect(Token::LBrace)?;
    parser.skip_newlines();

    let arch_span = parser.current_span();
    let arch_name = expr::expect_identifier(parser)?;
    let arch = match arch_name.as_str() {
        "x86" => UnsafeArch::X86,
        "arm64" => UnsafeArch::Arm64,
        "riscv64" => UnsafeArch::RiscV64,
        other => {
            return Err(ParseError::invalid_syntax(
                format!("unknown architecture tag `{other}` (expected x86, arm64, riscv64)"),
                arch_span,
            ))
        }
    };

    let mut instructions = Vec::new();
    parser.skip_newlines();
    while !parser.check(&Token::RBrace) && !parser.at_eof() {
        instructions.push(parse_asm_instr(parser)?);
        parser.skip_newlines();
    }

    let end = parser.current_span();
    parser.expect(Token::RBrace)?;

    Ok(UnsafeArm {
        arch,
        instructions,
        span: span.to(&end),
    })
}

/// One restricted instruction: `dst = src`, `dst = [base+off] as t`,
/// `[base+off] = src as t`, or a bare `syscall`/`svc`/`ecall`.
fn parse_asm_instr(parser: &mut Parser) -> Result<AsmInstr, ParseError> {
    let span = parser.current_span();

    if parser.check(&Token::LBracket) {
        // Store: [base + off] = src [as type]
        let dst = parse_asm_mem(parser)?;
        parser.expect(Token::Assign)?;
        let src = parse_asm_operand(parser)?;
        let ty = parse_asm_type(parser)?;
        return Ok(AsmInstr::Store { dst, src, ty });
    }

    let name = expr::expect_identifier(parser)?;
    if matches!(name.as_str(), "syscall" | "svc" | "ecall") {
        return Ok(AsmInstr::Syscall);
    }

    parser.expect(Token::Assign).map_err(|_| {
        ParseError::invalid_syntax(
            format!("expected `=`, `syscall`, `svc` or `ecall` after `{name}`"),
            span,
        )
    })?;

    if parser.check(&Token::LBracket) {
        // Load: dst = [base + off] [as type]
        let src = parse_asm_mem(parser)?;
        let ty = parse_asm_type(parser)?;
        return Ok(AsmInstr::Load {
            dst: AsmOperand::Reg(name),
            src,
            ty,
        });
    }

    let src = parse_asm_operand(parser)?;
    Ok(AsmInstr::Mov {
        dst: AsmOperand::Reg(name),
        src,
    })
}

fn parse_asm_operand(parser: &mut Parser) -> Result<AsmOperand, ParseError> {
    match parser.current().clone() {
        Token::Number(n) => {
            parser.advance();
            Ok(AsmOperand::Imm(n as i64))
        }
        Token::Minus => {
            parser.advance();
            match parser.current().clone() {
                Token::Number(n) => {
                    parser.advance();
                    Ok(AsmOperand::Imm(-(n as i64)))
                }
                _ => Err(parser.unexpected_token(&[Token::Number(0.0)])),
            }
        }
        tok => match tok.as_identifier() {
            Some(name) => {
                let name = name.to_string();
                parser.advance();
                Ok(AsmOperand::Reg(name))
            }
            None => Err(parser.unexpected_token(&[Token::Identifier(String::new())])),
        },
    }
}

fn parse_asm_mem(parser: &mut Parser) -> Result<AsmOperand, ParseError> {
    parser.expect(Token::LBracket)?;
    let base = expr::expect_identifier(parser)?;
    let mut offset = 0i64;
    if parser.eat(&Token::Plus) {
        offset = expect_asm_imm(parser)?;
    } else if parser.eat(&Token::Minus) {
        offset = -expect_asm_imm(parser)?;
    }
    parser.expect(Token::RBracket)?;
    Ok(AsmOperand::Mem { base, offset })
}

fn expect_asm_imm(parser: &mut Parser) -> Result<i64, ParseError> {
    match parser.current().clone() {
        Token::Number(n) => {
            parser.advance();
            Ok(n as i64)
        }
        _ => Err(parser.unexpected_token(&[Token::Number(0.0)])),
    }
}

fn parse_asm_type(parser: &mut Parser) -> Result<Option<TypeTag>, ParseError> {
    if !parser.eat(&Token::As) {
        return Ok(None);
    }
    let span = parser.current_span();
    let name = expr::expect_identifier(parser)?;
    TypeTag::from_name(&name)
        .map(Some)
        .ok_or(ParseError::new(ParseErrorKind::UnknownType { name }, span))
}

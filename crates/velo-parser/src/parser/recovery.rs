//! Error recovery: resynchronise at statement boundaries.

use super::Parser;
use crate::token::Token;

/// After a parse error, skip tokens until a plausible statement start:
/// past the next newline/semicolon, a closing `}`, a statement-starting
/// keyword, or EOF.
pub fn sync_to_statement_boundary(parser: &mut Parser) {
    while !parser.at_eof() {
        match parser.current() {
            Token::Newline | Token::Semicolon => {
                parser.advance();
                return;
            }
            Token::RBrace => {
                parser.advance();
                return;
            }
            tok if tok.starts_statement() => return,
            _ => {
                parser.advance();
            }
        }
    }
}

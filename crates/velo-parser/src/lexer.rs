//! Lexer for the Velo programming language.
//!
//! Built on logos. Newlines are statement separators and are preserved as
//! tokens; all other whitespace and comments are skipped. Multi-character
//! operators resolve by longest match, which is what gives the bitwise
//! family its `b` suffix (`<<b`, `|b`, `^b`, `~b`, `?b`) and keeps `|`
//! free for piping and `^` for power.

use crate::token::{Span, Token};
use logos::Logos;

/// Logos token enum used internally for tokenization, converted to the
/// public [`Token`] enum after lexing.
#[derive(Logos, Debug, Clone, PartialEq)]
enum LogosToken {
    // Whitespace except newline (skip); newline is significant
    #[regex(r"[ \t\r]+", logos::skip)]
    Whitespace,

    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[token("\n")]
    Newline,

    // Keywords (must come before identifiers)
    #[token("shadow")]
    Shadow,
    #[token("max")]
    Max,
    #[token("inf")]
    Inf,
    #[token("defer")]
    Defer,
    #[token("arena")]
    Arena,
    #[token("unsafe")]
    Unsafe,
    #[token("ret")]
    Ret,
    #[token("class")]
    Class,
    #[token("cstruct")]
    CStruct,
    #[token("import")]
    Import,
    #[token("export")]
    Export,
    #[token("spawn")]
    Spawn,
    #[token("move")]
    Move,
    #[token("as")]
    As,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("packed")]
    Packed,
    #[token("aligned")]
    Aligned,
    #[token("or!")]
    OrBang,

    // Identifiers
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    // Numbers (single numeric type: f64)
    #[regex(r"0x[0-9a-fA-F]+", parse_hex)]
    #[regex(r"0b[01]+", parse_binary)]
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    // Strings
    #[regex(r#""([^"\\\n]|\\.)*""#, parse_string)]
    Str(String),

    // F-strings: payload kept raw, holes re-lexed by the parser
    #[regex(r#"f"([^"\\\n]|\\.)*""#, parse_fstring)]
    FString(String),

    // Operators, longest first
    #[token("<<b")]
    ShlB,
    #[token(">>b")]
    ShrB,
    #[token("...")]
    Ellipsis,
    #[token(":=")]
    DeclareAssign,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("->")]
    Arrow,
    #[token("=>")]
    FatArrow,
    #[token("~>")]
    TildeArrow,
    #[token("<-")]
    SendArrow,
    #[token("&b")]
    AmpB,
    #[token("|b")]
    PipeB,
    #[token("^b")]
    CaretB,
    #[token("~b")]
    TildeB,
    #[token("?b")]
    QuestB,
    #[token("&&")]
    AmpAmp,
    #[token("||")]
    PipePipe,
    #[token("@@")]
    AtAt,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("..")]
    DotDot,

    // Single-character tokens
    #[token("=")]
    Assign,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("!")]
    Bang,
    #[token("|")]
    Pipe,
    #[token("@")]
    At,
    #[token("#")]
    Hash,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
}

fn parse_hex(lex: &mut logos::Lexer<LogosToken>) -> Option<f64> {
    u64::from_str_radix(&lex.slice()[2..], 16).ok().map(|v| v as f64)
}

fn parse_binary(lex: &mut logos::Lexer<LogosToken>) -> Option<f64> {
    u64::from_str_radix(&lex.slice()[2..], 2).ok().map(|v| v as f64)
}

fn parse_number(lex: &mut logos::Lexer<LogosToken>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<LogosToken>) -> Option<String> {
    let s = lex.slice();
    Some(unescape(&s[1..s.len() - 1]))
}

fn parse_fstring(lex: &mut logos::Lexer<LogosToken>) -> Option<String> {
    let s = lex.slice();
    // Strip the leading `f"` and trailing `"`; escapes are resolved when
    // the parser splits the payload into text and interpolation holes.
    Some(s[2..s.len() - 1].to_string())
}

/// Resolve backslash escapes in a string literal body.
pub(crate) fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('0') => result.push('\0'),
                Some('{') => result.push('{'),
                Some('}') => result.push('}'),
                Some(c) => result.push(c),
                None => break,
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Lexer error types. The lexer fails only on these two conditions; every
/// other malformation is the parser's problem.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("invalid character '{char}' at {}:{}", span.line, span.column)]
    InvalidCharacter { char: char, span: Span },

    #[error("unterminated string at {}:{}", span.line, span.column)]
    UnterminatedString { span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::InvalidCharacter { span, .. } => *span,
            LexError::UnterminatedString { span } => *span,
        }
    }
}

/// Main lexer structure.
pub struct Lexer<'a> {
    source: &'a str,
    tokens: Vec<(Token, Span)>,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<(Token, Span)>, Vec<LexError>> {
        let mut logos_lexer = LogosToken::lexer(self.source);
        let mut line = 1u32;
        let mut column = 1u32;
        let mut last_end = 0;

        while let Some(token_result) = logos_lexer.next() {
            let range = logos_lexer.span();

            for c in self.source[last_end..range.start].chars() {
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }

            let span = Span::new(range.start, range.end, line, column);

            match token_result {
                Ok(logos_token) => {
                    let token = convert_token(logos_token);
                    self.tokens.push((token, span));
                }
                Err(_) => {
                    let char = self.source[range.start..].chars().next().unwrap_or('\0');
                    if char == '"' || self.source[range.start..range.end].starts_with("f\"") {
                        self.errors.push(LexError::UnterminatedString { span });
                    } else {
                        self.errors.push(LexError::InvalidCharacter { char, span });
                    }
                }
            }

            for c in self.source[range.start..range.end].chars() {
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }

            last_end = range.end;
        }

        let eof_span = Span::new(self.source.len(), self.source.len(), line, column);
        self.tokens.push((Token::Eof, eof_span));

        if self.errors.is_empty() {
            Ok(self.tokens)
        } else {
            Err(self.errors)
        }
    }
}

fn convert_token(logos_token: LogosToken) -> Token {
    match logos_token {
        LogosToken::Newline => Token::Newline,
        LogosToken::Shadow => Token::Shadow,
        LogosToken::Max => Token::Max,
        LogosToken::Inf => Token::Inf,
        LogosToken::Defer => Token::Defer,
        LogosToken::Arena => Token::Arena,
        LogosToken::Unsafe => Token::Unsafe,
        LogosToken::Ret => Token::Ret,
        LogosToken::Class => Token::Class,
        LogosToken::CStruct => Token::CStruct,
        LogosToken::Import => Token::Import,
        LogosToken::Export => Token::Export,
        LogosToken::Spawn => Token::Spawn,
        LogosToken::Move => Token::Move,
        LogosToken::As => Token::As,
        LogosToken::Break => Token::Break,
        LogosToken::Continue => Token::Continue,
        LogosToken::Packed => Token::Packed,
        LogosToken::Aligned => Token::Aligned,
        LogosToken::OrBang => Token::OrBang,
        LogosToken::Identifier(s) => {
            if s == "_" {
                Token::Underscore
            } else {
                Token::Identifier(s)
            }
        }
        LogosToken::Number(n) => Token::Number(n),
        LogosToken::Str(s) => Token::Str(s),
        LogosToken::FString(s) => Token::FString(s),
        LogosToken::ShlB => Token::ShlB,
        LogosToken::ShrB => Token::ShrB,
        LogosToken::Ellipsis => Token::Ellipsis,
        LogosToken::DeclareAssign => Token::DeclareAssign,
        LogosToken::EqEq => Token::EqEq,
        LogosToken::NotEq => Token::NotEq,
        LogosToken::LessEq => Token::LessEq,
        LogosToken::GreaterEq => Token::GreaterEq,
        LogosToken::Arrow => Token::Arrow,
        LogosToken::FatArrow => Token::FatArrow,
        LogosToken::TildeArrow => Token::TildeArrow,
        LogosToken::SendArrow => Token::SendArrow,
        LogosToken::AmpB => Token::AmpB,
        LogosToken::PipeB => Token::PipeB,
        LogosToken::CaretB => Token::CaretB,
        LogosToken::TildeB => Token::TildeB,
        LogosToken::QuestB => Token::QuestB,
        LogosToken::AmpAmp => Token::AmpAmp,
        LogosToken::PipePipe => Token::PipePipe,
        LogosToken::AtAt => Token::AtAt,
        LogosToken::PlusPlus => Token::PlusPlus,
        LogosToken::MinusMinus => Token::MinusMinus,
        LogosToken::DotDot => Token::DotDot,
        LogosToken::Assign => Token::Assign,
        LogosToken::Less => Token::Less,
        LogosToken::Greater => Token::Greater,
        LogosToken::Plus => Token::Plus,
        LogosToken::Minus => Token::Minus,
        LogosToken::Star => Token::Star,
        LogosToken::Slash => Token::Slash,
        LogosToken::Percent => Token::Percent,
        LogosToken::Caret => Token::Caret,
        LogosToken::Bang => Token::Bang,
        LogosToken::Pipe => Token::Pipe,
        LogosToken::At => Token::At,
        LogosToken::Hash => Token::Hash,
        LogosToken::Dot => Token::Dot,
        LogosToken::Comma => Token::Comma,
        LogosToken::Colon => Token::Colon,
        LogosToken::Semicolon => Token::Semicolon,
        LogosToken::LParen => Token::LParen,
        LogosToken::RParen => Token::RParen,
        LogosToken::LBrace => Token::LBrace,
        LogosToken::RBrace => Token::RBrace,
        LogosToken::LBracket => Token::LBracket,
        LogosToken::RBracket => Token::RBracket,
        LogosToken::Whitespace | LogosToken::LineComment => {
            unreachable!("whitespace and comments are skipped")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex("42"), vec![Token::Number(42.0), Token::Eof]);
        assert_eq!(lex("3.25"), vec![Token::Number(3.25), Token::Eof]);
        assert_eq!(lex("0xff"), vec![Token::Number(255.0), Token::Eof]);
        assert_eq!(lex("0b101"), vec![Token::Number(5.0), Token::Eof]);
    }

    #[test]
    fn test_bitwise_suffix_longest_match() {
        assert_eq!(
            lex("x <<b 2"),
            vec![
                Token::Identifier("x".into()),
                Token::ShlB,
                Token::Number(2.0),
                Token::Eof
            ]
        );
        // `|` alone is the pipe operator
        assert_eq!(
            lex("x | f"),
            vec![
                Token::Identifier("x".into()),
                Token::Pipe,
                Token::Identifier("f".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_send_vs_less_minus() {
        assert_eq!(
            lex("a <- b"),
            vec![
                Token::Identifier("a".into()),
                Token::SendArrow,
                Token::Identifier("b".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_or_bang_not_identifier() {
        assert_eq!(
            lex("x or! 0"),
            vec![
                Token::Identifier("x".into()),
                Token::OrBang,
                Token::Number(0.0),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_fstring_raw_payload() {
        assert_eq!(
            lex(r#"f"sum: {a + b}""#),
            vec![Token::FString("sum: {a + b}".into()), Token::Eof]
        );
    }

    #[test]
    fn test_newlines_significant() {
        assert_eq!(
            lex("a\nb"),
            vec![
                Token::Identifier("a".into()),
                Token::Newline,
                Token::Identifier("b".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_invalid_character() {
        let errs = Lexer::new("a $ b").tokenize().unwrap_err();
        assert!(matches!(errs[0], LexError::InvalidCharacter { char: '$', .. }));
    }

    #[test]
    fn test_unterminated_string() {
        let errs = Lexer::new("\"abc").tokenize().unwrap_err();
        assert!(matches!(errs[0], LexError::UnterminatedString { .. }));
    }

    #[test]
    fn test_arrows() {
        assert_eq!(
            lex("x -> y => z ~> w"),
            vec![
                Token::Identifier("x".into()),
                Token::Arrow,
                Token::Identifier("y".into()),
                Token::FatArrow,
                Token::Identifier("z".into()),
                Token::TildeArrow,
                Token::Identifier("w".into()),
                Token::Eof
            ]
        );
    }
}

//! Tokeniser for weft source text, built on nom. Produces a flat token
//! stream where every token carries the [`Position`] it started at, so the
//! parser and evaluator can report exact locations. Whitespace and nested
//! `#[ ... ]#` comments are skipped between tokens.

use std::sync::Arc;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::value,
    error::ErrorKind,
};

use crate::ParseError;
use crate::ast::Position;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// A string literal with escapes already resolved
    Str(String),
    /// An identifier (intrinsic names are resolved later, by the parser)
    Ident(String),
    KwLet,
    KwDrop,
    KwMatch,
    KwPrefix,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    /// `..`
    DotDot,
    /// `=>`
    FatArrow,
    /// `->`
    Arrow,
    Star,
    Bang,
    Eof,
}

impl TokenKind {
    /// Human-readable rendering for "expected X, found Y" diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Str(_) => "string literal".to_owned(),
            TokenKind::Ident(name) => format!("'{name}'"),
            TokenKind::KwLet => "'let'".to_owned(),
            TokenKind::KwDrop => "'drop'".to_owned(),
            TokenKind::KwMatch => "'match'".to_owned(),
            TokenKind::KwPrefix => "'prefix'".to_owned(),
            TokenKind::LParen => "'('".to_owned(),
            TokenKind::RParen => "')'".to_owned(),
            TokenKind::LBrace => "'{'".to_owned(),
            TokenKind::RBrace => "'}'".to_owned(),
            TokenKind::Comma => "','".to_owned(),
            TokenKind::Semicolon => "';'".to_owned(),
            TokenKind::DotDot => "'..'".to_owned(),
            TokenKind::FatArrow => "'=>'".to_owned(),
            TokenKind::Arrow => "'->'".to_owned(),
            TokenKind::Star => "'*'".to_owned(),
            TokenKind::Bang => "'!'".to_owned(),
            TokenKind::Eof => "end of input".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
}

/// Tokenise `input`, reporting positions against `source_name`. The returned
/// stream always ends with a single [`TokenKind::Eof`] token.
pub fn lex(source_name: &str, input: &str) -> Result<Vec<Token>, ParseError> {
    let source: Arc<str> = Arc::from(source_name);
    let mut tokens = Vec::new();
    let mut rest = input;
    let mut line = 1u32;
    let mut column = 1u32;

    loop {
        match skip_trivia(rest) {
            Ok(next) => {
                track(&rest[..rest.len() - next.len()], &mut line, &mut column);
                rest = next;
            }
            Err(at) => {
                track(&rest[..rest.len() - at.len()], &mut line, &mut column);
                return Err(ParseError::new(
                    Position::new(source, line, column),
                    "unterminated comment",
                ));
            }
        }

        let pos = Position::new(source.clone(), line, column);
        if rest.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Eof,
                pos,
            });
            return Ok(tokens);
        }

        match scan_token(rest) {
            Ok((next, kind)) => {
                track(&rest[..rest.len() - next.len()], &mut line, &mut column);
                tokens.push(Token { kind, pos });
                rest = next;
            }
            Err(nom::Err::Failure(e)) => {
                let message = if e.code == ErrorKind::Escaped {
                    "invalid escape sequence in string literal"
                } else {
                    "unterminated string literal"
                };
                return Err(ParseError::new(pos, message));
            }
            Err(_) => {
                let found = rest.chars().next().unwrap_or('?');
                return Err(ParseError::new(
                    pos,
                    format!("unexpected character '{found}'"),
                ));
            }
        }
    }
}

/// Update line/column counters for a consumed slice of input.
fn track(consumed: &str, line: &mut u32, column: &mut u32) {
    for c in consumed.chars() {
        if c == '\n' {
            *line += 1;
            *column = 1;
        } else {
            *column += 1;
        }
    }
}

/// Skip whitespace and nested `#[ ... ]#` comments. On an unterminated
/// comment the error carries the remaining input at the comment opener.
fn skip_trivia(mut input: &str) -> Result<&str, &str> {
    loop {
        let trimmed = input.trim_start_matches(char::is_whitespace);
        let Some(after_open) = trimmed.strip_prefix("#[") else {
            return Ok(trimmed);
        };

        // The delimiters are ASCII, so scanning bytes is safe and the
        // computed end always lands on a character boundary.
        let bytes = after_open.as_bytes();
        let mut depth = 1usize;
        let mut idx = 0usize;
        let mut end = None;
        while idx < bytes.len() {
            if bytes[idx..].starts_with(b"#[") {
                depth += 1;
                idx += 2;
            } else if bytes[idx..].starts_with(b"]#") {
                depth -= 1;
                idx += 2;
                if depth == 0 {
                    end = Some(idx);
                    break;
                }
            } else {
                idx += 1;
            }
        }

        match end {
            Some(end) => input = &after_open[end..],
            None => return Err(trimmed),
        }
    }
}

fn scan_token(input: &str) -> IResult<&str, TokenKind> {
    alt((scan_string, scan_word, scan_punct)).parse(input)
}

fn scan_punct(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::DotDot, tag("..")),
        value(TokenKind::FatArrow, tag("=>")),
        value(TokenKind::Arrow, tag("->")),
        value(TokenKind::LParen, char('(')),
        value(TokenKind::RParen, char(')')),
        value(TokenKind::LBrace, char('{')),
        value(TokenKind::RBrace, char('}')),
        value(TokenKind::Comma, char(',')),
        value(TokenKind::Semicolon, char(';')),
        value(TokenKind::Star, char('*')),
        value(TokenKind::Bang, char('!')),
    ))
    .parse(input)
}

/// Scan an identifier or keyword: `[A-Za-z_][A-Za-z0-9_]*`.
fn scan_word(input: &str) -> IResult<&str, TokenKind> {
    let (rest, word) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)?;

    if word.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Alpha,
        )));
    }

    let kind = match word {
        "let" => TokenKind::KwLet,
        "drop" => TokenKind::KwDrop,
        "match" => TokenKind::KwMatch,
        "prefix" => TokenKind::KwPrefix,
        _ => TokenKind::Ident(word.to_owned()),
    };
    Ok((rest, kind))
}

/// Scan a string literal delimited by `"` or `'`. Escape sequences are
/// resolved here; an unknown escape or a missing closing quote is a hard
/// failure (`nom::Err::Failure`) so it is reported as such rather than
/// falling through to another token form.
fn scan_string(input: &str) -> IResult<&str, TokenKind> {
    let (mut remaining, quote) = alt((char('"'), char('\''))).parse(input)?;
    let mut chars = Vec::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some(c) if c == quote => {
                return Ok((char_iter.as_str(), TokenKind::Str(chars.into_iter().collect())));
            }
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    Some('\'') => chars.push('\''),
                    _ => {
                        return Err(nom::Err::Failure(nom::error::Error::new(
                            remaining,
                            ErrorKind::Escaped,
                        )));
                    }
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = char_iter.as_str();
            }
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    remaining,
                    ErrorKind::Char,
                )));
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex("<test>", input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenises_a_definition() {
        use TokenKind::*;
        assert_eq!(
            kinds(r#"let greet(x) => "hello " .. x"#),
            vec![
                KwLet,
                Ident("greet".into()),
                LParen,
                Ident("x".into()),
                RParen,
                FatArrow,
                Str("hello ".into()),
                DotDot,
                Ident("x".into()),
                Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_puncts() {
        use TokenKind::*;
        assert_eq!(
            kinds("drop match prefix ! * -> => ; , { } ( )"),
            vec![
                KwDrop, KwMatch, KwPrefix, Bang, Star, Arrow, FatArrow, Semicolon, Comma,
                LBrace, RBrace, LParen, RParen, Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes_both_quote_styles() {
        assert_eq!(
            kinds(r#""a\nb\t\"q\"""#),
            vec![TokenKind::Str("a\nb\t\"q\"".into()), TokenKind::Eof]
        );
        assert_eq!(
            kinds(r#"'it\'s'"#),
            vec![TokenKind::Str("it's".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_positions_track_lines_and_columns() {
        let tokens = lex("<test>", "let x\n  => \"v\"").unwrap();
        let at: Vec<(u32, u32)> = tokens.iter().map(|t| (t.pos.line, t.pos.column)).collect();
        assert_eq!(at, vec![(1, 1), (1, 5), (2, 3), (2, 6), (2, 9)]);
    }

    #[test]
    fn test_nested_comments_are_trivia() {
        assert_eq!(
            kinds("#[ outer #[ inner ]# still outer ]# x"),
            vec![TokenKind::Ident("x".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_lex_errors() {
        let cases = [
            ("\"unterminated", "unterminated string literal"),
            (r#""bad \q escape""#, "invalid escape sequence"),
            ("#[ never closed", "unterminated comment"),
            ("@", "unexpected character '@'"),
            ("9lives", "unexpected character '9'"),
        ];
        for (input, expected) in cases {
            let err = lex("<test>", input).unwrap_err();
            assert!(
                err.message.contains(expected),
                "lexing {input:?}: expected {expected:?} in {:?}",
                err.message
            );
        }
    }

    #[test]
    fn test_empty_input_is_just_eof() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("   \n\t #[ c ]# "), vec![TokenKind::Eof]);
    }
}

//! Lexical analysis for Sieve scripts.
//!
//! Tokenization uses logos. Both Sieve comment forms (`# …` to end of line
//! and bracketed `/* … */`) are stripped as skip patterns. Literal decoding
//! happens in callbacks:
//!
//! - quoted strings are unescaped (`\` quotes any character),
//! - numbers apply their `K`/`M`/`G` scale with overflow detection,
//! - `text:` multi-line literals are consumed up to the lone-dot terminator
//!   and un-dot-stuffed.

use logos::Logos;
use thiserror::Error;

/// Lexer-level error, attached to the byte range that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
pub enum LexError {
    #[default]
    #[error("unrecognized character")]
    InvalidToken,
    #[error("number too large")]
    NumberOverflow,
    #[error("unterminated multi-line string")]
    UnterminatedText,
    #[error("junk after 'text:' marker")]
    MalformedTextMarker,
}

/// Sieve token.
///
/// String literals arrive fully decoded; the parser never sees quotes,
/// escapes or dot-stuffing.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
pub enum Token {
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    /// `:name` argument modifier. Carries the name without the colon.
    #[regex(r":[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Tag(String),

    /// Number with optional `K`/`M`/`G` suffix, already scaled.
    #[regex(r"[0-9]+[KkMmGg]?", scaled_number)]
    Number(u64),

    /// Quoted or multi-line string literal, decoded.
    #[regex(r#""([^"\\]|\\.)*""#, unescape)]
    #[token("text:", multiline)]
    String(std::string::String),

    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
}

impl Token {
    /// Short description for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Token::Identifier(name) => format!("identifier '{name}'"),
            Token::Tag(name) => format!("tag ':{name}'"),
            Token::Number(n) => format!("number {n}"),
            Token::String(_) => "string".into(),
            Token::Semicolon => "';'".into(),
            Token::Comma => "','".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBrace => "'{'".into(),
            Token::RBrace => "'}'".into(),
        }
    }
}

fn scaled_number(lex: &mut logos::Lexer<Token>) -> Result<u64, LexError> {
    let slice = lex.slice();
    let (digits, scale) = match slice.as_bytes()[slice.len() - 1] {
        b'K' | b'k' => (&slice[..slice.len() - 1], 1u64 << 10),
        b'M' | b'm' => (&slice[..slice.len() - 1], 1u64 << 20),
        b'G' | b'g' => (&slice[..slice.len() - 1], 1u64 << 30),
        _ => (slice, 1),
    };
    let value: u64 = digits.parse().map_err(|_| LexError::NumberOverflow)?;
    value.checked_mul(scale).ok_or(LexError::NumberOverflow)
}

fn unescape(lex: &mut logos::Lexer<Token>) -> String {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Consume a `text:` literal from the remainder of the input.
///
/// The marker line may carry trailing whitespace and a `#` comment. Content
/// lines follow until a line holding only `.`; leading dots are unstuffed.
fn multiline(lex: &mut logos::Lexer<Token>) -> Result<String, LexError> {
    let rem = lex.remainder();
    let marker_end = rem.find('\n').ok_or(LexError::UnterminatedText)?;
    let marker_rest = rem[..marker_end].trim_end_matches('\r').trim_start();
    if !(marker_rest.is_empty() || marker_rest.starts_with('#')) {
        return Err(LexError::MalformedTextMarker);
    }

    let mut content = String::new();
    let mut pos = marker_end + 1;
    loop {
        let rest = &rem[pos..];
        let (line, next) = match rest.find('\n') {
            Some(i) => (&rest[..i], pos + i + 1),
            None => (rest, rem.len()),
        };
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line == "." {
            lex.bump(next);
            return Ok(content);
        }
        if next >= rem.len() {
            return Err(LexError::UnterminatedText);
        }
        content.push_str(line.strip_prefix('.').unwrap_or(line));
        content.push('\n');
        pos = next;
    }
}

/// Tokenize a whole script.
///
/// Lexing continues past errors so that the parser can report as many
/// problems as possible in one pass. Each error carries its byte range.
pub fn tokenize(
    source: &str,
) -> (
    Vec<(Token, std::ops::Range<usize>)>,
    Vec<(LexError, std::ops::Range<usize>)>,
) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(err) => errors.push((err, lexer.span())),
        }
    }
    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        let (tokens, errors) = tokenize(source);
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.into_iter().map(|(t, _)| t).collect()
    }

    fn string(s: &str) -> Token {
        Token::String(s.to_string())
    }

    #[test]
    fn identifiers_and_tags() {
        assert_eq!(
            lex("keep fileinto :over :under_score"),
            vec![
                Token::Identifier("keep".into()),
                Token::Identifier("fileinto".into()),
                Token::Tag("over".into()),
                Token::Tag("under_score".into()),
            ]
        );
    }

    #[test]
    fn numbers_scale() {
        assert_eq!(
            lex("42 1K 2k 3M 1G"),
            vec![
                Token::Number(42),
                Token::Number(1024),
                Token::Number(2048),
                Token::Number(3 * 1024 * 1024),
                Token::Number(1024 * 1024 * 1024),
            ]
        );
    }

    #[test]
    fn number_overflow_is_an_error() {
        let (_, errors) = tokenize("184467440737095516151");
        assert_eq!(errors[0].0, LexError::NumberOverflow);

        // Fits as digits, overflows at the scale step.
        let (_, errors) = tokenize("18446744073709551615K");
        assert_eq!(errors[0].0, LexError::NumberOverflow);
    }

    #[test]
    fn quoted_strings_unescape() {
        assert_eq!(
            lex(r#""hello" "a\"b" "back\\slash" "qu\oted""#),
            vec![
                string("hello"),
                string("a\"b"),
                string("back\\slash"),
                string("quoted"),
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            lex("keep; # trailing comment\n/* bracket\ncomment */ stop;"),
            vec![
                Token::Identifier("keep".into()),
                Token::Semicolon,
                Token::Identifier("stop".into()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn multiline_text() {
        let source = "text:\nline one\nline two\n.\n";
        assert_eq!(lex(source), vec![string("line one\nline two\n")]);
    }

    #[test]
    fn multiline_dot_stuffing() {
        let source = "text:\n..leading dot\n.\n";
        assert_eq!(lex(source), vec![string(".leading dot\n")]);
    }

    #[test]
    fn multiline_marker_comment() {
        let source = "text: # a comment\nbody\n.\n";
        assert_eq!(lex(source), vec![string("body\n")]);
    }

    #[test]
    fn multiline_unterminated() {
        let (_, errors) = tokenize("text:\nno terminator");
        assert_eq!(errors[0].0, LexError::UnterminatedText);
    }

    #[test]
    fn crlf_line_endings() {
        let source = "text:\r\nbody\r\n.\r\n";
        assert_eq!(lex(source), vec![string("body\n")]);
    }

    #[test]
    fn punctuation() {
        assert_eq!(
            lex("[ ] ( ) { } , ;"),
            vec![
                Token::LBracket,
                Token::RBracket,
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::Comma,
                Token::Semicolon,
            ]
        );
    }
}

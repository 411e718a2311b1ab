// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::cell::Cell;

use crate::ast::{Attributes, Position, Span};
use crate::config::Delimiters;
use crate::error::Error;

pub const RAW_TAG: &str = "prompty.raw";
pub const COMMENT_TAG: &str = "prompty.comment";

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Text(String),
    Comment(String),
    OpenSelfClosing { name: String, attrs: Attributes },
    OpenBlock { name: String, attrs: Attributes },
    Close { name: String },
}

impl TokenKind {
    pub fn tag_name(&self) -> Option<&str> {
        match self {
            TokenKind::OpenSelfClosing { name, .. }
            | TokenKind::OpenBlock { name, .. }
            | TokenKind::Close { name } => Some(name),
            TokenKind::Text(_) | TokenKind::Comment(_) => None,
        }
    }
}

/// Splits template source into literal text and tag tokens.
///
/// Lexical problems (unterminated tags or strings, malformed attributes) are
/// fatal: the returned error carries the exact position and no tokens are
/// produced.
pub fn tokenize(source: &str, delimiters: &Delimiters) -> Result<Vec<Token>, Error> {
    Lexer::new(source, delimiters).run()
}

struct Lexer<'a> {
    src: &'a str,
    open: &'a str,
    close: &'a str,
    pos: usize,
    line: usize,
    line_start: usize,
    /// Byte offset and char column last reported on the current line.
    column_mark: Cell<(usize, usize)>,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, delimiters: &'a Delimiters) -> Self {
        Self {
            src,
            open: &delimiters.open,
            close: &delimiters.close,
            pos: 0,
            line: 1,
            line_start: 0,
            column_mark: Cell::new((0, 0)),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, Error> {
        let mut text = String::new();
        let mut text_start = self.position();

        while self.pos < self.src.len() {
            let rest = &self.src[self.pos..];
            let Some(rel) = rest.find(self.open) else {
                text.push_str(rest);
                self.advance_to(self.src.len());
                break;
            };
            let at = self.pos + rel;

            if rel > 0 && self.src.as_bytes()[at - 1] == b'\\' {
                text.push_str(&self.src[self.pos..at - 1]);
                text.push_str(self.open);
                self.advance_to(at + self.open.len());
                continue;
            }

            text.push_str(&self.src[self.pos..at]);
            self.advance_to(at);
            self.flush_text(&mut text, text_start);
            self.lex_tag()?;
            text_start = self.position();
        }

        self.flush_text(&mut text, text_start);
        Ok(self.tokens)
    }

    fn flush_text(&mut self, text: &mut String, start: Position) {
        if text.is_empty() {
            return;
        }
        self.tokens.push(Token {
            kind: TokenKind::Text(std::mem::take(text)),
            span: Span::new(start.offset, self.pos),
            position: start,
        });
    }

    fn lex_tag(&mut self) -> Result<(), Error> {
        let start = self.position();
        self.advance_to(self.pos + self.open.len());
        self.skip_whitespace();

        if self.eat_char('/') {
            self.skip_whitespace();
            let name = self.read_name(start)?;
            self.skip_whitespace();
            if !self.eat_str(self.close) {
                return Err(self.unexpected(start, "closing tag"));
            }
            self.push(TokenKind::Close { name }, start);
            return Ok(());
        }

        let name = self.read_name(start)?;
        let mut attrs = Attributes::new();
        let self_closing = loop {
            self.skip_whitespace();
            if self.at_end() {
                return Err(Error::parse_at("unterminated tag", start));
            }
            if self.eat_str(self.close) {
                break false;
            }
            if self.eat_char('/') {
                self.skip_whitespace();
                if self.eat_str(self.close) {
                    break true;
                }
                return Err(self.unexpected(start, "'/'"));
            }
            let attr_name = self.read_attribute_name(start)?;
            self.skip_whitespace();
            if !self.eat_char('=') {
                return Err(self.unexpected(start, &format!("attribute {attr_name}")));
            }
            self.skip_whitespace();
            let value = self.read_quoted(start)?;
            attrs.set(attr_name, value);
        };

        if name == RAW_TAG || name == COMMENT_TAG {
            if !self_closing {
                self.lex_verbatim(&name, start)?;
            }
            return Ok(());
        }

        let kind = if self_closing {
            TokenKind::OpenSelfClosing { name, attrs }
        } else {
            TokenKind::OpenBlock { name, attrs }
        };
        self.push(kind, start);
        Ok(())
    }

    /// Consumes a raw or comment body up to its closing tag without interpreting it.
    fn lex_verbatim(&mut self, name: &str, start: Position) -> Result<(), Error> {
        let body_start = self.position();
        let mut search = self.pos;
        while let Some(rel) = self.src[search..].find(self.open) {
            let at = search + rel;
            if let Some(end) = self.match_close_tag(at, name) {
                let body = self.src[self.pos..at].to_string();
                self.advance_to(at);
                let kind = if name == RAW_TAG {
                    TokenKind::Text(body)
                } else {
                    TokenKind::Comment(body)
                };
                if !matches!(&kind, TokenKind::Text(text) if text.is_empty()) {
                    self.tokens.push(Token {
                        kind,
                        span: Span::new(body_start.offset, at),
                        position: body_start,
                    });
                }
                self.advance_to(end);
                return Ok(());
            }
            search = at + self.open.len();
        }
        Err(Error::parse_at(format!("unclosed {name} block"), start))
    }

    /// Returns the end offset when a `close` tag for `name` starts at `at`.
    fn match_close_tag(&self, at: usize, name: &str) -> Option<usize> {
        let rest = self.src[at + self.open.len()..].trim_start();
        let rest = rest.strip_prefix('/')?.trim_start();
        let rest = rest.strip_prefix(name)?.trim_start();
        let rest = rest.strip_prefix(self.close)?;
        Some(self.src.len() - rest.len())
    }

    fn read_name(&mut self, start: Position) -> Result<String, Error> {
        let name_start = self.pos;
        match self.peek_char() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {}
            Some(_) => return Err(self.unexpected(start, "tag start")),
            None => return Err(Error::parse_at("unterminated tag", start)),
        }
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
                self.bump_char();
            } else {
                break;
            }
        }
        Ok(self.src[name_start..self.pos].to_string())
    }

    fn read_attribute_name(&mut self, start: Position) -> Result<String, Error> {
        let name_start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | ':') {
                self.bump_char();
            } else {
                break;
            }
        }
        if self.pos == name_start {
            return Err(self.unexpected(start, "attribute list"));
        }
        Ok(self.src[name_start..self.pos].to_string())
    }

    fn read_quoted(&mut self, tag_start: Position) -> Result<String, Error> {
        let start = self.position();
        let quote = match self.peek_char() {
            Some(q @ ('"' | '\'')) => q,
            Some(_) => {
                return Err(Error::parse_at(
                    "attribute values must be quoted",
                    self.position(),
                ))
            }
            None => return Err(Error::parse_at("unterminated tag", tag_start)),
        };
        self.bump_char();

        let mut literal = String::new();
        while let Some(ch) = self.bump_char() {
            match ch {
                c if c == quote => return Ok(literal),
                '\\' => match self.bump_char() {
                    Some('n') => literal.push('\n'),
                    Some('t') => literal.push('\t'),
                    Some('r') => literal.push('\r'),
                    Some(c @ ('"' | '\'' | '\\')) => literal.push(c),
                    Some(other) => {
                        literal.push('\\');
                        literal.push(other);
                    }
                    None => break,
                },
                other => literal.push(other),
            }
        }
        Err(Error::parse_at("unterminated string", start))
    }

    fn unexpected(&self, start: Position, after: &str) -> Error {
        match self.peek_char() {
            None => Error::parse_at("unterminated tag", start),
            Some(ch) => Error::parse_at(
                format!("unexpected character '{ch}' after {after}"),
                self.position(),
            ),
        }
    }

    fn push(&mut self, kind: TokenKind, start: Position) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start.offset, self.pos),
            position: start,
        });
    }

    /// Columns count chars, not bytes. Counting resumes from the last mark so
    /// a scan stays linear in the source length.
    fn position(&self) -> Position {
        let (mut at, mut chars) = self.column_mark.get();
        if at < self.line_start || at > self.pos {
            at = self.line_start;
            chars = 0;
        }
        chars += self.src[at..self.pos].chars().count();
        self.column_mark.set((self.pos, chars));
        Position::new(self.line, chars + 1, self.pos)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.bump_char();
            } else {
                break;
            }
        }
    }

    fn eat_char(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.bump_char();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, expected: &str) -> bool {
        if self.src[self.pos..].starts_with(expected) {
            self.advance_to(self.pos + expected.len());
            true
        } else {
            false
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(ch)
    }

    /// Moves forward to `end`, keeping line tracking current without rescanning.
    fn advance_to(&mut self, end: usize) {
        let skipped = &self.src.as_bytes()[self.pos..end];
        for (idx, byte) in skipped.iter().enumerate() {
            if *byte == b'\n' {
                self.line += 1;
                self.line_start = self.pos + idx + 1;
            }
        }
        self.pos = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<TokenKind> {
        tokenize(src, &Delimiters::default())
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_text_and_tag_shapes() {
        let kinds = lex(r#"Hi {~prompty.var name="user" /~}{~prompty.if eval="x"~}y{~/prompty.if~}"#);
        assert_eq!(kinds.len(), 5);
        assert_eq!(kinds[0], TokenKind::Text("Hi ".into()));
        match &kinds[1] {
            TokenKind::OpenSelfClosing { name, attrs } => {
                assert_eq!(name, "prompty.var");
                assert_eq!(attrs.get("name"), Some("user"));
            }
            other => panic!("unexpected token {other:?}"),
        }
        assert!(matches!(&kinds[2], TokenKind::OpenBlock { name, .. } if name == "prompty.if"));
        assert_eq!(kinds[3], TokenKind::Text("y".into()));
        assert_eq!(
            kinds[4],
            TokenKind::Close {
                name: "prompty.if".into()
            }
        );
    }

    #[test]
    fn tracks_line_and_column() {
        let tokens = tokenize("a\nbc {~x /~}", &Delimiters::default()).unwrap();
        let tag = &tokens[1];
        assert_eq!(tag.position, Position::new(2, 4, 5));
        assert_eq!(tag.span, Span::new(5, 12));
    }

    #[test]
    fn columns_count_chars_not_bytes() {
        let tokens = tokenize("h\u{e9}llo \u{1f600} {~x /~}\n\u{e9}{~y /~}", &Delimiters::default()).unwrap();
        let tags: Vec<Position> = tokens
            .iter()
            .filter(|token| token.kind.tag_name().is_some())
            .map(|token| token.position)
            .collect();
        assert_eq!(tags[0].line, 1);
        assert_eq!(tags[0].column, 9);
        assert_eq!(tags[0].offset, 12);
        assert_eq!((tags[1].line, tags[1].column), (2, 2));
    }

    #[test]
    fn delimiter_inside_string_does_not_close_tag() {
        let kinds = lex(r#"{~t eval="a ~} b" /~}"#);
        match &kinds[0] {
            TokenKind::OpenSelfClosing { attrs, .. } => assert_eq!(attrs.get("eval"), Some("a ~} b")),
            other => panic!("unexpected token {other:?}"),
        }
    }

    #[test]
    fn escapes_in_attribute_values() {
        let kinds = lex(r#"{~t a="say \"hi\"" b='it\'s' /~}"#);
        match &kinds[0] {
            TokenKind::OpenSelfClosing { attrs, .. } => {
                assert_eq!(attrs.get("a"), Some("say \"hi\""));
                assert_eq!(attrs.get("b"), Some("it's"));
            }
            other => panic!("unexpected token {other:?}"),
        }
    }

    #[test]
    fn errors_on_unterminated_tag() {
        let err = tokenize("ok {~prompty.var name=\"x\"", &Delimiters::default()).unwrap_err();
        assert!(err.to_string().contains("unterminated tag"));
        assert_eq!(err.position().map(|p| p.column), Some(4));
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = tokenize("{~t a=\"open /~}", &Delimiters::default()).unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
        assert_eq!(err.position().map(|p| p.column), Some(7));
    }

    #[test]
    fn escaped_open_delimiter_is_literal() {
        assert_eq!(lex(r"a \{~ b"), vec![TokenKind::Text("a {~ b".into())]);
    }

    #[test]
    fn raw_and_comment_bodies_are_not_interpreted() {
        let kinds = lex("{~prompty.raw~}{~x~}{~/prompty.raw~}{~prompty.comment~}{~ broken{~/prompty.comment~}");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Text("{~x~}".into()),
                TokenKind::Comment("{~ broken".into())
            ]
        );
    }

    #[test]
    fn custom_delimiters() {
        let delims = Delimiters::new("<%", "%>").unwrap();
        let tokens = tokenize("a<%v name=\"x\" /%>b", &delims).unwrap();
        assert_eq!(tokens.len(), 3);
        assert!(matches!(tokens[1].kind, TokenKind::OpenSelfClosing { .. }));
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::str::Chars;

use crate::ast::Span;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier or dotted variable path (`user.tags.0`).
    Path(String),
    StringLiteral(String),
    NumberLiteral(String),
    LeftParen,
    RightParen,
    Comma,
    Not,
    And,
    Or,
    Operator(Operator),
    Keyword(Keyword),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    True,
    False,
    Nil,
}

pub fn lex_expression(input: &str) -> Result<Vec<Token>, Error> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    chars: Chars<'a>,
    pos: usize,
    peeked: Option<char>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars(),
            pos: 0,
            peeked: None,
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, Error> {
        self.skip_whitespace();

        let start = self.pos;
        let Some(chr) = self.bump_char() else {
            return Ok(None);
        };
        let next = self.peek_char();

        let kind = match chr {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            ',' => TokenKind::Comma,
            '=' => {
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::Operator(Operator::Equal)
                } else {
                    return Err(self.error("assignment is not supported, use '=='", start));
                }
            }
            '!' => {
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::Operator(Operator::NotEqual)
                } else {
                    TokenKind::Not
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::Operator(Operator::LessOrEqual)
                } else {
                    TokenKind::Operator(Operator::Less)
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::Operator(Operator::GreaterOrEqual)
                } else {
                    TokenKind::Operator(Operator::Greater)
                }
            }
            '&' => {
                if self.peek_char() == Some('&') {
                    self.bump_char();
                    TokenKind::And
                } else {
                    return Err(self.error("unexpected '&', use '&&'", start));
                }
            }
            '|' => {
                if self.peek_char() == Some('|') {
                    self.bump_char();
                    TokenKind::Or
                } else {
                    return Err(self.error("unexpected '|', use '||'", start));
                }
            }
            q @ ('"' | '\'') => TokenKind::StringLiteral(self.read_string(q, start)?),
            '-' if next.is_some_and(|c| c.is_ascii_digit()) => {
                TokenKind::NumberLiteral(self.read_number('-'))
            }
            c if c.is_ascii_digit() => TokenKind::NumberLiteral(self.read_number(c)),
            c if is_identifier_start(c) => {
                let ident = self.read_path(c, start)?;
                match ident.as_str() {
                    "true" => TokenKind::Keyword(Keyword::True),
                    "false" => TokenKind::Keyword(Keyword::False),
                    "nil" | "null" => TokenKind::Keyword(Keyword::Nil),
                    _ => TokenKind::Path(ident),
                }
            }
            other => {
                return Err(self.error(format!("unexpected character '{other}'"), start));
            }
        };

        Ok(Some(Token {
            kind,
            span: self.span_from(start),
        }))
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

    fn read_path(&mut self, first: char, start: usize) -> Result<String, Error> {
        let mut ident = String::new();
        ident.push(first);
        while let Some(ch) = self.peek_char() {
            if is_identifier_part(ch) || ch == '.' {
                ident.push(ch);
                self.bump_char();
            } else {
                break;
            }
        }
        if ident.ends_with('.') || ident.contains("..") {
            return Err(self.error(format!("malformed variable path \"{ident}\""), start));
        }
        Ok(ident)
    }

    fn read_string(&mut self, quote: char, start: usize) -> Result<String, Error> {
        let mut literal = String::new();
        while let Some(ch) = self.bump_char() {
            match ch {
                c if c == quote => return Ok(literal),
                '\\' => {
                    if let Some(next) = self.bump_char() {
                        let escaped = match next {
                            'n' => '\n',
                            'r' => '\r',
                            't' => '\t',
                            other => other,
                        };
                        literal.push(escaped);
                    } else {
                        break;
                    }
                }
                other => literal.push(other),
            }
        }
        Err(self.error("unterminated string literal", start))
    }

    fn read_number(&mut self, first: char) -> String {
        let mut literal = String::new();
        literal.push(first);

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() || ch == '.' {
                literal.push(ch);
                self.bump_char();
            } else {
                break;
            }
        }
        literal
    }

    fn bump_char(&mut self) -> Option<char> {
        if let Some(peek) = self.peeked.take() {
            self.pos += peek.len_utf8();
            Some(peek)
        } else {
            let ch = self.chars.next()?;
            self.pos += ch.len_utf8();
            Some(ch)
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.pos)
    }

    fn error(&self, message: impl Into<String>, start: usize) -> Error {
        Error::parse(
            format!("{} (offset {start} in expression)", message.into()),
            None,
        )
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_identifier_part(ch: char) -> bool {
    is_identifier_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex_expression(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_paths_and_operators() {
        assert_eq!(
            kinds("user.age >= 18 && !admin"),
            vec![
                TokenKind::Path("user.age".into()),
                TokenKind::Operator(Operator::GreaterOrEqual),
                TokenKind::NumberLiteral("18".into()),
                TokenKind::And,
                TokenKind::Not,
                TokenKind::Path("admin".into()),
            ]
        );
    }

    #[test]
    fn lexes_calls_and_literals() {
        assert_eq!(
            kinds("contains(tags, 'x') || -1.5 == nil"),
            vec![
                TokenKind::Path("contains".into()),
                TokenKind::LeftParen,
                TokenKind::Path("tags".into()),
                TokenKind::Comma,
                TokenKind::StringLiteral("x".into()),
                TokenKind::RightParen,
                TokenKind::Or,
                TokenKind::NumberLiteral("-1.5".into()),
                TokenKind::Operator(Operator::Equal),
                TokenKind::Keyword(Keyword::Nil),
            ]
        );
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = lex_expression("name == \"open").unwrap_err();
        assert!(err.to_string().contains("unterminated string literal"));
    }

    #[test]
    fn rejects_single_equals() {
        assert!(lex_expression("a = 1").is_err());
        assert!(lex_expression("a & b").is_err());
    }
}

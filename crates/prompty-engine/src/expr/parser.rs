// SPDX-License-Identifier: Apache-2.0 OR MIT
use serde_json::Value;

use super::lexer::{lex_expression, Keyword, Operator, Token, TokenKind};
use super::Expr;
use crate::error::Error;
use crate::functions::parse_number;

/// Parses an `eval` attribute.
///
/// ```text
/// expr    := or
/// or      := and ('||' and)*
/// and     := cmp ('&&' cmp)*
/// cmp     := unary (('=='|'!='|'<'|'<='|'>'|'>=') unary)?
/// unary   := '!' unary | primary
/// primary := literal | path | path '(' (expr (',' expr)*)? ')' | '(' expr ')'
/// ```
pub fn parse_expression(source: &str) -> Result<Expr, Error> {
    let tokens = lex_expression(source)?;
    if tokens.is_empty() {
        return Err(Error::parse("empty expression", None));
    }
    let mut parser = ExprParser::new(&tokens);
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek_token() {
        return Err(Error::parse(
            format!(
                "unexpected {} at offset {} in expression",
                describe(&token.kind),
                token.span.start
            ),
            None,
        ));
    }
    Ok(expr)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    index: usize,
}

impl<'a> ExprParser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, index: 0 }
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Error> {
        let lhs = self.parse_unary()?;
        let Some(op) = self.consume_operator() else {
            return Ok(lhs);
        };
        let rhs = self.parse_unary()?;
        if self.consume_operator().is_some() {
            return Err(Error::parse(
                "comparisons cannot be chained, use '&&'",
                None,
            ));
        }
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        if self.eat(&TokenKind::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        let token = self
            .next_token()
            .ok_or_else(|| Error::parse("unexpected end of expression", None))?;
        let expr = match &token.kind {
            TokenKind::StringLiteral(value) => Expr::Literal(Value::String(value.clone())),
            TokenKind::NumberLiteral(text) => {
                let number = parse_number(text).ok_or_else(|| {
                    Error::parse(format!("invalid number literal {text}"), None)
                })?;
                Expr::Literal(Value::Number(number))
            }
            TokenKind::Keyword(Keyword::True) => Expr::Literal(Value::Bool(true)),
            TokenKind::Keyword(Keyword::False) => Expr::Literal(Value::Bool(false)),
            TokenKind::Keyword(Keyword::Nil) => Expr::Literal(Value::Null),
            TokenKind::Path(name) => {
                if self.eat(&TokenKind::LeftParen) {
                    if name.contains('.') {
                        return Err(Error::parse(
                            format!("invalid function name \"{name}\""),
                            None,
                        ));
                    }
                    let args = self.parse_arguments()?;
                    Expr::Call {
                        name: name.clone(),
                        args,
                    }
                } else {
                    Expr::Path(name.clone())
                }
            }
            TokenKind::LeftParen => {
                let inner = self.parse_or()?;
                if !self.eat(&TokenKind::RightParen) {
                    return Err(Error::parse("expected ')'", None));
                }
                inner
            }
            other => {
                return Err(Error::parse(
                    format!(
                        "unexpected {} at offset {} in expression",
                        describe(other),
                        token.span.start
                    ),
                    None,
                ));
            }
        };
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, Error> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            if self.eat(&TokenKind::RightParen) {
                return Ok(args);
            }
            return Err(Error::parse("expected ',' or ')' in argument list", None));
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_token().is_some_and(|token| &token.kind == kind) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn consume_operator(&mut self) -> Option<Operator> {
        if let Some(TokenKind::Operator(op)) = self.peek_token().map(|token| &token.kind) {
            self.index += 1;
            return Some(*op);
        }
        None
    }

    fn next_token(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.index)?;
        self.index += 1;
        Some(token)
    }

    fn peek_token(&self) -> Option<&'a Token> {
        self.tokens.get(self.index)
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Path(name) => format!("identifier \"{name}\""),
        TokenKind::StringLiteral(value) => format!("string \"{value}\""),
        TokenKind::NumberLiteral(value) => format!("number {value}"),
        TokenKind::LeftParen => "'('".to_string(),
        TokenKind::RightParen => "')'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Not => "'!'".to_string(),
        TokenKind::And => "'&&'".to_string(),
        TokenKind::Or => "'||'".to_string(),
        TokenKind::Operator(op) => format!("'{}'", op.as_str()),
        TokenKind::Keyword(Keyword::True) => "true".to_string(),
        TokenKind::Keyword(Keyword::False) => "false".to_string(),
        TokenKind::Keyword(Keyword::Nil) => "nil".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn precedence_and_binds_tighter_than_or() {
        let expr = parse_expression("a || b && c").unwrap();
        match expr {
            Expr::Or(lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Path(ref p) if p == "a"));
                assert!(matches!(*rhs, Expr::And(..)));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn parses_calls_with_nested_expressions() {
        let expr = parse_expression("len(items) > 2 && contains(tags, \"x\")").unwrap();
        let Expr::And(lhs, rhs) = expr else {
            panic!("expected and");
        };
        match *lhs {
            Expr::Compare { op, lhs, rhs } => {
                assert_eq!(op, Operator::Greater);
                assert!(matches!(*lhs, Expr::Call { ref name, ref args } if name == "len" && args.len() == 1));
                assert!(matches!(*rhs, Expr::Literal(ref v) if v == &json!(2)));
            }
            other => panic!("unexpected lhs {other:?}"),
        }
        assert!(matches!(*rhs, Expr::Call { ref name, ref args } if name == "contains" && args.len() == 2));
    }

    #[test]
    fn zero_argument_call() {
        let expr = parse_expression("now()").unwrap();
        assert!(matches!(expr, Expr::Call { ref args, .. } if args.is_empty()));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("a ==").is_err());
        assert!(parse_expression("(a").is_err());
        assert!(parse_expression("a b").is_err());
        assert!(parse_expression("f(a,").is_err());
        assert!(parse_expression("a < b < c").is_err());
    }
}

//! Recursive-descent parser: tokens -> `Expr` AST.

use super::ast::{BinOp, CmpOp, Comparison, Expr};
use super::error::{ExprError, Result};
use super::token::{Lexer, Token};

pub fn parse(src: &str) -> Result<Expr> {
    let tokens = Lexer::tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_additive()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::TrailingInput(format!(
            "{:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(expr)
}

/// Parse `left op right` — used only for `iff`'s first argument, which the
/// grammar restricts to a single comparison between two expressions.
pub fn parse_comparison(src: &str) -> Result<Comparison> {
    let tokens = Lexer::tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let cmp = parser.parse_comparison_inner()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::TrailingInput(format!(
            "{:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(cmp)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, tok: &Token, expected: &str) -> Result<()> {
        match self.bump() {
            Some(t) if &t == tok => Ok(()),
            Some(t) => Err(ExprError::UnexpectedToken {
                expected: expected.to_string(),
                found: format!("{t:?}"),
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_comparison_inner(&mut self) -> Result<Comparison> {
        let left = self.parse_additive()?;
        let op = match self.bump() {
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::EqEq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(t) => {
                return Err(ExprError::UnexpectedToken {
                    expected: "comparison operator".into(),
                    found: format!("{t:?}"),
                })
            }
            None => return Err(ExprError::UnexpectedEnd),
        };
        let right = self.parse_additive()?;
        Ok(Comparison { left, op, right })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.bump();
                    let right = self.parse_term()?;
                    left = Expr::BinOp(BinOp::Add, Box::new(left), Box::new(right));
                }
                Some(Token::Minus) => {
                    self.bump();
                    let right = self.parse_term()?;
                    left = Expr::BinOp(BinOp::Sub, Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.bump();
                    let right = self.parse_unary()?;
                    left = Expr::BinOp(BinOp::Mul, Box::new(left), Box::new(right));
                }
                Some(Token::Slash) => {
                    self.bump();
                    let right = self.parse_unary()?;
                    left = Expr::BinOp(BinOp::Div, Box::new(left), Box::new(right));
                }
                Some(Token::Percent) => {
                    self.bump();
                    let right = self.parse_unary()?;
                    left = Expr::BinOp(BinOp::Mod, Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.bump();
                let operand = self.parse_unary()?;
                Ok(Expr::Neg(Box::new(operand)))
            }
            Some(Token::Plus) => {
                self.bump();
                self.parse_unary()
            }
            _ => self.parse_pow(),
        }
    }

    fn parse_pow(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Some(Token::StarStar)) {
            self.bump();
            // right-associative
            let exp = self.parse_unary()?;
            Ok(Expr::BinOp(BinOp::Pow, Box::new(base), Box::new(exp)))
        } else {
            Ok(base)
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.parse_additive()?;
                self.expect(&Token::RParen, ")")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.parse_call(name)
                } else {
                    Ok(Expr::Name(name))
                }
            }
            Some(t) => Err(ExprError::UnexpectedToken {
                expected: "value".into(),
                found: format!("{t:?}"),
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr> {
        self.expect(&Token::LParen, "(")?;

        if name == "iff" {
            let cond = self.parse_comparison_inner()?;
            self.expect(&Token::Comma, ",")?;
            let true_val = self.parse_additive()?;
            self.expect(&Token::Comma, ",")?;
            let false_val = self.parse_additive()?;
            self.expect(&Token::RParen, ")")?;
            return Ok(Expr::Iff(
                Box::new(cond),
                Box::new(true_val),
                Box::new(false_val),
            ));
        }

        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            args.push(self.parse_additive()?);
            while matches!(self.peek(), Some(Token::Comma)) {
                self.bump();
                args.push(self.parse_additive()?);
            }
        }
        self.expect(&Token::RParen, ")")?;
        Ok(Expr::Call(name, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_precedence() {
        let e = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            e,
            Expr::BinOp(
                BinOp::Add,
                Box::new(Expr::Number(1.0)),
                Box::new(Expr::BinOp(
                    BinOp::Mul,
                    Box::new(Expr::Number(2.0)),
                    Box::new(Expr::Number(3.0))
                ))
            )
        );
    }

    #[test]
    fn parses_dotted_names() {
        let e = parse("ind.h4_rsi.value").unwrap();
        assert_eq!(e, Expr::Name("ind.h4_rsi.value".to_string()));
    }

    #[test]
    fn parses_function_call() {
        let e = parse("round(_price, 2)").unwrap();
        assert_eq!(
            e,
            Expr::Call("round".into(), vec![Expr::Name("_price".into()), Expr::Number(2.0)])
        );
    }

    #[test]
    fn parses_iff() {
        let e = parse("iff(var.x > 1, 2, 3)").unwrap();
        match e {
            Expr::Iff(cmp, t, f) => {
                assert_eq!(cmp.op, CmpOp::Gt);
                assert_eq!(*t, Expr::Number(2.0));
                assert_eq!(*f, Expr::Number(3.0));
            }
            _ => panic!("expected Iff"),
        }
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("1 + 2)").is_err());
    }

    #[test]
    fn parses_power_right_assoc() {
        let e = parse("2 ** 3 ** 2").unwrap();
        assert_eq!(
            e,
            Expr::BinOp(
                BinOp::Pow,
                Box::new(Expr::Number(2.0)),
                Box::new(Expr::BinOp(
                    BinOp::Pow,
                    Box::new(Expr::Number(3.0)),
                    Box::new(Expr::Number(2.0))
                ))
            )
        );
    }
}

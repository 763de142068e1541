//! Parser for affine expressions and constraint chains
//!
//! Parses inputs like:
//! - `4 * c0 + t0`
//! - `floor(i / 4)`, `i % 2`
//! - `0 <= i < N and j >= i`
//! - `i' = i + 1`

use crate::ast::{Chain, CmpOp, Expr};
use crate::error::{MappingError, MappingResult};
use crate::lexer::{Lexer, Token};

/// Parser for affine constraint strings
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    current: Option<Token>,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> MappingResult<Self> {
        let mut parser = Self {
            lexer: Lexer::new(source),
            current: None,
        };
        parser.advance()?;
        Ok(parser)
    }

    /// Advance to the next token
    fn advance(&mut self) -> MappingResult<Option<Token>> {
        let next = match self.lexer.next() {
            Some(Ok(tok)) => Some(tok),
            Some(Err(())) => {
                let span = self.lexer.span();
                return Err(MappingError::LexerError {
                    position: span.start,
                    message: "unexpected character".to_string(),
                });
            }
            None => None,
        };
        Ok(std::mem::replace(&mut self.current, next))
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match &self.current {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> MappingResult<()> {
        if self.check(&expected) {
            self.advance()?;
            Ok(())
        } else {
            Err(MappingError::parse_error(format!(
                "Expected {}, got {}",
                expected,
                self.describe_current()
            )))
        }
    }

    fn describe_current(&self) -> String {
        match &self.current {
            Some(tok) => format!("'{}'", tok),
            None => "end of input".to_string(),
        }
    }

    fn expect_end(&self) -> MappingResult<()> {
        match &self.current {
            None => Ok(()),
            Some(tok) => Err(MappingError::parse_error(format!(
                "Unexpected trailing token '{}'",
                tok
            ))),
        }
    }

    /// Parse a complete expression (nothing may follow)
    pub fn parse_expr_only(&mut self) -> MappingResult<Expr> {
        let expr = self.parse_expr()?;
        self.expect_end()?;
        Ok(expr)
    }

    /// Parse `chain (and chain)*` (nothing may follow)
    pub fn parse_constraints(&mut self) -> MappingResult<Vec<Chain>> {
        let mut chains = vec![self.parse_chain()?];
        while self.check(&Token::And) {
            self.advance()?;
            chains.push(self.parse_chain()?);
        }
        self.expect_end()?;
        Ok(chains)
    }

    /// Parse a comparison chain: `e1 op e2 op e3 ...`
    fn parse_chain(&mut self) -> MappingResult<Chain> {
        let first = self.parse_expr()?;
        let mut rest = Vec::new();

        while let Some(op) = self.comparison() {
            self.advance()?;
            rest.push((op, self.parse_expr()?));
        }

        if rest.is_empty() {
            return Err(MappingError::parse_error(format!(
                "Expected a comparison after '{}'",
                first
            )));
        }
        Ok(Chain { first, rest })
    }

    fn comparison(&self) -> Option<CmpOp> {
        match self.current {
            Some(Token::Lt) => Some(CmpOp::Lt),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Eq) => Some(CmpOp::Eq),
            Some(Token::Ge) => Some(CmpOp::Ge),
            Some(Token::Gt) => Some(CmpOp::Gt),
            _ => None,
        }
    }

    /// Parse an expression (handles operator precedence)
    pub fn parse_expr(&mut self) -> MappingResult<Expr> {
        self.parse_additive()
    }

    /// Parse additive expressions: a + b, a - b
    fn parse_additive(&mut self) -> MappingResult<Expr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            if self.check(&Token::Plus) {
                self.advance()?;
                let right = self.parse_multiplicative()?;
                left = Expr::Add(Box::new(left), Box::new(right));
            } else if self.check(&Token::Minus) {
                self.advance()?;
                let right = self.parse_multiplicative()?;
                left = Expr::Sub(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }

        Ok(left)
    }

    /// Parse multiplicative expressions: a * b, a / c, a % c
    fn parse_multiplicative(&mut self) -> MappingResult<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            if self.check(&Token::Star) {
                self.advance()?;
                let right = self.parse_unary()?;
                left = Expr::Mul(Box::new(left), Box::new(right));
            } else if self.check(&Token::Slash) {
                self.advance()?;
                let divisor = self.parse_divisor()?;
                left = Expr::FloorDiv(Box::new(left), divisor);
            } else if self.check(&Token::Percent) {
                self.advance()?;
                let divisor = self.parse_divisor()?;
                left = Expr::Mod(Box::new(left), divisor);
            } else {
                break;
            }
        }

        Ok(left)
    }

    /// Divisors must fold to a positive constant
    fn parse_divisor(&mut self) -> MappingResult<i64> {
        let expr = self.parse_unary()?;
        match expr.as_constant() {
            Some(c) if c > 0 => Ok(c),
            Some(c) => Err(MappingError::non_affine(format!(
                "divisor must be positive, got {}",
                c
            ))),
            None => Err(MappingError::non_affine(format!(
                "division by non-constant '{}'",
                expr
            ))),
        }
    }

    /// Parse unary expressions: -a
    fn parse_unary(&mut self) -> MappingResult<Expr> {
        if self.check(&Token::Minus) {
            self.advance()?;
            let operand = self.parse_unary()?;
            Ok(Expr::Neg(Box::new(operand)))
        } else {
            self.parse_primary()
        }
    }

    /// Parse primary expressions: literals, names, floor(...), parenthesized
    fn parse_primary(&mut self) -> MappingResult<Expr> {
        match self.advance()? {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),

            Some(Token::Ident(name)) => Ok(Expr::Var(name)),

            Some(Token::Floor) => {
                self.expect(Token::LParen)?;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                // floor of an integer expression is the expression itself
                Ok(inner)
            }

            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }

            None => Err(MappingError::parse_error("Unexpected end of input")),

            Some(other) => Err(MappingError::parse_error(format!(
                "Unexpected token: '{}'",
                other
            ))),
        }
    }
}

/// Parse a single affine expression such as `2 * i + 1`.
pub fn parse_expr(source: &str) -> MappingResult<Expr> {
    Parser::new(source)?.parse_expr_only()
}

/// Parse a conjunction of comparison chains such as `0 <= i < N and j >= 0`.
pub fn parse_constraints(source: &str) -> MappingResult<Vec<Chain>> {
    Parser::new(source)?.parse_constraints()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precedence() {
        let expr = parse_expr("2 * i + j").unwrap();
        if let Expr::Add(left, right) = &expr {
            assert!(matches!(left.as_ref(), Expr::Mul(_, _)));
            assert!(matches!(right.as_ref(), Expr::Var(name) if name == "j"));
        } else {
            panic!("Expected Add expression");
        }
    }

    #[test]
    fn test_parse_floor_division() {
        let expr = parse_expr("floor(c0 / 4)").unwrap();
        if let Expr::FloorDiv(inner, divisor) = &expr {
            assert!(matches!(inner.as_ref(), Expr::Var(name) if name == "c0"));
            assert_eq!(*divisor, 4);
        } else {
            panic!("Expected FloorDiv expression");
        }

        let expr = parse_expr("i % (2 * 2)").unwrap();
        assert!(matches!(expr, Expr::Mod(_, 4)));
    }

    #[test]
    fn test_parse_chain() {
        let chains = parse_constraints("0 <= i < N").unwrap();
        assert_eq!(chains.len(), 1);
        let ops: Vec<CmpOp> = chains[0].comparisons().map(|(_, op, _)| op).collect();
        assert_eq!(ops, vec![CmpOp::Le, CmpOp::Lt]);
    }

    #[test]
    fn test_parse_conjunction() {
        let chains = parse_constraints("i' = i + 1 and j >= 0").unwrap();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].first, Expr::var("i'"));
        assert_eq!(chains[1].rest[0].0, CmpOp::Ge);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_constraints("i + 1"), Err(MappingError::ParseError { .. })));
        assert!(matches!(parse_expr("i / N"), Err(MappingError::NonAffine { .. })));
        assert!(matches!(parse_expr("i % 0"), Err(MappingError::NonAffine { .. })));
        assert!(matches!(parse_expr("(i + 1"), Err(MappingError::ParseError { .. })));
        assert!(matches!(parse_expr("i # 2"), Err(MappingError::LexerError { position: 2, .. })));
        assert!(matches!(parse_expr("i j"), Err(MappingError::ParseError { .. })));
    }
}

//! Lexer for affine constraint strings using logos
//!
//! Supports tokens like:
//! - Identifiers: i, N, t0, and primed sink iterators such as i'
//! - Integers: 0, 4, 128
//! - Operators: +, -, *, /, %
//! - Comparisons: <, <=, =, ==, >=, >
//! - Keywords: floor, and

use logos::Logos;

/// Token types for the affine constraint language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")] // Skip whitespace
pub enum Token {
    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    // Keywords
    #[token("floor")]
    Floor,

    #[token("and")]
    And,

    // Identifiers, optionally primed
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*'?", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
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

    // Comparisons
    #[token("<")]
    Lt,

    #[token("<=")]
    Le,

    #[token("=")]
    #[token("==")]
    Eq,

    #[token(">=")]
    Ge,

    #[token(">")]
    Gt,

    // Punctuation
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{}", n),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Floor => write!(f, "floor"),
            Token::And => write!(f, "and"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Eq => write!(f, "="),
            Token::Ge => write!(f, ">="),
            Token::Gt => write!(f, ">"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

/// Lexer wrapper that provides a stream of tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    peeked: Option<Option<Result<Token, ()>>>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            peeked: None,
        }
    }

    /// Get current position in source
    pub fn span(&self) -> std::ops::Range<usize> {
        self.inner.span()
    }

    /// Peek at the next token without consuming it
    pub fn peek(&mut self) -> Option<&Result<Token, ()>> {
        let inner = &mut self.inner;
        self.peeked.get_or_insert_with(|| inner.next()).as_ref()
    }

    /// Check if the next token matches expected
    pub fn check(&mut self, expected: &Token) -> bool {
        match self.peek() {
            Some(Ok(tok)) => tok == expected,
            _ => false,
        }
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(peeked) = self.peeked.take() {
            peeked
        } else {
            self.inner.next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_tokens() {
        let source = "0 <= i < N";
        let tokens: Vec<_> = Lexer::new(source).filter_map(Result::ok).collect();
        assert_eq!(tokens, vec![
            Token::Int(0),
            Token::Le,
            Token::Ident("i".to_string()),
            Token::Lt,
            Token::Ident("N".to_string()),
        ]);
    }

    #[test]
    fn test_primed_identifier() {
        let source = "i' = i + 1";
        let tokens: Vec<_> = Lexer::new(source).filter_map(Result::ok).collect();
        assert_eq!(tokens, vec![
            Token::Ident("i'".to_string()),
            Token::Eq,
            Token::Ident("i".to_string()),
            Token::Plus,
            Token::Int(1),
        ]);
    }

    #[test]
    fn test_floor_and_modulo() {
        let source = "floor(c0 / 4) + c1 % 2";
        let tokens: Vec<_> = Lexer::new(source).filter_map(Result::ok).collect();
        assert_eq!(tokens, vec![
            Token::Floor,
            Token::LParen,
            Token::Ident("c0".to_string()),
            Token::Slash,
            Token::Int(4),
            Token::RParen,
            Token::Plus,
            Token::Ident("c1".to_string()),
            Token::Percent,
            Token::Int(2),
        ]);
    }

    #[test]
    fn test_keywords_are_not_identifiers() {
        let source = "i >= 0 and j == k";
        let tokens: Vec<_> = Lexer::new(source).filter_map(Result::ok).collect();
        assert_eq!(tokens[3], Token::And);
        assert_eq!(tokens[5], Token::Eq);
        let source = "floored";
        let tokens: Vec<_> = Lexer::new(source).filter_map(Result::ok).collect();
        assert_eq!(tokens, vec![Token::Ident("floored".to_string())]);
    }

    #[test]
    fn test_invalid_character() {
        let mut lexer = Lexer::new("i @ j");
        assert!(matches!(lexer.next(), Some(Ok(Token::Ident(_)))));
        assert!(matches!(lexer.next(), Some(Err(()))));
        assert_eq!(lexer.span(), 2..3);
    }
}

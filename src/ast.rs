//! Abstract Syntax Tree definitions for affine expressions and constraints

use std::fmt;

/// Integer expression over iterators and parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Integer literal
    Int(i64),

    /// Iterator, parameter or spatial identifier reference
    Var(String),

    /// Negation: `-e`
    Neg(Box<Expr>),

    /// Addition: `a + b`
    Add(Box<Expr>, Box<Expr>),

    /// Subtraction: `a - b`
    Sub(Box<Expr>, Box<Expr>),

    /// Multiplication: `a * b`; affine only when one side is constant
    Mul(Box<Expr>, Box<Expr>),

    /// Floor division by a positive constant: `floor(e / c)` or `e / c`
    FloorDiv(Box<Expr>, i64),

    /// Remainder by a positive constant: `e % c`
    Mod(Box<Expr>, i64),
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_string())
    }

    /// Evaluate to a constant when no names are involved
    pub fn as_constant(&self) -> Option<i64> {
        match self {
            Expr::Int(n) => Some(*n),
            Expr::Var(_) => None,
            Expr::Neg(e) => e.as_constant()?.checked_neg(),
            Expr::Add(a, b) => a.as_constant()?.checked_add(b.as_constant()?),
            Expr::Sub(a, b) => a.as_constant()?.checked_sub(b.as_constant()?),
            Expr::Mul(a, b) => a.as_constant()?.checked_mul(b.as_constant()?),
            Expr::FloorDiv(e, c) => Some(e.as_constant()?.div_euclid(*c)),
            Expr::Mod(e, c) => Some(e.as_constant()?.rem_euclid(*c)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{}", n),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Neg(e) => write!(f, "-({})", e),
            Expr::Add(a, b) => write!(f, "{} + {}", a, b),
            Expr::Sub(a, b) => write!(f, "{} - ({})", a, b),
            Expr::Mul(a, b) => write!(f, "({}) * ({})", a, b),
            Expr::FloorDiv(e, c) => write!(f, "floor(({}) / {})", e, c),
            Expr::Mod(e, c) => write!(f, "({}) % {}", e, c),
        }
    }
}

/// Comparison operator between two adjacent chain operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "=",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
        };
        write!(f, "{}", op)
    }
}

/// A comparison chain such as `0 <= i < N`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub first: Expr,
    pub rest: Vec<(CmpOp, Expr)>,
}

impl Chain {
    /// Adjacent pairs `(lhs, op, rhs)` the chain asserts
    pub fn comparisons(&self) -> impl Iterator<Item = (&Expr, CmpOp, &Expr)> {
        let lhs = std::iter::once(&self.first).chain(self.rest.iter().map(|(_, e)| e));
        lhs.zip(self.rest.iter()).map(|(l, (op, r))| (l, *op, r))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        for (op, e) in &self.rest {
            write!(f, " {} {}", op, e)?;
        }
        Ok(())
    }
}

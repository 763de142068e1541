//! Integer linear forms
//!
//! A [`LinearForm`] is `sum(coeffs[i] * x_i) + constant` over the columns of
//! some constraint space. Forms are the rows of constraint systems, the
//! lower bounds and shifts of tiles, and the outputs of tiling maps.
//!
//! All arithmetic that can grow coefficients is checked and reports
//! [`MappingError::Overflow`] instead of wrapping.

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, MappingResult};

/// An integer affine expression over a column space
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinearForm {
    pub coeffs: Vec<i64>,
    pub constant: i64,
}

impl LinearForm {
    pub fn zero(n_cols: usize) -> Self {
        Self {
            coeffs: vec![0; n_cols],
            constant: 0,
        }
    }

    pub fn constant(n_cols: usize, value: i64) -> Self {
        Self {
            coeffs: vec![0; n_cols],
            constant: value,
        }
    }

    /// The form `x_col`
    pub fn var(n_cols: usize, col: usize) -> Self {
        let mut form = Self::zero(n_cols.max(col + 1));
        form.coeffs[col] = 1;
        form
    }

    pub fn n_cols(&self) -> usize {
        self.coeffs.len()
    }

    pub fn coeff(&self, col: usize) -> i64 {
        self.coeffs.get(col).copied().unwrap_or(0)
    }

    pub fn set_coeff(&mut self, col: usize, value: i64) {
        if col >= self.coeffs.len() {
            self.coeffs.resize(col + 1, 0);
        }
        self.coeffs[col] = value;
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0)
    }

    pub fn is_zero(&self) -> bool {
        self.is_constant() && self.constant == 0
    }

    pub fn involves(&self, col: usize) -> bool {
        self.coeff(col) != 0
    }

    /// Whether any column in `cols` has a nonzero coefficient
    pub fn involves_any(&self, cols: std::ops::Range<usize>) -> bool {
        cols.into_iter().any(|c| self.involves(c))
    }

    /// Grow or shrink to `n_cols` columns. Shrinking must only drop zeros.
    pub fn resized(&self, n_cols: usize) -> Self {
        debug_assert!(self.coeffs.iter().skip(n_cols).all(|&c| c == 0));
        let mut coeffs = self.coeffs.clone();
        coeffs.resize(n_cols, 0);
        Self {
            coeffs,
            constant: self.constant,
        }
    }

    /// Move every coefficient to a new column layout.
    pub fn remap(&self, n_cols: usize, map: impl Fn(usize) -> usize) -> Self {
        let mut out = Self::constant(n_cols, self.constant);
        for (col, &c) in self.coeffs.iter().enumerate() {
            if c != 0 {
                out.coeffs[map(col)] += c;
            }
        }
        out
    }

    pub fn remove_col(&mut self, col: usize) {
        if col < self.coeffs.len() {
            self.coeffs.remove(col);
        }
    }

    pub fn negate(&self) -> Self {
        Self {
            coeffs: self.coeffs.iter().map(|c| -c).collect(),
            constant: -self.constant,
        }
    }

    /// `ka * a + kb * b`, aligned to the wider of the two forms.
    pub fn combine(ka: i64, a: &Self, kb: i64, b: &Self) -> MappingResult<Self> {
        let n = a.n_cols().max(b.n_cols());
        let mut coeffs = Vec::with_capacity(n);
        for col in 0..n {
            coeffs.push(checked(
                ka as i128 * a.coeff(col) as i128 + kb as i128 * b.coeff(col) as i128,
            )?);
        }
        let constant = checked(ka as i128 * a.constant as i128 + kb as i128 * b.constant as i128)?;
        Ok(Self { coeffs, constant })
    }

    pub fn add(&self, other: &Self) -> MappingResult<Self> {
        Self::combine(1, self, 1, other)
    }

    pub fn sub(&self, other: &Self) -> MappingResult<Self> {
        Self::combine(1, self, -1, other)
    }

    pub fn scale(&self, k: i64) -> MappingResult<Self> {
        Self::combine(k, self, 0, self)
    }

    /// Gcd of the variable coefficients (zero for a constant form)
    pub fn content(&self) -> i64 {
        self.coeffs.iter().fold(0, |g, &c| gcd(g, c))
    }

    /// Evaluate at an integer point. `None` on overflow.
    pub fn eval(&self, values: &[i64]) -> Option<i64> {
        let mut acc = self.constant as i128;
        for (col, &c) in self.coeffs.iter().enumerate() {
            if c != 0 {
                acc += c as i128 * *values.get(col)? as i128;
            }
        }
        i64::try_from(acc).ok()
    }
}

fn checked(value: i128) -> MappingResult<i64> {
    i64::try_from(value).map_err(|_| MappingError::Overflow)
}

pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a as i64
}

/// Floor of `a / b` for `b > 0`
pub fn floor_div(a: i64, b: i64) -> i64 {
    debug_assert!(b > 0);
    a.div_euclid(b)
}

/// Render a form using one name per column, e.g. `2*c0 + t0 - 1`.
pub fn format_form(form: &LinearForm, names: &[String]) -> String {
    let mut out = String::new();
    for (col, &c) in form.coeffs.iter().enumerate() {
        if c == 0 {
            continue;
        }
        let name = names
            .get(col)
            .cloned()
            .unwrap_or_else(|| format!("x{}", col));
        let magnitude = c.abs();
        if out.is_empty() {
            if c < 0 {
                out.push('-');
            }
        } else {
            out.push_str(if c < 0 { " - " } else { " + " });
        }
        if magnitude != 1 {
            out.push_str(&format!("{}*", magnitude));
        }
        out.push_str(&name);
    }
    if out.is_empty() {
        return form.constant.to_string();
    }
    if form.constant > 0 {
        out.push_str(&format!(" + {}", form.constant));
    } else if form.constant < 0 {
        out.push_str(&format!(" - {}", -form.constant));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_gcd_and_division() {
        assert_eq!(gcd(12, -18), 6);
        assert_eq!(gcd(0, 7), 7);
        assert_eq!(gcd(0, 0), 0);
        assert_eq!(floor_div(-3, 2), -2);
    }

    #[test]
    fn test_combine_and_content() {
        let a = LinearForm {
            coeffs: vec![2, 4],
            constant: 1,
        };
        let b = LinearForm::var(3, 2);
        let c = LinearForm::combine(3, &a, -2, &b).unwrap();
        assert_eq!(c.coeffs, vec![6, 12, -2]);
        assert_eq!(c.constant, 3);
        assert_eq!(c.content(), 2);
    }

    #[test]
    fn test_overflow_is_reported() {
        let a = LinearForm::constant(1, i64::MAX);
        assert!(matches!(a.scale(2), Err(MappingError::Overflow)));
    }

    #[test]
    fn test_format_form() {
        let form = LinearForm {
            coeffs: vec![2, 0, -1],
            constant: -1,
        };
        assert_eq!(format_form(&form, &names(&["c0", "c1", "t0"])), "2*c0 - t0 - 1");
        assert_eq!(format_form(&LinearForm::constant(2, 4), &[]), "4");
    }

    #[test]
    fn test_remap_and_eval() {
        let form = LinearForm {
            coeffs: vec![1, 3],
            constant: 2,
        };
        let moved = form.remap(4, |c| c + 2);
        assert_eq!(moved.coeffs, vec![0, 0, 1, 3]);
        assert_eq!(moved.eval(&[9, 9, 1, 2]), Some(9));
    }
}

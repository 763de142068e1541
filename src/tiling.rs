//! Tiling maps from global array indices to tile-local coordinates
//!
//! For each index of a tile:
//! - with a stride: `t = (a + shift(outer)) / stride - lb(outer)`
//! - without:       `t = a - lb(outer)`
//!
//! where `outer` are the parameters and the first `depth` schedule dims.

use std::fmt;

use crate::affine::{format_form, LinearForm};
use crate::tile::Tile;

/// Local coordinate transform of one array index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiledIndex {
    pub stride: i64,
    pub shift: LinearForm,
    pub lb: LinearForm,
}

/// `[params] -> { [[depth dims] -> A[index]] -> local[t] }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingMap {
    /// Name of the local buffer, e.g. `private_A`
    pub name: String,
    pub array: String,
    pub n_param: usize,
    pub depth: usize,
    /// Names of the parameters followed by the depth dims
    pub outer_names: Vec<String>,
    pub indices: Vec<TiledIndex>,
}

/// Build the tiling map of a tile whose bounds are restricted to its depth.
pub fn build_tiling(tile: &Tile, name: &str, array: &str, outer_names: &[String]) -> TilingMap {
    let n_outer = tile.n_param + tile.depth;
    let mut names: Vec<String> = outer_names.iter().take(n_outer).cloned().collect();
    names.extend((names.len()..n_outer).map(|c| format!("x{}", c)));
    TilingMap {
        name: name.to_string(),
        array: array.to_string(),
        n_param: tile.n_param,
        depth: tile.depth,
        outer_names: names,
        indices: tile
            .bounds
            .iter()
            .map(|b| TiledIndex {
                stride: b.stride,
                shift: b.shift.resized(n_outer),
                lb: b.lb.resized(n_outer),
            })
            .collect(),
    }
}

impl TilingMap {
    pub fn n_outer(&self) -> usize {
        self.n_param + self.depth
    }

    pub fn n_index(&self) -> usize {
        self.indices.len()
    }

    /// Local coordinates of `index` for the outer values `outer`.
    /// `None` when the index is off the tile's stride lattice.
    pub fn apply(&self, outer: &[i64], index: &[i64]) -> Option<Vec<i64>> {
        if outer.len() != self.n_outer() || index.len() != self.n_index() {
            return None;
        }
        self.indices
            .iter()
            .zip(index)
            .map(|(t, &a)| {
                let shifted = a.checked_add(t.shift.eval(outer)?)?;
                if shifted.rem_euclid(t.stride) != 0 {
                    return None;
                }
                shifted.div_euclid(t.stride).checked_sub(t.lb.eval(outer)?)
            })
            .collect()
    }

    /// Global index of the local coordinates `local`.
    pub fn untile(&self, outer: &[i64], local: &[i64]) -> Option<Vec<i64>> {
        if outer.len() != self.n_outer() || local.len() != self.n_index() {
            return None;
        }
        self.indices
            .iter()
            .zip(local)
            .map(|(t, &l)| {
                let normalized = l.checked_add(t.lb.eval(outer)?)?;
                normalized
                    .checked_mul(t.stride)?
                    .checked_sub(t.shift.eval(outer)?)
            })
            .collect()
    }

    fn index_names(&self) -> Vec<String> {
        (0..self.n_index()).map(|k| format!("a{}", k)).collect()
    }

    /// Rendering of local coordinate `k`
    pub fn local_expr(&self, k: usize) -> String {
        let t = &self.indices[k];
        let n_outer = self.n_outer();
        let mut names = self.outer_names.clone();
        names.extend(self.index_names());

        // a_k + shift
        let mut numerator = t.shift.resized(n_outer + self.n_index());
        numerator.coeffs[n_outer + k] += 1;

        if t.stride == 1 {
            let mut local = numerator;
            for (c, &l) in t.lb.coeffs.iter().enumerate() {
                local.coeffs[c] -= l;
            }
            local.constant -= t.lb.constant;
            return format_form(&local, &names);
        }

        let quotient = format!("floor(({})/{})", format_form(&numerator, &names), t.stride);
        if t.lb.is_zero() {
            quotient
        } else if t.lb.is_constant() && t.lb.constant > 0 {
            format!("{} - {}", quotient, t.lb.constant)
        } else if t.lb.is_constant() {
            format!("{} + {}", quotient, -t.lb.constant)
        } else {
            format!("{} - ({})", quotient, format_form(&t.lb, &self.outer_names))
        }
    }
}

impl fmt::Display for TilingMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = &self.outer_names[..self.n_param];
        let dims = &self.outer_names[self.n_param..];
        let locals: Vec<String> = (0..self.n_index()).map(|k| self.local_expr(k)).collect();
        write!(
            f,
            "[{}] -> {{ [[{}] -> {}[{}]] -> {}[{}] }}",
            params.join(", "),
            dims.join(", "),
            self.array,
            self.index_names().join(", "),
            self.name,
            locals.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::ArrayBound;
    use pretty_assertions::assert_eq;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// One parameter `t0`, one depth dim `c0`
    fn strided_tile() -> Tile {
        Tile {
            bounds: vec![
                ArrayBound {
                    lb: LinearForm::zero(2),
                    stride: 4,
                    shift: LinearForm { coeffs: vec![-1, 0], constant: 0 },
                    size: 1,
                },
                ArrayBound {
                    lb: LinearForm { coeffs: vec![0, 1], constant: 0 },
                    stride: 1,
                    shift: LinearForm::zero(2),
                    size: 8,
                },
            ],
            depth: 1,
            n_param: 1,
            tiling: None,
        }
    }

    #[test]
    fn test_apply_and_untile() {
        let map = build_tiling(&strided_tile(), "private_C", "C", &names(&["t0", "c0"]));
        // t0 = 3, c0 = 2: C[7][5] -> (1, 3)
        assert_eq!(map.apply(&[3, 2], &[7, 5]), Some(vec![1, 3]));
        assert_eq!(map.untile(&[3, 2], &[1, 3]), Some(vec![7, 5]));
        // 6 is owned by identifier 2, not 3
        assert_eq!(map.apply(&[3, 2], &[6, 5]), None);
    }

    #[test]
    fn test_display() {
        let map = build_tiling(&strided_tile(), "private_C", "C", &names(&["t0", "c0"]));
        assert_eq!(
            map.to_string(),
            "[t0] -> { [[c0] -> C[a0, a1]] -> private_C[floor((-t0 + a0)/4), -c0 + a1] }"
        );
    }

    #[test]
    fn test_unit_stride_constant_offset() {
        let tile = Tile {
            bounds: vec![ArrayBound {
                lb: LinearForm::constant(0, 2),
                stride: 1,
                shift: LinearForm::zero(0),
                size: 4,
            }],
            depth: 0,
            n_param: 0,
            tiling: None,
        };
        let map = build_tiling(&tile, "shared_A", "A", &[]);
        assert_eq!(map.to_string(), "[] -> { [[] -> A[a0]] -> shared_A[a0 - 2] }");
        assert_eq!(map.apply(&[], &[5]), Some(vec![3]));
    }
}

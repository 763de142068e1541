//! Stride detection and fixed-size bounding boxes
//!
//! Both read the output (array index) dims of a [`Relation`] whose inputs
//! are the outer schedule dims a tile may depend on, through isl's range
//! stride info and simple fixed-box hull. Results are affine forms over
//! the outer columns `[params | inputs]`.

use isl_rs::{Aff, DimType};
use log::trace;

use crate::affine::LinearForm;
use crate::error::MappingResult;
use crate::relation::{with_ctx, BasicRelation, Relation};

/// `(index + shift) mod stride == 0` for every point of the relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrideInfo {
    pub stride: i64,
    pub shift: LinearForm,
}

impl StrideInfo {
    pub fn unit(n_outer: usize) -> Self {
        Self {
            stride: 1,
            shift: LinearForm::zero(n_outer),
        }
    }

    pub fn is_unit(&self) -> bool {
        self.stride == 1
    }
}

/// Affine lower bound and constant extent of one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimBox {
    pub lb: LinearForm,
    pub size: i64,
}

/// `aff` as a form over `[params | inputs]`. `None` when it needs integer
/// divisions or has a rational coefficient.
fn aff_to_form(aff: &Aff, n_param: usize, n_in: usize) -> Option<LinearForm> {
    if aff.dim(DimType::Div) > 0 {
        return None;
    }
    let params = (0..n_param).map(|p| aff.get_coefficient_val(DimType::Param, p as i32));
    let inputs = (0..n_in).map(|i| aff.get_coefficient_val(DimType::In, i as i32));
    let mut coeffs = Vec::with_capacity(n_param + n_in);
    for v in params.chain(inputs) {
        if !v.is_int() {
            return None;
        }
        coeffs.push(v.get_num_si());
    }
    let constant = aff.get_constant_val();
    if !constant.is_int() {
        return None;
    }
    Some(LinearForm {
        coeffs,
        constant: constant.get_num_si(),
    })
}

/// Stride of output `k` over all parts of `rel`, unit when isl finds none
/// or its offset is not affine in the outer columns.
pub fn detect_stride(rel: &Relation, k: usize) -> StrideInfo {
    let (n_param, n_in) = (rel.n_param(), rel.n_in());
    if rel.parts().is_empty() {
        return StrideInfo::unit(n_param + n_in);
    }
    let found = with_ctx(|ctx| {
        let info = rel.to_map(ctx).get_range_stride_info(k as i32);
        let stride = info.get_stride();
        if !stride.is_int() || stride.get_num_si() <= 1 {
            return None;
        }
        // index = offset + stride * e
        let offset = aff_to_form(&info.get_offset(), n_param, n_in)?;
        Some(StrideInfo {
            stride: stride.get_num_si(),
            shift: offset.negate(),
        })
    });
    match found {
        Some(info) => {
            trace!("index {} has stride {}", k, info.stride);
            info
        }
        None => StrideInfo::unit(n_param + n_in),
    }
}

/// Replace output `k` by `(index + shift) / stride`; the original index
/// becomes existential. Parts left without integer points are dropped.
pub fn apply_stride(rel: &Relation, k: usize, info: &StrideInfo) -> MappingResult<Relation> {
    if info.is_unit() {
        return Ok(rel.clone());
    }
    rel.filter_map_parts(|part| {
        let d = part.dims();
        let out = d.output(k);
        let mut dims = d;
        dims.n_div += 1;
        let original = dims.div(d.n_div);
        let system = part
            .system()
            .remap(dims.total(), |c| if c == out { original } else { c });
        let mut strided = BasicRelation::from_parts(dims, system);

        // stride * index' - index - shift == 0
        let mut eq = info.shift.resized(dims.total()).negate();
        eq.coeffs[out] = info.stride;
        eq.coeffs[original] = -1;
        strided.add_eq(eq);
        if !strided.simplify()? || strided.is_empty() {
            trace!("index {}: part has no points after stride {}", k, info.stride);
            return Ok(None);
        }
        Ok(Some(strided))
    })
}

/// Constant-size bounding box of every output of `rel`, each with the
/// affine lower bound isl picks. `None` when some output has no constant
/// extent or its lower bound needs integer divisions.
pub fn fixed_box(rel: &Relation) -> Option<Vec<DimBox>> {
    let (n_param, n_in, n_out) = (rel.n_param(), rel.n_in(), rel.n_out());
    if n_out == 0 {
        return Some(Vec::new());
    }
    if rel.parts().is_empty() {
        return None;
    }
    with_ctx(|ctx| {
        let hull = rel.to_map(ctx).get_range_simple_fixed_box_hull();
        if !hull.is_valid() {
            return None;
        }
        let offset = hull.get_offset();
        let size = hull.get_size();
        (0..n_out)
            .map(|k| {
                let lb = aff_to_form(&offset.get_at(k as i32), n_param, n_in)?;
                let extent = size.get_at(k as i32);
                if !extent.is_int() {
                    return None;
                }
                Some(DimBox {
                    lb,
                    size: extent.get_num_si(),
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `{ [c] -> [a] : a = scale * e + c_coeff * c + offset, lo <= e < hi }`
    /// with one parameter column and `e` existential.
    fn strided_in(scale: i64, c_coeff: i64, offset: i64, lo: i64, hi: i64) -> BasicRelation {
        let mut rel = BasicRelation::universe(1, 1, 1);
        let e = rel.add_div();
        let d = rel.dims();
        let mut eq = rel.form();
        eq.coeffs[d.output(0)] = 1;
        eq.coeffs[e] = -scale;
        eq.coeffs[d.input(0)] = -c_coeff;
        eq.constant = -offset;
        rel.add_eq(eq);
        let mut lower = rel.form();
        lower.coeffs[e] = 1;
        lower.constant = -lo;
        rel.add_ineq(lower);
        let mut upper = rel.form();
        upper.coeffs[e] = -1;
        upper.constant = hi - 1;
        rel.add_ineq(upper);
        rel
    }

    fn strided(scale: i64, c_coeff: i64, offset: i64, n: i64) -> BasicRelation {
        strided_in(scale, c_coeff, offset, 0, n)
    }

    #[test]
    fn test_stride_from_existential() {
        let rel = Relation::from_basic(strided(2, 0, 0, 8));
        let info = detect_stride(&rel, 0);
        assert_eq!(info.stride, 2);
        assert!(info.shift.is_zero());
    }

    #[test]
    fn test_stride_across_parts() {
        // two runs of the same lattice keep stride 4
        let rel = Relation::from_basic(strided_in(4, 0, 0, 0, 2)).union(&Relation::from_basic(strided_in(4, 0, 0, 4, 6)));
        assert_eq!(detect_stride(&rel, 0).stride, 4);

        let mixed = Relation::from_basic(strided(4, 0, 0, 4)).union(&Relation::from_basic(strided(4, 0, 1, 4)));
        assert!(detect_stride(&mixed, 0).is_unit());
    }

    #[test]
    fn test_shift_tracks_outer_dims() {
        // a = 4e + c: stride 4, shift -c
        let rel = Relation::from_basic(strided(4, 1, 0, 2));
        let info = detect_stride(&rel, 0);
        assert_eq!(info.stride, 4);
        assert_eq!(info.shift.coeffs, vec![0, -1]);

        let normalized = apply_stride(&rel, 0, &info).unwrap();
        let dims = fixed_box(&normalized).unwrap();
        assert_eq!(dims[0].size, 2);
        assert!(dims[0].lb.is_zero());
    }

    #[test]
    fn test_stride_drops_empty_parts() {
        // a = 4e and a = 4e + 2 under stride 4: the second part has no points
        let rel = Relation::from_basic(strided(4, 0, 0, 4)).union(&Relation::from_basic(strided(4, 0, 2, 4)));
        let info = StrideInfo {
            stride: 4,
            shift: LinearForm::zero(2),
        };
        let normalized = apply_stride(&rel, 0, &info).unwrap();
        assert_eq!(normalized.parts().len(), 1);
        assert_eq!(fixed_box(&normalized).unwrap()[0].size, 4);

        let gone = apply_stride(&Relation::from_basic(strided(4, 0, 2, 4)), 0, &info).unwrap();
        assert!(gone.parts().is_empty());
        assert_eq!(fixed_box(&gone), None);
    }

    #[test]
    fn test_box_with_affine_lower_bound() {
        // a = c + e, 0 <= e < 4: lower bound c, size 4
        let rel = Relation::from_basic(strided(1, 1, 0, 4));
        let dims = fixed_box(&rel).unwrap();
        assert_eq!(dims[0].size, 4);
        assert_eq!(dims[0].lb.coeffs, vec![0, 1]);
        assert_eq!(dims[0].lb.constant, 0);
    }

    #[test]
    fn test_parametric_extent_has_no_box() {
        // { [c] -> [a] : 0 <= a <= N - 1 }
        let mut rel = BasicRelation::universe(1, 1, 1);
        let d = rel.dims();
        let mut lo = rel.form();
        lo.coeffs[d.output(0)] = 1;
        rel.add_ineq(lo);
        let mut hi = rel.form();
        hi.coeffs[d.output(0)] = -1;
        hi.coeffs[d.param(0)] = 1;
        hi.constant = -1;
        rel.add_ineq(hi);
        assert_eq!(fixed_box(&Relation::from_basic(rel)), None);
    }

    #[test]
    fn test_box_spans_union() {
        let rel = Relation::from_basic(strided(1, 0, 0, 4)).union(&Relation::from_basic(strided(1, 0, 2, 4)));
        let dims = fixed_box(&rel).unwrap();
        assert_eq!(dims[0].size, 6);
        assert!(dims[0].lb.is_zero());
    }
}

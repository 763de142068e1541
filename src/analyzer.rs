//! Coalescing and reuse analysis
//!
//! Answers the questions the tile synthesizer asks about a group's access
//! relation `[schedule] -> [array index]`: does any element get reused,
//! do neighbouring processing elements touch neighbouring elements, and is
//! every element owned by a single processing element.

use log::debug;

use crate::config::MappingOptions;
use crate::error::MappingResult;
use crate::kernel::Kernel;
use crate::relation::{
    is_injective, is_single_valued, range_is_singleton, BasicRelation, Dims, PairSystem, Relation,
};

/// Analyzer for the access relations of one kernel
pub struct Analyzer<'k> {
    kernel: &'k Kernel,
}

impl<'k> Analyzer<'k> {
    pub fn new(kernel: &'k Kernel) -> Self {
        Self { kernel }
    }

    /// No two schedule points inside one kernel instance touch the same
    /// element.
    pub fn is_injective(&self, access: &Relation) -> MappingResult<bool> {
        is_injective(access, self.kernel.kernel_depth)
    }

    pub fn has_reuse(&self, access: &Relation) -> MappingResult<bool> {
        Ok(!self.is_injective(access)?)
    }

    /// Stepping the innermost spatial dim by one steps the last index by
    /// one and leaves the others unchanged.
    pub fn is_coalesced(&self, access: &Relation) -> MappingResult<bool> {
        let n_out = access.n_out();
        if n_out == 0 {
            return Ok(true);
        }
        let Some(inner) = self.kernel.innermost_spatial() else {
            return Ok(true);
        };
        if range_is_singleton(access) {
            return Ok(true);
        }

        let last = n_out - 1;
        // (index, sign, offset): sign * (next - this) + offset >= 0
        let mut deviations = Vec::new();
        for k in 0..n_out {
            if k == last {
                deviations.push((k, 1, -2));
                deviations.push((k, -1, 0));
            } else {
                deviations.push((k, 1, -1));
                deviations.push((k, -1, -1));
            }
        }

        for this in access.parts() {
            for next in access.parts() {
                for &(k, sign, offset) in &deviations {
                    let mut pair = PairSystem::new(this, next);
                    for i in 0..access.n_in() {
                        let step = if i == inner.dim { -1 } else { 0 };
                        pair.equate(pair.right_in(i), pair.left_in(i), step);
                    }
                    if sign > 0 {
                        pair.at_least(pair.right_out(k), pair.left_out(k), offset);
                    } else {
                        pair.at_least(pair.left_out(k), pair.right_out(k), offset);
                    }
                    if !pair.is_empty() {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// With the first `depth` schedule dims fixed, no element is touched
    /// from two different spatial identifiers.
    pub fn is_bijective_for_fixed_outer(&self, access: &Relation, depth: usize) -> MappingResult<bool> {
        let parts = access.parts();
        for (p, left) in parts.iter().enumerate() {
            for right in &parts[p..] {
                for s in self.kernel.spatial.iter().filter(|s| s.dim >= depth) {
                    let mut pair = PairSystem::new(left, right);
                    for o in 0..access.n_out() {
                        pair.equate(pair.left_out(o), pair.right_out(o), 0);
                    }
                    for i in 0..depth.min(access.n_in()) {
                        pair.equate(pair.left_in(i), pair.right_in(i), 0);
                    }
                    // right - left = block * q + r with 0 < r < block
                    let q = pair.add_col();
                    let r = pair.add_col();
                    let mut eq = pair.form();
                    eq.coeffs[pair.right_in(s.dim)] = 1;
                    eq.coeffs[pair.left_in(s.dim)] = -1;
                    eq.coeffs[q] = -s.block_size;
                    eq.coeffs[r] = -1;
                    pair.add_eq(eq);
                    let mut lo = pair.form();
                    lo.coeffs[r] = 1;
                    lo.constant = -1;
                    pair.add_ineq(lo);
                    let mut hi = pair.form();
                    hi.coeffs[r] = -1;
                    hi.constant = s.block_size - 1;
                    pair.add_ineq(hi);
                    if !pair.is_empty() {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// `[schedule, index] -> [identifier residues]` for one part
    fn owner_relation(&self, part: &BasicRelation) -> BasicRelation {
        let d = part.dims();
        let dims = Dims {
            n_param: d.n_param,
            n_in: d.n_in + d.n_out,
            n_out: self.kernel.spatial.len(),
            n_div: d.n_div,
        };
        let system = part.system().remap(dims.total(), |c| {
            if c < d.div(0) {
                c
            } else {
                dims.div(c - d.div(0))
            }
        });
        let mut owner = BasicRelation::from_parts(dims, system);
        for (k, s) in self.kernel.spatial.iter().enumerate() {
            let q = owner.add_div();
            let od = owner.dims();
            // residue = dim - block * q, 0 <= residue < block
            let mut eq = owner.form();
            eq.coeffs[od.output(k)] = 1;
            eq.coeffs[od.input(s.dim)] = -1;
            eq.coeffs[q] = s.block_size;
            owner.add_eq(eq);
            let mut lo = owner.form();
            lo.coeffs[od.output(k)] = 1;
            owner.add_ineq(lo);
            let mut hi = owner.form();
            hi.coeffs[od.output(k)] = -1;
            hi.constant = s.block_size - 1;
            owner.add_ineq(hi);
        }
        owner
    }

    /// Outermost depth at which every accessed element still has a single
    /// owning identifier. Schedule dims are projected out from the
    /// innermost one; the first dim whose removal breaks uniqueness must
    /// stay fixed.
    pub fn unique_access_depth(&self, access: &Relation) -> MappingResult<usize> {
        let kernel_depth = self.kernel.kernel_depth;
        if self.kernel.spatial.is_empty() {
            return Ok(kernel_depth);
        }
        let mut owners = access.map_parts(|part| Ok(self.owner_relation(part)))?;
        for i in (kernel_depth..self.kernel.n_dims).rev() {
            owners = owners.eliminate_inputs(i..i + 1);
            if !is_single_valued(&owners) {
                return Ok(i + 1);
            }
        }
        Ok(kernel_depth)
    }

    /// A scalar whose instances carry an order dependence inside one
    /// kernel instance must live in registers.
    pub fn requires_force_private(&self, array: usize, options: &MappingOptions) -> MappingResult<bool> {
        if !self.kernel.arrays[array].is_scalar() || !options.live_range_reordering {
            return Ok(false);
        }
        for dep in self.kernel.order_deps.iter().filter(|d| d.array == array) {
            let Some(mut rel) = self.kernel.scheduled_dependence(dep)? else {
                continue;
            };
            let d = rel.dims();
            for k in 0..self.kernel.kernel_depth {
                rel.equate(d.input(k), d.output(k));
            }
            if !rel.is_empty() {
                debug!(
                    "{}: order dependence {} -> {} is local to the kernel",
                    self.kernel.arrays[array].name,
                    self.kernel.statements[dep.source].name,
                    self.kernel.statements[dep.sink].name
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}

//! Memory tiles
//!
//! A [`Tile`] describes the region of an array a group touches for fixed
//! values of the outer schedule dims: per index an affine lower bound, an
//! optional stride and shift, and a constant size. The
//! [`TileSynthesizer`] decides for each reference group whether a shared
//! tile, a private tile, both or neither can be built.

use log::{debug, trace, warn};

use crate::affine::LinearForm;
use crate::analyzer::Analyzer;
use crate::bounds::{apply_stride, detect_stride, fixed_box};
use crate::config::MappingOptions;
use crate::error::{MappingError, MappingResult};
use crate::group::ReferenceGroup;
use crate::kernel::Kernel;
use crate::relation::Relation;
use crate::tiling::TilingMap;

/// Bounds of one array index inside a tile
///
/// `lb` and `shift` are forms over `[params | outer schedule dims]`; the
/// tile covers `lb <= (index + shift) / stride < lb + size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayBound {
    pub lb: LinearForm,
    pub stride: i64,
    pub shift: LinearForm,
    pub size: i64,
}

impl ArrayBound {
    pub fn has_stride(&self) -> bool {
        self.stride > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub bounds: Vec<ArrayBound>,
    /// Bounds only reference the first `depth` schedule dims
    pub depth: usize,
    pub n_param: usize,
    /// Set once the owning group is frozen
    pub tiling: Option<TilingMap>,
}

impl Tile {
    pub fn n_index(&self) -> usize {
        self.bounds.len()
    }

    pub fn sizes(&self) -> Vec<i64> {
        self.bounds.iter().map(|b| b.size).collect()
    }

    /// Number of elements of the tile
    pub fn size(&self) -> i64 {
        self.bounds.iter().fold(1i64, |acc, b| acc.saturating_mul(b.size))
    }

    /// Whether any lower bound or shift mentions schedule dim `dim`
    pub fn references_dim(&self, dim: usize) -> bool {
        let col = self.n_param + dim;
        self.bounds
            .iter()
            .any(|b| b.lb.involves(col) || b.shift.involves(col))
    }

    /// Restrict the bound columns to the first `depth` schedule dims.
    pub fn set_depth(&mut self, depth: usize) {
        debug_assert!((depth..self.depth).all(|j| !self.references_dim(j)));
        let n_cols = self.n_param + depth;
        for bound in &mut self.bounds {
            bound.lb = bound.lb.resized(n_cols);
            bound.shift = bound.shift.resized(n_cols);
        }
        self.depth = depth;
    }
}

/// Per-index stride detection and normalization, then one bounding box
/// over all indices. `None` when some index has no constant extent.
pub fn can_tile(access: &Relation, depth: usize) -> MappingResult<Option<Tile>> {
    let mut rel = access.clone();
    let mut strides = Vec::with_capacity(access.n_out());
    for k in 0..access.n_out() {
        let stride = detect_stride(&rel, k);
        rel = apply_stride(&rel, k, &stride)?;
        strides.push(stride);
    }
    let Some(dims) = fixed_box(&rel) else {
        trace!("no constant-size box over {} indices", access.n_out());
        return Ok(None);
    };
    let bounds = dims
        .into_iter()
        .zip(strides)
        .map(|(dim, stride)| ArrayBound {
            lb: dim.lb,
            stride: stride.stride,
            shift: stride.shift,
            size: dim.size,
        })
        .collect();
    Ok(Some(Tile {
        bounds,
        depth,
        n_param: access.n_param(),
        tiling: None,
    }))
}

/// One past the innermost dim in `[kernel_depth, tile.depth)` that a bound
/// or shift references, or `kernel_depth` when none does.
pub fn compute_tile_depth(tile: &Tile, kernel_depth: usize) -> usize {
    (kernel_depth..tile.depth)
        .rev()
        .find(|&j| tile.references_dim(j))
        .map_or(kernel_depth, |j| j + 1)
}

/// Computes shared and private tiles for reference groups
pub struct TileSynthesizer<'k> {
    kernel: &'k Kernel,
    options: &'k MappingOptions,
    analyzer: Analyzer<'k>,
}

impl<'k> TileSynthesizer<'k> {
    pub fn new(kernel: &'k Kernel, options: &'k MappingOptions) -> Self {
        Self {
            kernel,
            options,
            analyzer: Analyzer::new(kernel),
        }
    }

    /// Fill in the tiles and depth of `group`.
    pub fn compute_tile(&self, group: &mut ReferenceGroup) -> MappingResult<()> {
        self.compute_group_bounds(group)?;

        let kernel_depth = self.kernel.kernel_depth;
        if let Some(tile) = group.shared_tile.as_mut() {
            let depth = compute_tile_depth(tile, kernel_depth);
            tile.set_depth(depth);
        }
        if group.private_tile.is_some() {
            let unique = self.analyzer.unique_access_depth(&group.access)?;
            if let Some(tile) = group.private_tile.as_mut() {
                let depth = compute_tile_depth(tile, kernel_depth).max(unique);
                tile.set_depth(depth.min(tile.depth));
            }
        }

        group.depth = match (&group.private_tile, &group.shared_tile) {
            (Some(p), Some(s)) => p.depth.min(s.depth),
            (Some(t), None) | (None, Some(t)) => t.depth,
            (None, None) => self.kernel.n_dims,
        };
        Ok(())
    }

    fn compute_group_bounds(&self, group: &mut ReferenceGroup) -> MappingResult<()> {
        group.shared_tile = None;
        group.private_tile = None;
        group.no_reuse_coalesced = false;

        let array = &self.kernel.arrays[group.array];
        let forced = array.force_private;
        if !forced {
            if !self.options.any_memory_enabled() {
                return Ok(());
            }
            if array.is_read_only_scalar() {
                return Ok(());
            }
            if !group.exact_write {
                debug!("{} group {}: not an exact write", array.name, group.nr);
                return Ok(());
            }
            if group.slice || group.overwide {
                debug!("{} group {}: partial or structure access", array.name, group.nr);
                return Ok(());
            }
        }

        let reuse = self.analyzer.has_reuse(&group.access)?;
        let shared_depth = self.kernel.shared_depth;
        let n_dims = self.kernel.n_dims;

        if self.options.use_shared_memory && !forced && self.kernel.fan_out()? > 1 {
            if reuse || !self.analyzer.is_coalesced(&group.access)? {
                let access = group.access.eliminate_inputs(shared_depth..n_dims);
                group.shared_tile = can_tile(&access, shared_depth)?;
                if group.shared_tile.is_none() {
                    warn!("{} group {}: no constant-size shared tile", array.name, group.nr);
                }
            } else {
                group.no_reuse_coalesced = true;
            }
        }

        if !(self.options.use_private_memory || forced) || !(reuse || forced) {
            return Ok(());
        }
        if !forced && !self.analyzer.is_bijective_for_fixed_outer(&group.access, shared_depth)? {
            debug!("{} group {}: elements are shared between identifiers", array.name, group.nr);
            return Ok(());
        }

        let mut access = self.kernel.privatize(&group.access)?;
        for s in &self.kernel.spatial {
            access = access.eliminate_inputs(s.dim..s.dim + 1);
        }
        group.private_tile = can_tile(&access, n_dims)?;
        if forced && group.private_tile.is_none() {
            return Err(MappingError::ForcedPrivateInfeasible {
                array: array.name.clone(),
                group: group.nr,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelDesc;

    fn bound(lb: Vec<i64>, shift: Vec<i64>, stride: i64) -> ArrayBound {
        ArrayBound {
            lb: LinearForm { coeffs: lb, constant: 0 },
            stride,
            shift: LinearForm { coeffs: shift, constant: 0 },
            size: 4,
        }
    }

    #[test]
    fn test_compute_tile_depth() {
        // one parameter, three schedule dims; c1 is the innermost reference
        let mut tile = Tile {
            bounds: vec![bound(vec![0, 1, 0, 0], vec![0; 4], 1), bound(vec![0; 4], vec![0, 0, 1, 0], 2)],
            depth: 3,
            n_param: 1,
            tiling: None,
        };
        assert_eq!(compute_tile_depth(&tile, 0), 2);
        tile.set_depth(2);
        assert_eq!(tile.bounds[0].lb.n_cols(), 3);
        assert_eq!(compute_tile_depth(&tile, 0), 2);

        let flat = Tile {
            bounds: vec![bound(vec![1, 0, 0, 0], vec![0; 4], 1)],
            depth: 3,
            n_param: 1,
            tiling: None,
        };
        assert_eq!(compute_tile_depth(&flat, 1), 1);
        assert_eq!(flat.size(), 4);
    }

    /// `S[i, j]` at schedule `[i, j]`, `j` spatial, access `index`
    fn kernel(index: &str, extent: &str) -> Kernel {
        let json = format!(
            r#"{{
                "params": ["N"],
                "context": ["N >= 8"],
                "arrays": [{{ "name": "A", "extents": ["N", "N"] }}],
                "statements": [{{
                    "name": "S",
                    "iterators": ["i", "j"],
                    "domain": ["0 <= i < {}", "0 <= j < 4"],
                    "schedule": ["i", "j"],
                    "accesses": [{{ "array": "A", "index": [{}], "kind": "write" }}]
                }}],
                "schedule": {{
                    "kernel_depth": 0,
                    "shared_depth": 1,
                    "spatial": [{{ "dim": 1, "block_size": 4, "id": "t0" }}]
                }}
            }}"#,
            extent, index
        );
        KernelDesc::from_json(&json).unwrap().lower().unwrap()
    }

    #[test]
    fn test_shared_tile_follows_outer_dim() {
        // the block writes row i: shared tile [1][4] at depth 1
        let k = kernel(r#""i", "j""#, "8");
        let access = k.scheduled_access(&k.refs[0]).unwrap().unwrap();
        let tile = can_tile(&access.eliminate_inputs(1..2), 1).unwrap().unwrap();
        assert_eq!(tile.sizes(), vec![1, 4]);
        assert!(tile.references_dim(0));
        assert_eq!(compute_tile_depth(&tile, 0), 1);
    }

    #[test]
    fn test_parametric_extent_is_infeasible() {
        // the whole column 0 <= i < N is read at every identifier
        let k = kernel(r#""i", "j""#, "N");
        let access = k.scheduled_access(&k.refs[0]).unwrap().unwrap();
        assert_eq!(can_tile(&access.eliminate_inputs(0..2), 0).unwrap(), None);
    }

    #[test]
    fn test_forced_private_failure_is_fatal() {
        let mut k = kernel(r#""i", "j""#, "N");
        k.arrays[0].force_private = true;
        let options = MappingOptions::default();
        let synthesizer = TileSynthesizer::new(&k, &options);
        let mut group = ReferenceGroup::from_ref(&k, &k.refs[0]).unwrap().unwrap();
        // drop the schedule so the footprint spans the whole parametric extent
        group.access = group.access.eliminate_inputs(0..1);
        let err = synthesizer.compute_tile(&mut group).unwrap_err();
        assert!(matches!(
            err,
            MappingError::ForcedPrivateInfeasible { ref array, group: 0 } if array == "A"
        ));
    }
}

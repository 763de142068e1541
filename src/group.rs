//! Reference groups
//!
//! All references to one array start in a group of their own. The
//! [`GroupBuilder`] then merges groups in a fixed sequence of passes:
//!
//! 1. coarse write-overlap merge, ignoring tiles
//! 2. tile computation for every group
//! 3. write-overlap merge at the depth of the two tiles
//! 4. merge of groups whose union has a smaller shared tile, followed by
//!    another depth-aware merge if that lowered a depth
//!
//! Groups live in a [`GroupArena`] while they are being merged. Once the
//! list is stable, [`freeze`] picks the placement of every group, builds
//! its tiling map and records the owning group in each reference.

use std::fmt;

use log::debug;
use serde::Serialize;

use crate::config::MappingOptions;
use crate::error::MappingResult;
use crate::kernel::{AccessRef, Kernel};
use crate::relation::Relation;
use crate::tile::{Tile, TileSynthesizer};
use crate::tiling::build_tiling;

/// References to one array that share a placement decision
#[derive(Debug, Clone)]
pub struct ReferenceGroup {
    /// Position in the array's group list
    pub nr: usize,
    pub array: usize,
    /// Member reference ids, in order of addition
    pub refs: Vec<usize>,
    /// `[schedule] -> [array index]` of all members
    pub access: Relation,
    pub write: bool,
    pub exact_write: bool,
    /// Some member uses fewer indices than the array has
    pub slice: bool,
    /// Some member uses more indices than the array has
    pub overwide: bool,
    pub shared_tile: Option<Tile>,
    pub private_tile: Option<Tile>,
    pub depth: usize,
    /// Shared buffering was skipped: no reuse and already coalesced
    pub no_reuse_coalesced: bool,
}

impl ReferenceGroup {
    /// Singleton group of a reference active in the kernel
    pub fn from_ref(kernel: &Kernel, r: &AccessRef) -> MappingResult<Option<Self>> {
        let Some(access) = kernel.scheduled_access(r)? else {
            return Ok(None);
        };
        let n_index = kernel.arrays[r.array].n_index;
        Ok(Some(Self {
            nr: 0,
            array: r.array,
            refs: vec![r.id],
            access,
            write: r.write,
            exact_write: r.exact_write,
            slice: r.n_index < n_index,
            overwide: r.n_index > n_index,
            shared_tile: None,
            private_tile: None,
            depth: kernel.n_dims,
            no_reuse_coalesced: false,
        }))
    }

    /// Union of two groups; tiles are left for the caller to recompute.
    pub fn join(&self, other: &ReferenceGroup) -> ReferenceGroup {
        debug_assert_eq!(self.array, other.array);
        let mut refs = self.refs.clone();
        refs.extend(other.refs.iter().copied());
        ReferenceGroup {
            nr: self.nr.min(other.nr),
            array: self.array,
            refs,
            access: self.access.union(&other.access),
            write: self.write || other.write,
            exact_write: self.exact_write && other.exact_write,
            slice: self.slice || other.slice,
            overwide: self.overwide || other.overwide,
            shared_tile: None,
            private_tile: None,
            depth: self.depth.max(other.depth),
            no_reuse_coalesced: false,
        }
    }

    pub fn shared_size(&self) -> Option<i64> {
        self.shared_tile.as_ref().map(Tile::size)
    }

    /// The placement that wins for this group; ties in depth favour
    /// private storage.
    pub fn placement(&self, forced: bool) -> Placement {
        match (&self.private_tile, &self.shared_tile) {
            (Some(_), _) if forced => Placement::Private,
            (Some(p), Some(s)) if p.depth <= s.depth => Placement::Private,
            (Some(_), Some(_)) => Placement::Shared,
            (Some(_), None) => Placement::Private,
            (None, Some(_)) => Placement::Shared,
            (None, None) => Placement::Global,
        }
    }
}

/// Where the accesses of a group are served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Global,
    Shared,
    Private,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Global => write!(f, "global"),
            Placement::Shared => write!(f, "shared"),
            Placement::Private => write!(f, "private"),
        }
    }
}

/// Dense storage of groups under formation
///
/// A merge tombstones both inputs and appends the result; [`compact`]
/// drops the tombstones and renumbers the survivors.
///
/// [`compact`]: GroupArena::compact
#[derive(Debug, Default)]
pub struct GroupArena {
    slots: Vec<Option<ReferenceGroup>>,
}

impl GroupArena {
    pub fn new(groups: Vec<ReferenceGroup>) -> Self {
        let mut arena = Self {
            slots: groups.into_iter().map(Some).collect(),
        };
        arena.compact();
        arena
    }

    /// Indices of the live slots, in order
    pub fn live(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<&ReferenceGroup> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ReferenceGroup> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Replace the groups at `a` and `b` by `merged`; returns its index.
    pub fn merge(&mut self, a: usize, b: usize, mut merged: ReferenceGroup) -> usize {
        debug_assert!(a != b && self.get(a).is_some() && self.get(b).is_some());
        self.slots[a] = None;
        self.slots[b] = None;
        merged.nr = self.slots.len();
        self.slots.push(Some(merged));
        self.slots.len() - 1
    }

    pub fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        for (nr, group) in self.slots.iter_mut().flatten().enumerate() {
            group.nr = nr;
        }
    }

    pub fn into_groups(mut self) -> Vec<ReferenceGroup> {
        self.compact();
        self.slots.into_iter().flatten().collect()
    }
}

/// How two groups are compared for overlapping writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overlap {
    /// Innermost provably fixed schedule dims are ignored
    Coarse,
    /// Schedule dims beyond the shallower of the two depths are ignored
    AtDepth,
}

/// Forms the reference groups of the arrays of one kernel
pub struct GroupBuilder<'k> {
    kernel: &'k Kernel,
    synthesizer: TileSynthesizer<'k>,
}

impl<'k> GroupBuilder<'k> {
    pub fn new(kernel: &'k Kernel, options: &'k MappingOptions) -> Self {
        Self {
            kernel,
            synthesizer: TileSynthesizer::new(kernel, options),
        }
    }

    /// One group per reference active in the kernel
    fn seed(&self, array: usize) -> MappingResult<Vec<ReferenceGroup>> {
        let mut groups = Vec::new();
        for r in self.kernel.refs.iter().filter(|r| r.array == array) {
            match ReferenceGroup::from_ref(self.kernel, r)? {
                Some(group) => groups.push(group),
                None => debug!("reference {} is inactive in this kernel", r.id),
            }
        }

        // fields of a structure cannot be told apart
        if self.kernel.arrays[array].structure && groups.len() > 1 {
            let mut all = groups.into_iter();
            if let Some(first) = all.next() {
                let joined = all.fold(first, |acc, g| acc.join(&g));
                return Ok(vec![joined]);
            }
            return Ok(Vec::new());
        }
        Ok(groups)
    }

    /// Form the groups of `array` from scratch.
    pub fn build_groups(&self, array: usize) -> MappingResult<Vec<ReferenceGroup>> {
        let groups = self.seed(array)?;
        self.regroup(groups)
    }

    /// Run the merge passes on an existing group list.
    pub fn regroup(&self, groups: Vec<ReferenceGroup>) -> MappingResult<Vec<ReferenceGroup>> {
        let mut arena = GroupArena::new(groups);

        self.merge_overlapping_writes(&mut arena, Overlap::Coarse)?;

        for index in arena.live() {
            if let Some(group) = arena.get_mut(index) {
                self.synthesizer.compute_tile(group)?;
            }
        }

        self.merge_overlapping_writes(&mut arena, Overlap::AtDepth)?;
        if self.merge_profitable_shared(&mut arena)? {
            self.merge_overlapping_writes(&mut arena, Overlap::AtDepth)?;
        }

        Ok(arena.into_groups())
    }

    fn overlaps(&self, a: &ReferenceGroup, b: &ReferenceGroup, mode: Overlap) -> MappingResult<bool> {
        match mode {
            Overlap::Coarse => {
                let relax = |g: &ReferenceGroup| {
                    g.access
                        .map_parts(|p| p.eliminate_fixed_trailing_inputs())
                };
                Ok(relax(a)?.intersects(&relax(b)?))
            }
            Overlap::AtDepth => {
                let depth = a.depth.min(b.depth);
                let n_dims = self.kernel.n_dims;
                Ok(a
                    .access
                    .eliminate_inputs(depth..n_dims)
                    .intersects(&b.access.eliminate_inputs(depth..n_dims)))
            }
        }
    }

    /// Merge pairs where one writes and the footprints meet, restarting
    /// the scan after every merge.
    fn merge_overlapping_writes(&self, arena: &mut GroupArena, mode: Overlap) -> MappingResult<()> {
        'scan: loop {
            let live = arena.live();
            for (n, &i) in live.iter().enumerate() {
                for &j in &live[n + 1..] {
                    let (Some(a), Some(b)) = (arena.get(i), arena.get(j)) else {
                        continue;
                    };
                    if !(a.write || b.write) || !self.overlaps(a, b, mode)? {
                        continue;
                    }
                    debug!(
                        "{}: merging groups {} and {} ({:?} write overlap)",
                        self.kernel.arrays[a.array].name, a.nr, b.nr, mode
                    );
                    let mut merged = a.join(b);
                    if mode == Overlap::AtDepth {
                        self.synthesizer.compute_tile(&mut merged)?;
                    }
                    arena.merge(i, j, merged);
                    continue 'scan;
                }
            }
            break;
        }
        arena.compact();
        Ok(())
    }

    /// Merge pairs of shared tiles whose union is strictly smaller than
    /// the two tiles together. Returns whether a merge lowered a depth.
    fn merge_profitable_shared(&self, arena: &mut GroupArena) -> MappingResult<bool> {
        let mut lowered = false;
        'scan: loop {
            let live = arena.live();
            for (n, &i) in live.iter().enumerate() {
                for &j in &live[n + 1..] {
                    let (Some(a), Some(b)) = (arena.get(i), arena.get(j)) else {
                        continue;
                    };
                    let (Some(size_a), Some(size_b)) = (a.shared_size(), b.shared_size()) else {
                        continue;
                    };
                    let mut merged = a.join(b);
                    self.synthesizer.compute_tile(&mut merged)?;
                    let Some(size) = merged.shared_size() else {
                        continue;
                    };
                    if size >= size_a.saturating_add(size_b) {
                        continue;
                    }
                    debug!(
                        "{}: merging groups {} and {} (shared tile {} < {} + {})",
                        self.kernel.arrays[a.array].name, a.nr, b.nr, size, size_a, size_b
                    );
                    lowered |= merged.depth < a.depth || merged.depth < b.depth;
                    arena.merge(i, j, merged);
                    continue 'scan;
                }
            }
            break;
        }
        arena.compact();
        Ok(lowered)
    }
}

/// A group whose membership and placement are final
#[derive(Debug, Clone)]
pub struct FrozenGroup {
    pub id: usize,
    pub group: ReferenceGroup,
    pub placement: Placement,
    /// The winning tile with its tiling map, unless the group stays global
    pub tile: Option<Tile>,
    pub local_name: Option<String>,
}

impl FrozenGroup {
    pub fn depth(&self) -> usize {
        self.tile.as_ref().map_or(self.group.depth, |t| t.depth)
    }
}

/// Resolve placements, build tiling maps and record each reference's
/// group. Groups keep their order; `id` is the position in the list.
pub fn freeze(kernel: &mut Kernel, array: usize, groups: Vec<ReferenceGroup>) -> Vec<FrozenGroup> {
    let info = &kernel.arrays[array];
    let forced = info.force_private;
    let array_name = info.name.clone();

    let placements: Vec<Placement> = groups.iter().map(|g| g.placement(forced)).collect();
    let count = |p: Placement| placements.iter().filter(|&&q| q == p).count();
    let n_shared = count(Placement::Shared);
    let n_private = count(Placement::Private);

    let mut frozen = Vec::with_capacity(groups.len());
    for (id, (group, placement)) in groups.into_iter().zip(placements).enumerate() {
        let (tile, prefix, several) = match placement {
            Placement::Private => (group.private_tile.clone(), "private", n_private > 1),
            Placement::Shared => (group.shared_tile.clone(), "shared", n_shared > 1),
            Placement::Global => (None, "", false),
        };
        let mut local_name = None;
        let tile = tile.map(|mut tile| {
            let name = if several {
                format!("{}_{}_{}", prefix, array_name, id)
            } else {
                format!("{}_{}", prefix, array_name)
            };
            let outer = kernel.outer_names(tile.depth);
            tile.tiling = Some(build_tiling(&tile, &name, &array_name, &outer));
            local_name = Some(name);
            tile
        });

        for &r in &group.refs {
            kernel.refs[r].group_id = Some(id);
        }
        debug!("{} group {}: {} ({} refs)", array_name, id, placement, group.refs.len());
        frozen.push(FrozenGroup {
            id,
            group,
            placement,
            tile,
            local_name,
        });
    }
    frozen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelDesc;

    /// `S1` writes `B[i]`, `S2` reads `B[i + offset]`, both at schedule `[i]`
    fn kernel(offset: i64, write_kind: &str) -> Kernel {
        let json = format!(
            r#"{{
                "params": [],
                "arrays": [{{ "name": "B", "extents": ["16"] }}],
                "statements": [
                    {{
                        "name": "S1",
                        "iterators": ["i"],
                        "domain": ["0 <= i < 8"],
                        "schedule": ["i"],
                        "accesses": [{{ "array": "B", "index": ["i"], "kind": "{}" }}]
                    }},
                    {{
                        "name": "S2",
                        "iterators": ["i"],
                        "domain": ["0 <= i < 8"],
                        "schedule": ["i"],
                        "accesses": [{{ "array": "B", "index": ["i + {}"], "kind": "read" }}]
                    }}
                ],
                "schedule": {{
                    "kernel_depth": 0,
                    "shared_depth": 0,
                    "spatial": [{{ "dim": 0, "block_size": 8, "id": "t0" }}]
                }}
            }}"#,
            write_kind, offset
        );
        KernelDesc::from_json(&json).unwrap().lower().unwrap()
    }

    #[test]
    fn test_arena_merge_and_compact() {
        let k = kernel(0, "write");
        let groups: Vec<ReferenceGroup> = k
            .refs
            .iter()
            .map(|r| ReferenceGroup::from_ref(&k, r).unwrap().unwrap())
            .collect();
        let mut arena = GroupArena::new(groups);
        assert_eq!(arena.live(), vec![0, 1]);
        let merged = arena.get(0).unwrap().join(arena.get(1).unwrap());
        let index = arena.merge(0, 1, merged);
        assert_eq!(index, 2);
        assert_eq!(arena.live(), vec![2]);
        arena.compact();
        assert_eq!(arena.live(), vec![0]);
        assert_eq!(arena.get(0).unwrap().nr, 0);
        assert_eq!(arena.get(0).unwrap().refs, vec![0, 1]);
    }

    #[test]
    fn test_overlapping_write_merges() {
        let k = kernel(0, "write");
        let options = MappingOptions::default();
        let groups = GroupBuilder::new(&k, &options).build_groups(0).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].write);
        assert!(groups[0].exact_write);
    }

    #[test]
    fn test_disjoint_footprints_stay_apart() {
        // B[i] and B[i + 8] never meet
        let k = kernel(8, "write");
        let options = MappingOptions::global_only();
        let groups = GroupBuilder::new(&k, &options).build_groups(0).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_may_write_clears_exact_write() {
        let k = kernel(0, "may_write");
        let options = MappingOptions::default();
        let groups = GroupBuilder::new(&k, &options).build_groups(0).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(!groups[0].exact_write);
        assert!(groups[0].shared_tile.is_none());
        assert!(groups[0].private_tile.is_none());
    }

    #[test]
    fn test_freeze_records_group_ids() {
        let mut k = kernel(8, "write");
        let options = MappingOptions::global_only();
        let groups = GroupBuilder::new(&k, &options).build_groups(0).unwrap();
        let frozen = freeze(&mut k, 0, groups);
        assert_eq!(frozen.len(), 2);
        assert!(frozen.iter().all(|g| g.placement == Placement::Global));
        assert_eq!(k.refs[0].group_id, Some(0));
        assert_eq!(k.refs[1].group_id, Some(1));
    }
}

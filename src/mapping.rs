//! Mapping results
//!
//! A [`KernelMapping`] is what the mapper hands back to the rest of the
//! compiler: for every array its frozen reference groups with their
//! placement, tile and tiling map, the group each reference belongs to,
//! and diagnostics about placements that were skipped.

use serde::{Deserialize, Serialize};

use crate::affine::{format_form, LinearForm};
use crate::config::MappingOptions;
use crate::group::{FrozenGroup, Placement};
use crate::kernel::Kernel;

/// Bounds of one array index of a tile, rendered over the outer names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundReport {
    pub lb: String,
    pub stride: i64,
    /// Only present for strided indices
    pub shift: Option<String>,
    pub size: i64,
}

/// One frozen reference group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReport {
    pub id: usize,
    /// Member reference ids
    pub refs: Vec<usize>,
    pub write: bool,
    pub exact_write: bool,
    pub slice: bool,
    pub overwide: bool,
    pub placement: String,
    pub depth: usize,
    pub local_name: Option<String>,
    pub bounds: Vec<BoundReport>,
    pub sizes: Vec<i64>,
    pub tiling: Option<String>,
    pub has_shared_tile: bool,
    pub has_private_tile: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceReport {
    pub id: usize,
    pub statement: String,
    pub read: bool,
    pub write: bool,
    pub group_id: Option<usize>,
}

/// Placement decisions for one array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayMapping {
    pub name: String,
    pub n_group: usize,
    pub force_private: bool,
    pub groups: Vec<GroupReport>,
    pub references: Vec<ReferenceReport>,
}

impl ArrayMapping {
    pub fn count(&self, placement: Placement) -> usize {
        let name = placement.to_string();
        self.groups.iter().filter(|g| g.placement == name).count()
    }
}

/// The result of mapping one kernel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelMapping {
    pub name: String,
    pub options: MappingOptions,
    pub arrays: Vec<ArrayMapping>,
    pub diagnostics: Vec<String>,
    /// Human-readable summary
    pub summary: String,
}

fn render(form: &LinearForm, names: &[String]) -> String {
    format_form(&form.resized(names.len()), names)
}

fn group_report(kernel: &Kernel, frozen: &FrozenGroup) -> GroupReport {
    let group = &frozen.group;
    let (bounds, sizes, tiling) = match &frozen.tile {
        Some(tile) => {
            let names = kernel.outer_names(tile.depth);
            let bounds = tile
                .bounds
                .iter()
                .map(|b| BoundReport {
                    lb: render(&b.lb, &names),
                    stride: b.stride,
                    shift: b.has_stride().then(|| render(&b.shift, &names)),
                    size: b.size,
                })
                .collect();
            (bounds, tile.sizes(), tile.tiling.as_ref().map(|t| t.to_string()))
        }
        None => (Vec::new(), Vec::new(), None),
    };
    GroupReport {
        id: frozen.id,
        refs: group.refs.clone(),
        write: group.write,
        exact_write: group.exact_write,
        slice: group.slice,
        overwide: group.overwide,
        placement: frozen.placement.to_string(),
        depth: frozen.depth(),
        local_name: frozen.local_name.clone(),
        bounds,
        sizes,
        tiling,
        has_shared_tile: group.shared_tile.is_some(),
        has_private_tile: group.private_tile.is_some(),
    }
}

impl KernelMapping {
    pub fn new(kernel: &Kernel, options: &MappingOptions) -> Self {
        Self {
            name: kernel.name.clone(),
            options: options.clone(),
            arrays: Vec::new(),
            diagnostics: Vec::new(),
            summary: String::new(),
        }
    }

    /// Record the frozen groups of `array`.
    pub fn add_array(&mut self, kernel: &Kernel, array: usize, groups: &[FrozenGroup]) {
        let info = &kernel.arrays[array];
        for frozen in groups.iter().filter(|g| g.group.no_reuse_coalesced) {
            self.diagnostics.push(format!(
                "{} group {}: not using shared memory, no reuse and accesses are coalesced",
                info.name, frozen.id
            ));
        }
        let references = kernel
            .refs
            .iter()
            .filter(|r| r.array == array)
            .map(|r| ReferenceReport {
                id: r.id,
                statement: kernel.statements[r.stmt].name.clone(),
                read: r.read,
                write: r.write,
                group_id: r.group_id,
            })
            .collect();
        self.arrays.push(ArrayMapping {
            name: info.name.clone(),
            n_group: groups.len(),
            force_private: info.force_private,
            groups: groups.iter().map(|g| group_report(kernel, g)).collect(),
            references,
        });
    }

    pub fn array(&self, name: &str) -> Option<&ArrayMapping> {
        self.arrays.iter().find(|a| a.name == name)
    }

    /// Generate a summary of the mapping
    pub fn generate_summary(&mut self) {
        let total = |p: Placement| self.arrays.iter().map(|a| a.count(p)).sum::<usize>();
        self.summary = format!(
            "Memory Mapping Summary:\n\
             =======================\n\
             Kernel: {}\n\
             Arrays: {}\n\
             Groups: {} ({} private, {} shared, {} global)\n\
             Diagnostics: {}\n",
            if self.name.is_empty() { "<unnamed>" } else { self.name.as_str() },
            self.arrays.len(),
            self.arrays.iter().map(|a| a.n_group).sum::<usize>(),
            total(Placement::Private),
            total(Placement::Shared),
            total(Placement::Global),
            self.diagnostics.len()
        );
    }

    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for KernelMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Kernel Mapping")?;
        writeln!(f, "==============")?;
        writeln!(f, "Shared memory: {}", self.options.use_shared_memory)?;
        writeln!(f, "Private memory: {}", self.options.use_private_memory)?;
        writeln!(f)?;

        for array in &self.arrays {
            writeln!(f, "Array {} ({} groups):", array.name, array.n_group)?;
            for group in &array.groups {
                write!(f, "  Group {}: {} refs {:?}", group.id, group.placement, group.refs)?;
                if let Some(name) = &group.local_name {
                    write!(f, " as {}{:?}", name, group.sizes)?;
                }
                writeln!(f, " at depth {}", group.depth)?;
                if let Some(tiling) = &group.tiling {
                    writeln!(f, "    {}", tiling)?;
                }
            }
            writeln!(f)?;
        }

        for line in &self.diagnostics {
            writeln!(f, "note: {}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{freeze, GroupBuilder};
    use crate::kernel::KernelDesc;

    const ROW_COPY: &str = r#"{
        "name": "row_copy",
        "params": [],
        "arrays": [
            { "name": "A", "extents": ["8"] },
            { "name": "B", "extents": ["8"] }
        ],
        "statements": [{
            "name": "S",
            "iterators": ["i"],
            "domain": ["0 <= i < 8"],
            "schedule": ["i"],
            "accesses": [
                { "array": "A", "index": ["i"], "kind": "read" },
                { "array": "B", "index": ["i"], "kind": "write" }
            ]
        }],
        "schedule": {
            "kernel_depth": 0,
            "shared_depth": 0,
            "spatial": [{ "dim": 0, "block_size": 8, "id": "t0" }]
        }
    }"#;

    fn mapping() -> KernelMapping {
        let mut kernel = KernelDesc::from_json(ROW_COPY).unwrap().lower().unwrap();
        let options = MappingOptions::default();
        let mut mapping = KernelMapping::new(&kernel, &options);
        for array in 0..kernel.arrays.len() {
            let groups = GroupBuilder::new(&kernel, &options).build_groups(array).unwrap();
            let frozen = freeze(&mut kernel, array, groups);
            mapping.add_array(&kernel, array, &frozen);
        }
        mapping.generate_summary();
        mapping
    }

    #[test]
    fn test_no_reuse_is_reported() {
        let mapping = mapping();
        let a = mapping.array("A").unwrap();
        assert_eq!(a.n_group, 1);
        assert_eq!(a.count(Placement::Global), 1);
        assert_eq!(a.references[0].group_id, Some(0));
        assert!(mapping
            .diagnostics
            .iter()
            .any(|d| d.starts_with("A group 0: not using shared memory")));
    }

    #[test]
    fn test_summary_and_json() {
        let mapping = mapping();
        assert!(mapping.summary.contains("Kernel: row_copy"));
        assert!(mapping.summary.contains("Groups: 2 (0 private, 0 shared, 2 global)"));
        let json = mapping.to_json().unwrap();
        assert!(json.contains("\"placement\": \"global\""));
        assert!(mapping.to_string().contains("Array B (1 groups):"));
    }
}

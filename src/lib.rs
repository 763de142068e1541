//! Systolic Memory Mapper
//!
//! This library decides, for every array accessed by a systolic kernel,
//! which references are grouped together and whether each group is served
//! from global memory, a buffer shared by a block of processing elements,
//! or per-element registers. Kernels are described in JSON with affine
//! schedules and accesses; the result lists the groups with their tiles
//! and tiling maps.
//!
//! # Example
//!
//! ```rust,no_run
//! use systolic_memory_mapper::{map_kernel_json, MappingOptions};
//!
//! let source = std::fs::read_to_string("kernel.json").unwrap();
//! let mapping = map_kernel_json(&source, &MappingOptions::default()).unwrap();
//! println!("{}", mapping);
//! ```

pub mod affine;
pub mod analyzer;
pub mod ast;
pub mod bounds;
pub mod config;
pub mod error;
pub mod group;
pub mod kernel;
pub mod lexer;
pub mod mapping;
pub mod parser;
pub mod relation;
pub mod tile;
pub mod tiling;

use log::{info, log, Level};

pub use analyzer::Analyzer;
pub use config::MappingOptions;
pub use error::{MappingError, MappingResult};
pub use group::{freeze, FrozenGroup, GroupBuilder, Placement, ReferenceGroup};
pub use kernel::{Kernel, KernelDesc};
pub use mapping::{ArrayMapping, GroupReport, KernelMapping};
pub use parser::Parser;
pub use tile::{ArrayBound, Tile, TileSynthesizer};
pub use tiling::{build_tiling, TilingMap};

/// Set `force_private` on scalars whose order dependences stay inside one
/// kernel instance.
fn mark_forced_private(kernel: &mut Kernel, options: &MappingOptions) -> MappingResult<()> {
    let forced = {
        let analyzer = Analyzer::new(kernel);
        (0..kernel.arrays.len())
            .map(|a| analyzer.requires_force_private(a, options))
            .collect::<MappingResult<Vec<bool>>>()?
    };
    for (info, force) in kernel.arrays.iter_mut().zip(forced) {
        if force {
            info!("{}: forcing into private memory", info.name);
        }
        info.force_private = force;
    }
    Ok(())
}

/// Main mapping function: form, tile and place the reference groups of
/// every array of a lowered kernel, in declaration order.
pub fn map_lowered(mut kernel: Kernel, options: &MappingOptions) -> MappingResult<KernelMapping> {
    mark_forced_private(&mut kernel, options)?;

    let level = if options.verbose { Level::Info } else { Level::Debug };
    let mut mapping = KernelMapping::new(&kernel, options);
    for array in 0..kernel.arrays.len() {
        let groups = GroupBuilder::new(&kernel, options).build_groups(array)?;
        let frozen = freeze(&mut kernel, array, groups);

        let name = &kernel.arrays[array].name;
        for g in &frozen {
            log!(level, "{} group {}: {} at depth {}", name, g.id, g.placement, g.depth());
        }
        info!(
            "{}: {} groups ({} private, {} shared)",
            name,
            frozen.len(),
            frozen.iter().filter(|g| g.placement == Placement::Private).count(),
            frozen.iter().filter(|g| g.placement == Placement::Shared).count()
        );
        mapping.add_array(&kernel, array, &frozen);
    }
    mapping.generate_summary();
    Ok(mapping)
}

/// Lower a kernel description and map it.
pub fn map_kernel(desc: &KernelDesc, options: &MappingOptions) -> MappingResult<KernelMapping> {
    map_lowered(desc.lower()?, options)
}

/// Map a kernel given as JSON text
pub fn map_kernel_json(source: &str, options: &MappingOptions) -> MappingResult<KernelMapping> {
    map_kernel(&KernelDesc::from_json(source)?, options)
}

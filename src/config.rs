//! Mapping options
//!
//! These correspond to the memory-placement switches of the surrounding
//! compiler driver.

use serde::{Deserialize, Serialize};

/// Options controlling which memories the mapper may use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingOptions {
    /// Allow buffers shared by a block of processing elements
    pub use_shared_memory: bool,
    /// Allow per-element registers
    pub use_private_memory: bool,
    /// Force scalars carrying in-kernel order dependences into registers
    pub live_range_reordering: bool,
    /// Log every placement decision
    pub verbose: bool,
}

impl MappingOptions {
    pub fn new(use_shared_memory: bool, use_private_memory: bool) -> Self {
        Self {
            use_shared_memory,
            use_private_memory,
            ..Self::default()
        }
    }

    /// Keep everything in global memory
    pub fn global_only() -> Self {
        Self::new(false, false)
    }

    pub fn any_memory_enabled(&self) -> bool {
        self.use_shared_memory || self.use_private_memory
    }
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            use_shared_memory: true,
            use_private_memory: true,
            live_range_reordering: true,
            verbose: false,
        }
    }
}

//! Namespace limits and defaults.

use serde::{Deserialize, Serialize};

/// Static limits and defaults enforced by the namespace facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Longest allowed name component, in bytes.
    pub max_component_length: usize,
    /// Most children a single directory may hold.
    pub max_directory_items: usize,
    /// Replication assigned to files created without an explicit factor.
    pub default_replication: u16,
    /// Preferred block size assigned to files created without one.
    pub default_block_size: u64,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            max_component_length: 255,
            max_directory_items: 1_048_576,
            default_replication: 3,
            default_block_size: 128 * 1024 * 1024,
        }
    }
}

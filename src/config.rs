//! Runtime configuration of a mesh instance.
//!
//! Every field has a default, so a JSON document only needs the keys it
//! overrides:
//!
//! ```
//! use mesh_strata::config::{MeshConfig, WeightUpdate};
//! let cfg = MeshConfig::from_json_str(r#"{ "weight_update": "Split" }"#).unwrap();
//! assert_eq!(cfg.weight_update, WeightUpdate::Split);
//! assert_eq!(cfg.chunking.max_num_elems_p_chunk, 120);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mesh_error::MeshStrataError;
use crate::partitioning::octree::OCTANT_SLOTS;
pub use crate::partitioning::{PartitionMode, PartitionerConfig};

/// How children inherit per-element weights from their parent.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightUpdate {
    /// Every child gets the parent's weight.
    #[default]
    Copy,
    /// Every child gets `max(1, w / num_children)`.
    Split,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Largest number of elements in one chunk.
    pub max_num_elems_p_chunk: usize,
    /// User-data slots per octant; a chunk beyond this is an error.
    pub chunk_slots: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_num_elems_p_chunk: 120,
            chunk_slots: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Extra slots added whenever an incidence table grows.
    pub hash_slack: usize,
    pub weight_update: WeightUpdate,
    pub chunking: ChunkConfig,
    pub partition: PartitionerConfig,
    /// Number of processes doing bulk I/O at the same time; 0 disables throttling.
    pub throttle_factor: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            hash_slack: 256,
            weight_update: WeightUpdate::Copy,
            chunking: ChunkConfig::default(),
            partition: PartitionerConfig::default(),
            throttle_factor: 0,
        }
    }
}

impl MeshConfig {
    pub fn from_json_str(s: &str) -> Result<Self, MeshStrataError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MeshStrataError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), MeshStrataError> {
        if self.chunking.max_num_elems_p_chunk == 0 {
            return Err(MeshStrataError::InvalidArgument(
                "max_num_elems_p_chunk must be positive".into(),
            ));
        }
        if !(1..=OCTANT_SLOTS).contains(&self.chunking.chunk_slots) {
            return Err(MeshStrataError::InvalidArgument(format!(
                "chunk_slots must be between 1 and {OCTANT_SLOTS}, got {}",
                self.chunking.chunk_slots
            )));
        }
        if self.partition.preferred_axis > 2 {
            return Err(MeshStrataError::InvalidArgument(format!(
                "preferred_axis {} is not one of x, y, z",
                self.partition.preferred_axis
            )));
        }
        if !(self.partition.imbalance >= 1.0) {
            return Err(MeshStrataError::InvalidArgument(format!(
                "imbalance {} must be at least 1",
                self.partition.imbalance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let cfg = MeshConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        assert_eq!(MeshConfig::from_json_str(&text).unwrap(), cfg);
    }

    #[test]
    fn partial_documents_keep_defaults() {
        let cfg = MeshConfig::from_json_str(
            r#"{ "partition": { "mode": "Slices", "preferred_axis": 2 }, "throttle_factor": 2 }"#,
        )
        .unwrap();
        assert_eq!(cfg.partition.mode, PartitionMode::Slices);
        assert_eq!(cfg.partition.preferred_axis, 2);
        assert_eq!(cfg.partition.imbalance, 1.05);
        assert_eq!(cfg.throttle_factor, 2);
        assert_eq!(cfg.chunking.chunk_slots, 4);
    }

    #[test]
    fn bad_axis_is_rejected() {
        let err = MeshConfig::from_json_str(r#"{ "partition": { "preferred_axis": 3 } }"#);
        assert!(matches!(err, Err(MeshStrataError::InvalidArgument(_))));
    }
}

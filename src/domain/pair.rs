// ============================================================
// Layer 3 — VolumePair Domain Type
// ============================================================
// The atomic unit that is validated, written to a shard and
// read back: one feature volume and the label volume that
// annotates it voxel for voxel.
//
//   features: (x, y, z) intensities (any dtype)
//   labels:   (x, y, z) integer class values
//
// Both halves always share the same spatial shape. Readers and
// writers check that before a pair is created or serialised.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::volume::{Shape3, Volume};

/// A feature volume and its voxel-aligned label volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumePair {
    pub features: Volume,
    pub labels:   Volume,
}

impl VolumePair {
    pub fn new(features: Volume, labels: Volume) -> Self {
        Self { features, labels }
    }

    /// Spatial shape of the pair (taken from the feature volume)
    pub fn shape(&self) -> Shape3 {
        self.features.shape()
    }

    /// True when both halves share one spatial shape
    pub fn is_aligned(&self) -> bool {
        self.features.shape() == self.labels.shape()
    }
}

/// Where a VolumePair lives on disk before it is sharded.
/// One row of the CSV manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePaths {
    pub features: PathBuf,
    pub labels:   PathBuf,
}

impl VolumePaths {
    pub fn new(features: impl Into<PathBuf>, labels: impl Into<PathBuf>) -> Self {
        Self {
            features: features.into(),
            labels:   labels.into(),
        }
    }
}

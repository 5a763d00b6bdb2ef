// ============================================================
// Layer 4 — Block Samples and Batches
// ============================================================
// Containers for what the pipeline emits:
//
//   BlockSample  → one normalized block (f32 features, i64 labels)
//   Batch        → `batch_size` samples pulled from the pipeline
//   BlockDataset → samples behind Burn's Dataset trait, for
//                  feeding a DataLoader with VolumeBatcher

use burn::data::dataset::Dataset;

use crate::domain::pair::VolumePair;
use crate::domain::volume::{Dtype, Shape3, VoxelData};
use crate::error::{Result, VolumeError};

/// One normalized training block: float32 features, int64 class indices.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSample {
    pub shape:    Shape3,
    pub features: Vec<f32>,
    pub labels:   Vec<i64>,
}

impl BlockSample {
    /// Take a normalized pair apart. Features must be float32, labels int64.
    pub fn from_pair(pair: VolumePair) -> Result<Self> {
        let shape = pair.shape();
        let features = match pair.features.into_data() {
            VoxelData::F32(v) => v,
            other => {
                return Err(VolumeError::DtypeMismatch {
                    expected: Dtype::F32,
                    actual:   other.dtype(),
                })
            }
        };
        let labels = match pair.labels.into_data() {
            VoxelData::I64(v) => v,
            other => {
                return Err(VolumeError::DtypeMismatch {
                    expected: Dtype::I64,
                    actual:   other.dtype(),
                })
            }
        };
        Ok(Self { shape, features, labels })
    }

    pub fn voxels(&self) -> usize {
        self.shape.voxels()
    }

    /// Fraction of voxels with a nonzero label
    pub fn foreground_fraction(&self) -> f64 {
        let hot = self.labels.iter().filter(|&&v| v != 0).count();
        hot as f64 / self.labels.len().max(1) as f64
    }
}

/// A group of `batch_size` blocks, before conversion to tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub samples: Vec<BlockSample>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn block_shape(&self) -> Option<Shape3> {
        self.samples.first().map(|s| s.shape)
    }
}

/// In-memory blocks exposed through burn's `Dataset` trait.
pub struct BlockDataset {
    samples: Vec<BlockSample>,
}

impl BlockDataset {
    pub fn new(samples: Vec<BlockSample>) -> Self { Self { samples } }

    /// Flatten pulled batches back into individual samples.
    pub fn from_batches<I: IntoIterator<Item = Batch>>(batches: I) -> Self {
        Self::new(batches.into_iter().flat_map(|b| b.samples).collect())
    }
}

impl Dataset<BlockSample> for BlockDataset {
    fn get(&self, index: usize) -> Option<BlockSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

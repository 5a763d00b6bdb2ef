// ============================================================
// Layer 4 — Block Normalizer
// ============================================================
// Prepares one (feature, label) block for the model.
//
// Features (always produce float32):
//   1. mean and standard deviation over every voxel in the block
//   2. (v - mean) / std
//   3. a constant block (std == 0) becomes all zeros
//
// Labels (always produce int64):
//   n_classes == 1  → 0 stays 0, any other value becomes 1
//   n_classes  > 1  → every value is looked up in a LabelMapping
//                     and replaced by its dense class index;
//                     a missing value is an UnmappedLabel error
//
// Without a mapping, multi-class labels must already be dense
// class indices in 0..n_classes.

use std::collections::HashMap;

use crate::domain::pair::VolumePair;
use crate::domain::volume::{Volume, VoxelData};
use crate::error::{Result, VolumeError};

// ─── LabelMapping ─────────────────────────────────────────────────────────────
/// Raw label value → dense class index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMapping {
    table: HashMap<i64, i64>,
}

impl LabelMapping {
    pub fn new(table: HashMap<i64, i64>) -> Self {
        Self { table }
    }

    /// Map the sorted distinct `values` to 0, 1, 2, ...
    pub fn dense<I: IntoIterator<Item = i64>>(values: I) -> Self {
        let mut distinct: Vec<i64> = values.into_iter().collect();
        distinct.sort_unstable();
        distinct.dedup();
        Self {
            table: distinct.into_iter().zip(0..).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, value: i64) -> Option<i64> {
        self.table.get(&value).copied()
    }

    /// Every target must be a valid class index.
    pub fn check_targets(&self, n_classes: usize) -> Result<()> {
        let n = n_classes as i64;
        if let Some((from, to)) = self.table.iter().find(|(_, to)| **to < 0 || **to >= n) {
            return Err(VolumeError::Configuration(format!(
                "label mapping sends {from} to {to}, outside 0..{n_classes}"
            )));
        }
        Ok(())
    }
}

impl FromIterator<(i64, i64)> for LabelMapping {
    fn from_iter<T: IntoIterator<Item = (i64, i64)>>(iter: T) -> Self {
        Self { table: iter.into_iter().collect() }
    }
}

// ─── Normalizer ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct Normalizer {
    n_classes: usize,
    mapping:   Option<LabelMapping>,
}

impl Normalizer {
    pub fn new(n_classes: usize, mapping: Option<LabelMapping>) -> Result<Self> {
        if n_classes == 0 {
            return Err(VolumeError::Configuration("n_classes must be >= 1".into()));
        }
        if n_classes > 1 {
            if let Some(m) = &mapping {
                m.check_targets(n_classes)?;
            }
        }
        Ok(Self { n_classes, mapping })
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn normalize(&self, pair: VolumePair) -> Result<VolumePair> {
        let features = standardize(&pair.features)?;
        let labels = self.remap_labels(&pair.labels)?;
        Ok(VolumePair::new(features, labels))
    }

    pub fn remap_labels(&self, labels: &Volume) -> Result<Volume> {
        let raw = labels.data().to_i64_vec();
        let out = if self.n_classes == 1 {
            binarize(&raw)
        } else {
            match &self.mapping {
                Some(m) => remap(&raw, |v| m.get(v))?,
                None => {
                    let n = self.n_classes as i64;
                    remap(&raw, |v| (0..n).contains(&v).then_some(v))?
                }
            }
        };
        Volume::new(labels.shape(), VoxelData::I64(out))
    }
}

/// Zero-mean, unit-variance float32 copy of `volume`.
pub fn standardize(volume: &Volume) -> Result<Volume> {
    let values = volume.data().to_f32_vec();
    let n = values.len().max(1) as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / n;
    let std = var.sqrt();

    let out: Vec<f32> = if std > 0.0 && std.is_finite() {
        values.iter().map(|&v| ((f64::from(v) - mean) / std) as f32).collect()
    } else {
        vec![0.0; values.len()]
    };
    Volume::new(volume.shape(), VoxelData::F32(out))
}

fn binarize(raw: &[i64]) -> Vec<i64> {
    raw.iter().map(|&v| i64::from(v != 0)).collect()
}

fn remap<F: Fn(i64) -> Option<i64>>(raw: &[i64], lookup: F) -> Result<Vec<i64>> {
    raw.iter()
        .map(|&v| lookup(v).ok_or(VolumeError::UnmappedLabel { value: v }))
        .collect()
}

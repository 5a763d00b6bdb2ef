// ============================================================
// Layer 4 — Volume Validator
// ============================================================
// Loads every (features, labels) pair once, one pair at a time,
// and checks that the collection can be sharded:
//
//   1. every feature volume has the same shape S
//   2. every label volume also has shape S
//   3. every label value is an integer (float labels may carry
//      residues up to `tolerance`, e.g. 2.0000001)
//
// The result tells the shard writer which shape was validated
// and which dtypes to store features and labels as. Nothing is
// written; the first inconsistency aborts validation.

use crate::domain::pair::VolumePaths;
use crate::domain::traits::VolumeSource;
use crate::domain::volume::{Dtype, Shape3, Volume};
use crate::error::{Result, VolumeError};

/// What validation established about a collection of pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedDataset {
    /// Shared spatial shape of every volume
    pub shape:         Shape3,
    /// Dtype features are stored as (the common one, float32 if mixed)
    pub feature_dtype: Dtype,
    /// Integral dtype labels are stored as
    pub label_dtype:   Dtype,
    /// Number of pairs checked
    pub n_pairs:       usize,
}

pub struct VolumeValidator {
    /// Maximum distance from the nearest integer a float label may have
    tolerance: f64,
}

impl VolumeValidator {
    pub const DEFAULT_TOLERANCE: f64 = 1e-4;

    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Validate `pairs` in order, loading each through `source`.
    pub fn validate(
        &self,
        pairs:  &[VolumePaths],
        source: &dyn VolumeSource,
    ) -> Result<ValidatedDataset> {
        if pairs.is_empty() {
            return Err(VolumeError::Configuration("no volume pairs to validate".into()));
        }

        let mut shape: Option<Shape3> = None;
        let mut feature_dtype: Option<Dtype> = None;
        let mut labels = LabelStats::default();

        for paths in pairs {
            let features = source.load(&paths.features)?;
            let expected = *shape.get_or_insert(features.shape());
            check_shape(&paths.features, expected, &features)?;
            feature_dtype = Some(match feature_dtype {
                Some(d) if d != features.dtype() => Dtype::F32,
                Some(d) => d,
                None => features.dtype(),
            });
            drop(features);

            let label = source.load(&paths.labels)?;
            check_shape(&paths.labels, expected, &label)?;
            if let Some(value) = label.data().first_non_integral(self.tolerance) {
                return Err(VolumeError::NonIntegralLabel {
                    path: paths.labels.clone(),
                    value,
                });
            }
            labels.observe(&label);

            tracing::debug!(
                "Validated '{}' / '{}'",
                paths.features.display(),
                paths.labels.display()
            );
        }

        // The loop ran at least once, so both are set
        let (Some(shape), Some(feature_dtype)) = (shape, feature_dtype) else {
            return Err(VolumeError::Configuration("no volume pairs to validate".into()));
        };

        let validated = ValidatedDataset {
            shape,
            feature_dtype,
            label_dtype: labels.storage_dtype(),
            n_pairs: pairs.len(),
        };
        tracing::info!(
            "Validated {} pairs: shape {}, features {}, labels {}",
            validated.n_pairs,
            validated.shape,
            validated.feature_dtype,
            validated.label_dtype
        );
        Ok(validated)
    }
}

impl Default for VolumeValidator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TOLERANCE)
    }
}

fn check_shape(path: &std::path::Path, expected: Shape3, volume: &Volume) -> Result<()> {
    if volume.shape() != expected {
        return Err(VolumeError::ShapeMismatch {
            path:   path.to_path_buf(),
            expected,
            actual: volume.shape(),
        });
    }
    Ok(())
}

// ─── Label dtype selection ────────────────────────────────────────────────────
// If every label volume already uses one integral dtype, keep it.
// Otherwise pick the smallest integral dtype covering the observed
// value range.
#[derive(Default)]
struct LabelStats {
    common: Option<Option<Dtype>>,
    min:    i64,
    max:    i64,
}

impl LabelStats {
    fn observe(&mut self, label: &Volume) {
        let dtype = label.dtype();
        self.common = Some(match self.common {
            None if dtype.is_integral() => Some(dtype),
            Some(Some(d)) if d == dtype => Some(d),
            _ => None,
        });
        let values = label.data().to_i64_vec();
        if let (Some(&lo), Some(&hi)) = (values.iter().min(), values.iter().max()) {
            self.min = self.min.min(lo);
            self.max = self.max.max(hi);
        }
    }

    fn storage_dtype(&self) -> Dtype {
        if let Some(Some(dtype)) = self.common {
            return dtype;
        }
        let fits = |lo: i64, hi: i64| self.min >= lo && self.max <= hi;
        if fits(0, u8::MAX as i64) {
            Dtype::U8
        } else if fits(i16::MIN as i64, i16::MAX as i64) {
            Dtype::I16
        } else if fits(i32::MIN as i64, i32::MAX as i64) {
            Dtype::I32
        } else {
            Dtype::I64
        }
    }
}

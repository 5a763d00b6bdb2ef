// ============================================================
// Layer 4 — Augmentation Engine
// ============================================================
// Applies one randomly sampled rigid transform to a feature
// block and its label block so both stay in exact spatial
// correspondence.
//
//   sample  → rotation (3 Euler angles) + translation
//   apply   → for every output voxel p, look up the source point
//             R⁻¹(p − c − t) + c   (c = block centre)
//
//   features: trilinear interpolation, outside the block reads 0
//   labels:   nearest neighbour, outside the block reads 0
//
// Labels are never interpolated, so no fractional class values
// can appear. The engine holds no state between calls; all
// randomness comes from the RNG passed in.

use nalgebra::{Rotation3, Vector3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::pair::VolumePair;
use crate::domain::volume::{Shape3, Volume, VoxelData};
use crate::error::{Result, VolumeError};

/// Sampling ranges for the rigid transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentParams {
    /// Each Euler angle is uniform in [-max_rotation, max_rotation] (radians)
    pub max_rotation:    f64,
    /// Each axis shift is uniform in [-max_translation, max_translation] (voxels)
    pub max_translation: f64,
}

impl Default for AugmentParams {
    fn default() -> Self {
        Self {
            max_rotation:    std::f64::consts::FRAC_PI_4,
            max_translation: 5.0,
        }
    }
}

impl AugmentParams {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("max_rotation", self.max_rotation), ("max_translation", self.max_translation)] {
            if !v.is_finite() || v < 0.0 {
                return Err(VolumeError::Configuration(format!(
                    "{name} must be a finite non-negative number, got {v}"
                )));
            }
        }
        Ok(())
    }
}

// ─── RigidTransform ───────────────────────────────────────────────────────────
/// Rotation about the block centre followed by a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    rotation:    Rotation3<f64>,
    translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation:    Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// `angles` are (roll, pitch, yaw) in radians, `translation` in voxels.
    pub fn new(angles: [f64; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation:    Rotation3::from_euler_angles(angles[0], angles[1], angles[2]),
            translation: Vector3::from(translation),
        }
    }

    pub fn sample<R: Rng + ?Sized>(rng: &mut R, params: &AugmentParams) -> Self {
        let r = params.max_rotation.abs();
        let t = params.max_translation.abs();
        let mut angle = || rng.gen_range(-r..=r);
        let angles = [angle(), angle(), angle()];
        let mut shift = || rng.gen_range(-t..=t);
        let translation = [shift(), shift(), shift()];
        Self::new(angles, translation)
    }

    /// Where output voxel `p` comes from in a block of `shape`.
    pub fn source_point(&self, shape: Shape3, p: [usize; 3]) -> [f64; 3] {
        let c = centre(shape);
        let out = Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64);
        let src = self.rotation.inverse() * (out - c - self.translation) + c;
        [src.x, src.y, src.z]
    }

    /// Nearest-neighbour resample of any voxel buffer.
    pub fn resample_nearest(&self, volume: &Volume) -> Result<Volume> {
        let shape = volume.shape();
        let indices: Vec<Option<usize>> = self
            .source_points(shape)
            .map(|src| nearest_index(shape, src))
            .collect();
        Volume::new(shape, volume.data().gather(&indices))
    }

    /// Trilinear resample; the result is always float32.
    pub fn resample_linear(&self, volume: &Volume) -> Result<Volume> {
        let shape = volume.shape();
        let values = volume.data().to_f32_vec();
        let out: Vec<f32> = self
            .source_points(shape)
            .map(|src| trilinear(&values, shape, src))
            .collect();
        Volume::new(shape, VoxelData::F32(out))
    }

    fn source_points(&self, shape: Shape3) -> impl Iterator<Item = [f64; 3]> + '_ {
        let [x, y, z] = shape.dims();
        (0..x).flat_map(move |i| {
            (0..y).flat_map(move |j| (0..z).map(move |k| self.source_point(shape, [i, j, k])))
        })
    }
}

fn centre(shape: Shape3) -> Vector3<f64> {
    let [x, y, z] = shape.dims();
    Vector3::new(
        (x as f64 - 1.0) / 2.0,
        (y as f64 - 1.0) / 2.0,
        (z as f64 - 1.0) / 2.0,
    )
}

fn nearest_index(shape: Shape3, src: [f64; 3]) -> Option<usize> {
    let dims = shape.dims();
    let mut idx = [0usize; 3];
    for axis in 0..3 {
        let r = src[axis].round();
        if r < 0.0 || r >= dims[axis] as f64 {
            return None;
        }
        idx[axis] = r as usize;
    }
    Some(shape.offset(idx[0], idx[1], idx[2]))
}

fn trilinear(values: &[f32], shape: Shape3, src: [f64; 3]) -> f32 {
    let dims = shape.dims();
    let base = [src[0].floor(), src[1].floor(), src[2].floor()];
    let frac = [src[0] - base[0], src[1] - base[1], src[2] - base[2]];

    let mut acc = 0.0f64;
    for corner in 0..8usize {
        let mut weight = 1.0;
        let mut idx = [0usize; 3];
        let mut inside = true;
        for axis in 0..3 {
            let upper = (corner >> (2 - axis)) & 1 == 1;
            weight *= if upper { frac[axis] } else { 1.0 - frac[axis] };
            let c = base[axis] + if upper { 1.0 } else { 0.0 };
            if c < 0.0 || c >= dims[axis] as f64 {
                inside = false;
            } else {
                idx[axis] = c as usize;
            }
        }
        if inside && weight != 0.0 {
            acc += weight * f64::from(values[shape.offset(idx[0], idx[1], idx[2])]);
        }
    }
    acc as f32
}

// ─── AugmentationEngine ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default)]
pub struct AugmentationEngine {
    params: AugmentParams,
}

impl AugmentationEngine {
    pub fn new(params: AugmentParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &AugmentParams {
        &self.params
    }

    /// Transform both halves of `pair` with one sampled transform, or
    /// return it untouched when `augment` is false.
    pub fn apply<R: Rng + ?Sized>(&self, pair: VolumePair, rng: &mut R, augment: bool) -> Result<VolumePair> {
        if !pair.is_aligned() {
            return Err(VolumeError::ShapeMismatch {
                path:     "<block>".into(),
                expected: pair.features.shape(),
                actual:   pair.labels.shape(),
            });
        }
        if !augment {
            return Ok(pair);
        }
        let transform = RigidTransform::sample(rng, &self.params);
        self.apply_transform(&pair, &transform)
    }

    pub fn apply_transform(&self, pair: &VolumePair, transform: &RigidTransform) -> Result<VolumePair> {
        Ok(VolumePair::new(
            transform.resample_linear(&pair.features)?,
            transform.resample_nearest(&pair.labels)?,
        ))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f64::consts::FRAC_PI_2;

    fn blob(shape: Shape3) -> VolumePair {
        let labels = Volume::from_fn(shape, |i, j, k| {
            u8::from((1..=2).contains(&i) && (2..=4).contains(&j) && k >= 1)
        });
        let features = Volume::from_fn(shape, |i, j, k| (i * 7 + j * 3 + k) as f32);
        VolumePair::new(features, labels)
    }

    fn label_values(v: &Volume) -> Vec<u8> {
        match v.data() {
            VoxelData::U8(v) => v.clone(),
            other => panic!("unexpected dtype {:?}", other.dtype()),
        }
    }

    #[test]
    fn test_disabled_returns_pair_unchanged() {
        let pair = blob(Shape3::new(4, 6, 5));
        let mut rng = StdRng::seed_from_u64(1);
        let out = AugmentationEngine::default().apply(pair.clone(), &mut rng, false).unwrap();
        assert_eq!(out, pair);
    }

    #[test]
    fn test_identity_transform_preserves_values() {
        let pair = blob(Shape3::new(4, 6, 5));
        let out = AugmentationEngine::default().apply_transform(&pair, &RigidTransform::identity()).unwrap();
        assert_eq!(out.labels, pair.labels);
        assert_eq!(out.features.data().to_f32_vec(), pair.features.data().to_f32_vec());
    }

    #[test]
    fn test_integer_translation_shifts_labels() {
        let shape = Shape3::new(5, 5, 5);
        let labels = Volume::from_fn(shape, |i, j, k| u8::from((i, j, k) == (1, 2, 3)));
        let t = RigidTransform::new([0.0; 3], [2.0, -1.0, 1.0]);
        let out = label_values(&t.resample_nearest(&labels).unwrap());
        let hot: Vec<usize> = (0..out.len()).filter(|&n| out[n] == 1).collect();
        assert_eq!(hot, vec![shape.offset(3, 1, 4)]);
    }

    #[test]
    fn test_labels_stay_within_original_values() {
        let pair = blob(Shape3::new(6, 6, 6));
        let mut rng = StdRng::seed_from_u64(7);
        let engine = AugmentationEngine::default();
        for _ in 0..10 {
            let out = engine.apply(pair.clone(), &mut rng, true).unwrap();
            assert!(label_values(&out.labels).iter().all(|&v| v <= 1));
            assert_eq!(out.features.shape(), pair.features.shape());
        }
    }

    #[test]
    fn test_feature_and_label_follow_same_transform() {
        // A quarter turn of a cube maps grid points onto grid points, so
        // trilinear and nearest sampling must agree voxel for voxel.
        let shape = Shape3::new(6, 6, 6);
        let labels = blob(shape).labels;
        let features = labels.cast(crate::domain::volume::Dtype::F32);
        let pair = VolumePair::new(features, labels);
        let t = RigidTransform::new([0.0, 0.0, FRAC_PI_2], [1.0, 0.0, -1.0]);
        let out = AugmentationEngine::default().apply_transform(&pair, &t).unwrap();

        let f = out.features.data().to_f32_vec();
        let l = label_values(&out.labels);
        for (fv, lv) in f.iter().zip(&l) {
            assert!((fv - f32::from(*lv)).abs() < 1e-4, "{fv} vs {lv}");
        }
        assert!(l.iter().any(|&v| v == 1));
    }

    #[test]
    fn test_nonzero_labels_map_from_nonzero_sources() {
        let shape = Shape3::new(6, 7, 5);
        let src = blob(shape).labels;
        let src_vals = label_values(&src);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..5 {
            let t = RigidTransform::sample(&mut rng, &AugmentParams::default());
            let out = label_values(&t.resample_nearest(&src).unwrap());
            let [x, y, z] = shape.dims();
            for i in 0..x {
                for j in 0..y {
                    for k in 0..z {
                        let p = t.source_point(shape, [i, j, k]);
                        let expected = nearest_index(shape, p).map_or(0, |n| src_vals[n]);
                        assert_eq!(out[shape.offset(i, j, k)], expected);
                    }
                }
            }
        }
    }

    #[test]
    fn test_sampled_ranges_respect_params() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = AugmentParams { max_rotation: 0.0, max_translation: 0.0 };
        assert_eq!(RigidTransform::sample(&mut rng, &params), RigidTransform::identity());
        assert!(AugmentParams { max_rotation: -1.0, max_translation: 0.0 }.validate().is_err());
    }
}

// ============================================================
// Layer 4 — Volume Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<BlockSample>
// into channel-last 5D tensors for the training loop.
//
//   features: [batch, x, y, z, 1]
//   labels:   [batch, x, y, z, 1]          when n_classes == 1
//             [batch, x, y, z, n_classes]  one-hot otherwise
//
// Every sample in one batch has the same block shape, so the
// flat buffers are concatenated and reshaped in one go:
//   [s1_v1, s1_v2, ..., s1_vN, s2_v1, ..., sB_vN] → [B, x, y, z, C]

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::data::dataset::{Batch, BlockSample};

// ─── VolumeBatch ──────────────────────────────────────────────────────────────
/// A batch of blocks ready for the model forward pass.
#[derive(Debug, Clone)]
pub struct VolumeBatch<B: Backend> {
    /// Standardized intensities, shape [batch, x, y, z, 1]
    pub features: Tensor<B, 5>,

    /// Binary mask or one-hot classes, shape [batch, x, y, z, C]
    pub labels: Tensor<B, 5>,
}

// ─── VolumeBatcher ────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct VolumeBatcher<B: Backend> {
    pub device:    B::Device,
    pub n_classes: usize,
}

impl<B: Backend> VolumeBatcher<B> {
    pub fn new(device: B::Device, n_classes: usize) -> Self {
        Self { device, n_classes }
    }

    /// Convert a pipeline batch directly.
    pub fn tensors(&self, batch: Batch) -> VolumeBatch<B> {
        self.batch(batch.samples)
    }

    /// Number of label channels in the output
    pub fn label_channels(&self) -> usize {
        if self.n_classes > 1 { self.n_classes } else { 1 }
    }
}

impl<B: Backend> Batcher<BlockSample, VolumeBatch<B>> for VolumeBatcher<B> {
    fn batch(&self, items: Vec<BlockSample>) -> VolumeBatch<B> {
        let batch_size = items.len();
        let [x, y, z] = items.first().map_or([0; 3], |s| s.shape.dims());
        let channels = self.label_channels();

        let feature_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.features.iter().copied())
            .collect();

        // Class indices outside 0..channels produce an all-zero one-hot row
        let label_flat: Vec<f32> = if channels == 1 {
            items
                .iter()
                .flat_map(|s| s.labels.iter().map(|&l| l as f32))
                .collect()
        } else {
            let mut out = vec![0.0f32; batch_size * x * y * z * channels];
            let labels = items.iter().flat_map(|s| s.labels.iter());
            for (voxel, &class) in labels.enumerate() {
                if (0..channels as i64).contains(&class) {
                    out[voxel * channels + class as usize] = 1.0;
                }
            }
            out
        };

        let features = Tensor::<B, 1>::from_floats(
            feature_flat.as_slice(), &self.device
        ).reshape([batch_size, x, y, z, 1]);

        let labels = Tensor::<B, 1>::from_floats(
            label_flat.as_slice(), &self.device
        ).reshape([batch_size, x, y, z, channels]);

        VolumeBatch { features, labels }
    }
}

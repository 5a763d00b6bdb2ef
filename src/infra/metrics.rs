// ============================================================
// Layer 6 — Batch Statistics Logger
// ============================================================
// Records summary statistics of pipeline batches to a CSV file,
// one row per batch, so a dataset/pipeline configuration can be
// sanity-checked before a long training run.
//
// Statistics recorded per batch:
//   - epoch, batch:          position in the stream (both from 1)
//   - blocks:                number of blocks in the batch
//   - feature_mean/std:      over every feature voxel in the batch
//                            (≈ 0 / ≈ 1 after normalization)
//   - foreground:            fraction of voxels with a nonzero label
//
// Example CSV output:
//   epoch,batch,blocks,feature_mean,feature_std,foreground
//   1,1,4,0.000000,0.999998,0.182500
//   1,2,4,-0.000001,1.000001,0.000000
//
// A run of all-zero foreground rows usually means the blocks
// are much smaller than the labelled structures.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

use crate::data::dataset::Batch;

/// One row of statistics for a single batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub epoch:        usize,
    pub batch:        usize,
    pub blocks:       usize,
    pub feature_mean: f64,
    pub feature_std:  f64,
    pub foreground:   f64,
}

impl BatchStats {
    pub fn from_batch(epoch: usize, batch: usize, b: &Batch) -> Self {
        let features = b.samples.iter().flat_map(|s| s.features.iter().map(|&v| f64::from(v)));
        let (mut n, mut sum, mut sum_sq) = (0usize, 0.0f64, 0.0f64);
        for v in features {
            n += 1;
            sum += v;
            sum_sq += v * v;
        }
        let n_f = n.max(1) as f64;
        let mean = sum / n_f;
        let var = (sum_sq / n_f - mean * mean).max(0.0);

        let voxels: usize = b.samples.iter().map(|s| s.labels.len()).sum();
        let hot: usize = b
            .samples
            .iter()
            .map(|s| s.labels.iter().filter(|&&l| l != 0).count())
            .sum();

        Self {
            epoch,
            batch,
            blocks:       b.len(),
            feature_mean: mean,
            feature_std:  var.sqrt(),
            foreground:   hot as f64 / voxels.max(1) as f64,
        }
    }
}

/// Appends batch statistics to a CSV file.
pub struct BatchStatsLogger {
    csv_path: PathBuf,
}

impl BatchStatsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(csv_path: impl Into<PathBuf>) -> Result<Self> {
        let csv_path = csv_path.into();
        if let Some(dir) = csv_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        }

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "epoch,batch,blocks,feature_mean,feature_std,foreground")?;
            tracing::debug!("Created batch statistics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, s: &BatchStats) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{},{},{:.6},{:.6},{:.6}",
            s.epoch,
            s.batch,
            s.blocks,
            s.feature_mean,
            s.feature_std,
            s.foreground,
        )?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

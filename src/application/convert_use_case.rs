// ============================================================
// Layer 2 — ConvertUseCase
// ============================================================
// Orchestrates the offline conversion of raw volumes to shards:
//
//   Step 1: Read the CSV manifest          (Layer 6 - infra)
//   Step 2: Split train / eval (seeded)    (Layer 4 - data)
//   Step 3: Validate every pair            (Layer 4 - data)
//   Step 4: Write shards per split         (Layer 4 - data)
//   Step 5: Save dataset.json              (Layer 6 - infra)
//
// Validation covers both splits together, so train and eval
// shards always share one volume shape and one pair of dtypes.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::data::{
    shard_format::{Compression, ShardTemplate},
    shard_writer::{ShardWriter, ShardWriterConfig},
    splitter::split_train_eval,
    validator::{ValidatedDataset, VolumeValidator},
};
use crate::domain::pair::VolumePaths;
use crate::domain::traits::VolumeSource;
use crate::infra::{
    manifest::read_manifest,
    metadata::{DatasetMetadata, MetadataStore, SplitInfo},
    npy_source::NpySource,
};

// ─── Conversion Configuration ─────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertConfig {
    pub manifest:           PathBuf,
    pub output_dir:         PathBuf,
    /// Shard names are "<prefix>-<split>-NNN.vshard"
    pub prefix:             String,
    pub examples_per_shard: usize,
    /// Fraction of manifest rows held out for evaluation
    pub eval_fraction:      f64,
    pub compression:        Compression,
    pub seed:               Option<u64>,
    /// Largest residue a float label may have and still count as integral
    pub label_tolerance:    f64,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            manifest:           PathBuf::from("manifest.csv"),
            output_dir:         PathBuf::from("shards"),
            prefix:             "data".to_string(),
            examples_per_shard: 100,
            eval_fraction:      0.0,
            compression:        Compression::None,
            seed:               None,
            label_tolerance:    VolumeValidator::DEFAULT_TOLERANCE,
        }
    }
}

/// What a conversion produced.
#[derive(Debug, Clone)]
pub struct ConvertReport {
    pub validated:     ValidatedDataset,
    pub metadata_path: PathBuf,
    pub shards:        Vec<PathBuf>,
}

// ─── ConvertUseCase ───────────────────────────────────────────────────────────
pub struct ConvertUseCase {
    config: ConvertConfig,
}

impl ConvertUseCase {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }

    /// Convert reading every volume as .npy.
    pub fn execute(&self) -> Result<ConvertReport> {
        self.execute_with(&NpySource::new())
    }

    pub fn execute_with(&self, source: &dyn VolumeSource) -> Result<ConvertReport> {
        let cfg = &self.config;

        // ── Step 1: Manifest ──────────────────────────────────────────────────
        let rows = read_manifest(&cfg.manifest)?;

        // ── Step 2: Train / eval split ────────────────────────────────────────
        let seed = cfg.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let mut rng = StdRng::seed_from_u64(seed);
        let (train, eval) = split_train_eval(rows, cfg.eval_fraction, &mut rng);
        tracing::info!("Split: {} train, {} eval (seed {})", train.len(), eval.len(), seed);

        // ── Step 3: Validate ──────────────────────────────────────────────────
        let all: Vec<VolumePaths> = train.iter().chain(&eval).cloned().collect();
        let validated = VolumeValidator::new(cfg.label_tolerance)
            .validate(&all, source)
            .context("Validation failed")?;
        drop(all);

        // ── Step 4: Shards ────────────────────────────────────────────────────
        let mut splits = BTreeMap::new();
        let mut shards = Vec::new();
        for (name, rows) in [("train", &train), ("eval", &eval)] {
            if rows.is_empty() {
                // drop whatever an earlier run left under this split's name
                self.writer(name, &validated)?.clear()?;
                continue;
            }
            let (info, written) = self.write_split(name, rows, &validated, source)?;
            shards.extend(written);
            splits.insert(name.to_string(), info);
        }

        // ── Step 5: Metadata ──────────────────────────────────────────────────
        let metadata = DatasetMetadata {
            volume_shape:       validated.shape,
            feature_dtype:      validated.feature_dtype,
            label_dtype:        validated.label_dtype,
            examples_per_shard: cfg.examples_per_shard,
            compression:        cfg.compression,
            splits,
        };
        let metadata_path = MetadataStore::new(&cfg.output_dir).save(&metadata)?;

        tracing::info!(
            "Wrote {} shards and '{}'",
            shards.len(),
            metadata_path.display()
        );
        Ok(ConvertReport { validated, metadata_path, shards })
    }

    fn write_split(
        &self,
        name:      &str,
        rows:      &[VolumePaths],
        validated: &ValidatedDataset,
        source:    &dyn VolumeSource,
    ) -> Result<(SplitInfo, Vec<PathBuf>)> {
        let writer = self.writer(name, validated)?;
        let template = writer.template().clone();
        let written = writer
            .write_from_source(rows, source)
            .with_context(|| format!("Writing '{}' shards failed", name))?;

        let info = SplitInfo {
            n_volumes: rows.len(),
            pattern:   template.glob(),
            shards:    written
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
        };
        Ok((info, written))
    }

    fn writer(&self, name: &str, validated: &ValidatedDataset) -> Result<ShardWriter> {
        let cfg = &self.config;
        let template = ShardTemplate::parse(&format!(
            "{}/{}-{}-{{shard}}.vshard",
            cfg.output_dir.display(),
            cfg.prefix,
            name
        ))?;
        let writer = ShardWriter::new(
            template,
            ShardWriterConfig {
                examples_per_shard: cfg.examples_per_shard,
                compression:        cfg.compression,
            },
        )?;
        Ok(writer.with_validated(validated))
    }
}

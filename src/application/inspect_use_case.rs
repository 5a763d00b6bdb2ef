// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Read-only workflows over an existing shard dataset:
//
//   verify   → decode every record matched by a glob, count them
//   steps    → steps per epoch from dataset.json or explicit counts
//   preview  → pull a few batches through the full pipeline and
//              summarize each one (optionally into a CSV)
//
// None of these write shards; `preview` only appends to the
// statistics CSV when one is requested.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::data::{
    pipeline::{steps_per_epoch, PipelineAssembler, PipelineConfig},
    shard_reader::{ShardReader, ShardSummary},
};
use crate::domain::volume::Shape3;
use crate::infra::{
    label_map::read_label_mapping,
    metadata::load_metadata,
    metrics::{BatchStats, BatchStatsLogger},
};

/// Where the volume count for `steps` comes from.
#[derive(Debug, Clone)]
pub enum VolumeCount {
    /// A dataset.json and the split to count
    Metadata { path: PathBuf, split: String },
    /// Explicit numbers
    Explicit { n_volumes: usize, volume_shape: Shape3 },
}

#[derive(Debug, Clone)]
pub struct StepsQuery {
    pub count:       VolumeCount,
    pub block_shape: Shape3,
    pub batch_size:  usize,
}

#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub config:        PipelineConfig,
    pub batches:       usize,
    pub label_mapping: Option<PathBuf>,
    pub stats_csv:     Option<PathBuf>,
}

pub struct InspectUseCase;

impl InspectUseCase {
    pub fn verify(pattern: &str) -> Result<ShardSummary> {
        let reader = ShardReader::open(pattern)?;
        tracing::info!("Verifying {} shard files", reader.paths().len());
        let summary = reader
            .verify()
            .with_context(|| format!("Verification of '{pattern}' failed"))?;
        for (path, count) in &summary.files {
            tracing::debug!("'{}': {} records", path.display(), count);
        }
        Ok(summary)
    }

    pub fn steps(query: &StepsQuery) -> Result<usize> {
        let (n_volumes, volume_shape) = match &query.count {
            VolumeCount::Metadata { path, split } => {
                let meta = load_metadata(path)?;
                (meta.split(split)?.n_volumes, meta.volume_shape)
            }
            VolumeCount::Explicit { n_volumes, volume_shape } => (*n_volumes, *volume_shape),
        };
        let steps = steps_per_epoch(n_volumes, volume_shape, query.block_shape, query.batch_size)?;
        tracing::info!(
            "{} volumes of {} in blocks of {}, batch size {} → {} steps per epoch",
            n_volumes,
            volume_shape,
            query.block_shape,
            query.batch_size,
            steps
        );
        Ok(steps)
    }

    pub fn preview(request: &PreviewRequest) -> Result<Vec<BatchStats>> {
        let mut assembler = PipelineAssembler::new(request.config.clone())?;
        if let Some(path) = &request.label_mapping {
            assembler = assembler.with_label_mapping(read_label_mapping(path)?)?;
        }
        let logger = request
            .stats_csv
            .as_ref()
            .map(BatchStatsLogger::new)
            .transpose()?;

        let mut stream = assembler.iter();
        let mut stats = Vec::with_capacity(request.batches);
        let mut last_epoch = None;
        let mut index = 0;
        while stats.len() < request.batches {
            let Some(batch) = stream.next() else {
                break;
            };
            let batch = batch.context("Pipeline failed")?;
            // the counter only moves once the next epoch yields a batch
            let epoch = stream.epoch();
            if last_epoch != Some(epoch) {
                index = 0;
                last_epoch = Some(epoch);
            }
            index += 1;

            let s = BatchStats::from_batch(epoch + 1, index, &batch);
            tracing::info!(
                "epoch {} batch {}: {} blocks, mean {:.4}, std {:.4}, foreground {:.4}",
                s.epoch,
                s.batch,
                s.blocks,
                s.feature_mean,
                s.feature_std,
                s.foreground
            );
            if let Some(logger) = &logger {
                logger.log(&s)?;
            }
            stats.push(s);
        }
        Ok(stats)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::shard_format::ShardTemplate;
    use crate::data::shard_writer::{ShardWriter, ShardWriterConfig};
    use crate::domain::pair::VolumePair;
    use crate::domain::volume::Volume;
    use std::fs;

    fn dataset(dir: &std::path::Path, n: usize) -> String {
        let shape = Shape3::new(4, 4, 4);
        let template = ShardTemplate::parse(&format!("{}/p-{{shard}}.vshard", dir.display())).unwrap();
        let glob = template.glob();
        ShardWriter::new(template, ShardWriterConfig { examples_per_shard: 3, ..Default::default() })
            .unwrap()
            .write((0..n).map(|i| {
                Ok(VolumePair::new(
                    Volume::from_fn(shape, move |a, b, c| (a * b + c + i) as f32),
                    Volume::from_fn(shape, |a, _, _| (a * 10) as u8),
                ))
            }))
            .unwrap();
        glob
    }

    #[test]
    fn test_verify_counts_records() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dataset(dir.path(), 4);
        let summary = InspectUseCase::verify(&pattern).unwrap();
        assert_eq!(summary.records, 4);
        assert_eq!(summary.files.len(), 2);
    }

    #[test]
    fn test_steps_explicit() {
        let q = StepsQuery {
            count:       VolumeCount::Explicit { n_volumes: 10, volume_shape: Shape3::new(256, 256, 256) },
            block_shape: Shape3::new(128, 128, 128),
            batch_size:  2,
        };
        assert_eq!(InspectUseCase::steps(&q).unwrap(), 40);
    }

    #[test]
    fn test_preview_with_mapping_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dataset(dir.path(), 2);
        let mapping = dir.path().join("map.csv");
        fs::write(&mapping, "original,new\n0,0\n10,1\n20,2\n30,3\n").unwrap();
        let stats_csv = dir.path().join("stats.csv");

        let request = PreviewRequest {
            config: PipelineConfig {
                file_pattern: pattern,
                n_classes:    4,
                batch_size:   4,
                volume_shape: Shape3::new(4, 4, 4),
                block_shape:  Shape3::new(2, 2, 2),
                n_epochs:     Some(2),
                seed:         Some(5),
                ..Default::default()
            },
            batches:       6,
            label_mapping: Some(mapping),
            stats_csv:     Some(stats_csv.clone()),
        };
        let stats = InspectUseCase::preview(&request).unwrap();
        // 2 volumes × 8 blocks / 4 = 4 batches per epoch
        assert_eq!(stats.len(), 6);
        assert_eq!((stats[3].epoch, stats[3].batch), (1, 4));
        assert_eq!((stats[4].epoch, stats[4].batch), (2, 1));
        assert!(stats.iter().all(|s| s.feature_mean.abs() < 1e-4));

        let rows = fs::read_to_string(stats_csv).unwrap().lines().count();
        assert_eq!(rows, 7);
    }

    #[test]
    fn test_preview_fails_on_unmapped_label() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dataset(dir.path(), 1);
        let mapping = dir.path().join("map.csv");
        fs::write(&mapping, "original,new\n0,0\n10,1\n").unwrap();
        let request = PreviewRequest {
            config: PipelineConfig {
                file_pattern: pattern,
                n_classes:    2,
                batch_size:   8,
                volume_shape: Shape3::new(4, 4, 4),
                block_shape:  Shape3::new(2, 2, 2),
                n_epochs:     Some(1),
                seed:         Some(5),
                ..Default::default()
            },
            batches:       1,
            label_mapping: Some(mapping),
            stats_csv:     None,
        };
        assert!(InspectUseCase::preview(&request).is_err());
    }
}

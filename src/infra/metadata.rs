// ============================================================
// Layer 6 — Dataset Metadata
// ============================================================
// Saves and loads `dataset.json`, written next to the shards at
// the end of a conversion.
//
// What gets saved:
//   1. volume shape and the stored feature/label dtypes
//   2. examples per shard and the compression used
//   3. per split ("train", "eval"): number of volumes, the glob
//      that matches its shards, and the shard file names
//
// Why save it?
//   `steps` can compute steps-per-epoch from the volume count
//   without opening a single shard, and a pipeline config can
//   be checked against the shape the shards were written with.
//
// File layout:
//   out/
//     train-000.vshard
//     train-001.vshard
//     eval-000.vshard
//     dataset.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fs, path::{Path, PathBuf}};

use crate::data::shard_format::Compression;
use crate::domain::volume::{Dtype, Shape3};

pub const METADATA_FILE: &str = "dataset.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitInfo {
    pub n_volumes: usize,
    /// Glob matching every shard of this split
    pub pattern:   String,
    pub shards:    Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub volume_shape:       Shape3,
    pub feature_dtype:      Dtype,
    pub label_dtype:        Dtype,
    pub examples_per_shard: usize,
    pub compression:        Compression,
    pub splits:             BTreeMap<String, SplitInfo>,
}

impl DatasetMetadata {
    pub fn split(&self, name: &str) -> Result<&SplitInfo> {
        self.splits.get(name).with_context(|| {
            format!(
                "Dataset has no '{}' split (available: {})",
                name,
                self.splits.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }
}

/// Reads and writes `dataset.json` in one directory.
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn save(&self, metadata: &DatasetMetadata) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        let path = self.path();
        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write metadata to '{}'", path.display()))?;
        tracing::debug!("Saved dataset metadata to '{}'", path.display());
        Ok(path)
    }

    pub fn load(&self) -> Result<DatasetMetadata> {
        load_metadata(&self.path())
    }
}

/// Load a metadata file from an explicit path.
pub fn load_metadata(path: &Path) -> Result<DatasetMetadata> {
    let json = fs::read_to_string(path).with_context(|| {
        format!("Cannot read '{}'. Have you run 'convert' first?", path.display())
    })?;
    serde_json::from_str(&json)
        .with_context(|| format!("Invalid dataset metadata in '{}'", path.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let mut splits = BTreeMap::new();
        splits.insert(
            "train".to_string(),
            SplitInfo {
                n_volumes: 3,
                pattern:   "out/train-*.vshard".into(),
                shards:    vec!["train-000.vshard".into(), "train-001.vshard".into()],
            },
        );
        let meta = DatasetMetadata {
            volume_shape:       Shape3::new(64, 64, 32),
            feature_dtype:      Dtype::F32,
            label_dtype:        Dtype::U8,
            examples_per_shard: 2,
            compression:        Compression::Gzip,
            splits,
        };
        store.save(&meta).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.split("train").unwrap().n_volumes, 3);
        assert!(loaded.split("eval").is_err());
    }

    #[test]
    fn test_missing_file_mentions_convert() {
        let dir = tempfile::tempdir().unwrap();
        let err = MetadataStore::new(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains("convert"));
    }
}

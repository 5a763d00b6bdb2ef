// ============================================================
// Layer 6 — Label Mapping File
// ============================================================
// Loads the raw-value → class-index table used to remap
// multi-class labels.
//
//   original,new
//   0,0
//   2,1
//   41,2
//
// Every `original` value may appear only once.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::data::normalizer::LabelMapping;

#[derive(Debug, Deserialize)]
struct MappingRow {
    original: i64,
    new:      i64,
}

pub fn read_label_mapping(path: &Path) -> Result<LabelMapping> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Cannot open label mapping '{}'", path.display()))?;

    let mut table = HashMap::new();
    for row in reader.deserialize::<MappingRow>() {
        let row = row.with_context(|| format!("Bad row in label mapping '{}'", path.display()))?;
        if let Some(previous) = table.insert(row.original, row.new) {
            bail!(
                "Label {} is mapped twice in '{}' ({} and {})",
                row.original,
                path.display(),
                previous,
                row.new
            );
        }
    }
    if table.is_empty() {
        bail!("Label mapping '{}' has no rows", path.display());
    }

    tracing::debug!("Loaded {} label mappings from '{}'", table.len(), path.display());
    Ok(LabelMapping::new(table))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_reads_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        fs::write(&path, "original,new\n0,0\n2, 1\n41,2\n").unwrap();
        let m = read_label_mapping(&path).unwrap();
        assert_eq!(m.len(), 3);
        assert_eq!(m.get(41), Some(2));
        assert_eq!(m.get(1), None);
    }

    #[test]
    fn test_duplicate_original_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        fs::write(&path, "original,new\n3,0\n3,1\n").unwrap();
        assert!(read_label_mapping(&path).is_err());
    }
}

// ============================================================
// Layer 6 — CSV Manifest
// ============================================================
// Reads the list of volume pairs to convert.
//
// Format (header row required, column order free):
//
//   features,labels
//   scans/case_000_t1.npy,scans/case_000_seg.npy
//   scans/case_001_t1.npy,scans/case_001_seg.npy
//
// Relative paths are resolved against the manifest's own
// directory, so a manifest can be moved together with its data.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::pair::VolumePaths;

pub fn read_manifest(path: &Path) -> Result<Vec<VolumePaths>> {
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Cannot open manifest '{}'", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Cannot read manifest header in '{}'", path.display()))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let (Some(f_col), Some(l_col)) = (column("features"), column("labels")) else {
        bail!(
            "Manifest '{}' must have a 'features,labels' header, found '{}'",
            path.display(),
            headers.iter().collect::<Vec<_>>().join(",")
        );
    };

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("Malformed row {} in '{}'", line + 2, path.display()))?;
        let (Some(features), Some(labels)) = (record.get(f_col), record.get(l_col)) else {
            bail!("Row {} in '{}' is missing a column", line + 2, path.display());
        };
        if features.is_empty() || labels.is_empty() {
            bail!("Row {} in '{}' has an empty path", line + 2, path.display());
        }
        rows.push(VolumePaths::new(resolve(&base, features), resolve(&base, labels)));
    }

    tracing::info!("Manifest '{}': {} volume pairs", path.display(), rows.len());
    Ok(rows)
}

fn resolve(base: &Path, entry: &str) -> PathBuf {
    let p = Path::new(entry);
    if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_reads_rows_relative_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.csv");
        fs::write(&path, "labels, features\nl0.npy, f0.npy\n/abs/l1.npy,f1.npy\n").unwrap();

        let rows = read_manifest(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], VolumePaths::new(dir.path().join("f0.npy"), dir.path().join("l0.npy")));
        assert_eq!(rows[1].labels, PathBuf::from("/abs/l1.npy"));
    }

    #[test]
    fn test_header_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.csv");
        fs::write(&path, "f0.npy,l0.npy\n").unwrap();
        assert!(read_manifest(&path).is_err());
    }

    #[test]
    fn test_empty_cell_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.csv");
        fs::write(&path, "features,labels\nf0.npy,\n").unwrap();
        assert!(read_manifest(&path).is_err());
    }
}

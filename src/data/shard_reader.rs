// ============================================================
// Layer 4 — Shard Reader
// ============================================================
// Turns a glob pattern back into a lazy stream of VolumePairs.
//
//   ShardReader::open("out/train-*.vshard")
//       │  resolve the glob once (sorted, but treat as unordered)
//       ▼
//   reader.records()
//       │  open file 0 → decode record, record, ... → close
//       │  open file 1 → ...
//       ▼
//   Iterator<Item = Result<VolumePair>>
//
// Only one file is open at a time and only one record is
// decoded at a time. Calling `records()` again restarts from the
// first file. A decoding error is yielded once and ends the
// stream.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

use flate2::read::MultiGzDecoder;

use crate::data::shard_format::{self, GZIP_MAGIC};
use crate::domain::pair::VolumePair;
use crate::domain::volume::Shape3;
use crate::error::{Result, VolumeError};

#[derive(Debug, Clone)]
pub struct ShardReader {
    paths: Vec<PathBuf>,
}

impl ShardReader {
    /// Resolve `pattern` to the shard files it matches.
    pub fn open(pattern: &str) -> Result<Self> {
        let paths = resolve_glob(pattern)?;
        tracing::debug!("Pattern '{}' matched {} shard files", pattern, paths.len());
        Ok(Self { paths })
    }

    /// Read an explicit list of shard files, in the given order.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// A fresh lazy stream over every record of every file.
    pub fn records(&self) -> Records {
        Records::new(self.paths.clone())
    }

    /// Decode every record once and count them per file.
    pub fn verify(&self) -> Result<ShardSummary> {
        let mut summary = ShardSummary::default();
        for path in &self.paths {
            let mut count = 0usize;
            for pair in Records::new(vec![path.clone()]) {
                let pair = pair?;
                summary.shape.get_or_insert(pair.shape());
                count += 1;
            }
            summary.files.push((path.clone(), count));
            summary.records += count;
        }
        Ok(summary)
    }
}

/// Per-file record counts produced by [`ShardReader::verify`].
#[derive(Debug, Clone, Default)]
pub struct ShardSummary {
    pub files:   Vec<(PathBuf, usize)>,
    pub records: usize,
    pub shape:   Option<Shape3>,
}

/// Expand a glob into a sorted file list. No match is a configuration error.
pub fn resolve_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern)
        .map_err(|e| VolumeError::Configuration(format!("invalid shard pattern '{pattern}': {e}")))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            VolumeError::io(path, e.into_error())
        })?;
        if path.is_file() {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(VolumeError::Configuration(format!(
            "shard pattern '{pattern}' matched no files"
        )));
    }
    paths.sort();
    Ok(paths)
}

// ─── Records iterator ─────────────────────────────────────────────────────────
pub struct Records {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<OpenShard>,
    done:    bool,
}

struct OpenShard {
    stream: Box<dyn Read + Send>,
    path:   PathBuf,
    offset: u64,
}

impl Records {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            pending: paths.into_iter(),
            current: None,
            done:    false,
        }
    }

    fn advance(&mut self) -> Result<Option<VolumePair>> {
        loop {
            if self.current.is_none() {
                match self.pending.next() {
                    Some(path) => self.current = Some(OpenShard::open(path)?),
                    None => return Ok(None),
                }
            }
            if let Some(shard) = self.current.as_mut() {
                match shard_format::read_record(&mut shard.stream, &shard.path, shard.offset)? {
                    Some((pair, consumed)) => {
                        shard.offset += consumed;
                        return Ok(Some(pair));
                    }
                    None => {
                        tracing::debug!("Finished shard '{}'", shard.path.display());
                    }
                }
            }
            // End of this file: drop it (closing the handle) and move on
            self.current = None;
        }
    }
}

impl Iterator for Records {
    type Item = Result<VolumePair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(pair)) => Some(Ok(pair)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.current = None;
                Some(Err(e))
            }
        }
    }
}

impl OpenShard {
    fn open(path: PathBuf) -> Result<Self> {
        let file = File::open(&path).map_err(|e| VolumeError::io(&path, e))?;
        let mut buffered = BufReader::new(file);
        let gzipped = buffered
            .fill_buf()
            .map_err(|e| VolumeError::io(&path, e))?
            .starts_with(&GZIP_MAGIC);

        let mut stream: Box<dyn Read + Send> = if gzipped {
            Box::new(MultiGzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };
        let offset = shard_format::read_file_header(&mut stream, &path)?;
        tracing::debug!("Opened shard '{}'{}", path.display(), if gzipped { " (gzip)" } else { "" });
        Ok(Self { stream, path, offset })
    }
}

/// Convenience: every pair stored under `pattern`, in file order.
pub fn read_all(pattern: &str) -> Result<Vec<VolumePair>> {
    ShardReader::open(pattern)?.records().collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::shard_format::{Compression, ShardTemplate};
    use crate::data::shard_writer::{ShardWriter, ShardWriterConfig};
    use crate::domain::volume::Volume;
    use std::fs;
    use std::path::Path;

    fn pair(n: usize) -> VolumePair {
        let s = Shape3::new(3, 2, 4);
        VolumePair::new(
            Volume::from_fn(s, |i, j, k| (n * 1000 + i * 100 + j * 10 + k) as f32),
            Volume::from_fn(s, |_, j, _| (n + j) as i16),
        )
    }

    fn write(dir: &Path, n: usize, k: usize, compression: Compression) -> String {
        let template = ShardTemplate::parse(&format!("{}/ds-{{shard}}.vshard", dir.display())).unwrap();
        let glob = template.glob();
        ShardWriter::new(template, ShardWriterConfig { examples_per_shard: k, compression })
            .unwrap()
            .write((0..n).map(|i| Ok(pair(i))))
            .unwrap();
        glob
    }

    #[test]
    fn test_shard_roundtrip_yields_every_pair() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write(dir.path(), 7, 3, Compression::None);
        let pairs = read_all(&pattern).unwrap();
        assert_eq!(pairs.len(), 7);
        for (i, p) in pairs.iter().enumerate() {
            assert_eq!(p, &pair(i));
        }
    }

    #[test]
    fn test_gzip_shards_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write(dir.path(), 4, 2, Compression::Gzip);
        let raw = fs::read(dir.path().join("ds-000.vshard")).unwrap();
        assert_eq!(&raw[..2], &GZIP_MAGIC);
        let pairs = read_all(&pattern).unwrap();
        assert_eq!(pairs, (0..4).map(pair).collect::<Vec<_>>());
    }

    #[test]
    fn test_records_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write(dir.path(), 5, 2, Compression::None);
        let reader = ShardReader::open(&pattern).unwrap();
        let first: Vec<_> = reader.records().map(Result::unwrap).collect();
        let second: Vec<_> = reader.records().map(Result::unwrap).collect();
        assert_eq!(first, second);
        assert_eq!(reader.paths().len(), 3);
    }

    #[test]
    fn test_verify_counts_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write(dir.path(), 5, 2, Compression::None);
        let summary = ShardReader::open(&pattern).unwrap().verify().unwrap();
        let counts: Vec<usize> = summary.files.iter().map(|(_, c)| *c).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        assert_eq!(summary.records, 5);
        assert_eq!(summary.shape, Some(Shape3::new(3, 2, 4)));
    }

    #[test]
    fn test_corrupt_record_names_file_and_offset() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write(dir.path(), 2, 2, Compression::None);
        let path = dir.path().join("ds-000.vshard");
        let mut bytes = fs::read(&path).unwrap();
        // Chop the second record's label payload
        bytes.truncate(bytes.len() - 3);
        fs::write(&path, bytes).unwrap();

        let results: Vec<_> = ShardReader::open(&pattern).unwrap().records().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(VolumeError::CorruptShard { path: p, offset, .. }) => {
                assert_eq!(p, &path);
                assert!(*offset > 12);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_no_match_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/nothing-*.vshard", dir.path().display());
        assert!(matches!(ShardReader::open(&pattern), Err(VolumeError::Configuration(_))));
    }
}

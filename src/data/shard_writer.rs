// ============================================================
// Layer 4 — Shard Writer
// ============================================================
// Streams validated VolumePairs into shard files, at most
// `examples_per_shard` pairs per file:
//
//   pairs 0..k      → template(0)
//   pairs k..2k     → template(1)
//   ...
//   last (≤ k)      → template(n-1)
//
// Each shard is written to "<final>.tmp" and renamed into place
// once it is flushed and synced, so a failure while writing
// shard i leaves shards 0..i-1 untouched and never leaves a
// half-written file under a final shard name.
//
// Pairs are consumed one at a time: only the pair currently
// being serialised is held in memory.
//
// After a successful write, older shards of the same template
// that this run did not produce are deleted, so the template's
// glob always matches exactly the pairs just written.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::data::shard_format::{self, Compression, ShardTemplate};
use crate::data::validator::ValidatedDataset;
use crate::domain::pair::{VolumePair, VolumePaths};
use crate::domain::traits::VolumeSource;
use crate::domain::volume::{Dtype, Volume};
use crate::error::{Result, VolumeError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardWriterConfig {
    /// Maximum number of pairs per shard file
    pub examples_per_shard: usize,
    /// Whole-file compression applied to each shard
    pub compression:        Compression,
}

impl Default for ShardWriterConfig {
    fn default() -> Self {
        Self {
            examples_per_shard: 100,
            compression:        Compression::None,
        }
    }
}

pub struct ShardWriter {
    template:      ShardTemplate,
    config:        ShardWriterConfig,
    /// When set, features/labels are cast to these dtypes before writing
    feature_dtype: Option<Dtype>,
    label_dtype:   Option<Dtype>,
}

impl ShardWriter {
    pub fn new(template: ShardTemplate, config: ShardWriterConfig) -> Result<Self> {
        if config.examples_per_shard == 0 {
            return Err(VolumeError::Configuration("examples_per_shard must be > 0".into()));
        }
        Ok(Self {
            template,
            config,
            feature_dtype: None,
            label_dtype: None,
        })
    }

    /// Store every pair with the dtypes chosen during validation.
    pub fn with_validated(mut self, validated: &ValidatedDataset) -> Self {
        self.feature_dtype = Some(validated.feature_dtype);
        self.label_dtype = Some(validated.label_dtype);
        self
    }

    pub fn template(&self) -> &ShardTemplate {
        &self.template
    }

    /// Load each pair through `source` and write it. Returns the shard paths.
    pub fn write_from_source(
        &self,
        pairs:  &[VolumePaths],
        source: &dyn VolumeSource,
    ) -> Result<Vec<PathBuf>> {
        self.write(pairs.iter().map(|paths| {
            let pair = VolumePair::new(source.load(&paths.features)?, source.load(&paths.labels)?);
            if !pair.is_aligned() {
                return Err(VolumeError::ShapeMismatch {
                    path:     paths.labels.clone(),
                    expected: pair.features.shape(),
                    actual:   pair.labels.shape(),
                });
            }
            Ok(pair)
        }))
    }

    /// Write a stream of pairs. The first error aborts; shards completed
    /// before it stay on disk, the shard in progress is removed.
    /// On success, stale shards left by an earlier run are deleted.
    pub fn write<I>(&self, pairs: I) -> Result<Vec<PathBuf>>
    where
        I: IntoIterator<Item = Result<VolumePair>>,
    {
        let mut written: Vec<PathBuf> = Vec::new();
        let mut current: Option<OpenShard> = None;

        let outcome = (|| -> Result<()> {
            for (index, pair) in pairs.into_iter().enumerate() {
                let pair = self.coerce(pair?);
                if !pair.is_aligned() {
                    return Err(VolumeError::ShapeMismatch {
                        path:     PathBuf::from(format!("<pair {index}>")),
                        expected: pair.features.shape(),
                        actual:   pair.labels.shape(),
                    });
                }

                if current.is_none() {
                    current = Some(OpenShard::create(
                        self.template.path(written.len()),
                        self.config.compression,
                    )?);
                }
                if let Some(shard) = current.as_mut() {
                    shard.append(&pair)?;
                    if shard.records < self.config.examples_per_shard {
                        continue;
                    }
                }
                if let Some(full) = current.take() {
                    written.push(full.finish()?);
                }
            }
            if let Some(last) = current.take() {
                written.push(last.finish()?);
            }
            Ok(())
        })();

        if let Err(e) = outcome {
            if let Some(partial) = current.take() {
                partial.abandon();
            }
            return Err(e);
        }

        if written.is_empty() {
            tracing::warn!("No pairs were written for template '{}'", self.template);
        }
        self.remove_stale(&written)?;
        Ok(written)
    }

    /// Delete every shard this template names.
    pub fn clear(&self) -> Result<()> {
        self.remove_stale(&[])
    }

    /// Delete shards of this template numbered past the ones just written.
    fn remove_stale(&self, written: &[PathBuf]) -> Result<()> {
        let pattern = self.template.glob();
        let entries = glob::glob(&pattern)
            .map_err(|e| VolumeError::Configuration(format!("invalid shard pattern '{pattern}': {e}")))?;
        for entry in entries {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                VolumeError::io(path, e.into_error())
            })?;
            match self.template.index_of(&path) {
                Some(index) if index >= written.len() => {}
                _ => continue,
            }
            fs::remove_file(&path).map_err(|e| VolumeError::io_write(&path, e))?;
            tracing::info!("Removed stale shard '{}'", path.display());
        }
        Ok(())
    }

    fn coerce(&self, pair: VolumePair) -> VolumePair {
        let cast = |v: Volume, d: Option<Dtype>| match d {
            Some(d) if d != v.dtype() => v.cast(d),
            _ => v,
        };
        VolumePair::new(
            cast(pair.features, self.feature_dtype),
            cast(pair.labels, self.label_dtype),
        )
    }
}

// ─── One shard in progress ────────────────────────────────────────────────────
enum ShardSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for ShardSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ShardSink::Plain(w) => w.write(buf),
            ShardSink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ShardSink::Plain(w) => w.flush(),
            ShardSink::Gzip(w) => w.flush(),
        }
    }
}

struct OpenShard {
    sink:       ShardSink,
    tmp_path:   PathBuf,
    final_path: PathBuf,
    records:    usize,
}

impl OpenShard {
    fn create(final_path: PathBuf, compression: Compression) -> Result<Self> {
        if let Some(dir) = final_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| VolumeError::io_write(dir, e))?;
        }
        let tmp_path = tmp_path_for(&final_path);
        let file = File::create(&tmp_path).map_err(|e| VolumeError::io_write(&tmp_path, e))?;
        let buffered = BufWriter::new(file);
        let mut sink = match compression {
            Compression::None => ShardSink::Plain(buffered),
            Compression::Gzip => {
                ShardSink::Gzip(GzEncoder::new(buffered, flate2::Compression::default()))
            }
        };
        shard_format::write_file_header(&mut sink).map_err(|e| VolumeError::io_write(&tmp_path, e))?;
        Ok(Self { sink, tmp_path, final_path, records: 0 })
    }

    fn append(&mut self, pair: &VolumePair) -> Result<()> {
        shard_format::write_record(&mut self.sink, pair)
            .map_err(|e| VolumeError::io_write(&self.tmp_path, e))?;
        self.records += 1;
        Ok(())
    }

    /// Flush, sync, and move the shard to its final name.
    fn finish(self) -> Result<PathBuf> {
        let OpenShard { sink, tmp_path, final_path, records } = self;
        let io_err = |e| VolumeError::io_write(&tmp_path, e);

        let mut buffered = match sink {
            ShardSink::Plain(w) => w,
            ShardSink::Gzip(w) => w.finish().map_err(io_err)?,
        };
        buffered.flush().map_err(io_err)?;
        buffered.get_ref().sync_all().map_err(io_err)?;
        drop(buffered);

        fs::rename(&tmp_path, &final_path).map_err(|e| VolumeError::io_write(&final_path, e))?;
        tracing::info!("Wrote shard '{}' ({} pairs)", final_path.display(), records);
        Ok(final_path)
    }

    fn abandon(self) {
        drop(self.sink);
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            tracing::warn!("Could not remove '{}': {}", self.tmp_path.display(), e);
        }
    }
}

fn tmp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::volume::Shape3;

    fn pair(seed: usize) -> VolumePair {
        let s = Shape3::new(2, 2, 2);
        VolumePair::new(
            Volume::from_fn(s, |i, j, k| (seed * 8 + i * 4 + j * 2 + k) as f32),
            Volume::from_fn(s, |i, _, _| (seed % 2 + i) as u8),
        )
    }

    fn writer(dir: &Path, k: usize) -> ShardWriter {
        let template = ShardTemplate::parse(&format!("{}/data-{{shard}}.vshard", dir.display())).unwrap();
        ShardWriter::new(template, ShardWriterConfig { examples_per_shard: k, ..Default::default() }).unwrap()
    }

    #[test]
    fn test_groups_into_consecutive_shards() {
        let dir = tempfile::tempdir().unwrap();
        let paths = writer(dir.path(), 3).write((0..7).map(|i| Ok(pair(i)))).unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["data-000.vshard", "data-001.vshard", "data-002.vshard"]);
        for p in &paths {
            assert!(p.exists());
            assert!(!tmp_path_for(p).exists());
        }
    }

    #[test]
    fn test_failure_keeps_completed_shards() {
        let dir = tempfile::tempdir().unwrap();
        let items = (0..5).map(|i| {
            if i == 3 {
                Err(VolumeError::Load { path: "broken".into(), reason: "boom".into() })
            } else {
                Ok(pair(i))
            }
        });
        let err = writer(dir.path(), 2).write(items).unwrap_err();
        assert!(matches!(err, VolumeError::Load { .. }));

        let first = dir.path().join("data-000.vshard");
        assert!(first.exists());
        assert!(!dir.path().join("data-001.vshard").exists());
        assert!(!tmp_path_for(&dir.path().join("data-001.vshard")).exists());
    }

    #[test]
    fn test_misaligned_pair_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bad = VolumePair::new(
            Volume::from_fn(Shape3::new(2, 2, 2), |_, _, _| 0f32),
            Volume::from_fn(Shape3::new(2, 2, 1), |_, _, _| 0u8),
        );
        let err = writer(dir.path(), 2).write(vec![Ok(pair(0)), Ok(bad)]).unwrap_err();
        match err {
            VolumeError::ShapeMismatch { path, .. } => assert_eq!(path, PathBuf::from("<pair 1>")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_rewrite_removes_stale_shards() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), 2);
        assert_eq!(w.write((0..6).map(|i| Ok(pair(i)))).unwrap().len(), 3);

        // An unrelated file that only looks like a shard survives
        let other = dir.path().join("data-notes.vshard");
        fs::write(&other, b"keep").unwrap();

        let paths = w.write((0..2).map(|i| Ok(pair(i + 10)))).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(!dir.path().join("data-001.vshard").exists());
        assert!(!dir.path().join("data-002.vshard").exists());
        assert!(other.exists());

        fs::remove_file(&other).unwrap();
        let back = crate::data::shard_reader::read_all(&w.template().glob()).unwrap();
        assert_eq!(back, vec![pair(10), pair(11)]);
    }

    #[test]
    fn test_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the shard directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let template = ShardTemplate::parse(&format!("{}/sub/{{shard}}.vshard", blocker.display())).unwrap();
        let w = ShardWriter::new(template, ShardWriterConfig::default()).unwrap();
        assert!(matches!(
            w.write(vec![Ok(pair(0))]),
            Err(VolumeError::IoWrite { .. })
        ));
    }

    #[test]
    fn test_zero_examples_per_shard_rejected() {
        let template = ShardTemplate::parse("{shard}").unwrap();
        let cfg = ShardWriterConfig { examples_per_shard: 0, ..Default::default() };
        assert!(matches!(ShardWriter::new(template, cfg), Err(VolumeError::Configuration(_))));
    }
}

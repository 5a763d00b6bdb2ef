// ============================================================
// Layer 4 — Pipeline Assembler
// ============================================================
// Composes every data stage into one lazy stream of batches.
//
//   shard files (glob, re-resolved and shuffled every epoch)
//       │
//       ▼
//   ReadAhead thread      → decodes up to `prefetch_volumes` pairs ahead
//       │
//       ▼
//   BlockGrid::decompose  → blocks in grid order, numbered per epoch
//       │
//       ▼
//   shuffle window        → holds `shuffle_buffer_size` blocks,
//       │                   emits a random one, refills from upstream
//       ▼
//   batch_size raw blocks
//       │
//       ▼
//   rayon pool            → augment + normalize, `num_parallel_calls` threads
//       │
//       ▼
//   Batch  (repeat for n_epochs, or forever)
//
// Every block gets its own RNG seeded from (seed, epoch, block
// number), so which worker processes it never changes the result.
// An incomplete final batch is dropped, which keeps the number of
// batches per epoch equal to `steps_per_epoch`.
//
// Reference: Rust Book §16 (Fearless Concurrency)

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use burn::prelude::Backend;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::augment::{AugmentParams, AugmentationEngine};
use crate::data::batcher::{VolumeBatch, VolumeBatcher};
use crate::data::blocks::{blocks_per_volume, BlockGrid};
use crate::data::dataset::{Batch, BlockSample};
use crate::data::normalizer::{LabelMapping, Normalizer};
use crate::data::shard_reader::{resolve_glob, ShardReader};
use crate::domain::pair::VolumePair;
use crate::domain::volume::Shape3;
use crate::error::{Result, VolumeError};

// ─── Pipeline Configuration ───────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub file_pattern:        String,
    pub n_classes:           usize,
    pub batch_size:          usize,
    pub volume_shape:        Shape3,
    pub block_shape:         Shape3,
    pub augment:             bool,
    /// `None` repeats forever
    pub n_epochs:            Option<usize>,
    pub shuffle_buffer_size: usize,
    pub num_parallel_calls:  usize,
    /// `None` draws a fresh seed for every `iter()`
    pub seed:                Option<u64>,
    pub augmentation:        AugmentParams,
    /// Decoded volumes the reader thread may hold ahead of the consumer
    pub prefetch_volumes:    usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            file_pattern:        String::new(),
            n_classes:           1,
            batch_size:          1,
            volume_shape:        Shape3::new(256, 256, 256),
            block_shape:         Shape3::new(128, 128, 128),
            augment:             false,
            n_epochs:            None,
            shuffle_buffer_size: 64,
            num_parallel_calls:  4,
            seed:                None,
            augmentation:        AugmentParams::default(),
            prefetch_volumes:    2,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| VolumeError::io(path, e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            VolumeError::Configuration(format!("invalid pipeline config '{}': {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("n_classes", self.n_classes),
            ("batch_size", self.batch_size),
            ("shuffle_buffer_size", self.shuffle_buffer_size),
            ("num_parallel_calls", self.num_parallel_calls),
            ("prefetch_volumes", self.prefetch_volumes),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(VolumeError::Configuration(format!("{name} must be >= 1")));
        }
        if self.file_pattern.trim().is_empty() {
            return Err(VolumeError::Configuration("file_pattern must not be empty".into()));
        }
        if self.n_epochs == Some(0) {
            return Err(VolumeError::Configuration("n_epochs must be >= 1 when given".into()));
        }
        self.augmentation.validate()?;
        check_divisible(self.volume_shape, self.block_shape)?;
        Ok(())
    }
}

/// `floor(n_volumes * blocks_per_volume / batch_size)`
pub fn steps_per_epoch(
    n_volumes:    usize,
    volume_shape: Shape3,
    block_shape:  Shape3,
    batch_size:   usize,
) -> Result<usize> {
    if batch_size == 0 {
        return Err(VolumeError::Configuration("batch_size must be >= 1".into()));
    }
    let per_volume = check_divisible(volume_shape, block_shape)?;
    let blocks = n_volumes.checked_mul(per_volume).ok_or_else(|| {
        VolumeError::Configuration(format!(
            "{n_volumes} volumes of {per_volume} blocks overflow the block count"
        ))
    })?;
    Ok(blocks / batch_size)
}

/// Surfaces a non-dividing block shape as a configuration problem.
fn check_divisible(volume_shape: Shape3, block_shape: Shape3) -> Result<usize> {
    blocks_per_volume(volume_shape, block_shape).map_err(|e| {
        VolumeError::Configuration(format!(
            "block shape {block_shape} does not tile volume shape {volume_shape}: {e}"
        ))
    })
}

// ─── PipelineAssembler ────────────────────────────────────────────────────────
/// Validated configuration plus the stages built from it. Cheap to
/// share; every `iter()` starts an independent stream.
#[derive(Clone)]
pub struct PipelineAssembler {
    config:     PipelineConfig,
    grid:       BlockGrid,
    engine:     AugmentationEngine,
    normalizer: Normalizer,
    pool:       Arc<rayon::ThreadPool>,
}

impl PipelineAssembler {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let grid = BlockGrid::new(config.volume_shape, config.block_shape)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_parallel_calls)
            .thread_name(|i| format!("volshard-block-{i}"))
            .build()
            .map_err(|e| VolumeError::Configuration(format!("cannot build worker pool: {e}")))?;
        tracing::debug!(
            "Pipeline: {} blocks per volume, batch size {}, {} workers",
            grid.len(),
            config.batch_size,
            config.num_parallel_calls
        );
        Ok(Self {
            engine:     AugmentationEngine::new(config.augmentation),
            normalizer: Normalizer::new(config.n_classes, None)?,
            grid,
            pool:       Arc::new(pool),
            config,
        })
    }

    /// Remap multi-class labels through `mapping` instead of expecting
    /// dense class indices.
    pub fn with_label_mapping(mut self, mapping: LabelMapping) -> Result<Self> {
        self.normalizer = Normalizer::new(self.config.n_classes, Some(mapping))?;
        Ok(self)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn blocks_per_volume(&self) -> usize {
        self.grid.len()
    }

    pub fn steps_per_epoch(&self, n_volumes: usize) -> usize {
        n_volumes * self.grid.len() / self.config.batch_size
    }

    /// A fresh stream of batches. With a fixed seed, every call yields
    /// the same sequence.
    pub fn iter(&self) -> BatchStream {
        let seed = self.config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        BatchStream {
            stage:   Arc::new(self.clone()),
            seed,
            epoch:   0,
            state:   None,
            batches: 0,
            done:    false,
        }
    }

    fn process(&self, raw: RawBlock, seed: u64, epoch: usize) -> Result<BlockSample> {
        let mut rng = StdRng::seed_from_u64(mix(seed, epoch as u64, raw.seq + 1));
        let pair = self.engine.apply(raw.pair, &mut rng, self.config.augment)?;
        let pair = self.normalizer.normalize(pair)?;
        BlockSample::from_pair(pair)
    }
}

impl IntoIterator for &PipelineAssembler {
    type Item = Result<Batch>;
    type IntoIter = BatchStream;

    fn into_iter(self) -> BatchStream {
        self.iter()
    }
}

// ─── BatchStream ──────────────────────────────────────────────────────────────
struct RawBlock {
    pair: VolumePair,
    /// Position of the block within the epoch's decode order
    seq:  u64,
}

/// Everything that lives for exactly one epoch.
struct EpochState {
    rng:       StdRng,
    reader:    ReadAhead,
    pending:   VecDeque<RawBlock>,
    window:    Vec<RawBlock>,
    next_seq:  u64,
    exhausted: bool,
}

pub struct BatchStream {
    stage:   Arc<PipelineAssembler>,
    seed:    u64,
    epoch:   usize,
    state:   Option<EpochState>,
    /// Batches produced in the current epoch
    batches: usize,
    done:    bool,
}

impl BatchStream {
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Convert every batch to burn tensors on the fly.
    pub fn into_tensors<B: Backend>(
        self,
        batcher: VolumeBatcher<B>,
    ) -> impl Iterator<Item = Result<VolumeBatch<B>>> {
        self.map(move |batch| batch.map(|b| batcher.tensors(b)))
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let batch_size = self.stage.config.batch_size;
        loop {
            if self.state.is_none() {
                self.state = Some(self.start_epoch()?);
            }
            let mut raw = Vec::with_capacity(batch_size);
            if let Some(state) = self.state.as_mut() {
                while raw.len() < batch_size {
                    match state.next_block(&self.stage)? {
                        Some(block) => raw.push(block),
                        None => break,
                    }
                }
            }
            if raw.len() == batch_size {
                let samples = self.process_all(raw)?;
                self.batches += 1;
                return Ok(Some(Batch { samples }));
            }

            // Epoch exhausted; the partial batch in `raw` is dropped
            self.state = None;
            tracing::info!("Epoch {} finished after {} batches", self.epoch + 1, self.batches);
            if self.batches == 0 {
                tracing::warn!("Epoch produced no complete batch, ending stream");
                return Ok(None);
            }
            self.epoch += 1;
            self.batches = 0;
            if self.stage.config.n_epochs.is_some_and(|n| self.epoch >= n) {
                return Ok(None);
            }
        }
    }

    fn start_epoch(&self) -> Result<EpochState> {
        let config = &self.stage.config;
        let mut rng = StdRng::seed_from_u64(mix(self.seed, self.epoch as u64, 0));
        let mut paths = resolve_glob(&config.file_pattern)?;
        paths.shuffle(&mut rng);
        tracing::info!("Epoch {}: streaming {} shard files", self.epoch + 1, paths.len());
        Ok(EpochState {
            rng,
            reader: ReadAhead::spawn(paths, config.volume_shape, config.prefetch_volumes)?,
            pending: VecDeque::new(),
            window: Vec::with_capacity(config.shuffle_buffer_size),
            next_seq: 0,
            exhausted: false,
        })
    }

    fn process_all(&self, raw: Vec<RawBlock>) -> Result<Vec<BlockSample>> {
        let stage = &self.stage;
        let (seed, epoch) = (self.seed, self.epoch);
        stage.pool.install(|| {
            raw.into_par_iter()
                .map(|block| stage.process(block, seed, epoch))
                .collect()
        })
    }
}

impl EpochState {
    /// Next block out of the shuffle window, `None` once the epoch is drained.
    fn next_block(&mut self, stage: &PipelineAssembler) -> Result<Option<RawBlock>> {
        while self.window.len() < stage.config.shuffle_buffer_size && !self.exhausted {
            match self.pull(stage)? {
                Some(block) => self.window.push(block),
                None => self.exhausted = true,
            }
        }
        if self.window.is_empty() {
            return Ok(None);
        }
        let pick = self.rng.gen_range(0..self.window.len());
        Ok(Some(self.window.swap_remove(pick)))
    }

    /// Next block in decode order, reading another volume when needed.
    fn pull(&mut self, stage: &PipelineAssembler) -> Result<Option<RawBlock>> {
        if self.pending.is_empty() {
            let Some(pair) = self.reader.recv() else {
                return Ok(None);
            };
            let pair = pair?;
            let features = stage.grid.decompose(&pair.features)?;
            let labels = stage.grid.decompose(&pair.labels)?;
            for (f, l) in features.into_iter().zip(labels) {
                self.pending.push_back(RawBlock {
                    pair: VolumePair::new(f, l),
                    seq:  self.next_seq,
                });
                self.next_seq += 1;
            }
        }
        Ok(self.pending.pop_front())
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.state = None;
                Some(Err(e))
            }
        }
    }
}

// ─── ReadAhead ────────────────────────────────────────────────────────────────
/// What the reader thread sends: a decoded pair (or its error), then
/// `End` once every file has been read.
enum Fetched {
    Pair(Result<VolumePair>),
    End,
}

/// Background thread decoding shard records into a bounded channel.
/// Dropping it closes the channel and joins the thread.
struct ReadAhead {
    rx:       Option<Receiver<Fetched>>,
    handle:   Option<JoinHandle<()>>,
    finished: bool,
}

impl ReadAhead {
    fn spawn(paths: Vec<PathBuf>, expected: Shape3, capacity: usize) -> Result<Self> {
        let (tx, rx) = sync_channel(capacity);
        let handle = std::thread::Builder::new()
            .name("volshard-reader".into())
            .spawn(move || {
                for path in paths {
                    for record in ShardReader::from_paths(vec![path.clone()]).records() {
                        let item = record.and_then(|pair| {
                            if pair.shape() == expected {
                                Ok(pair)
                            } else {
                                Err(VolumeError::ShapeMismatch {
                                    path:     path.clone(),
                                    expected,
                                    actual:   pair.shape(),
                                })
                            }
                        });
                        let failed = item.is_err();
                        // A closed channel means the consumer went away
                        if tx.send(Fetched::Pair(item)).is_err() || failed {
                            return;
                        }
                    }
                }
                let _ = tx.send(Fetched::End);
            })
            .map_err(|e| VolumeError::io("volshard-reader", e))?;
        Ok(Self { rx: Some(rx), handle: Some(handle), finished: false })
    }

    /// Next pair, `None` after the reader reported the end of its files.
    /// A channel that closes without that report is an error.
    fn recv(&mut self) -> Option<Result<VolumePair>> {
        if self.finished {
            return None;
        }
        let received = self.rx.as_ref()?.recv();
        match received {
            Ok(Fetched::Pair(item)) => Some(item),
            Ok(Fetched::End) => {
                self.finished = true;
                None
            }
            Err(_) => {
                self.finished = true;
                Some(Err(self.stopped()))
            }
        }
    }

    fn stopped(&mut self) -> VolumeError {
        let reason = match self.handle.take().map(JoinHandle::join) {
            Some(Err(payload)) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("reader thread panicked: {message}")
            }
            _ => "reader thread exited early".to_string(),
        };
        VolumeError::ReaderStopped { reason }
    }
}

impl Drop for ReadAhead {
    fn drop(&mut self) {
        drop(self.rx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Shard reader thread panicked");
            }
        }
    }
}

// ─── Seeding ──────────────────────────────────────────────────────────────────
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Independent seed per (run seed, epoch, stream); stream 0 is the epoch RNG.
fn mix(seed: u64, epoch: u64, stream: u64) -> u64 {
    splitmix64(splitmix64(splitmix64(seed) ^ epoch) ^ stream)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::shard_format::ShardTemplate;
    use crate::data::shard_writer::{ShardWriter, ShardWriterConfig};
    use crate::domain::volume::Volume;
    use burn::backend::NdArray;

    const VOLUME: Shape3 = Shape3::new(4, 4, 4);
    const BLOCK: Shape3 = Shape3::new(2, 2, 2);

    fn pair(n: usize, shape: Shape3) -> VolumePair {
        VolumePair::new(
            Volume::from_fn(shape, |i, j, k| (n * 64 + i * 16 + j * 4 + k) as f32),
            Volume::from_fn(shape, |i, j, k| ((i + j + k + n) % 3) as u8),
        )
    }

    /// Writes `n` volumes into shards of two and returns the glob.
    fn write_dataset(dir: &Path, n: usize, shape: Shape3) -> String {
        let template = ShardTemplate::parse(&format!("{}/vol-{{shard}}.vshard", dir.display())).unwrap();
        let glob = template.glob();
        ShardWriter::new(template, ShardWriterConfig { examples_per_shard: 2, ..Default::default() })
            .unwrap()
            .write((0..n).map(|i| Ok(pair(i, shape))))
            .unwrap();
        glob
    }

    fn config(pattern: String) -> PipelineConfig {
        PipelineConfig {
            file_pattern:        pattern,
            n_classes:           1,
            batch_size:          5,
            volume_shape:        VOLUME,
            block_shape:         BLOCK,
            augment:             false,
            n_epochs:            Some(1),
            shuffle_buffer_size: 6,
            num_parallel_calls:  2,
            seed:                Some(17),
            augmentation:        AugmentParams::default(),
            prefetch_volumes:    1,
        }
    }

    fn collect(assembler: &PipelineAssembler) -> Vec<Batch> {
        assembler.iter().map(Result::unwrap).collect()
    }

    #[test]
    fn test_steps_per_epoch_example() {
        let s = steps_per_epoch(10, Shape3::new(256, 256, 256), Shape3::new(128, 128, 128), 2).unwrap();
        assert_eq!(s, 40);
        assert_eq!(steps_per_epoch(3, VOLUME, BLOCK, 5).unwrap(), 4);
    }

    #[test]
    fn test_steps_per_epoch_rejects_bad_shapes() {
        assert!(matches!(
            steps_per_epoch(1, Shape3::new(10, 10, 10), Shape3::new(4, 5, 5), 1),
            Err(VolumeError::Configuration(_))
        ));
        assert!(matches!(
            steps_per_epoch(1, VOLUME, BLOCK, 0),
            Err(VolumeError::Configuration(_))
        ));
        assert!(matches!(
            steps_per_epoch(usize::MAX, VOLUME, BLOCK, 1),
            Err(VolumeError::Configuration(_))
        ));
    }

    #[test]
    fn test_read_ahead_end_marker_is_clean() {
        let (tx, rx) = sync_channel(2);
        tx.send(Fetched::Pair(Ok(pair(0, VOLUME)))).unwrap();
        tx.send(Fetched::End).unwrap();
        drop(tx);
        let mut reader = ReadAhead { rx: Some(rx), handle: None, finished: false };
        assert!(matches!(reader.recv(), Some(Ok(_))));
        assert!(reader.recv().is_none());
        assert!(reader.recv().is_none());
    }

    #[test]
    fn test_read_ahead_reports_a_dead_thread() {
        let (tx, rx) = sync_channel::<Fetched>(1);
        let handle = std::thread::spawn(move || {
            let _tx = tx;
            panic!("decoder blew up");
        });
        let mut reader = ReadAhead { rx: Some(rx), handle: Some(handle), finished: false };
        match reader.recv() {
            Some(Err(VolumeError::ReaderStopped { reason })) => {
                assert!(reason.contains("decoder blew up"), "{reason}");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(reader.recv().is_none());
    }

    #[test]
    fn test_read_ahead_without_end_marker_is_an_error() {
        let (tx, rx) = sync_channel::<Fetched>(1);
        drop(tx);
        let mut reader = ReadAhead { rx: Some(rx), handle: None, finished: false };
        assert!(matches!(reader.recv(), Some(Err(VolumeError::ReaderStopped { .. }))));
    }

    #[test]
    fn test_config_validation() {
        let good = config("x/*.vshard".into());
        assert!(good.validate().is_ok());
        for bad in [
            PipelineConfig { batch_size: 0, ..good.clone() },
            PipelineConfig { n_classes: 0, ..good.clone() },
            PipelineConfig { n_epochs: Some(0), ..good.clone() },
            PipelineConfig { block_shape: Shape3::new(3, 2, 2), ..good.clone() },
            PipelineConfig { file_pattern: String::new(), ..good.clone() },
        ] {
            assert!(matches!(PipelineAssembler::new(bad), Err(VolumeError::Configuration(_))));
        }
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(
            &path,
            r#"{"file_pattern": "d/*.vshard", "batch_size": 4,
                "volume_shape": [8, 8, 8], "block_shape": [4, 4, 4], "n_epochs": 3}"#,
        )
        .unwrap();
        let cfg = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.n_epochs, Some(3));
        assert_eq!(cfg.prefetch_volumes, 2);
        assert_eq!(cfg.volume_shape, Shape3::new(8, 8, 8));
    }

    #[test]
    fn test_end_to_end_batches() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_dataset(dir.path(), 3, VOLUME);
        let assembler = PipelineAssembler::new(PipelineConfig { n_epochs: Some(2), ..config(pattern) }).unwrap();

        let batches = collect(&assembler);
        // 3 volumes × 8 blocks = 24 blocks → 4 full batches of 5 per epoch
        assert_eq!(assembler.steps_per_epoch(3), 4);
        assert_eq!(batches.len(), 8);
        for batch in &batches {
            assert_eq!(batch.len(), 5);
            assert_eq!(batch.block_shape(), Some(BLOCK));
            for s in &batch.samples {
                assert_eq!(s.features.len(), 8);
                assert!(s.labels.iter().all(|&l| l == 0 || l == 1));
            }
        }
    }

    #[test]
    fn test_every_block_once_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_dataset(dir.path(), 3, VOLUME);
        let cfg = PipelineConfig { batch_size: 4, n_classes: 3, ..config(pattern) };
        let batches = collect(&PipelineAssembler::new(cfg).unwrap());
        assert_eq!(batches.len(), 6);

        let mut seen: Vec<Vec<i64>> = batches
            .into_iter()
            .flat_map(|b| b.samples)
            .map(|s| s.labels)
            .collect();
        let mut expected = Vec::new();
        for n in 0..3 {
            let labels = pair(n, VOLUME).labels;
            for block in crate::data::blocks::decompose(&labels, BLOCK).unwrap() {
                expected.push(block.data().to_i64_vec());
            }
        }
        seen.sort();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_output_independent_of_parallelism() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_dataset(dir.path(), 4, VOLUME);
        let base = PipelineConfig { augment: true, batch_size: 4, ..config(pattern) };
        let serial = collect(&PipelineAssembler::new(PipelineConfig { num_parallel_calls: 1, ..base.clone() }).unwrap());
        let parallel = collect(&PipelineAssembler::new(PipelineConfig { num_parallel_calls: 4, ..base }).unwrap());
        assert_eq!(serial.len(), 8);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_stream_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_dataset(dir.path(), 3, VOLUME);
        let assembler = PipelineAssembler::new(PipelineConfig { augment: true, ..config(pattern) }).unwrap();
        assert_eq!(collect(&assembler), collect(&assembler));
    }

    #[test]
    fn test_unbounded_epochs_keep_going() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_dataset(dir.path(), 1, VOLUME);
        let assembler = PipelineAssembler::new(PipelineConfig { n_epochs: None, batch_size: 8, ..config(pattern) }).unwrap();
        let mut stream = assembler.iter();
        for _ in 0..5 {
            assert!(stream.next().unwrap().is_ok());
        }
        assert_eq!(stream.epoch(), 4);
    }

    #[test]
    fn test_too_few_blocks_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_dataset(dir.path(), 1, VOLUME);
        let assembler = PipelineAssembler::new(PipelineConfig { n_epochs: None, batch_size: 9, ..config(pattern) }).unwrap();
        assert_eq!(assembler.iter().count(), 0);
    }

    #[test]
    fn test_volume_shape_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_dataset(dir.path(), 2, Shape3::new(4, 4, 2));
        let assembler = PipelineAssembler::new(config(pattern)).unwrap();
        let results: Vec<_> = assembler.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(VolumeError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_dropping_stream_mid_epoch_releases_reader() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_dataset(dir.path(), 6, VOLUME);
        let assembler = PipelineAssembler::new(PipelineConfig { batch_size: 2, shuffle_buffer_size: 1, ..config(pattern) }).unwrap();
        let first: Vec<_> = assembler.iter().take(1).collect();
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_tensor_stream() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = write_dataset(dir.path(), 1, VOLUME);
        let cfg = PipelineConfig { batch_size: 4, n_classes: 3, ..config(pattern) };
        let batcher = VolumeBatcher::<NdArray>::new(Default::default(), 3);
        let tensors: Vec<_> = PipelineAssembler::new(cfg)
            .unwrap()
            .iter()
            .into_tensors(batcher)
            .map(Result::unwrap)
            .collect();
        assert_eq!(tensors.len(), 2);
        assert_eq!(tensors[0].features.dims(), [4, 2, 2, 2, 1]);
        assert_eq!(tensors[0].labels.dims(), [4, 2, 2, 2, 3]);
    }
}

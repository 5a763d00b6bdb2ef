// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from validated volume pairs
// all the way to batched training tensors.
//
// Offline, once per dataset:
//
//   VolumePaths (manifest rows)
//       │
//       ▼
//   VolumeValidator   → one shape, integral labels, storage dtypes
//       │
//       ▼
//   ShardWriter       → k pairs per shard file, tmp + rename
//
// At training time, lazily, once per step:
//
//   ShardReader       → decodes one record at a time from a glob
//       │
//       ▼
//   BlockGrid         → splits each volume into ordered sub-blocks
//       │
//       ▼
//   AugmentationEngine→ one rigid transform per feature/label pair
//       │
//       ▼
//   Normalizer        → z-score features, binarize / remap labels
//       │
//       ▼
//   PipelineAssembler → shuffle window, worker pool, batches, epochs
//       │
//       ▼
//   VolumeBatcher     → burn tensors [batch, x, y, z, C]
//
// Each module is responsible for exactly one step.

/// Shape and label checks before anything is written
pub mod validator;

/// Byte layout of shard files and the shard name template
pub mod shard_format;

/// Writes validated pairs into shard files
pub mod shard_writer;

/// Lazily decodes shard files matched by a glob
pub mod shard_reader;

/// Block decomposition and composition
pub mod blocks;

/// Random rigid transforms applied to feature/label blocks
pub mod augment;

/// Intensity standardization and label remapping
pub mod normalizer;

/// Normalized block samples and batches
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Seeded train/eval split of manifest rows
pub mod splitter;

/// Streaming pipeline and steps-per-epoch
pub mod pipeline;

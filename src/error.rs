// ============================================================
// Error Types
// ============================================================
// Every failure the library can report. Each variant carries
// enough context (path, offset, offending dimensions or value)
// to find the bad input without re-running anything.
//
// All of these abort the current operation: nothing in the
// pipeline retries, skips, or silently coerces data.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::domain::volume::{Dtype, Shape3};

#[derive(Debug, Error)]
pub enum VolumeError {
    /// A volume's shape differs from the shape shared by the rest of the dataset
    #[error("shape mismatch in '{path}': expected {expected}, got {actual}")]
    ShapeMismatch {
        path:     PathBuf,
        expected: Shape3,
        actual:   Shape3,
    },

    /// A label volume holds a value that is not (close to) an integer
    #[error("label volume '{path}' holds non-integral value {value}")]
    NonIntegralLabel { path: PathBuf, value: f64 },

    /// A shard destination could not be written
    #[error("cannot write '{path}': {source}")]
    IoWrite {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    /// A shard record could not be decoded
    #[error("corrupt shard '{path}' at byte offset {offset}: {reason}")]
    CorruptShard {
        path:   PathBuf,
        offset: u64,
        reason: String,
    },

    /// A block shape does not evenly divide the volume shape
    #[error("axis {axis}: volume extent {volume} is not divisible by block extent {block}")]
    ShapeDivisibility {
        axis:   usize,
        volume: usize,
        block:  usize,
    },

    /// Composition was handed the wrong number of blocks
    #[error("expected {expected} blocks, got {actual}")]
    BlockCountMismatch { expected: usize, actual: usize },

    /// A label value has no entry in the label mapping
    #[error("label value {value} has no entry in the label mapping")]
    UnmappedLabel { value: i64 },

    /// Invalid configuration (pipeline, writer template, etc.)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Read-side I/O failure
    #[error("cannot read '{path}': {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    /// The volume source could not produce a volume
    #[error("cannot load volume '{path}': {reason}")]
    Load { path: PathBuf, reason: String },

    /// Volumes that must share a dtype do not
    #[error("dtype mismatch: expected {expected}, got {actual}")]
    DtypeMismatch { expected: Dtype, actual: Dtype },

    /// The background shard reader ended without finishing the epoch
    #[error("shard reader stopped before the end of the epoch: {reason}")]
    ReaderStopped { reason: String },

    /// Voxel buffer length does not match the shape it is paired with
    #[error("shape {shape} does not match a buffer of {len} voxels")]
    DataLength { shape: Shape3, len: usize },
}

impl VolumeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn io_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::IoWrite { path: path.into(), source }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptShard {
            path:   path.into(),
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VolumeError>;

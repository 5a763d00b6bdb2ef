// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The validator and the shard writer never open image files
// themselves. They go through VolumeSource, so any format
// (NumPy arrays, NIfTI, MGZ, an in-memory map in tests) can be
// plugged in without touching the data layer.
//
// Implementations:
//   - NpySource        → reads .npy arrays (infra layer)
//   - any closure      → Fn(&Path) -> Result<Volume>

use std::path::Path;

use crate::domain::volume::Volume;
use crate::error::Result;

// ─── VolumeSource ─────────────────────────────────────────────────────────────
/// Anything that can turn a path into a Volume.
pub trait VolumeSource {
    /// Load the volume stored at `path`.
    fn load(&self, path: &Path) -> Result<Volume>;
}

impl<F> VolumeSource for F
where
    F: Fn(&Path) -> Result<Volume>,
{
    fn load(&self, path: &Path) -> Result<Volume> {
        self(path)
    }
}

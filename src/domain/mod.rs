// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that define what the system works on:
// volumes, their shapes and element types, feature/label pairs,
// and the VolumeSource abstraction used to load them.
//
// Nothing in here touches shard files, tensors, or threads.

/// Shape3, Dtype, VoxelData and Volume
pub mod volume;

/// VolumePair and the on-disk paths of a pair
pub mod pair;

/// VolumeSource: load(path) -> Volume
pub mod traits;

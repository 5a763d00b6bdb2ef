// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles the file formats at the edges of the system that
// don't belong in the data pipeline itself:
//
//   manifest.rs    — CSV manifest of (features, labels) paths
//                    consumed by `convert`.
//
//   npy_source.rs  — VolumeSource for NumPy .npy files
//                    (npyz). Any other image format can be
//                    plugged in through the same trait.
//
//   label_map.rs   — CSV table remapping raw label values to
//                    dense class indices.
//
//   metadata.rs    — dataset.json written next to the shards:
//                    shape, dtypes, volume counts per split.
//
//   metrics.rs     — Batch statistics CSV written by `preview`.
//
// Keeping these here lets the data layer stay independent of
// any particular on-disk image or table format.

/// CSV manifest reader
pub mod manifest;

/// .npy volume loading
pub mod npy_source;

/// CSV label mapping reader
pub mod label_map;

/// dataset.json saving and loading
pub mod metadata;

/// Batch statistics CSV logger
pub mod metrics;

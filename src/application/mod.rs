// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one user-facing goal (converting a dataset or inspecting one).
//
// Rules for this layer:
//   - No voxel math or shard byte layout here
//   - No printing here (that's Layer 1)
//   - No direct file format handling (that's Layer 4 and 6)
//   - Only workflow coordination

// Raw volumes → validated shards + dataset.json
pub mod convert_use_case;

// verify / steps / preview over existing shards
pub mod inspect_use_case;

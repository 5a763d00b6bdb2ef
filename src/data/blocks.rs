// ============================================================
// Layer 4 — Block Decomposer / Composer
// ============================================================
// Splits one full volume into non-overlapping sub-blocks of a
// fixed shape, and puts a sequence of such blocks back together.
//
// Block order (load-bearing, shared by both directions):
//   the grid of blocks is walked x-block slowest, z-block fastest
//
//   for bi in 0..x/bx
//     for bj in 0..y/by
//       for bk in 0..z/bz
//         emit block (bi, bj, bk)
//
// Example with a 4×4×4 volume and 2×2×2 blocks:
//   block 0 → voxels [0..2, 0..2, 0..2]
//   block 1 → voxels [0..2, 0..2, 2..4]
//   block 2 → voxels [0..2, 2..4, 0..2]
//   ...
//   block 7 → voxels [2..4, 2..4, 2..4]
//
// Both directions are pure copies: no padding, no interpolation,
// every voxel lands in exactly one block exactly once.
// Each block copies whole z-rows (`bz` contiguous voxels) at a time.

use crate::domain::volume::{with_voxels, Dtype, Shape3, Volume, Voxel, VoxelData};
use crate::error::{Result, VolumeError};

/// The tiling of a volume shape by a block shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    volume: Shape3,
    block:  Shape3,
    /// Number of blocks along each axis
    grid:   Shape3,
}

impl BlockGrid {
    /// Fails with `ShapeDivisibility` if `block` does not evenly divide `volume`.
    pub fn new(volume: Shape3, block: Shape3) -> Result<Self> {
        let grid = volume.grid(block)?;
        Ok(Self { volume, block, grid })
    }

    pub fn volume_shape(&self) -> Shape3 {
        self.volume
    }

    pub fn block_shape(&self) -> Shape3 {
        self.block
    }

    /// Number of blocks in one volume
    pub fn len(&self) -> usize {
        self.grid.voxels()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Voxel coordinate of the first voxel of block number `n`
    pub fn origin(&self, n: usize) -> [usize; 3] {
        let [_, gy, gz] = self.grid.dims();
        let [bx, by, bz] = self.block.dims();
        let (bi, rest) = (n / (gy * gz), n % (gy * gz));
        let (bj, bk) = (rest / gz, rest % gz);
        [bi * bx, bj * by, bk * bz]
    }

    /// Split `volume` into `self.len()` blocks in grid order.
    pub fn decompose(&self, volume: &Volume) -> Result<Vec<Volume>> {
        if volume.shape() != self.volume {
            return Err(VolumeError::ShapeMismatch {
                path:     "<volume>".into(),
                expected: self.volume,
                actual:   volume.shape(),
            });
        }
        let blocks = with_voxels!(volume.data(), v => self.split(v));
        blocks
            .into_iter()
            .map(|data| Volume::new(self.block, data))
            .collect()
    }

    /// Reassemble blocks produced by `decompose` (same order) into one volume.
    pub fn compose(&self, blocks: &[Volume]) -> Result<Volume> {
        if blocks.len() != self.len() {
            return Err(VolumeError::BlockCountMismatch {
                expected: self.len(),
                actual:   blocks.len(),
            });
        }
        if let Some(bad) = blocks.iter().find(|b| b.shape() != self.block) {
            return Err(VolumeError::ShapeMismatch {
                path:     "<block>".into(),
                expected: self.block,
                actual:   bad.shape(),
            });
        }
        let dtype = blocks.first().map_or(Dtype::F32, Volume::dtype);
        let data = match dtype {
            Dtype::U8 => self.merge::<u8>(blocks)?,
            Dtype::I16 => self.merge::<i16>(blocks)?,
            Dtype::I32 => self.merge::<i32>(blocks)?,
            Dtype::I64 => self.merge::<i64>(blocks)?,
            Dtype::F32 => self.merge::<f32>(blocks)?,
            Dtype::F64 => self.merge::<f64>(blocks)?,
        };
        Volume::new(self.volume, data)
    }

    fn split<T: Voxel>(&self, src: &[T]) -> Vec<VoxelData> {
        let [bx, by, bz] = self.block.dims();
        (0..self.len())
            .map(|n| {
                let [x0, y0, z0] = self.origin(n);
                let mut block = Vec::with_capacity(self.block.voxels());
                for i in 0..bx {
                    for j in 0..by {
                        let start = self.volume.offset(x0 + i, y0 + j, z0);
                        block.extend_from_slice(&src[start..start + bz]);
                    }
                }
                T::wrap(block)
            })
            .collect()
    }

    fn merge<T: Voxel>(&self, blocks: &[Volume]) -> Result<VoxelData> {
        let [bx, by, bz] = self.block.dims();
        let mut dst = vec![T::default(); self.volume.voxels()];
        for (n, block) in blocks.iter().enumerate() {
            let src = T::view(block.data()).ok_or(VolumeError::DtypeMismatch {
                expected: T::DTYPE,
                actual:   block.dtype(),
            })?;
            let [x0, y0, z0] = self.origin(n);
            for i in 0..bx {
                for j in 0..by {
                    let start = self.volume.offset(x0 + i, y0 + j, z0);
                    let row = (i * by + j) * bz;
                    dst[start..start + bz].copy_from_slice(&src[row..row + bz]);
                }
            }
        }
        Ok(T::wrap(dst))
    }
}

/// Number of blocks one volume of `volume_shape` splits into.
pub fn blocks_per_volume(volume_shape: Shape3, block_shape: Shape3) -> Result<usize> {
    Ok(BlockGrid::new(volume_shape, block_shape)?.len())
}

/// Split `volume` into blocks of `block_shape`, in grid order.
pub fn decompose(volume: &Volume, block_shape: Shape3) -> Result<Vec<Volume>> {
    BlockGrid::new(volume.shape(), block_shape)?.decompose(volume)
}

/// Inverse of [`decompose`].
pub fn compose(blocks: &[Volume], volume_shape: Shape3, block_shape: Shape3) -> Result<Volume> {
    BlockGrid::new(volume_shape, block_shape)?.compose(blocks)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: Shape3) -> Volume {
        Volume::from_fn(shape, |i, j, k| shape.offset(i, j, k) as i32)
    }

    #[test]
    fn test_roundtrip_reproduces_volume() {
        let shapes = [
            (Shape3::new(4, 4, 4), Shape3::new(2, 2, 2)),
            (Shape3::new(6, 4, 8), Shape3::new(3, 2, 4)),
            (Shape3::new(5, 3, 2), Shape3::new(5, 1, 2)),
            (Shape3::new(4, 4, 4), Shape3::new(4, 4, 4)),
        ];
        for (vs, bs) in shapes {
            let v = ramp(vs);
            let blocks = decompose(&v, bs).unwrap();
            assert_eq!(compose(&blocks, vs, bs).unwrap(), v, "volume {vs}, block {bs}");
        }
    }

    #[test]
    fn test_roundtrip_float_volume() {
        let vs = Shape3::new(4, 6, 2);
        let v = Volume::from_fn(vs, |i, j, k| (i as f32) * 0.5 - (j * k) as f32);
        let blocks = decompose(&v, Shape3::new(2, 3, 1)).unwrap();
        assert_eq!(compose(&blocks, vs, Shape3::new(2, 3, 1)).unwrap(), v);
    }

    #[test]
    fn test_block_count_is_product_of_ratios() {
        let v = ramp(Shape3::new(8, 4, 6));
        let blocks = decompose(&v, Shape3::new(2, 2, 3)).unwrap();
        assert_eq!(blocks.len(), 4 * 2 * 2);
        assert_eq!(blocks_per_volume(Shape3::new(256, 256, 256), Shape3::new(128, 128, 128)).unwrap(), 8);
    }

    #[test]
    fn test_block_order_is_x_slowest() {
        let vs = Shape3::new(4, 4, 4);
        let blocks = decompose(&ramp(vs), Shape3::new(2, 2, 2)).unwrap();
        // First voxel of each block is the block origin
        let firsts: Vec<i32> = blocks
            .iter()
            .map(|b| match b.data() {
                VoxelData::I32(v) => v[0],
                _ => unreachable!(),
            })
            .collect();
        let expected: Vec<i32> = [
            (0, 0, 0), (0, 0, 2), (0, 2, 0), (0, 2, 2),
            (2, 0, 0), (2, 0, 2), (2, 2, 0), (2, 2, 2),
        ]
        .iter()
        .map(|&(i, j, k)| vs.offset(i, j, k) as i32)
        .collect();
        assert_eq!(firsts, expected);
    }

    #[test]
    fn test_every_voxel_appears_once() {
        let vs = Shape3::new(6, 4, 2);
        let blocks = decompose(&ramp(vs), Shape3::new(3, 2, 1)).unwrap();
        let mut all: Vec<i32> = blocks
            .iter()
            .flat_map(|b| match b.data() {
                VoxelData::I32(v) => v.clone(),
                _ => unreachable!(),
            })
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..vs.voxels() as i32).collect::<Vec<_>>());
    }

    #[test]
    fn test_indivisible_shape_fails() {
        let v = ramp(Shape3::new(4, 5, 4));
        match decompose(&v, Shape3::new(2, 2, 2)) {
            Err(VolumeError::ShapeDivisibility { axis, volume, block }) => {
                assert_eq!((axis, volume, block), (1, 5, 2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_compose_rejects_wrong_count() {
        let vs = Shape3::new(4, 4, 4);
        let bs = Shape3::new(2, 2, 2);
        let mut blocks = decompose(&ramp(vs), bs).unwrap();
        blocks.pop();
        assert!(matches!(
            compose(&blocks, vs, bs),
            Err(VolumeError::BlockCountMismatch { expected: 8, actual: 7 })
        ));
    }

    #[test]
    fn test_compose_rejects_mixed_dtypes() {
        let vs = Shape3::new(2, 2, 2);
        let bs = Shape3::new(1, 2, 2);
        let mut blocks = decompose(&ramp(vs), bs).unwrap();
        blocks[1] = blocks[1].cast(Dtype::F32);
        assert!(matches!(
            compose(&blocks, vs, bs),
            Err(VolumeError::DtypeMismatch { .. })
        ));
    }
}

// ============================================================
// Layer 6 — .npy Volume Source
// ============================================================
// Loads one 3D volume from a NumPy .npy file using npyz.
//
// Accepted arrays:
//   dtype  uint8, int16, int32, int64, float32, float64
//          (either byte order)
//   shape  (x, y, z) or (x, y, z, 1); the singleton channel
//          axis is dropped
//   order  C or Fortran; Fortran arrays are reordered so the
//          resulting buffer is always C order
//
// Anything else is a Load error naming the file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use npyz::{DType, NpyFile, Order};

use crate::domain::traits::VolumeSource;
use crate::domain::volume::{Dtype, Shape3, Volume, VoxelData};
use crate::error::{Result, VolumeError};

#[derive(Debug, Clone, Copy, Default)]
pub struct NpySource;

impl NpySource {
    pub fn new() -> Self {
        Self
    }
}

impl VolumeSource for NpySource {
    fn load(&self, path: &Path) -> Result<Volume> {
        let file = File::open(path).map_err(|e| VolumeError::io(path, e))?;
        let npy = NpyFile::new(BufReader::new(file)).map_err(|e| load_err(path, e))?;

        let shape = spatial_shape(npy.shape()).ok_or_else(|| {
            load_err(path, format!("expected a 3D array, found shape {:?}", npy.shape()))
        })?;
        let dtype = voxel_dtype(&npy.dtype())
            .ok_or_else(|| load_err(path, format!("unsupported dtype {:?}", npy.dtype())))?;
        let order = npy.order();

        let data = match dtype {
            Dtype::U8 => VoxelData::U8(npy.into_vec().map_err(|e| load_err(path, e))?),
            Dtype::I16 => VoxelData::I16(npy.into_vec().map_err(|e| load_err(path, e))?),
            Dtype::I32 => VoxelData::I32(npy.into_vec().map_err(|e| load_err(path, e))?),
            Dtype::I64 => VoxelData::I64(npy.into_vec().map_err(|e| load_err(path, e))?),
            Dtype::F32 => VoxelData::F32(npy.into_vec().map_err(|e| load_err(path, e))?),
            Dtype::F64 => VoxelData::F64(npy.into_vec().map_err(|e| load_err(path, e))?),
        };
        let data = match order {
            Order::C => data,
            Order::Fortran => data.gather(&fortran_to_c(shape)),
        };

        tracing::debug!("Loaded '{}' {} {}", path.display(), shape, dtype);
        Volume::new(shape, data).map_err(|e| load_err(path, e))
    }
}

fn load_err(path: &Path, reason: impl ToString) -> VolumeError {
    VolumeError::Load {
        path:   path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn spatial_shape(dims: &[u64]) -> Option<Shape3> {
    match dims {
        [x, y, z] | [x, y, z, 1] => Some(Shape3::new(
            usize::try_from(*x).ok()?,
            usize::try_from(*y).ok()?,
            usize::try_from(*z).ok()?,
        )),
        _ => None,
    }
}

/// Map a plain npy type string like "<f4" or "|u1" onto a voxel dtype.
fn voxel_dtype(dtype: &DType) -> Option<Dtype> {
    let DType::Plain(ts) = dtype else {
        return None;
    };
    let descr = ts.to_string();
    match descr.get(1..)? {
        "u1" => Some(Dtype::U8),
        "i2" => Some(Dtype::I16),
        "i4" => Some(Dtype::I32),
        "i8" => Some(Dtype::I64),
        "f4" => Some(Dtype::F32),
        "f8" => Some(Dtype::F64),
        _ => None,
    }
}

/// For each C-order voxel, its position in a Fortran-order buffer.
fn fortran_to_c(shape: Shape3) -> Vec<Option<usize>> {
    let [x, y, z] = shape.dims();
    let mut indices = Vec::with_capacity(shape.voxels());
    for i in 0..x {
        for j in 0..y {
            for k in 0..z {
                indices.push(Some(i + x * (j + y * k)));
            }
        }
    }
    indices
}

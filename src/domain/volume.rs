// ============================================================
// Layer 3 — Volume Domain Types
// ============================================================
// A Volume is one 3D scientific image: a spatial shape plus a
// flat, C-ordered voxel buffer (last axis varies fastest).
//
//   Shape3     → (x, y, z) extents
//   Dtype      → the on-disk element type of a voxel buffer
//   VoxelData  → the voxel buffer itself, one variant per Dtype
//   Volume     → Shape3 + VoxelData, length-checked on creation
//
// Index of voxel (i, j, k) in the flat buffer:
//   (i * y + j) * z + k

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeError};

// ─── Shape3 ───────────────────────────────────────────────────────────────────
/// Spatial extents of a volume or a block, outer axis first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape3(pub [usize; 3]);

impl Shape3 {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self([x, y, z])
    }

    pub fn dims(&self) -> [usize; 3] {
        self.0
    }

    /// Total number of voxels
    pub fn voxels(&self) -> usize {
        self.0.iter().product()
    }

    /// Voxel count, or `None` if it does not fit in a `usize`
    pub fn checked_voxels(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
    }

    /// Flat C-order offset of voxel (i, j, k)
    #[inline]
    pub fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.0[1] + j) * self.0[2] + k
    }

    /// Number of `block`-sized tiles along each axis.
    ///
    /// Fails with `ShapeDivisibility` on the first axis whose extent
    /// is not an exact multiple of the block extent.
    pub fn grid(&self, block: Shape3) -> Result<Shape3> {
        let mut grid = [0usize; 3];
        for axis in 0..3 {
            let (v, b) = (self.0[axis], block.0[axis]);
            if b == 0 || v % b != 0 {
                return Err(VolumeError::ShapeDivisibility { axis, volume: v, block: b });
            }
            grid[axis] = v / b;
        }
        Ok(Shape3(grid))
    }
}

impl fmt::Display for Shape3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}

/// Parses "x,y,z" (whitespace around the numbers is allowed)
impl FromStr for Shape3 {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(format!("expected three comma-separated extents, got '{s}'"));
        }
        let mut dims = [0usize; 3];
        for (dim, part) in dims.iter_mut().zip(&parts) {
            *dim = part
                .parse()
                .map_err(|e| format!("invalid extent '{part}': {e}"))?;
        }
        Ok(Shape3(dims))
    }
}

// ─── Dtype ────────────────────────────────────────────────────────────────────
/// Element type of a voxel buffer. Serialised with numpy-style names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "int16")]
    I16,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "int64")]
    I64,
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
}

impl Dtype {
    /// Bytes per voxel
    pub fn size(self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::I16 => 2,
            Dtype::I32 | Dtype::F32 => 4,
            Dtype::I64 | Dtype::F64 => 8,
        }
    }

    pub fn is_integral(self) -> bool {
        !matches!(self, Dtype::F32 | Dtype::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            Dtype::U8 => "uint8",
            Dtype::I16 => "int16",
            Dtype::I32 => "int32",
            Dtype::I64 => "int64",
            Dtype::F32 => "float32",
            Dtype::F64 => "float64",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Voxel ────────────────────────────────────────────────────────────────────
/// Scalar types a voxel buffer can hold.
pub trait Voxel: Copy + Default + PartialEq + Send + Sync + 'static {
    const DTYPE: Dtype;

    fn to_f64(self) -> f64;

    /// Rounds for integral types; `as` saturates out-of-range values
    fn from_f64(v: f64) -> Self;

    fn put_le(self, out: &mut Vec<u8>);

    /// `bytes` is exactly `DTYPE.size()` long
    fn get_le(bytes: &[u8]) -> Self;

    /// Borrow `data` as a slice of `Self` if the dtypes agree
    fn view(data: &VoxelData) -> Option<&[Self]>;

    fn wrap(values: Vec<Self>) -> VoxelData;
}

macro_rules! impl_voxel {
    ($t:ty, $variant:ident, $from:expr) => {
        impl Voxel for $t {
            const DTYPE: Dtype = Dtype::$variant;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                let convert: fn(f64) -> $t = $from;
                convert(v)
            }

            #[inline]
            fn put_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn get_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }

            fn view(data: &VoxelData) -> Option<&[Self]> {
                match data {
                    VoxelData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn wrap(values: Vec<Self>) -> VoxelData {
                VoxelData::$variant(values)
            }
        }

        impl From<Vec<$t>> for VoxelData {
            fn from(v: Vec<$t>) -> Self {
                VoxelData::$variant(v)
            }
        }
    };
}

impl_voxel!(u8, U8, |v| v.round() as u8);
impl_voxel!(i16, I16, |v| v.round() as i16);
impl_voxel!(i32, I32, |v| v.round() as i32);
impl_voxel!(i64, I64, |v| v.round() as i64);
impl_voxel!(f32, F32, |v| v as f32);
impl_voxel!(f64, F64, |v| v);

// ─── VoxelData ────────────────────────────────────────────────────────────────
/// A flat voxel buffer tagged with its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum VoxelData {
    U8(Vec<u8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Run `$body` with `$v` bound to the inner `Vec` of any variant.
macro_rules! with_voxels {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            VoxelData::U8($v) => $body,
            VoxelData::I16($v) => $body,
            VoxelData::I32($v) => $body,
            VoxelData::I64($v) => $body,
            VoxelData::F32($v) => $body,
            VoxelData::F64($v) => $body,
        }
    };
}

/// Like `with_voxels!`, but re-wraps the resulting `Vec` in the same variant.
macro_rules! map_voxels {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            VoxelData::U8($v) => VoxelData::U8($body),
            VoxelData::I16($v) => VoxelData::I16($body),
            VoxelData::I32($v) => VoxelData::I32($body),
            VoxelData::I64($v) => VoxelData::I64($body),
            VoxelData::F32($v) => VoxelData::F32($body),
            VoxelData::F64($v) => VoxelData::F64($body),
        }
    };
}

pub(crate) use with_voxels;

impl VoxelData {
    pub fn dtype(&self) -> Dtype {
        match self {
            VoxelData::U8(_) => Dtype::U8,
            VoxelData::I16(_) => Dtype::I16,
            VoxelData::I32(_) => Dtype::I32,
            VoxelData::I64(_) => Dtype::I64,
            VoxelData::F32(_) => Dtype::F32,
            VoxelData::F64(_) => Dtype::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_voxels!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype().size()
    }

    pub fn zeros(dtype: Dtype, len: usize) -> Self {
        match dtype {
            Dtype::U8 => VoxelData::U8(vec![0; len]),
            Dtype::I16 => VoxelData::I16(vec![0; len]),
            Dtype::I32 => VoxelData::I32(vec![0; len]),
            Dtype::I64 => VoxelData::I64(vec![0; len]),
            Dtype::F32 => VoxelData::F32(vec![0.0; len]),
            Dtype::F64 => VoxelData::F64(vec![0.0; len]),
        }
    }

    /// Decode little-endian bytes. `None` when the byte count is not a
    /// whole number of elements.
    pub fn from_le_bytes(dtype: Dtype, bytes: &[u8]) -> Option<Self> {
        if bytes.len() % dtype.size() != 0 {
            return None;
        }
        fn decode<T: Voxel>(bytes: &[u8]) -> Vec<T> {
            bytes.chunks_exact(T::DTYPE.size()).map(T::get_le).collect()
        }
        Some(match dtype {
            Dtype::U8 => VoxelData::U8(bytes.to_vec()),
            Dtype::I16 => VoxelData::I16(decode(bytes)),
            Dtype::I32 => VoxelData::I32(decode(bytes)),
            Dtype::I64 => VoxelData::I64(decode(bytes)),
            Dtype::F32 => VoxelData::F32(decode(bytes)),
            Dtype::F64 => VoxelData::F64(decode(bytes)),
        })
    }

    /// Stream the buffer as little-endian bytes in bounded chunks.
    pub fn write_le<W: Write>(&self, w: &mut W) -> io::Result<()> {
        const CHUNK: usize = 16 * 1024;
        fn emit<T: Voxel, W: Write>(values: &[T], w: &mut W) -> io::Result<()> {
            let mut buf = Vec::with_capacity(CHUNK * T::DTYPE.size());
            for chunk in values.chunks(CHUNK) {
                buf.clear();
                for &v in chunk {
                    v.put_le(&mut buf);
                }
                w.write_all(&buf)?;
            }
            Ok(())
        }
        with_voxels!(self, v => emit(v, w))
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        with_voxels!(self, v => v.iter().map(|&x| x.to_f64() as f32).collect())
    }

    /// Integral view of the buffer; floats are rounded.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        with_voxels!(self, v => v.iter().map(|&x| i64::from_f64(x.to_f64())).collect())
    }

    /// First value whose distance to the nearest integer exceeds `tolerance`.
    /// Always `None` for integral dtypes.
    pub fn first_non_integral(&self, tolerance: f64) -> Option<f64> {
        fn scan<T: Voxel>(values: &[T], tolerance: f64) -> Option<f64> {
            values
                .iter()
                .map(|&v| v.to_f64())
                .find(|v| !v.is_finite() || (v - v.round()).abs() > tolerance)
        }
        match self {
            VoxelData::F32(v) => scan(v, tolerance),
            VoxelData::F64(v) => scan(v, tolerance),
            _ => None,
        }
    }

    /// Convert to another element type (identity clone when equal).
    pub fn cast(&self, dtype: Dtype) -> VoxelData {
        if dtype == self.dtype() {
            return self.clone();
        }
        fn convert<S: Voxel, T: Voxel>(values: &[S]) -> Vec<T> {
            values.iter().map(|&v| T::from_f64(v.to_f64())).collect()
        }
        with_voxels!(self, v => match dtype {
            Dtype::U8 => VoxelData::U8(convert(v)),
            Dtype::I16 => VoxelData::I16(convert(v)),
            Dtype::I32 => VoxelData::I32(convert(v)),
            Dtype::I64 => VoxelData::I64(convert(v)),
            Dtype::F32 => VoxelData::F32(convert(v)),
            Dtype::F64 => VoxelData::F64(convert(v)),
        })
    }

    /// Pick voxels by flat index; `None` reads as zero.
    pub fn gather(&self, indices: &[Option<usize>]) -> VoxelData {
        map_voxels!(self, v => indices
            .iter()
            .map(|idx| idx.map_or_else(Default::default, |i| v[i]))
            .collect())
    }
}

// ─── Volume ───────────────────────────────────────────────────────────────────
/// One 3D image: a shape and a voxel buffer of exactly `shape.voxels()` elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    shape: Shape3,
    data:  VoxelData,
}

impl Volume {
    pub fn new(shape: Shape3, data: VoxelData) -> Result<Self> {
        if shape.checked_voxels() != Some(data.len()) {
            return Err(VolumeError::DataLength { shape, len: data.len() });
        }
        Ok(Self { shape, data })
    }

    /// Build a volume by evaluating `f(i, j, k)` at every voxel.
    pub fn from_fn<T, F>(shape: Shape3, mut f: F) -> Self
    where
        T: Voxel,
        F: FnMut(usize, usize, usize) -> T,
        Vec<T>: Into<VoxelData>,
    {
        let [x, y, z] = shape.dims();
        let mut values = Vec::with_capacity(shape.voxels());
        for i in 0..x {
            for j in 0..y {
                for k in 0..z {
                    values.push(f(i, j, k));
                }
            }
        }
        Self { shape, data: values.into() }
    }

    pub fn shape(&self) -> Shape3 {
        self.shape
    }

    pub fn dtype(&self) -> Dtype {
        self.data.dtype()
    }

    pub fn data(&self) -> &VoxelData {
        &self.data
    }

    pub fn into_data(self) -> VoxelData {
        self.data
    }

    /// Same shape, converted element type
    pub fn cast(&self, dtype: Dtype) -> Volume {
        Volume { shape: self.shape, data: self.data.cast(dtype) }
    }
}

// ============================================================
// Layer 4 — Shard File Format
// ============================================================
// Byte layout shared by ShardWriter and ShardReader.
//
//   file    := "VOLSHARD" | version u32 LE | record*
//   record  := header_len u32 LE | header (JSON) | feature bytes | label bytes
//
// The JSON header carries everything needed to rebuild both
// tensors without any external schema:
//
//   {"features": {"shape": [x, y, z], "dtype": "float32", "nbytes": N},
//    "labels":   {"shape": [x, y, z], "dtype": "uint8",   "nbytes": M}}
//
// Voxel bytes are little-endian, C order. A whole shard may be
// gzip-compressed; readers detect that from the first two bytes.
//
// Shard files are named from a template holding a `{shard}`
// placeholder, e.g. "data/train-{shard}.vshard" → train-007.vshard.
// `{shard:05}` selects a five-digit index instead of the default three.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::pair::VolumePair;
use crate::domain::volume::{Dtype, Shape3, Volume, VoxelData};
use crate::error::{Result, VolumeError};

pub const MAGIC: &[u8; 8] = b"VOLSHARD";
pub const VERSION: u32 = 1;

/// First two bytes of every gzip stream
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on a record header; anything larger is treated as corruption
const MAX_HEADER_LEN: u32 = 1 << 20;

// ─── Record header ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorHeader {
    pub shape:  Shape3,
    pub dtype:  Dtype,
    pub nbytes: u64,
}

impl TensorHeader {
    fn describe(volume: &Volume) -> Self {
        Self {
            shape:  volume.shape(),
            dtype:  volume.dtype(),
            nbytes: volume.data().nbytes() as u64,
        }
    }

    /// Byte count implied by shape and dtype; `None` when it overflows
    fn expected_nbytes(&self) -> Option<u64> {
        let bytes = self.shape.checked_voxels()?.checked_mul(self.dtype.size())?;
        u64::try_from(bytes).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub features: TensorHeader,
    pub labels:   TensorHeader,
}

// ─── Compression ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

// ─── ShardTemplate ────────────────────────────────────────────────────────────
/// Output path template with one zero-padded shard-index placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTemplate {
    prefix: String,
    suffix: String,
    width:  usize,
}

impl ShardTemplate {
    pub const DEFAULT_WIDTH: usize = 3;

    pub fn parse(template: &str) -> Result<Self> {
        let start = template.find("{shard").ok_or_else(|| {
            VolumeError::Configuration(format!(
                "shard template '{template}' has no {{shard}} placeholder"
            ))
        })?;
        let rest = &template[start..];
        let end = rest.find('}').ok_or_else(|| {
            VolumeError::Configuration(format!("unterminated placeholder in '{template}'"))
        })?;
        let format = &rest["{shard".len()..end];
        let width = match format {
            "" => Self::DEFAULT_WIDTH,
            s if s.starts_with(":0") => s[2..].parse::<usize>().map_err(|_| {
                VolumeError::Configuration(format!("invalid shard width '{s}' in '{template}'"))
            })?,
            s => {
                return Err(VolumeError::Configuration(format!(
                    "unsupported placeholder format '{s}' in '{template}'"
                )))
            }
        };
        let suffix = &rest[end + 1..];
        if suffix.contains("{shard") {
            return Err(VolumeError::Configuration(format!(
                "shard template '{template}' has more than one placeholder"
            )));
        }
        Ok(Self {
            prefix: template[..start].to_string(),
            suffix: suffix.to_string(),
            width,
        })
    }

    /// Path of shard number `index`
    pub fn path(&self, index: usize) -> PathBuf {
        PathBuf::from(format!(
            "{}{:0width$}{}",
            self.prefix,
            index,
            self.suffix,
            width = self.width
        ))
    }

    /// Glob pattern matching every shard this template can produce
    pub fn glob(&self) -> String {
        format!("{}*{}", self.prefix, self.suffix)
    }

    /// Shard number of `path` if it is a name this template produces
    pub fn index_of(&self, path: &Path) -> Option<usize> {
        let name = path.to_str()?;
        let digits = name.strip_prefix(&self.prefix)?.strip_suffix(&self.suffix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl FromStr for ShardTemplate {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ShardTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{shard:0{}}}{}", self.prefix, self.width, self.suffix)
    }
}

// ─── Writing ──────────────────────────────────────────────────────────────────
pub fn write_file_header<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())
}

/// Serialise one pair; returns the number of bytes written.
pub fn write_record<W: Write>(w: &mut W, pair: &VolumePair) -> io::Result<u64> {
    let header = RecordHeader {
        features: TensorHeader::describe(&pair.features),
        labels:   TensorHeader::describe(&pair.labels),
    };
    let json = serde_json::to_vec(&header)?;
    let header_len = u32::try_from(json.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record header too large"))?;

    w.write_all(&header_len.to_le_bytes())?;
    w.write_all(&json)?;
    pair.features.data().write_le(w)?;
    pair.labels.data().write_le(w)?;

    Ok(4 + json.len() as u64 + header.features.nbytes + header.labels.nbytes)
}

// ─── Reading ──────────────────────────────────────────────────────────────────
/// Check magic and version at the start of a (decompressed) shard stream.
pub fn read_file_header<R: Read>(r: &mut R, path: &Path) -> Result<u64> {
    let mut buf = [0u8; 12];
    let n = fill(r, &mut buf).map_err(|e| VolumeError::io(path, e))?;
    if n < buf.len() || &buf[..8] != MAGIC {
        return Err(VolumeError::corrupt(path, 0, "missing VOLSHARD file header"));
    }
    let version = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if version != VERSION {
        return Err(VolumeError::corrupt(path, 8, format!("unsupported shard version {version}")));
    }
    Ok(buf.len() as u64)
}

/// Decode the record starting at byte `offset`.
///
/// Returns `None` on a clean end of file, otherwise the pair and the
/// number of bytes the record occupied.
pub fn read_record<R: Read>(
    r:      &mut R,
    path:   &Path,
    offset: u64,
) -> Result<Option<(VolumePair, u64)>> {
    let mut len_buf = [0u8; 4];
    match fill(r, &mut len_buf).map_err(|e| VolumeError::io(path, e))? {
        0 => return Ok(None),
        4 => {}
        _ => return Err(VolumeError::corrupt(path, offset, "truncated record length")),
    }
    let header_len = u32::from_le_bytes(len_buf);
    if header_len == 0 || header_len > MAX_HEADER_LEN {
        return Err(VolumeError::corrupt(
            path,
            offset,
            format!("implausible header length {header_len}"),
        ));
    }

    let json = read_exactly(r, u64::from(header_len), path, offset, "record header")?;
    let header: RecordHeader = serde_json::from_slice(&json)
        .map_err(|e| VolumeError::corrupt(path, offset, format!("unreadable record header: {e}")))?;

    for (name, t) in [("features", &header.features), ("labels", &header.labels)] {
        let expected = t.expected_nbytes().ok_or_else(|| {
            VolumeError::corrupt(
                path,
                offset,
                format!("{name} shape {} as {} overflows the addressable size", t.shape, t.dtype),
            )
        })?;
        if t.nbytes != expected {
            return Err(VolumeError::corrupt(
                path,
                offset,
                format!(
                    "{name} shape {} as {} needs {expected} bytes, record stores {}",
                    t.shape, t.dtype, t.nbytes
                ),
            ));
        }
    }
    if header.features.shape != header.labels.shape {
        return Err(VolumeError::corrupt(
            path,
            offset,
            format!(
                "feature shape {} differs from label shape {}",
                header.features.shape, header.labels.shape
            ),
        ));
    }

    let features = read_tensor(r, &header.features, path, offset, "feature payload")?;
    let labels = read_tensor(r, &header.labels, path, offset, "label payload")?;
    let consumed = 4 + u64::from(header_len) + header.features.nbytes + header.labels.nbytes;

    Ok(Some((VolumePair::new(features, labels), consumed)))
}

fn read_tensor<R: Read>(
    r:      &mut R,
    header: &TensorHeader,
    path:   &Path,
    offset: u64,
    what:   &str,
) -> Result<Volume> {
    let bytes = read_exactly(r, header.nbytes, path, offset, what)?;
    let data = VoxelData::from_le_bytes(header.dtype, &bytes)
        .ok_or_else(|| VolumeError::corrupt(path, offset, format!("{what} is not whole elements")))?;
    Volume::new(header.shape, data)
        .map_err(|e| VolumeError::corrupt(path, offset, e.to_string()))
}

fn read_exactly<R: Read>(r: &mut R, n: u64, path: &Path, offset: u64, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref()
        .take(n)
        .read_to_end(&mut buf)
        .map_err(|e| VolumeError::io(path, e))?;
    if buf.len() as u64 != n {
        return Err(VolumeError::corrupt(
            path,
            offset,
            format!("truncated {what}: expected {n} bytes, found {}", buf.len()),
        ));
    }
    Ok(buf)
}

/// Read until `buf` is full or EOF; returns how many bytes were read.
fn fill<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}

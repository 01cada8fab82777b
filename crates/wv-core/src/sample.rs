//! Sample formats and raw sample buffers
//!
//! Every position and length in WaveVault is counted in samples. Sample
//! data moves through the engine as untyped byte buffers tagged with a
//! `SampleFormat`; conversion between formats is element-wise.

use std::fmt;

/// Type alias for a signed 64-bit sample index or length
pub type SampleCount = i64;

/// Numeric encoding of one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SampleFormat {
    /// 16-bit signed integer
    Int16,
    /// 24-bit signed integer, packed 3-byte little-endian
    Int24,
    /// 32-bit IEEE float
    Float,
}

impl SampleFormat {
    /// Byte width of one sample in this format
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int24 => 3,
            Self::Float => 4,
        }
    }

    /// Wire code used in project files: `(width << 16) | flags`
    #[inline]
    pub const fn code(self) -> u32 {
        match self {
            Self::Int16 => 0x0002_0001,
            Self::Int24 => 0x0004_0001,
            Self::Float => 0x0004_000F,
        }
    }

    /// Decode a wire code; `None` for unrecognized values
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x0002_0001 => Some(Self::Int16),
            0x0004_0001 => Some(Self::Int24),
            0x0004_000F => Some(Self::Float),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Int16 => "16-bit PCM",
            Self::Int24 => "24-bit PCM",
            Self::Float => "32-bit float",
        }
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::Float
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An owned, contiguous run of samples in a single format
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    data: Vec<u8>,
    format: SampleFormat,
}

impl SampleBuffer {
    /// Allocate a zeroed buffer of `len` samples
    pub fn new(len: usize, format: SampleFormat) -> Self {
        Self {
            data: vec![0u8; len * format.bytes()],
            format,
        }
    }

    /// Wrap existing bytes; `bytes.len()` must be a multiple of the width
    pub fn from_bytes(bytes: Vec<u8>, format: SampleFormat) -> Self {
        debug_assert_eq!(bytes.len() % format.bytes(), 0);
        Self {
            data: bytes,
            format,
        }
    }

    #[inline]
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Length in samples
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.format.bytes()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Byte slice covering samples `[start, start + len)`
    #[inline]
    pub fn slice(&self, start: usize, len: usize) -> &[u8] {
        let w = self.format.bytes();
        &self.data[start * w..(start + len) * w]
    }

    /// Mutable byte slice covering samples `[start, start + len)`
    #[inline]
    pub fn slice_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        let w = self.format.bytes();
        &mut self.data[start * w..(start + len) * w]
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONVERSION
// ═══════════════════════════════════════════════════════════════════════════

#[inline]
fn decode_one(src: &[u8], format: SampleFormat, index: usize) -> f32 {
    match format {
        SampleFormat::Int16 => {
            let i = index * 2;
            i16::from_le_bytes([src[i], src[i + 1]]) as f32 / 32768.0
        }
        SampleFormat::Int24 => {
            let i = index * 3;
            // Sign-extend the packed 3-byte value through the top byte
            let v = i32::from_le_bytes([0, src[i], src[i + 1], src[i + 2]]) >> 8;
            v as f32 / 8_388_608.0
        }
        SampleFormat::Float => {
            let i = index * 4;
            f32::from_le_bytes([src[i], src[i + 1], src[i + 2], src[i + 3]])
        }
    }
}

#[inline]
fn encode_one(dst: &mut [u8], format: SampleFormat, index: usize, value: f32) {
    match format {
        SampleFormat::Int16 => {
            let v = (value.clamp(-1.0, 1.0) * 32767.0) as i16;
            dst[index * 2..index * 2 + 2].copy_from_slice(&v.to_le_bytes());
        }
        SampleFormat::Int24 => {
            let v = (value.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
            let b = v.to_le_bytes();
            dst[index * 3..index * 3 + 3].copy_from_slice(&b[..3]);
        }
        SampleFormat::Float => {
            dst[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Copy `len` samples from `src` to `dst`, converting formats element-wise.
///
/// Same-format copies are a straight byte copy; narrowing conversions clamp
/// to the target range.
pub fn copy_samples(
    src: &[u8],
    src_format: SampleFormat,
    dst: &mut [u8],
    dst_format: SampleFormat,
    len: usize,
) {
    if src_format == dst_format {
        let n = len * src_format.bytes();
        dst[..n].copy_from_slice(&src[..n]);
        return;
    }

    for i in 0..len {
        let v = decode_one(src, src_format, i);
        encode_one(dst, dst_format, i, v);
    }
}

/// Zero samples `[start, start + len)` of `buf`.
///
/// All three formats encode zero as all-zero bytes.
pub fn clear_samples(buf: &mut [u8], format: SampleFormat, start: usize, len: usize) {
    let w = format.bytes();
    buf[start * w..(start + len) * w].fill(0);
}

/// Decode `dst.len()` samples from `src` into f32
pub fn samples_to_f32(src: &[u8], format: SampleFormat, dst: &mut [f32]) {
    if format == SampleFormat::Float {
        for (i, out) in dst.iter_mut().enumerate() {
            let b = i * 4;
            *out = f32::from_le_bytes([src[b], src[b + 1], src[b + 2], src[b + 3]]);
        }
        return;
    }
    for (i, out) in dst.iter_mut().enumerate() {
        *out = decode_one(src, format, i);
    }
}

/// Encode `src` into `dst` in the given format
pub fn f32_to_samples(src: &[f32], format: SampleFormat, dst: &mut [u8]) {
    for (i, &v) in src.iter().enumerate() {
        encode_one(dst, format, i, v);
    }
}

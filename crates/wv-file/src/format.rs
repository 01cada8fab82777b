//! .wvb File Format - Binary Block File Format
//!
//! File structure:
//! ```text
//! +----------------------------------------+
//! | Header (64 bytes)                      |
//! +----------------------------------------+
//! | Whole-block triple (min, max, rms)     |
//! +----------------------------------------+
//! | 1:65536 summary triples                |
//! +----------------------------------------+
//! | 1:256 summary triples                  |
//! +----------------------------------------+
//! | Sample data (absent for summary-only   |
//! |  files, e.g. alias blocks)             |
//! +----------------------------------------+
//! ```
//!
//! Each triple is 3 little-endian f32 values. Sample data is stored in the
//! block's own sample format. Readers memory-map the file so summary
//! queries never page in sample data.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use wv_core::{copy_samples, samples_to_f32, SampleFormat};

use crate::error::{FileError, FileResult};
use crate::summary::{BlockSummary, MinMaxRms, SUMMARY_256_DIVISOR, SUMMARY_64K_DIVISOR};

// ═══════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════

/// Magic number for .wvb files
pub const WVB_MAGIC: [u8; 4] = *b"WVB1";

/// Current format version
pub const WVB_VERSION: u16 = 1;

/// Header size in bytes
pub const WVB_HEADER_BYTES: usize = 64;

/// Bytes per summary triple
pub const TRIPLE_BYTES: usize = 12;

const FLAG_HAS_DATA: u8 = 0x01;

// ═══════════════════════════════════════════════════════════════════════════
// HEADER
// ═══════════════════════════════════════════════════════════════════════════

/// .wvb file header (64 bytes)
#[derive(Debug, Clone, Copy)]
pub struct WvbHeader {
    /// Sample encoding of the data section
    pub format: SampleFormat,
    /// Sample count covered by the summaries (and data, if present)
    pub num_samples: u64,
    /// Whether a sample data section follows the summaries
    pub has_data: bool,
}

impl WvbHeader {
    pub fn new(format: SampleFormat, num_samples: u64, has_data: bool) -> Self {
        Self {
            format,
            num_samples,
            has_data,
        }
    }

    /// Number of 1:256 triples
    pub fn frames_256(&self) -> usize {
        (self.num_samples as usize).div_ceil(SUMMARY_256_DIVISOR)
    }

    /// Number of 1:65536 triples
    pub fn frames_64k(&self) -> usize {
        (self.num_samples as usize).div_ceil(SUMMARY_64K_DIVISOR)
    }

    /// Byte offset of the whole-block triple
    pub fn offset_total(&self) -> usize {
        WVB_HEADER_BYTES
    }

    /// Byte offset of the 1:65536 section
    pub fn offset_64k(&self) -> usize {
        self.offset_total() + TRIPLE_BYTES
    }

    /// Byte offset of the 1:256 section
    pub fn offset_256(&self) -> usize {
        self.offset_64k() + self.frames_64k() * TRIPLE_BYTES
    }

    /// Byte offset of the sample data section
    pub fn offset_data(&self) -> usize {
        self.offset_256() + self.frames_256() * TRIPLE_BYTES
    }

    /// Total file size implied by this header
    pub fn file_bytes(&self) -> usize {
        let data = if self.has_data {
            self.num_samples as usize * self.format.bytes()
        } else {
            0
        };
        self.offset_data() + data
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; WVB_HEADER_BYTES] {
        let mut bytes = [0u8; WVB_HEADER_BYTES];
        bytes[0..4].copy_from_slice(&WVB_MAGIC);
        bytes[4..6].copy_from_slice(&WVB_VERSION.to_le_bytes());
        bytes[6] = if self.has_data { FLAG_HAS_DATA } else { 0 };
        bytes[8..12].copy_from_slice(&self.format.code().to_le_bytes());
        bytes[12..20].copy_from_slice(&self.num_samples.to_le_bytes());
        bytes
    }

    /// Deserialize and validate a header
    pub fn from_bytes(bytes: &[u8]) -> FileResult<Self> {
        if bytes.len() < WVB_HEADER_BYTES {
            return Err(FileError::InvalidFormat("header too short".to_string()));
        }
        if bytes[0..4] != WVB_MAGIC {
            return Err(FileError::InvalidFormat("bad magic number".to_string()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != WVB_VERSION {
            return Err(FileError::InvalidFormat(format!(
                "unsupported version: {version}"
            )));
        }
        let has_data = bytes[6] & FLAG_HAS_DATA != 0;
        let code = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let format = SampleFormat::from_code(code)
            .ok_or_else(|| FileError::InvalidFormat(format!("bad sample format code {code:#x}")))?;
        let num_samples = u64::from_le_bytes([
            bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18], bytes[19],
        ]);
        Ok(Self {
            format,
            num_samples,
            has_data,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WRITER
// ═══════════════════════════════════════════════════════════════════════════

/// Write a complete .wvb file: header, summaries, and (optionally) data.
///
/// `data` must hold exactly `len` samples in `format` when present.
pub fn write_wvb(
    path: &Path,
    format: SampleFormat,
    len: usize,
    summary: &BlockSummary,
    data: Option<&[u8]>,
) -> FileResult<()> {
    debug_assert_eq!(summary.frames_256.len(), len.div_ceil(SUMMARY_256_DIVISOR));
    if let Some(d) = data {
        debug_assert_eq!(d.len(), len * format.bytes());
    }

    let header = WvbHeader::new(format, len as u64, data.is_some());
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&header.to_bytes())?;
    writer.write_all(&summary.total.to_bytes())?;
    for frame in &summary.frames_64k {
        writer.write_all(&frame.to_bytes())?;
    }
    for frame in &summary.frames_256 {
        writer.write_all(&frame.to_bytes())?;
    }
    if let Some(d) = data {
        writer.write_all(d)?;
    }
    writer.flush()?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// MEMORY-MAPPED READER
// ═══════════════════════════════════════════════════════════════════════════

/// Memory-mapped .wvb file.
///
/// Only the header lives on the heap; summary and sample reads go straight
/// through the mapping.
pub struct WvbReader {
    header: WvbHeader,
    mmap: Mmap,
}

impl WvbReader {
    pub fn open(path: &Path) -> FileResult<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FileError::NotFound(path.display().to_string())
            } else {
                FileError::Io(e)
            }
        })?;

        // Safety: block files are written once and never mutated afterward
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < WVB_HEADER_BYTES {
            return Err(FileError::InvalidFormat(
                "file too small for header".to_string(),
            ));
        }
        let header = WvbHeader::from_bytes(&mmap[..WVB_HEADER_BYTES])?;
        if mmap.len() < header.file_bytes() {
            return Err(FileError::InvalidFormat(format!(
                "file truncated: {} bytes, header implies {}",
                mmap.len(),
                header.file_bytes()
            )));
        }
        Ok(Self { header, mmap })
    }

    #[inline]
    pub fn header(&self) -> &WvbHeader {
        &self.header
    }

    /// The whole-block triple
    pub fn total(&self) -> MinMaxRms {
        let off = self.header.offset_total();
        let bytes: [u8; TRIPLE_BYTES] = self.mmap[off..off + TRIPLE_BYTES]
            .try_into()
            .unwrap_or([0u8; TRIPLE_BYTES]);
        MinMaxRms::from_bytes(&bytes)
    }

    fn read_triples(&self, section: usize, count: usize, dst: &mut [f32], start: usize, len: usize) {
        dst[..len * 3].fill(0.0);
        let end = (start + len).min(count);
        for (i, frame_idx) in (start..end).enumerate() {
            let off = section + frame_idx * TRIPLE_BYTES;
            if off + TRIPLE_BYTES > self.mmap.len() {
                break;
            }
            let bytes: [u8; TRIPLE_BYTES] =
                match self.mmap[off..off + TRIPLE_BYTES].try_into() {
                    Ok(b) => b,
                    Err(_) => break,
                };
            let t = MinMaxRms::from_bytes(&bytes);
            dst[i * 3] = t.min;
            dst[i * 3 + 1] = t.max;
            dst[i * 3 + 2] = t.rms;
        }
    }

    /// Read `len` triples of the 1:256 summary starting at frame `start`.
    /// Out-of-range frames are zero-filled.
    pub fn read_256(&self, dst: &mut [f32], start: usize, len: usize) {
        self.read_triples(self.header.offset_256(), self.header.frames_256(), dst, start, len);
    }

    /// Read `len` triples of the 1:65536 summary starting at frame `start`
    pub fn read_64k(&self, dst: &mut [f32], start: usize, len: usize) {
        self.read_triples(self.header.offset_64k(), self.header.frames_64k(), dst, start, len);
    }

    /// Read `len` samples starting at `start`, converting into `format`.
    ///
    /// Returns the number of samples actually available; the caller is
    /// responsible for zero-filling any shortfall.
    pub fn read_data(
        &self,
        dst: &mut [u8],
        format: SampleFormat,
        start: usize,
        len: usize,
    ) -> FileResult<usize> {
        if !self.header.has_data {
            return Err(FileError::NotAvailable(
                "summary-only block file".to_string(),
            ));
        }
        let avail = (self.header.num_samples as usize).saturating_sub(start);
        let n = len.min(avail);
        let width = self.header.format.bytes();
        let off = self.header.offset_data() + start * width;
        copy_samples(
            &self.mmap[off..off + n * width],
            self.header.format,
            dst,
            format,
            n,
        );
        Ok(n)
    }

    /// Read `len` samples starting at `start` as f32
    pub fn read_f32(&self, dst: &mut [f32], start: usize, len: usize) -> FileResult<usize> {
        if !self.header.has_data {
            return Err(FileError::NotAvailable(
                "summary-only block file".to_string(),
            ));
        }
        let avail = (self.header.num_samples as usize).saturating_sub(start);
        let n = len.min(avail);
        let width = self.header.format.bytes();
        let off = self.header.offset_data() + start * width;
        samples_to_f32(&self.mmap[off..off + n * width], self.header.format, &mut dst[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wv_core::f32_to_samples;

    fn write_test_block(dir: &Path, samples: &[f32], format: SampleFormat) -> std::path::PathBuf {
        let path = dir.join("block.wvb");
        let mut data = vec![0u8; samples.len() * format.bytes()];
        f32_to_samples(samples, format, &mut data);
        let summary = BlockSummary::compute(samples);
        write_wvb(&path, format, samples.len(), &summary, Some(&data)).unwrap();
        path
    }

    #[test]
    fn test_header_roundtrip() {
        let header = WvbHeader::new(SampleFormat::Int24, 12345, true);
        let parsed = WvbHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed.format, SampleFormat::Int24);
        assert_eq!(parsed.num_samples, 12345);
        assert!(parsed.has_data);
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert!(WvbHeader::from_bytes(&[0u8; WVB_HEADER_BYTES]).is_err());
        assert!(WvbHeader::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_write_and_read_data() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0) - 0.5).collect();
        let path = write_test_block(dir.path(), &samples, SampleFormat::Float);

        let reader = WvbReader::open(&path).unwrap();
        assert_eq!(reader.header().num_samples, 1000);

        let mut out = vec![0f32; 10];
        let n = reader.read_f32(&mut out, 500, 10).unwrap();
        assert_eq!(n, 10);
        assert_eq!(out, &samples[500..510]);
    }

    #[test]
    fn test_read_clamps_to_length() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![0.5f32; 100];
        let path = write_test_block(dir.path(), &samples, SampleFormat::Float);

        let reader = WvbReader::open(&path).unwrap();
        let mut out = vec![0f32; 20];
        let n = reader.read_f32(&mut out, 90, 20).unwrap();
        assert_eq!(n, 10);
    }

    #[test]
    fn test_summary_sections() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..600).map(|i| if i < 256 { 0.5 } else { -0.25 }).collect();
        let path = write_test_block(dir.path(), &samples, SampleFormat::Float);

        let reader = WvbReader::open(&path).unwrap();
        let mut triples = vec![0f32; 9];
        reader.read_256(&mut triples, 0, 3);
        // First frame covers the 0.5 plateau
        assert_eq!(triples[0], 0.5);
        assert_eq!(triples[1], 0.5);
        // Second frame covers the -0.25 plateau
        assert_eq!(triples[3], -0.25);
        assert_eq!(triples[4], -0.25);

        let total = reader.total();
        assert_eq!(total.min, -0.25);
        assert_eq!(total.max, 0.5);
    }

    #[test]
    fn test_summary_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.wvb");
        let samples = vec![0.1f32; 300];
        let summary = BlockSummary::compute(&samples);
        write_wvb(&path, SampleFormat::Float, 300, &summary, None).unwrap();

        let reader = WvbReader::open(&path).unwrap();
        assert!(!reader.header().has_data);
        let mut out = vec![0f32; 4];
        assert!(reader.read_f32(&mut out, 0, 4).is_err());

        let mut triples = vec![0f32; 6];
        reader.read_256(&mut triples, 0, 2);
        assert!((triples[2] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_int16_data_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![0.5f32, -0.5, 0.25, -0.25];
        let path = write_test_block(dir.path(), &samples, SampleFormat::Int16);

        let reader = WvbReader::open(&path).unwrap();
        let mut out = vec![0u8; 16];
        let n = reader.read_data(&mut out, SampleFormat::Float, 0, 4).unwrap();
        assert_eq!(n, 4);
        let mut back = vec![0f32; 4];
        samples_to_f32(&out, SampleFormat::Float, &mut back);
        for (a, b) in back.iter().zip(&samples) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}

//! On-demand block files
//!
//! Two variants defer work to a background pass owned by the host:
//!
//! - `OdPcmAliasBlockFile`: a PCM alias whose summary has not been
//!   computed yet. Sample reads work immediately (PCM is seekable); the
//!   display shows a placeholder until `compute_summary` runs.
//! - `OdDecodeBlockFile`: a window over a compressed file. Neither data
//!   nor summary exist until `materialize` decodes the window into a
//!   backing .wvb.
//!
//! Readiness is reported through `is_data_available` /
//! `is_summary_available`; the display path turns an unavailable summary
//! into a retry-later sentinel rather than an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use wv_core::{f32_to_samples, SampleFormat};

use crate::alias::read_wav_window;
use crate::block::{zero_fill, BlockCells, BlockFile, XmlElement};
use crate::decoder::{decode_window, DecoderKind};
use crate::error::{FileError, FileResult};
use crate::format::{write_wvb, WvbReader};
use crate::summary::{min_max_rms_of, BlockSummary, MinMaxRms};

/// Pending-summary bit in the sequence's on-demand work mask
pub const OD_FLAG_PCM_SUMMARY: u32 = 1 << 0;

struct Ready {
    reader: WvbReader,
    total: MinMaxRms,
}

fn open_ready(path: &Path) -> FileResult<Ready> {
    let reader = WvbReader::open(path)?;
    let total = reader.total();
    Ok(Ready { reader, total })
}

// ═══════════════════════════════════════════════════════════════════════════
// OD PCM ALIAS
// ═══════════════════════════════════════════════════════════════════════════

/// A PCM alias block whose summary is computed in the background
pub struct OdPcmAliasBlockFile {
    summary_path: PathBuf,
    alias_path: PathBuf,
    alias_start: u64,
    channel: u16,
    cells: BlockCells,
    summary: RwLock<Option<Ready>>,
}

impl OdPcmAliasBlockFile {
    pub fn new(
        summary_path: PathBuf,
        alias_path: PathBuf,
        alias_start: u64,
        len: usize,
        channel: u16,
    ) -> Arc<Self> {
        Arc::new(Self {
            summary_path,
            alias_path,
            alias_start,
            channel,
            cells: BlockCells::new(len),
            summary: RwLock::new(None),
        })
    }

    /// Reopen from a saved project; picks up the summary if a previous
    /// session already computed it.
    pub fn open(
        summary_path: PathBuf,
        alias_path: PathBuf,
        alias_start: u64,
        len: usize,
        channel: u16,
    ) -> Arc<Self> {
        let summary = open_ready(&summary_path).ok();
        Arc::new(Self {
            summary_path,
            alias_path,
            alias_start,
            channel,
            cells: BlockCells::new(len),
            summary: RwLock::new(summary),
        })
    }

    /// Compute and persist the summary. Called by the host's background
    /// task; idempotent.
    pub fn compute_summary(&self) -> FileResult<()> {
        if self.summary.read().is_some() {
            return Ok(());
        }
        let len = self.len();
        let mut samples =
            read_wav_window(&self.alias_path, self.channel, self.alias_start, len)?;
        samples.resize(len, 0.0);
        let computed = BlockSummary::compute(&samples);
        write_wvb(&self.summary_path, SampleFormat::Float, len, &computed, None)?;
        *self.summary.write() = Some(open_ready(&self.summary_path)?);
        Ok(())
    }

    fn read_window(&self, start: usize, len: usize) -> FileResult<Vec<f32>> {
        read_wav_window(
            &self.alias_path,
            self.channel,
            self.alias_start + start as u64,
            len,
        )
    }
}

impl BlockFile for OdPcmAliasBlockFile {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn format(&self) -> SampleFormat {
        SampleFormat::Float
    }

    fn file_name(&self) -> Option<&Path> {
        Some(&self.summary_path)
    }

    fn is_alias(&self) -> bool {
        true
    }

    fn is_summary_available(&self) -> bool {
        self.summary.read().is_some()
    }

    fn read_data(
        &self,
        dst: &mut [u8],
        format: SampleFormat,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> FileResult<usize> {
        let wanted = len.min(self.len().saturating_sub(start));
        match self.read_window(start, wanted) {
            Ok(samples) => {
                let n = samples.len();
                f32_to_samples(&samples, format, dst);
                if n < len {
                    let w = format.bytes();
                    zero_fill(&mut dst[n * w..], format, len - n);
                }
                Ok(n)
            }
            Err(e) if may_throw => Err(e),
            Err(_) => {
                zero_fill(dst, format, len);
                Ok(0)
            }
        }
    }

    fn read_256(&self, dst: &mut [f32], start: usize, len: usize) -> bool {
        match &*self.summary.read() {
            Some(ready) => {
                ready.reader.read_256(dst, start, len);
                true
            }
            None => {
                dst[..len * 3].fill(0.0);
                false
            }
        }
    }

    fn read_64k(&self, dst: &mut [f32], start: usize, len: usize) -> bool {
        match &*self.summary.read() {
            Some(ready) => {
                ready.reader.read_64k(dst, start, len);
                true
            }
            None => {
                dst[..len * 3].fill(0.0);
                false
            }
        }
    }

    fn min_max_rms(&self, _may_throw: bool) -> FileResult<MinMaxRms> {
        Ok(self
            .summary
            .read()
            .as_ref()
            .map(|r| r.total)
            .unwrap_or_default())
    }

    fn min_max_rms_range(
        &self,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> FileResult<MinMaxRms> {
        let wanted = len.min(self.len().saturating_sub(start));
        match self.read_window(start, wanted) {
            Ok(samples) => Ok(min_max_rms_of(&samples)),
            Err(e) if may_throw => Err(e),
            Err(_) => Ok(MinMaxRms::default()),
        }
    }

    fn set_length(&self, len: usize) {
        self.cells.truncate(len);
    }

    fn lock(&self) {
        self.cells.lock();
    }

    fn unlock(&self) {
        self.cells.unlock();
    }

    fn close_lock(&self) {
        self.cells.lock();
    }

    fn is_locked(&self) -> bool {
        self.cells.is_locked()
    }

    fn clone_to(&self, path: &Path) -> FileResult<Arc<dyn BlockFile>> {
        if self.is_summary_available() {
            std::fs::copy(&self.summary_path, path)?;
        }
        Ok(OdPcmAliasBlockFile::open(
            path.to_path_buf(),
            self.alias_path.clone(),
            self.alias_start,
            self.len(),
            self.channel,
        ))
    }

    fn xml_element(&self) -> XmlElement {
        let name = self
            .summary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        XmlElement::new("odpcmaliasblockfile")
            .attr("summaryfile", name)
            .attr("aliasfile", self.alias_path.display())
            .attr("aliasstart", self.alias_start)
            .attr("aliaslen", self.len())
            .attr("aliaschannel", self.channel)
    }

    fn od_flags(&self) -> u32 {
        if self.is_summary_available() {
            0
        } else {
            OD_FLAG_PCM_SUMMARY
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// OD DECODE
// ═══════════════════════════════════════════════════════════════════════════

/// A window over a compressed source, decoded on demand into a .wvb
pub struct OdDecodeBlockFile {
    target_path: PathBuf,
    audio_path: PathBuf,
    audio_start: u64,
    channel: u16,
    kind: DecoderKind,
    format: SampleFormat,
    cells: BlockCells,
    ready: RwLock<Option<Ready>>,
}

impl OdDecodeBlockFile {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target_path: PathBuf,
        audio_path: PathBuf,
        audio_start: u64,
        len: usize,
        channel: u16,
        format: SampleFormat,
        kind: DecoderKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            target_path,
            audio_path,
            audio_start,
            channel,
            kind,
            format,
            cells: BlockCells::new(len),
            ready: RwLock::new(None),
        })
    }

    /// Reopen from a saved project; picks up the backing file if a
    /// previous session already decoded it.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        target_path: PathBuf,
        audio_path: PathBuf,
        audio_start: u64,
        len: usize,
        channel: u16,
        format: SampleFormat,
        kind: DecoderKind,
    ) -> Arc<Self> {
        let ready = open_ready(&target_path).ok();
        Arc::new(Self {
            target_path,
            audio_path,
            audio_start,
            channel,
            kind,
            format,
            cells: BlockCells::new(len),
            ready: RwLock::new(ready),
        })
    }

    pub fn decoder_kind(&self) -> DecoderKind {
        self.kind
    }

    /// Decode the window and write the backing .wvb. Called by the host's
    /// background task; idempotent.
    pub fn materialize(&self) -> FileResult<()> {
        if self.ready.read().is_some() {
            return Ok(());
        }
        let len = self.len();
        let mut samples = decode_window(&self.audio_path, self.channel, self.audio_start, len)?;
        samples.resize(len, 0.0);

        let mut data = vec![0u8; len * self.format.bytes()];
        f32_to_samples(&samples, self.format, &mut data);
        let summary = BlockSummary::compute(&samples);
        write_wvb(&self.target_path, self.format, len, &summary, Some(&data))?;
        *self.ready.write() = Some(open_ready(&self.target_path)?);
        Ok(())
    }
}

impl BlockFile for OdDecodeBlockFile {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn format(&self) -> SampleFormat {
        self.format
    }

    fn file_name(&self) -> Option<&Path> {
        Some(&self.target_path)
    }

    fn is_data_available(&self) -> bool {
        self.ready.read().is_some()
    }

    fn is_summary_available(&self) -> bool {
        self.ready.read().is_some()
    }

    fn read_data(
        &self,
        dst: &mut [u8],
        format: SampleFormat,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> FileResult<usize> {
        let guard = self.ready.read();
        match &*guard {
            Some(ready) => {
                let wanted = len.min(self.len().saturating_sub(start));
                let n = ready.reader.read_data(dst, format, start, wanted)?;
                if n < len {
                    let w = format.bytes();
                    zero_fill(&mut dst[n * w..], format, len - n);
                }
                Ok(n)
            }
            None if may_throw => Err(FileError::NotAvailable(
                self.audio_path.display().to_string(),
            )),
            None => {
                zero_fill(dst, format, len);
                Ok(0)
            }
        }
    }

    fn read_256(&self, dst: &mut [f32], start: usize, len: usize) -> bool {
        match &*self.ready.read() {
            Some(ready) => {
                ready.reader.read_256(dst, start, len);
                true
            }
            None => {
                dst[..len * 3].fill(0.0);
                false
            }
        }
    }

    fn read_64k(&self, dst: &mut [f32], start: usize, len: usize) -> bool {
        match &*self.ready.read() {
            Some(ready) => {
                ready.reader.read_64k(dst, start, len);
                true
            }
            None => {
                dst[..len * 3].fill(0.0);
                false
            }
        }
    }

    fn min_max_rms(&self, _may_throw: bool) -> FileResult<MinMaxRms> {
        Ok(self
            .ready
            .read()
            .as_ref()
            .map(|r| r.total)
            .unwrap_or_default())
    }

    fn min_max_rms_range(
        &self,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> FileResult<MinMaxRms> {
        let guard = self.ready.read();
        match &*guard {
            Some(ready) => {
                let wanted = len.min(self.len().saturating_sub(start));
                let mut samples = vec![0f32; wanted];
                let n = ready.reader.read_f32(&mut samples, start, wanted)?;
                Ok(min_max_rms_of(&samples[..n]))
            }
            None if may_throw => Err(FileError::NotAvailable(
                self.audio_path.display().to_string(),
            )),
            None => Ok(MinMaxRms::default()),
        }
    }

    fn set_length(&self, len: usize) {
        self.cells.truncate(len);
    }

    fn lock(&self) {
        self.cells.lock();
    }

    fn unlock(&self) {
        self.cells.unlock();
    }

    fn close_lock(&self) {
        self.cells.lock();
    }

    fn is_locked(&self) -> bool {
        self.cells.is_locked()
    }

    fn clone_to(&self, path: &Path) -> FileResult<Arc<dyn BlockFile>> {
        if self.is_data_available() {
            std::fs::copy(&self.target_path, path)?;
        }
        Ok(OdDecodeBlockFile::open(
            path.to_path_buf(),
            self.audio_path.clone(),
            self.audio_start,
            self.len(),
            self.channel,
            self.format,
            self.kind,
        ))
    }

    fn xml_element(&self) -> XmlElement {
        let name = self
            .target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        XmlElement::new("oddecodeblockfile")
            .attr("summaryfile", name)
            .attr("aliasfile", self.audio_path.display())
            .attr("aliasstart", self.audio_start)
            .attr("aliaslen", self.len())
            .attr("aliaschannel", self.channel)
            .attr("decodetype", self.kind.name())
    }

    fn od_flags(&self) -> u32 {
        if self.is_data_available() {
            0
        } else {
            self.kind.flag()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, frames: usize) -> Vec<f32> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let mut samples = Vec::with_capacity(frames);
        for i in 0..frames {
            let v = ((i % 64) as f32 / 64.0) - 0.5;
            samples.push(v);
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();
        samples
    }

    #[test]
    fn test_od_alias_summary_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("src.wav");
        write_test_wav(&wav, 500);

        let block = OdPcmAliasBlockFile::new(
            dir.path().join("od.wvb"),
            wav,
            0,
            500,
            0,
        );
        assert!(!block.is_summary_available());
        assert_eq!(block.od_flags(), OD_FLAG_PCM_SUMMARY);

        // Data reads work before the summary exists
        let mut dst = vec![0u8; 500 * 4];
        let n = block
            .read_data(&mut dst, SampleFormat::Float, 0, 500, true)
            .unwrap();
        assert_eq!(n, 500);

        // Summary reads report unavailability
        let mut triples = vec![1.0f32; 6];
        assert!(!block.read_256(&mut triples, 0, 2));
        assert!(triples.iter().all(|&v| v == 0.0));

        block.compute_summary().unwrap();
        assert!(block.is_summary_available());
        assert_eq!(block.od_flags(), 0);
        assert!(block.read_256(&mut triples, 0, 2));
        assert!(triples.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_od_decode_unavailable_reads() {
        let dir = tempfile::tempdir().unwrap();
        let block = OdDecodeBlockFile::new(
            dir.path().join("dec.wvb"),
            dir.path().join("missing.flac"),
            0,
            64,
            0,
            SampleFormat::Float,
            DecoderKind::Flac,
        );
        assert!(!block.is_data_available());
        assert_eq!(block.od_flags(), DecoderKind::Flac.flag());

        let mut dst = vec![0xffu8; 64 * 4];
        let n = block
            .read_data(&mut dst, SampleFormat::Float, 0, 64, false)
            .unwrap();
        assert_eq!(n, 0);
        assert!(dst.iter().all(|&b| b == 0));

        assert!(block
            .read_data(&mut dst, SampleFormat::Float, 0, 64, true)
            .is_err());
    }
}

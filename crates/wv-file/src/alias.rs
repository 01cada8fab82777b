//! Alias block files: windows over external WAV files
//!
//! An alias block does not own sample data. Reads decode the foreign file
//! on every call; only the summary lives in the project directory (a
//! summary-only .wvb).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use wv_core::{f32_to_samples, SampleFormat};

use crate::block::{zero_fill, BlockCells, BlockFile, XmlElement};
use crate::error::{FileError, FileResult};
use crate::format::{write_wvb, WvbReader};
use crate::summary::{min_max_rms_of, BlockSummary, MinMaxRms};

/// Read `len` samples of one channel from a WAV file, starting at frame
/// `start`. Returns fewer samples when the file is shorter.
pub(crate) fn read_wav_window(
    path: &Path,
    channel: u16,
    start: u64,
    len: usize,
) -> FileResult<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channel as usize >= channels {
        return Err(FileError::WavError(format!(
            "channel {channel} out of range for {}-channel file",
            channels
        )));
    }

    let total = reader.duration() as u64;
    let start = start.min(total);
    let n = len.min((total - start) as usize);
    reader.seek(start as u32)?;

    let mut out = Vec::with_capacity(n);
    match spec.sample_format {
        hound::SampleFormat::Float => {
            let mut samples = reader.samples::<f32>();
            for _ in 0..n {
                for ch in 0..channels {
                    let s = match samples.next() {
                        Some(s) => s?,
                        None => return Ok(out),
                    };
                    if ch == channel as usize {
                        out.push(s);
                    }
                }
            }
        }
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            let mut samples = reader.samples::<i32>();
            for _ in 0..n {
                for ch in 0..channels {
                    let s = match samples.next() {
                        Some(s) => s?,
                        None => return Ok(out),
                    };
                    if ch == channel as usize {
                        out.push(s as f32 / max_value);
                    }
                }
            }
        }
    }
    Ok(out)
}

/// A block whose samples live in an external PCM file
pub struct PcmAliasBlockFile {
    summary_path: PathBuf,
    alias_path: PathBuf,
    alias_start: u64,
    channel: u16,
    cells: BlockCells,
    total: MinMaxRms,
    reader: WvbReader,
}

impl PcmAliasBlockFile {
    /// Create the alias, computing and writing its summary file
    pub fn new(
        summary_path: PathBuf,
        alias_path: PathBuf,
        alias_start: u64,
        len: usize,
        channel: u16,
    ) -> FileResult<Arc<Self>> {
        let samples = read_wav_window(&alias_path, channel, alias_start, len)?;
        let summary = BlockSummary::compute(&samples);
        write_wvb(&summary_path, SampleFormat::Float, len, &summary, None)?;
        let reader = WvbReader::open(&summary_path)?;

        Ok(Arc::new(Self {
            summary_path,
            alias_path,
            alias_start,
            channel,
            cells: BlockCells::new(len),
            total: summary.total,
            reader,
        }))
    }

    /// Reopen from a saved project; the summary file must already exist
    pub fn open(
        summary_path: PathBuf,
        alias_path: PathBuf,
        alias_start: u64,
        len: usize,
        channel: u16,
    ) -> FileResult<Arc<Self>> {
        let reader = WvbReader::open(&summary_path)?;
        let total = reader.total();
        Ok(Arc::new(Self {
            summary_path,
            alias_path,
            alias_start,
            channel,
            cells: BlockCells::new(len),
            total,
            reader,
        }))
    }

    pub fn alias_path(&self) -> &Path {
        &self.alias_path
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

impl BlockFile for PcmAliasBlockFile {
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
            Err(e) => {
                log::warn!("alias read failed, zero-filling: {e}");
                zero_fill(dst, format, len);
                Ok(0)
            }
        }
    }

    fn read_256(&self, dst: &mut [f32], start: usize, len: usize) -> bool {
        self.reader.read_256(dst, start, len);
        true
    }

    fn read_64k(&self, dst: &mut [f32], start: usize, len: usize) -> bool {
        self.reader.read_64k(dst, start, len);
        true
    }

    fn min_max_rms(&self, _may_throw: bool) -> FileResult<MinMaxRms> {
        Ok(self.total)
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
        std::fs::copy(&self.summary_path, path)?;
        let copy = PcmAliasBlockFile::open(
            path.to_path_buf(),
            self.alias_path.clone(),
            self.alias_start,
            self.len(),
            self.channel,
        )?;
        Ok(copy)
    }

    fn xml_element(&self) -> XmlElement {
        let name = self
            .summary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        XmlElement::new("pcmaliasblockfile")
            .attr("summaryfile", name)
            .attr("aliasfile", self.alias_path.display())
            .attr("aliasstart", self.alias_start)
            .attr("aliaslen", self.len())
            .attr("aliaschannel", self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, channels: u16, frames: usize) -> Vec<f32> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let mut channel0 = Vec::with_capacity(frames);
        for i in 0..frames {
            let v = (i as f32 / frames as f32) - 0.5;
            channel0.push(v);
            for ch in 0..channels {
                writer.write_sample(if ch == 0 { v } else { -v }).unwrap();
            }
        }
        writer.finalize().unwrap();
        channel0
    }

    #[test]
    fn test_wav_window() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("src.wav");
        let channel0 = write_test_wav(&wav, 2, 200);

        let window = read_wav_window(&wav, 0, 50, 20).unwrap();
        assert_eq!(window, &channel0[50..70]);
    }

    #[test]
    fn test_wav_window_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("src.wav");
        write_test_wav(&wav, 1, 100);

        let window = read_wav_window(&wav, 0, 90, 50).unwrap();
        assert_eq!(window.len(), 10);
    }

    #[test]
    fn test_alias_block_reads_through() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("src.wav");
        let channel0 = write_test_wav(&wav, 2, 300);

        let block = PcmAliasBlockFile::new(
            dir.path().join("alias.wvb"),
            wav.clone(),
            100,
            150,
            0,
        )
        .unwrap();
        assert!(block.is_alias());
        assert_eq!(block.len(), 150);

        let mut dst = vec![0u8; 150 * 4];
        let n = block
            .read_data(&mut dst, SampleFormat::Float, 0, 150, true)
            .unwrap();
        assert_eq!(n, 150);
        let mut back = vec![0f32; 150];
        wv_core::samples_to_f32(&dst, SampleFormat::Float, &mut back);
        assert_eq!(back, &channel0[100..250]);
    }

    #[test]
    fn test_alias_reopen_keeps_summary() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("src.wav");
        write_test_wav(&wav, 1, 400);

        let summary_path = dir.path().join("alias.wvb");
        let block =
            PcmAliasBlockFile::new(summary_path.clone(), wav.clone(), 0, 400, 0).unwrap();
        let total = block.min_max_rms(true).unwrap();

        let reopened = PcmAliasBlockFile::open(summary_path, wav, 0, 400, 0).unwrap();
        assert_eq!(reopened.min_max_rms(true).unwrap(), total);
    }

    #[test]
    fn test_missing_alias_zero_fills() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("src.wav");
        write_test_wav(&wav, 1, 100);

        let block =
            PcmAliasBlockFile::new(dir.path().join("alias.wvb"), wav.clone(), 0, 100, 0).unwrap();
        std::fs::remove_file(&wav).unwrap();

        let mut dst = vec![0xffu8; 100 * 4];
        let n = block
            .read_data(&mut dst, SampleFormat::Float, 0, 100, false)
            .unwrap();
        assert_eq!(n, 0);
        assert!(dst.iter().all(|&b| b == 0));

        assert!(block
            .read_data(&mut dst, SampleFormat::Float, 0, 100, true)
            .is_err());
    }
}

//! Simple block files: owned sample data in a .wvb file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use wv_core::{samples_to_f32, SampleFormat};

use crate::block::{zero_fill, BlockCells, BlockFile, XmlElement};
use crate::error::{FileError, FileResult};
use crate::format::{write_wvb, WvbReader};
use crate::summary::{min_max_rms_of, BlockSummary, MinMaxRms};

/// A block file that owns its sample data.
///
/// Written once at creation (samples plus both summary levels), then
/// memory-mapped for all reads.
pub struct SimpleBlockFile {
    path: PathBuf,
    format: SampleFormat,
    cells: BlockCells,
    total: MinMaxRms,
    reader: WvbReader,
}

impl SimpleBlockFile {
    /// Write `len` samples of `data` (in `format`) to a new .wvb at `path`
    pub fn new(
        path: PathBuf,
        data: &[u8],
        len: usize,
        format: SampleFormat,
    ) -> FileResult<Arc<Self>> {
        let mut as_f32 = vec![0f32; len];
        samples_to_f32(&data[..len * format.bytes()], format, &mut as_f32);
        let summary = BlockSummary::compute(&as_f32);

        write_wvb(&path, format, len, &summary, Some(&data[..len * format.bytes()]))?;
        let reader = WvbReader::open(&path)?;

        Ok(Arc::new(Self {
            path,
            format,
            cells: BlockCells::new(len),
            total: summary.total,
            reader,
        }))
    }

    /// Reopen an existing .wvb written by a previous session.
    ///
    /// `len` may be smaller than the stored sample count (a truncation
    /// recorded in the project file).
    pub fn open(path: PathBuf, len: Option<usize>) -> FileResult<Arc<Self>> {
        let reader = WvbReader::open(&path)?;
        if !reader.header().has_data {
            return Err(FileError::InvalidFormat(format!(
                "{}: no data section in simple block",
                path.display()
            )));
        }
        let stored = reader.header().num_samples as usize;
        let len = len.map_or(stored, |l| l.min(stored));
        let format = reader.header().format;
        let total = reader.total();
        Ok(Arc::new(Self {
            path,
            format,
            cells: BlockCells::new(len),
            total,
            reader,
        }))
    }
}

impl BlockFile for SimpleBlockFile {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn format(&self) -> SampleFormat {
        self.format
    }

    fn file_name(&self) -> Option<&Path> {
        Some(&self.path)
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
        match self.reader.read_data(dst, format, start, wanted) {
            Ok(n) => {
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
        let mut samples = vec![0f32; wanted];
        match self.reader.read_f32(&mut samples, start, wanted) {
            Ok(n) => Ok(min_max_rms_of(&samples[..n])),
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
        std::fs::copy(&self.path, path)?;
        let copy = SimpleBlockFile::open(path.to_path_buf(), Some(self.len()))?;
        Ok(copy)
    }

    fn xml_element(&self) -> XmlElement {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        XmlElement::new("simpleblockfile")
            .attr("filename", name)
            .attr("len", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wv_core::f32_to_samples;

    fn make_block(dir: &Path, samples: &[f32]) -> Arc<SimpleBlockFile> {
        let mut data = vec![0u8; samples.len() * 4];
        f32_to_samples(samples, SampleFormat::Float, &mut data);
        SimpleBlockFile::new(
            dir.join("t.wvb"),
            &data,
            samples.len(),
            SampleFormat::Float,
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..500).map(|i| (i as f32).sin()).collect();
        let block = make_block(dir.path(), &samples);

        assert_eq!(block.len(), 500);
        let mut out = vec![0u8; 500 * 4];
        let n = block
            .read_data(&mut out, SampleFormat::Float, 0, 500, true)
            .unwrap();
        assert_eq!(n, 500);
        let mut back = vec![0f32; 500];
        samples_to_f32(&out, SampleFormat::Float, &mut back);
        assert_eq!(back, samples);
    }

    #[test]
    fn test_reopen_matches() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![0.25f32; 300];
        let block = make_block(dir.path(), &samples);
        let path = block.file_name().unwrap().to_path_buf();

        let reopened = SimpleBlockFile::open(path, None).unwrap();
        assert_eq!(reopened.len(), 300);
        assert_eq!(
            reopened.min_max_rms(true).unwrap(),
            block.min_max_rms(true).unwrap()
        );
    }

    #[test]
    fn test_truncation_limits_reads() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![1.0f32; 100];
        let block = make_block(dir.path(), &samples);
        block.set_length(60);
        assert_eq!(block.len(), 60);

        let mut out = vec![0u8; 100 * 4];
        let n = block
            .read_data(&mut out, SampleFormat::Float, 0, 100, false)
            .unwrap();
        assert_eq!(n, 60);
        let mut back = vec![0f32; 100];
        samples_to_f32(&out, SampleFormat::Float, &mut back);
        assert!(back[..60].iter().all(|&v| v == 1.0));
        assert!(back[60..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_range_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut samples = vec![0.0f32; 64];
        samples[10] = 0.9;
        samples[50] = -0.9;
        let block = make_block(dir.path(), &samples);

        let r = block.min_max_rms_range(0, 32, true).unwrap();
        assert_eq!(r.max, 0.9);
        assert_eq!(r.min, 0.0);
        let r = block.min_max_rms_range(32, 32, true).unwrap();
        assert_eq!(r.min, -0.9);
    }

    #[test]
    fn test_clone_to_new_path() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![0.5f32; 40];
        let block = make_block(dir.path(), &samples);

        let copy = block.clone_to(&dir.path().join("copy.wvb")).unwrap();
        assert_eq!(copy.len(), 40);
        let mut a = vec![0u8; 40 * 4];
        let mut b = vec![0u8; 40 * 4];
        block.read_data(&mut a, SampleFormat::Float, 0, 40, true).unwrap();
        copy.read_data(&mut b, SampleFormat::Float, 0, 40, true).unwrap();
        assert_eq!(a, b);
    }
}

//! Silent block files: zero-valued samples with no on-disk payload

use std::path::Path;
use std::sync::Arc;

use wv_core::SampleFormat;

use crate::block::{zero_fill, BlockCells, BlockFile, XmlElement};
use crate::error::FileResult;
use crate::summary::MinMaxRms;

/// A run of zero samples. Takes no disk space; any number of sequence
/// entries may share one instance.
#[derive(Debug)]
pub struct SilentBlockFile {
    cells: BlockCells,
    format: SampleFormat,
}

impl SilentBlockFile {
    pub fn new(len: usize, format: SampleFormat) -> Arc<Self> {
        Arc::new(Self {
            cells: BlockCells::new(len),
            format,
        })
    }
}

impl BlockFile for SilentBlockFile {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn format(&self) -> SampleFormat {
        self.format
    }

    fn file_name(&self) -> Option<&Path> {
        None
    }

    fn read_data(
        &self,
        dst: &mut [u8],
        format: SampleFormat,
        start: usize,
        len: usize,
        _may_throw: bool,
    ) -> FileResult<usize> {
        let n = len.min(self.len().saturating_sub(start));
        zero_fill(dst, format, len);
        Ok(n)
    }

    fn read_256(&self, dst: &mut [f32], _start: usize, len: usize) -> bool {
        dst[..len * 3].fill(0.0);
        true
    }

    fn read_64k(&self, dst: &mut [f32], _start: usize, len: usize) -> bool {
        dst[..len * 3].fill(0.0);
        true
    }

    fn min_max_rms(&self, _may_throw: bool) -> FileResult<MinMaxRms> {
        Ok(MinMaxRms::default())
    }

    fn min_max_rms_range(
        &self,
        _start: usize,
        _len: usize,
        _may_throw: bool,
    ) -> FileResult<MinMaxRms> {
        Ok(MinMaxRms::default())
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

    fn clone_to(&self, _path: &Path) -> FileResult<Arc<dyn BlockFile>> {
        Ok(SilentBlockFile::new(self.len(), self.format))
    }

    fn xml_element(&self) -> XmlElement {
        XmlElement::new("silentblockfile").attr("len", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_reads_zeros() {
        let block = SilentBlockFile::new(16, SampleFormat::Float);
        let mut dst = vec![0xffu8; 16 * 4];
        let n = block
            .read_data(&mut dst, SampleFormat::Float, 0, 16, true)
            .unwrap();
        assert_eq!(n, 16);
        assert!(dst.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_silent_has_no_file() {
        let block = SilentBlockFile::new(4, SampleFormat::Int16);
        assert!(block.file_name().is_none());
        assert!(!block.is_alias());
        assert_eq!(block.xml_element().attrs, vec![("len", "4".to_string())]);
    }
}

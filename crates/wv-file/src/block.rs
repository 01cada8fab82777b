//! The block file abstraction
//!
//! A block file is an immutable, reference-shared run of samples on disk
//! with a precomputed multi-resolution summary. Sequences hold them as
//! `Arc<dyn BlockFile>`; the `Arc` strong count is the reference count the
//! directory manager observes.

use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use wv_core::SampleFormat;

use crate::error::FileResult;
use crate::summary::MinMaxRms;

/// XML element a block file persists itself as, inside `<waveblock>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: &'static str,
    pub attrs: Vec<(&'static str, String)>,
}

impl XmlElement {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            attrs: Vec::new(),
        }
    }

    pub fn attr(mut self, name: &'static str, value: impl ToString) -> Self {
        self.attrs.push((name, value.to_string()));
        self
    }
}

/// An immutable, refcount-shared run of samples with cached summaries
pub trait BlockFile: Send + Sync {
    /// Current sample count (may have been truncated via `set_length`)
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoding of the stored samples
    fn format(&self) -> SampleFormat;

    /// Durable identity on disk; `None` for silent blocks
    fn file_name(&self) -> Option<&Path>;

    /// Whether samples are read through a foreign audio file
    fn is_alias(&self) -> bool {
        false
    }

    /// Whether sample data can be read right now (false for on-demand
    /// blocks that have not been decoded yet)
    fn is_data_available(&self) -> bool {
        true
    }

    /// Whether the decimated summaries can be read right now
    fn is_summary_available(&self) -> bool {
        true
    }

    /// Read `len` samples starting at `start`, converted into `format`.
    ///
    /// With `may_throw == false` this never fails: missing samples are
    /// zero-filled and the short count is returned.
    fn read_data(
        &self,
        dst: &mut [u8],
        format: SampleFormat,
        start: usize,
        len: usize,
        may_throw: bool,
    ) -> FileResult<usize>;

    /// Read `len` triples of the 1:256 summary into `dst` (3 floats per
    /// frame). Returns false (and zero-fills) if the summary could not be
    /// read.
    fn read_256(&self, dst: &mut [f32], start: usize, len: usize) -> bool;

    /// Read `len` triples of the 1:65536 summary
    fn read_64k(&self, dst: &mut [f32], start: usize, len: usize) -> bool;

    /// The whole-block triple
    fn min_max_rms(&self, may_throw: bool) -> FileResult<MinMaxRms>;

    /// The triple over samples `[start, start + len)`, computed from data
    fn min_max_rms_range(&self, start: usize, len: usize, may_throw: bool)
        -> FileResult<MinMaxRms>;

    /// Truncate the logical length. Only used to cut oversized legacy
    /// blocks down before saving; never grows.
    fn set_length(&self, len: usize);

    /// Pin the file against deletion and relocation
    fn lock(&self);

    fn unlock(&self);

    /// Pin for project close; equivalent to `lock` for every variant
    fn close_lock(&self);

    fn is_locked(&self) -> bool;

    /// Duplicate this block onto a fresh path (used when a locked block
    /// cannot be shared by refcount)
    fn clone_to(&self, path: &Path) -> FileResult<Arc<dyn BlockFile>>;

    /// The element written inside `<waveblock>`
    fn xml_element(&self) -> XmlElement;

    /// Pending on-demand work, as a bitmask of `OD_FLAG_*` values
    fn od_flags(&self) -> u32 {
        0
    }
}

/// Mutable bookkeeping shared by every block file variant
#[derive(Debug)]
pub(crate) struct BlockCells {
    len: AtomicUsize,
    lock_count: AtomicI32,
}

impl BlockCells {
    pub fn new(len: usize) -> Self {
        Self {
            len: AtomicUsize::new(len),
            lock_count: AtomicI32::new(0),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn truncate(&self, len: usize) {
        // set_length never grows a block
        let _ = self
            .len
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.min(len))
            });
    }

    pub fn lock(&self) {
        self.lock_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unlock(&self) {
        self.lock_count.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock_count.load(Ordering::Relaxed) > 0
    }
}

/// Zero-fill `len` samples of `dst` in the given format
pub(crate) fn zero_fill(dst: &mut [u8], format: SampleFormat, len: usize) {
    dst[..len * format.bytes()].fill(0);
}

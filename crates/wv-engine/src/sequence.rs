//! The block-structured sample sequence
//!
//! A `Sequence` is an ordered run of samples stored as a concatenation of
//! immutable block files on disk. Every block except the last stays within
//! `[min_samples, max_samples]`, so random access is cheap and edits touch
//! a bounded amount of data.
//!
//! Mutations follow one commit protocol: build a candidate block list off
//! to the side, validate the invariants against it, then swap it in and
//! update the sample count. All disk I/O happens before the swap, so a
//! failed operation leaves the sequence observably unchanged.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use wv_core::{clear_samples, copy_samples, SampleBuffer, SampleCount, SampleFormat};
use wv_file::{BlockFile, DecoderKind, DirManager, SilentBlockFile};

use crate::error::{SeqResult, SequenceError};

// ═══════════════════════════════════════════════════════════════════════════
// BLOCK ENTRIES
// ═══════════════════════════════════════════════════════════════════════════

/// One entry of a sequence: a block file and the sample index it starts at
#[derive(Clone)]
pub struct SeqBlock {
    pub start: SampleCount,
    pub file: Arc<dyn BlockFile>,
}

impl SeqBlock {
    pub fn new(file: Arc<dyn BlockFile>, start: SampleCount) -> Self {
        Self { start, file }
    }

    /// The same block shifted by `delta` samples
    fn plus(&self, delta: SampleCount) -> Self {
        Self {
            start: self.start + delta,
            file: Arc::clone(&self.file),
        }
    }
}

pub type BlockArray = Vec<SeqBlock>;

#[inline]
fn overflows(a: SampleCount, b: SampleCount) -> bool {
    a.checked_add(b).is_none()
}

/// Clamp a signed length into an available buffer size
#[inline]
fn limit_buffer_size(avail: usize, len: SampleCount) -> usize {
    if len <= 0 {
        0
    } else {
        avail.min(len as usize)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SEQUENCE
// ═══════════════════════════════════════════════════════════════════════════

/// An editable, disk-backed run of samples in one format
pub struct Sequence {
    pub(crate) dir: Arc<dyn DirManager>,
    pub(crate) blocks: BlockArray,
    pub(crate) num_samples: SampleCount,
    pub(crate) format: SampleFormat,
    /// Smallest block the sizing policy will produce (except at the tail)
    pub(crate) min_samples: usize,
    /// Largest block any committed list may contain
    pub(crate) max_samples: usize,
    /// Byte cap the block bounds were derived from
    disk_bytes: usize,
    /// Set when loading found structural damage that was repaired
    pub(crate) error_opening: bool,
    /// Held for the duration of Delete; a background walker of the block
    /// list must hold it too
    delete_update_mutex: Arc<Mutex<()>>,
}

impl Sequence {
    /// An empty sequence using the process-wide disk block size
    pub fn new(dir: Arc<dyn DirManager>, format: SampleFormat) -> Self {
        Self::with_disk_block_size(dir, format, wv_core::max_disk_block_size())
    }

    /// An empty sequence with an explicit per-block byte cap
    pub fn with_disk_block_size(
        dir: Arc<dyn DirManager>,
        format: SampleFormat,
        disk_bytes: usize,
    ) -> Self {
        let min_samples = disk_bytes / format.bytes() / 2;
        Self {
            dir,
            blocks: BlockArray::new(),
            num_samples: 0,
            format,
            min_samples,
            max_samples: min_samples * 2,
            disk_bytes,
            error_opening: false,
            delete_update_mutex: Arc::new(Mutex::new(())),
        }
    }

    /// An empty sequence with this one's format and block bounds
    fn empty_like(&self, dir: Arc<dyn DirManager>) -> Self {
        Self {
            dir,
            blocks: BlockArray::new(),
            num_samples: 0,
            format: self.format,
            min_samples: self.min_samples,
            max_samples: self.max_samples,
            disk_bytes: self.disk_bytes,
            error_opening: false,
            delete_update_mutex: Arc::new(Mutex::new(())),
        }
    }

    /// Copy this whole sequence. Pass the destination project's directory
    /// manager when copying across projects.
    pub fn duplicate(&self, dir: Arc<dyn DirManager>) -> SeqResult<Sequence> {
        let mut dest = self.empty_like(dir);
        dest.paste(0, self)?;
        Ok(dest)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────────────

    #[inline]
    pub fn sample_format(&self) -> SampleFormat {
        self.format
    }

    #[inline]
    pub fn num_samples(&self) -> SampleCount {
        self.num_samples
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    #[inline]
    pub fn max_block_size(&self) -> usize {
        self.max_samples
    }

    #[inline]
    pub fn min_block_size(&self) -> usize {
        self.min_samples
    }

    /// The target length for newly produced blocks
    #[inline]
    pub fn ideal_block_size(&self) -> usize {
        self.max_samples
    }

    #[inline]
    pub fn blocks(&self) -> &[SeqBlock] {
        &self.blocks
    }

    #[inline]
    pub fn dir_manager(&self) -> &Arc<dyn DirManager> {
        &self.dir
    }

    /// Whether loading this sequence required structural repairs
    #[inline]
    pub fn error_opening(&self) -> bool {
        self.error_opening
    }

    pub(crate) fn set_error_opening(&mut self) {
        self.error_opening = true;
    }

    pub(crate) fn restore_loaded(
        &mut self,
        blocks: BlockArray,
        num_samples: SampleCount,
        format: SampleFormat,
        max_samples: usize,
    ) {
        self.blocks = blocks;
        self.num_samples = num_samples;
        self.format = format;
        self.max_samples = max_samples;
        self.min_samples = max_samples / 2;
        self.disk_bytes = self.min_samples * 2 * format.bytes();
    }

    /// Acquire the delete-update lock. A background task walking the
    /// block list must hold this so Delete cannot restructure the list
    /// under it.
    pub fn delete_update_lock(&self) -> MutexGuard<'_, ()> {
        self.delete_update_mutex.lock()
    }

    /// Pin every block file against deletion and relocation
    pub fn lock_all(&self) {
        for b in &self.blocks {
            b.file.lock();
        }
    }

    pub fn unlock_all(&self) {
        for b in &self.blocks {
            b.file.unlock();
        }
    }

    /// Pin every block file for project close
    pub fn close_lock_all(&self) {
        for b in &self.blocks {
            b.file.close_lock();
        }
    }

    /// Pending on-demand work across the block list, as a bitmask
    pub fn od_flags(&self) -> u32 {
        self.blocks.iter().fold(0, |acc, b| acc | b.file.od_flags())
    }

    /// Start of the block containing `pos`
    pub fn block_start(&self, pos: SampleCount) -> SampleCount {
        let b = self.find_block(pos);
        self.blocks[b].start
    }

    /// A chunk size that lands the caller on a block boundary, for
    /// efficient sequential reads. Nonzero and at most `max_block_size`.
    pub fn best_block_size(&self, start: SampleCount) -> usize {
        if start < 0 || start >= self.num_samples {
            return self.max_samples;
        }

        let num_blocks = self.blocks.len();
        let mut b = self.find_block(start);
        let block = &self.blocks[b];
        // start is in block
        let mut result = (block.start + block.file.len() as SampleCount - start) as usize;

        while result < self.min_samples && b + 1 < num_blocks {
            let length = self.blocks[b + 1].file.len();
            if result + length > self.max_samples {
                break;
            }
            b += 1;
            result += length;
        }

        debug_assert!(result > 0 && result <= self.max_samples);
        result
    }

    /// How many samples the next `append` can take without splitting
    pub fn ideal_append_len(&self) -> usize {
        let max = self.max_block_size();
        match self.blocks.last() {
            None => max,
            Some(last) => {
                let last_len = last.file.len();
                if last_len == max {
                    max
                } else {
                    max - last_len
                }
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Locate
    // ───────────────────────────────────────────────────────────────────────

    /// Index of the block containing `pos`.
    ///
    /// Interpolation search: samples are roughly proportional to block
    /// index, so guess by ratio instead of bisecting.
    pub fn find_block(&self, pos: SampleCount) -> usize {
        debug_assert!(pos >= 0 && pos < self.num_samples);

        if pos == 0 {
            return 0;
        }

        let num_blocks = self.blocks.len();
        let mut lo = 0usize;
        let mut hi = num_blocks;
        let mut lo_samples: SampleCount = 0;
        let mut hi_samples: SampleCount = self.num_samples;

        loop {
            let frac = (pos - lo_samples) as f64 / (hi_samples - lo_samples) as f64;
            let guess = (lo + (frac * (hi - lo) as f64) as usize).min(hi - 1);
            let block = &self.blocks[guess];

            debug_assert!(block.file.len() > 0);
            debug_assert!(lo <= guess && guess < hi && lo < hi);

            if pos < block.start {
                hi = guess;
                hi_samples = block.start;
            } else {
                let next_start = block.start + block.file.len() as SampleCount;
                if pos < next_start {
                    return guess;
                }
                lo = guess + 1;
                lo_samples = next_start;
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Read
    // ───────────────────────────────────────────────────────────────────────

    /// Read one run of samples out of one block
    pub(crate) fn read(
        buffer: &mut [u8],
        format: SampleFormat,
        b: &SeqBlock,
        block_relative_start: usize,
        len: usize,
        may_throw: bool,
    ) -> SeqResult<bool> {
        debug_assert!(block_relative_start + len <= b.file.len());

        let result = b
            .file
            .read_data(buffer, format, block_relative_start, len, may_throw)?;
        if result != len {
            log::warn!("expected to read {len} samples, got {result} samples");
            return Ok(false);
        }
        Ok(true)
    }

    /// Copy `len` samples starting at `start` into `buffer`, converting to
    /// `format`.
    ///
    /// Out-of-range reads fail with `Inconsistent` when `may_throw`,
    /// otherwise zero-fill and return `Ok(false)`.
    pub fn get(
        &self,
        buffer: &mut [u8],
        format: SampleFormat,
        start: SampleCount,
        len: usize,
        may_throw: bool,
    ) -> SeqResult<bool> {
        if start == self.num_samples {
            return Ok(len == 0);
        }

        if start < 0
            || start > self.num_samples
            || overflows(start, len as SampleCount)
            || start + len as SampleCount > self.num_samples
        {
            if may_throw {
                return Err(SequenceError::Inconsistent("Get"));
            }
            clear_samples(buffer, format, 0, len);
            return Ok(false);
        }

        let b = self.find_block(start);
        self.get_from_block(b, buffer, format, start, len, may_throw)
    }

    /// `get` starting at a known block index
    pub(crate) fn get_from_block(
        &self,
        mut b: usize,
        buffer: &mut [u8],
        format: SampleFormat,
        mut start: SampleCount,
        mut len: usize,
        may_throw: bool,
    ) -> SeqResult<bool> {
        let mut result = true;
        let mut offset = 0usize;
        let width = format.bytes();

        while len > 0 {
            let block = &self.blocks[b];
            // start is in block
            let bstart = (start - block.start) as usize;
            let blen = len.min(block.file.len() - bstart);

            if !Self::read(&mut buffer[offset..], format, block, bstart, blen, may_throw)? {
                result = false;
            }

            len -= blen;
            offset += blen * width;
            b += 1;
            start += blen as SampleCount;
        }
        Ok(result)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Commit protocol
    // ───────────────────────────────────────────────────────────────────────

    /// Verify the structural invariants of a candidate block list.
    ///
    /// With `may_throw == false` the check only logs and debug-asserts;
    /// used after in-place commits whose consistency is provable.
    pub(crate) fn check_consistency(
        blocks: &BlockArray,
        max_samples: usize,
        from: usize,
        num_samples: SampleCount,
        whence: &'static str,
        may_throw: bool,
    ) -> SeqResult<()> {
        let num_blocks = blocks.len();
        let mut error = false;

        let mut pos = if from < num_blocks {
            blocks[from].start
        } else {
            num_samples
        };
        if from == 0 && pos != 0 {
            error = true;
        }

        let mut i = from;
        while !error && i < num_blocks {
            let seq_block = &blocks[i];
            if pos != seq_block.start {
                error = true;
                break;
            }
            let length = seq_block.file.len();
            // Aliased blocks loaded from legacy data may exceed the cap;
            // they are truncated on save instead
            if !seq_block.file.is_alias() && length > max_samples {
                error = true;
                break;
            }
            pos += length as SampleCount;
            i += 1;
        }
        if !error && pos != num_samples {
            error = true;
        }

        if error {
            log::error!("*** Consistency check failed after {whence}. ***");
            log::error!("{}", Self::debug_dump(blocks, num_samples));
            if may_throw {
                return Err(SequenceError::Inconsistent(whence));
            }
            debug_assert!(false, "consistency check failed after {whence}");
        }
        Ok(())
    }

    /// Validate a candidate list and atomically swap it in
    fn commit_changes_if_consistent(
        &mut self,
        new_blocks: BlockArray,
        num_samples: SampleCount,
        whence: &'static str,
    ) -> SeqResult<()> {
        Self::check_consistency(&new_blocks, self.max_samples, 0, num_samples, whence, true)?;

        self.blocks = new_blocks;
        self.num_samples = num_samples;
        Ok(())
    }

    /// Append blocks, validating only the added suffix; rolls back to the
    /// previous list on inconsistency.
    fn append_blocks_if_consistent(
        &mut self,
        additional_blocks: BlockArray,
        replace_last: bool,
        num_samples: SampleCount,
        whence: &'static str,
    ) -> SeqResult<()> {
        if additional_blocks.is_empty() {
            return Ok(());
        }

        let mut replaced = None;
        if replace_last && !self.blocks.is_empty() {
            replaced = self.blocks.pop();
        }
        let prev_size = self.blocks.len();

        self.blocks.extend(additional_blocks);

        // Check only the blocks that were added, avoiding quadratic time
        // for repeated appends
        match Self::check_consistency(
            &self.blocks,
            self.max_samples,
            prev_size,
            num_samples,
            whence,
            true,
        ) {
            Ok(()) => {
                self.num_samples = num_samples;
                Ok(())
            }
            Err(e) => {
                self.blocks.truncate(prev_size);
                if let Some(block) = replaced {
                    self.blocks.push(block);
                }
                Err(e)
            }
        }
    }

    fn debug_dump(blocks: &BlockArray, num_samples: SampleCount) -> String {
        use std::fmt::Write;

        let mut dest = String::new();
        let mut pos: SampleCount = 0;
        for (i, seq_block) in blocks.iter().enumerate() {
            let _ = write!(
                dest,
                "   Block {:3}: start {:8}, len {:8}, refs {}, {}",
                i,
                seq_block.start,
                seq_block.file.len(),
                Arc::strong_count(&seq_block.file),
                seq_block
                    .file
                    .file_name()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<silent>".to_string()),
            );
            if pos != seq_block.start {
                dest.push_str("      ERROR\n");
            } else {
                dest.push('\n');
            }
            pos += seq_block.file.len() as SampleCount;
        }
        if pos != num_samples {
            let _ = write!(dest, "ERROR num_samples = {num_samples}\n");
        }
        dest
    }

    // ───────────────────────────────────────────────────────────────────────
    // Sizing policy
    // ───────────────────────────────────────────────────────────────────────

    /// Split a contiguous buffer into near-equal blocks, each at most
    /// `max_samples` long, appending them to `list`.
    fn blockify(
        dir: &dyn DirManager,
        max_samples: usize,
        format: SampleFormat,
        list: &mut BlockArray,
        start: SampleCount,
        buffer: &[u8],
        len: usize,
    ) -> SeqResult<()> {
        if len == 0 {
            return Ok(());
        }
        let num = len.div_ceil(max_samples);
        list.reserve(num);
        let width = format.bytes();

        for i in 0..num {
            let offset = i * len / num;
            let new_len = (i + 1) * len / num - offset;
            let file = dir.new_simple_block_file(&buffer[offset * width..], new_len, format)?;
            list.push(SeqBlock::new(file, start + offset as SampleCount));
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Append
    // ───────────────────────────────────────────────────────────────────────

    /// Append `len` samples, converting from `format` if it differs from
    /// the sequence format. Strong guarantee.
    pub fn append(&mut self, buffer: &[u8], format: SampleFormat, len: usize) -> SeqResult<()> {
        if len == 0 {
            return Ok(());
        }
        if overflows(self.num_samples, len as SampleCount) {
            return Err(SequenceError::Inconsistent("Append"));
        }

        let mut new_blocks = BlockArray::new();
        let mut new_num_samples = self.num_samples;
        let seq_width = self.format.bytes();
        let mut buffer = &buffer[..len * format.bytes()];
        let mut len = len;
        let mut buffer2 = SampleBuffer::new(self.max_samples, self.format);
        let mut replace_last = false;

        // If the last block is sub-minimum, enlarge it with the first of
        // the incoming samples
        if let Some(last) = self.blocks.last() {
            let length = last.file.len();
            if length < self.min_samples {
                let add_len = (self.max_samples - length).min(len);

                Self::read(buffer2.as_bytes_mut(), self.format, last, 0, length, true)?;
                copy_samples(
                    buffer,
                    format,
                    &mut buffer2.as_bytes_mut()[length * seq_width..],
                    self.format,
                    add_len,
                );

                let new_last_len = length + add_len;
                let file = self.dir.new_simple_block_file(
                    buffer2.slice(0, new_last_len),
                    new_last_len,
                    self.format,
                )?;
                new_blocks.push(SeqBlock::new(file, last.start));

                len -= add_len;
                new_num_samples += add_len as SampleCount;
                buffer = &buffer[add_len * format.bytes()..];
                replace_last = true;
            }
        }

        // Append the rest as new blocks
        while len > 0 {
            let ideal_samples = self.ideal_block_size();
            let added_len = ideal_samples.min(len);
            let file = if format == self.format {
                self.dir
                    .new_simple_block_file(buffer, added_len, self.format)?
            } else {
                copy_samples(buffer, format, buffer2.as_bytes_mut(), self.format, added_len);
                self.dir
                    .new_simple_block_file(buffer2.slice(0, added_len), added_len, self.format)?
            };

            new_blocks.push(SeqBlock::new(file, new_num_samples));

            buffer = &buffer[added_len * format.bytes()..];
            new_num_samples += added_len as SampleCount;
            len -= added_len;
        }

        self.append_blocks_if_consistent(new_blocks, replace_last, new_num_samples, "Append")?;

        // Full checks after every append are quadratic over a long
        // generate; only the appended suffix is validated above. Keep the
        // whole-list check for debug builds.
        #[cfg(debug_assertions)]
        Self::check_consistency(
            &self.blocks,
            self.max_samples,
            0,
            self.num_samples,
            "Append",
            false,
        )?;

        Ok(())
    }

    /// Push an existing block file without copying its data.
    ///
    /// Used for fast transfer when the file is already owned by this
    /// project's directory manager.
    pub fn append_block_file(&mut self, file: Arc<dyn BlockFile>) -> SeqResult<()> {
        if overflows(self.num_samples, file.len() as SampleCount) {
            return Err(SequenceError::Inconsistent("AppendBlockFile"));
        }
        let length = file.len();
        self.blocks.push(SeqBlock::new(file, self.num_samples));
        self.num_samples += length as SampleCount;
        Ok(())
    }

    /// Append a window over an external PCM file. Strong guarantee.
    pub fn append_alias(
        &mut self,
        path: &std::path::Path,
        start: u64,
        len: usize,
        channel: u16,
        use_od: bool,
    ) -> SeqResult<()> {
        if overflows(self.num_samples, len as SampleCount) {
            return Err(SequenceError::Inconsistent("AppendAlias"));
        }
        let file = if use_od {
            self.dir.new_od_alias_block_file(path, start, len, channel)?
        } else {
            self.dir.new_alias_block_file(path, start, len, channel)?
        };
        self.blocks.push(SeqBlock::new(file, self.num_samples));
        self.num_samples += len as SampleCount;
        Ok(())
    }

    /// Append a window over a compressed source, decoded on demand.
    /// Strong guarantee.
    pub fn append_coded(
        &mut self,
        path: &std::path::Path,
        start: u64,
        len: usize,
        channel: u16,
        kind: DecoderKind,
    ) -> SeqResult<()> {
        if overflows(self.num_samples, len as SampleCount) {
            return Err(SequenceError::Inconsistent("AppendCoded"));
        }
        let file = self
            .dir
            .new_od_decode_block_file(path, start, len, channel, self.format, kind)?;
        self.blocks.push(SeqBlock::new(file, self.num_samples));
        self.num_samples += len as SampleCount;
        Ok(())
    }

    /// Share one source block into a destination list by refcount bump
    fn append_block(
        dir: &dyn DirManager,
        blocks: &mut BlockArray,
        num_samples: &mut SampleCount,
        b: &SeqBlock,
    ) -> SeqResult<()> {
        if overflows(*num_samples, b.file.len() as SampleCount) {
            return Err(SequenceError::Inconsistent("AppendBlock"));
        }
        // Bump ref count if not locked, else copy
        let file = dir.copy_block_file(&b.file)?;
        let length = file.len();
        blocks.push(SeqBlock::new(file, *num_samples));
        *num_samples += length as SampleCount;
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Copy
    // ───────────────────────────────────────────────────────────────────────

    /// Copy `[s0, s1)` into a new sequence. Fully contained blocks are
    /// shared by refcount; partial first/last blocks are materialized.
    pub fn copy(&self, s0: SampleCount, s1: SampleCount) -> SeqResult<Sequence> {
        let mut dest = self.empty_like(Arc::clone(&self.dir));
        if s0 >= s1 || s0 >= self.num_samples || s1 < 0 {
            return Ok(dest);
        }
        let s1 = s1.min(self.num_samples);

        let mut b0 = self.find_block(s0) as isize;
        let b1 = self.find_block(s1 - 1);
        debug_assert!(b0 as usize <= b1);

        dest.blocks.reserve(b1 - b0 as usize + 1);

        let mut buffer = SampleBuffer::new(self.max_samples, self.format);

        // Do the first block
        let block0 = &self.blocks[b0 as usize];
        if s0 != block0.start {
            // Nonnegative result is length of block0 or less
            let blocklen =
                (s1.min(block0.start + block0.file.len() as SampleCount) - s0) as usize;
            debug_assert!(block0.file.is_alias() || blocklen <= self.max_samples);
            self.get_from_block(
                b0 as usize,
                buffer.as_bytes_mut(),
                self.format,
                s0,
                blocklen,
                true,
            )?;
            dest.append(buffer.slice(0, blocklen), self.format, blocklen)?;
        } else {
            b0 -= 1;
        }

        // If there are blocks in the middle, share them directly
        for bb in (b0 + 1) as usize..b1 {
            Self::append_block(
                &*dest.dir,
                &mut dest.blocks,
                &mut dest.num_samples,
                &self.blocks[bb],
            )?;
        }

        // Do the last block
        if b1 as isize > b0 {
            let block = &self.blocks[b1];
            // s1 is within block
            let blocklen = (s1 - block.start) as usize;
            debug_assert!(block.file.is_alias() || blocklen <= self.max_samples);
            if blocklen < block.file.len() {
                self.get_from_block(
                    b1,
                    buffer.as_bytes_mut(),
                    self.format,
                    block.start,
                    blocklen,
                    true,
                )?;
                dest.append(buffer.slice(0, blocklen), self.format, blocklen)?;
            } else {
                // Complete overlap, share exactly
                Self::append_block(&*dest.dir, &mut dest.blocks, &mut dest.num_samples, block)?;
            }
        }

        Self::check_consistency(
            &dest.blocks,
            dest.max_samples,
            0,
            dest.num_samples,
            "Copy",
            true,
        )?;
        Ok(dest)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Paste
    // ───────────────────────────────────────────────────────────────────────

    /// Insert all of `src` at sample `s`. Strong guarantee.
    pub fn paste(&mut self, s: SampleCount, src: &Sequence) -> SeqResult<()> {
        if s < 0 || s > self.num_samples {
            log::error!(
                "Sequence::paste: sample position {s} is < 0 or > {}",
                self.num_samples
            );
            return Err(SequenceError::Inconsistent("Paste"));
        }

        if overflows(self.num_samples, src.num_samples) {
            log::error!(
                "Sequence::paste: {} + {} samples would overflow",
                self.num_samples,
                src.num_samples
            );
            return Err(SequenceError::Inconsistent("Paste"));
        }

        if src.format != self.format {
            log::error!(
                "Sequence::paste: format {} does not match destination format {}",
                src.format,
                self.format
            );
            return Err(SequenceError::Inconsistent("Paste"));
        }

        let added_len = src.num_samples;
        let src_num_blocks = src.blocks.len();
        if added_len == 0 || src_num_blocks == 0 {
            return Ok(());
        }

        let num_blocks = self.blocks.len();
        let width = self.format.bytes();

        if num_blocks == 0
            || (s == self.num_samples
                && self.blocks[num_blocks - 1].file.len() >= self.min_samples)
        {
            // Special case: this sequence is empty, or it's safe to append
            // onto the end because the last block is at least minimum size.
            // Build and swap a copy for the strong guarantee.
            let mut new_blocks = self.blocks.clone();
            let mut samples = self.num_samples;
            for src_block in &src.blocks {
                // May fail for limited disk space, if pasting from one
                // project into another
                Self::append_block(&*self.dir, &mut new_blocks, &mut samples, src_block)?;
            }
            return self.commit_changes_if_consistent(new_blocks, samples, "Paste branch one");
        }

        let b = if s == self.num_samples {
            num_blocks - 1
        } else {
            self.find_block(s)
        };
        let length = self.blocks[b].file.len();
        let larger_block_len = added_len + length as SampleCount;

        if larger_block_len <= self.max_samples as SampleCount {
            // Special case: all of the new samples fit in one block
            let larger_block_len = larger_block_len as usize;
            let mut buffer = SampleBuffer::new(larger_block_len, self.format);
            let s_added_len = added_len as usize;
            // s lies within the block
            let split_point = (s - self.blocks[b].start) as usize;

            Self::read(
                buffer.as_bytes_mut(),
                self.format,
                &self.blocks[b],
                0,
                split_point,
                true,
            )?;
            src.get_from_block(
                0,
                &mut buffer.as_bytes_mut()[split_point * width..],
                self.format,
                0,
                s_added_len,
                true,
            )?;
            Self::read(
                &mut buffer.as_bytes_mut()[(split_point + s_added_len) * width..],
                self.format,
                &self.blocks[b],
                split_point,
                length - split_point,
                true,
            )?;

            let file = self.dir.new_simple_block_file(
                buffer.as_bytes(),
                larger_block_len,
                self.format,
            )?;

            // Don't build a duplicate array; modifying one block in place
            // still upholds the strong guarantee, and the remaining steps
            // cannot fail
            self.blocks[b].file = file;

            for block in &mut self.blocks[b + 1..] {
                block.start += added_len;
            }
            self.num_samples += added_len;

            return Self::check_consistency(
                &self.blocks,
                self.max_samples,
                0,
                self.num_samples,
                "Paste branch two",
                false,
            );
        }

        // General case
        let mut new_blocks = BlockArray::new();
        new_blocks.reserve(num_blocks + src_num_blocks + 2);
        new_blocks.extend(self.blocks[..b].iter().cloned());

        let split_start = self.blocks[b].start;
        let split_len = self.blocks[b].file.len();
        // s lies within the split block
        let split_point = (s - split_start) as usize;

        if src_num_blocks <= 4 {
            // With four or fewer source blocks, lump everything together
            // with the split block and resplit
            let s_added_len = added_len as usize;
            let sum = split_len + s_added_len;

            let mut sum_buffer = SampleBuffer::new(sum, self.format);
            Self::read(
                sum_buffer.as_bytes_mut(),
                self.format,
                &self.blocks[b],
                0,
                split_point,
                true,
            )?;
            src.get_from_block(
                0,
                &mut sum_buffer.as_bytes_mut()[split_point * width..],
                self.format,
                0,
                s_added_len,
                true,
            )?;
            Self::read(
                &mut sum_buffer.as_bytes_mut()[(split_point + s_added_len) * width..],
                self.format,
                &self.blocks[b],
                split_point,
                split_len - split_point,
                true,
            )?;

            Self::blockify(
                &*self.dir,
                self.max_samples,
                self.format,
                &mut new_blocks,
                split_start,
                sum_buffer.as_bytes(),
                sum,
            )?;
        } else {
            // Five or more source blocks: merge the first two with the
            // left half of the split block, share the middle ones, and
            // merge the last two with the right half. This bounds the
            // amount of data held in memory at once.
            let src_first_two_len = src.blocks[0].file.len() + src.blocks[1].file.len();
            let left_len = split_point + src_first_two_len;

            let penultimate = &src.blocks[src_num_blocks - 2];
            let src_last_two_len =
                penultimate.file.len() + src.blocks[src_num_blocks - 1].file.len();
            let right_split = split_len - split_point;
            let right_len = right_split + src_last_two_len;

            let mut sample_buffer = SampleBuffer::new(left_len.max(right_len), self.format);

            Self::read(
                sample_buffer.as_bytes_mut(),
                self.format,
                &self.blocks[b],
                0,
                split_point,
                true,
            )?;
            src.get_from_block(
                0,
                &mut sample_buffer.as_bytes_mut()[split_point * width..],
                self.format,
                0,
                src_first_two_len,
                true,
            )?;

            Self::blockify(
                &*self.dir,
                self.max_samples,
                self.format,
                &mut new_blocks,
                split_start,
                sample_buffer.as_bytes(),
                left_len,
            )?;

            for src_block in &src.blocks[2..src_num_blocks - 2] {
                let file = self.dir.copy_block_file(&src_block.file)?;
                new_blocks.push(SeqBlock::new(file, src_block.start + s));
            }

            let last_start = penultimate.start;
            src.get_from_block(
                src_num_blocks - 2,
                sample_buffer.as_bytes_mut(),
                self.format,
                last_start,
                src_last_two_len,
                true,
            )?;
            Self::read(
                &mut sample_buffer.as_bytes_mut()[src_last_two_len * width..],
                self.format,
                &self.blocks[b],
                split_point,
                right_split,
                true,
            )?;

            Self::blockify(
                &*self.dir,
                self.max_samples,
                self.format,
                &mut new_blocks,
                s + last_start,
                sample_buffer.as_bytes(),
                right_len,
            )?;
        }

        // Shift the trailing blocks over and swap the new array in
        for block in &self.blocks[b + 1..] {
            new_blocks.push(block.plus(added_len));
        }

        self.commit_changes_if_consistent(
            new_blocks,
            self.num_samples + added_len,
            "Paste branch three",
        )
    }

    // ───────────────────────────────────────────────────────────────────────
    // Silence
    // ───────────────────────────────────────────────────────────────────────

    /// Insert `len` zero samples at `s0` without writing sample data to
    /// disk. Strong guarantee.
    pub fn insert_silence(&mut self, s0: SampleCount, len: SampleCount) -> SeqResult<()> {
        if overflows(self.num_samples, len) {
            return Err(SequenceError::Inconsistent("InsertSilence"));
        }
        if len <= 0 {
            return Ok(());
        }

        // Build a throwaway sequence of silent blocks and paste it; one
        // shared silent block file covers all the full-size entries
        let mut silence = self.empty_like(Arc::clone(&self.dir));
        let ideal_samples = self.ideal_block_size() as SampleCount;

        let mut pos: SampleCount = 0;
        let mut remaining = len;
        silence.blocks.reserve((len / ideal_samples + 1) as usize);

        if remaining >= ideal_samples {
            let silent_file: Arc<dyn BlockFile> =
                SilentBlockFile::new(ideal_samples as usize, self.format);
            while remaining >= ideal_samples {
                silence
                    .blocks
                    .push(SeqBlock::new(Arc::clone(&silent_file), pos));
                pos += ideal_samples;
                remaining -= ideal_samples;
            }
        }
        if remaining != 0 {
            // remaining is less than one ideal block
            silence.blocks.push(SeqBlock::new(
                SilentBlockFile::new(remaining as usize, self.format),
                pos,
            ));
            pos += remaining;
        }
        silence.num_samples = pos;

        self.paste(s0, &silence)
    }

    /// Zero samples `[s0, s0 + len)` in place. Strong guarantee.
    pub fn set_silence(&mut self, s0: SampleCount, len: SampleCount) -> SeqResult<()> {
        self.set_samples(None, self.format, s0, len)
    }

    // ───────────────────────────────────────────────────────────────────────
    // SetSamples
    // ───────────────────────────────────────────────────────────────────────

    /// Overwrite `[start, start + len)` with `buffer` (or zeros when
    /// `None`) without changing the sample count. Strong guarantee.
    pub fn set_samples(
        &mut self,
        buffer: Option<&[u8]>,
        format: SampleFormat,
        start: SampleCount,
        len: SampleCount,
    ) -> SeqResult<()> {
        if start < 0
            || start >= self.num_samples
            || len < 0
            || overflows(start, len)
            || start + len > self.num_samples
        {
            return Err(SequenceError::Inconsistent("SetSamples"));
        }

        let seq_width = self.format.bytes();
        let mut scratch = SampleBuffer::new(self.max_samples, self.format);

        let mut temp = SampleBuffer::new(0, self.format);
        if buffer.is_some() && format != self.format {
            let size = limit_buffer_size(self.max_samples, len);
            temp = SampleBuffer::new(size, self.format);
        }

        let mut b = self.find_block(start);
        let mut new_blocks = BlockArray::new();
        new_blocks.extend(self.blocks[..b].iter().cloned());

        let mut buffer = buffer;
        let mut start = start;
        let mut len = len;

        while len != 0 {
            new_blocks.push(self.blocks[b].clone());
            let block_start = self.blocks[b].start;
            // start is within the block
            let bstart = (start - block_start) as usize;
            let file_length = self.blocks[b].file.len();
            let blen = limit_buffer_size(file_length - bstart, len);

            if !(file_length <= self.max_samples && bstart + blen <= file_length) {
                return Err(SequenceError::Inconsistent("SetSamples"));
            }

            let use_buffer: Option<&[u8]> = match buffer {
                Some(buf) if format != self.format => {
                    copy_samples(buf, format, temp.as_bytes_mut(), self.format, blen);
                    Some(temp.as_bytes())
                }
                other => other,
            };

            // An existing block is never written in place; the old block
            // is read whole, patched in memory, and a replacement written,
            // so shared references (undo history) keep their samples
            let new_file: Arc<dyn BlockFile> = if bstart > 0 || blen < file_length {
                Self::read(
                    scratch.as_bytes_mut(),
                    self.format,
                    &self.blocks[b],
                    0,
                    file_length,
                    true,
                )?;

                match use_buffer {
                    Some(buf) => {
                        scratch.as_bytes_mut()[bstart * seq_width..(bstart + blen) * seq_width]
                            .copy_from_slice(&buf[..blen * seq_width]);
                    }
                    None => clear_samples(scratch.as_bytes_mut(), self.format, bstart, blen),
                }

                self.dir
                    .new_simple_block_file(scratch.as_bytes(), file_length, self.format)?
            } else {
                // The replacement is total; don't read the disk
                match use_buffer {
                    Some(buf) => {
                        self.dir
                            .new_simple_block_file(buf, file_length, self.format)?
                    }
                    None => SilentBlockFile::new(file_length, self.format),
                }
            };

            if let Some(last) = new_blocks.last_mut() {
                last.file = new_file;
            }

            if let Some(buf) = buffer {
                buffer = Some(&buf[blen * format.bytes()..]);
            }
            len -= blen as SampleCount;
            start += blen as SampleCount;
            b += 1;
        }

        new_blocks.extend(self.blocks[b..].iter().cloned());

        self.commit_changes_if_consistent(new_blocks, self.num_samples, "SetSamples")
    }

    // ───────────────────────────────────────────────────────────────────────
    // Delete
    // ───────────────────────────────────────────────────────────────────────

    /// Remove `[start, start + len)`. Strong guarantee.
    pub fn delete(&mut self, start: SampleCount, len: SampleCount) -> SeqResult<()> {
        if len == 0 {
            return Ok(());
        }
        if len < 0
            || start < 0
            || start >= self.num_samples
            || overflows(start, len)
            || start + len > self.num_samples
        {
            return Err(SequenceError::Inconsistent("Delete"));
        }

        // A background task may be walking the block list; hold the
        // delete-update lock while restructuring it
        let delete_mutex = Arc::clone(&self.delete_update_mutex);
        let _locker = delete_mutex.lock();

        let num_blocks = self.blocks.len();
        let b0 = self.find_block(start);
        let mut b1 = self.find_block(start + len - 1);
        let seq_width = self.format.bytes();

        // One scratch buffer for all branches; the largest it ever needs
        // to be
        let scratch_size = self.max_samples + self.min_samples;

        // Special case: deletion within one block, leaving enough samples
        // behind for a legal block. Rewrite that block alone.
        if b0 == b1 {
            let length = self.blocks[b0].file.len();
            if length as SampleCount - len >= self.min_samples as SampleCount {
                let b_start = self.blocks[b0].start;
                // start is within the block
                let pos = (start - b_start) as usize;
                debug_assert!(len < length as SampleCount);
                let new_len = (length as SampleCount - len) as usize;

                let mut scratch = SampleBuffer::new(scratch_size, self.format);
                Self::read(
                    scratch.as_bytes_mut(),
                    self.format,
                    &self.blocks[b0],
                    0,
                    pos,
                    true,
                )?;
                Self::read(
                    &mut scratch.as_bytes_mut()[pos * seq_width..],
                    self.format,
                    &self.blocks[b0],
                    pos + len as usize,
                    new_len - pos,
                    true,
                )?;

                let new_file =
                    self.dir
                        .new_simple_block_file(scratch.as_bytes(), new_len, self.format)?;

                // Modifying one block in place keeps the strong
                // guarantee; the remaining steps cannot fail
                self.blocks[b0].file = new_file;
                for block in &mut self.blocks[b0 + 1..] {
                    block.start -= len;
                }
                self.num_samples -= len;

                return Self::check_consistency(
                    &self.blocks,
                    self.max_samples,
                    0,
                    self.num_samples,
                    "Delete - branch one",
                    false,
                );
            }
        }

        let mut new_blocks = BlockArray::new();
        new_blocks.reserve(num_blocks - (b1 - b0) + 2);
        new_blocks.extend(self.blocks[..b0].iter().cloned());

        let mut scratch: Option<SampleBuffer> = None;

        // Samples in block b0 before the deletion point: keep them as
        // their own block if long enough (or if first), else absorb them
        // into the preceding block
        let pre_start = self.blocks[b0].start;
        let pre_buffer_len = (start - pre_start) as usize;
        if pre_buffer_len > 0 {
            let scratch = scratch.get_or_insert_with(|| {
                SampleBuffer::new(scratch_size, self.format)
            });
            if pre_buffer_len >= self.min_samples || b0 == 0 {
                Self::read(
                    scratch.as_bytes_mut(),
                    self.format,
                    &self.blocks[b0],
                    0,
                    pre_buffer_len,
                    true,
                )?;
                let file = self.dir.new_simple_block_file(
                    scratch.as_bytes(),
                    pre_buffer_len,
                    self.format,
                )?;
                new_blocks.push(SeqBlock::new(file, pre_start));
            } else {
                let prepre_start = self.blocks[b0 - 1].start;
                let prepre_len = self.blocks[b0 - 1].file.len();
                let sum = prepre_len + pre_buffer_len;

                Self::read(
                    scratch.as_bytes_mut(),
                    self.format,
                    &self.blocks[b0 - 1],
                    0,
                    prepre_len,
                    true,
                )?;
                Self::read(
                    &mut scratch.as_bytes_mut()[prepre_len * seq_width..],
                    self.format,
                    &self.blocks[b0],
                    0,
                    pre_buffer_len,
                    true,
                )?;

                new_blocks.pop();
                Self::blockify(
                    &*self.dir,
                    self.max_samples,
                    self.format,
                    &mut new_blocks,
                    prepre_start,
                    scratch.as_bytes(),
                    sum,
                )?;
            }
        }
        // else: deletion begins exactly on a block boundary

        // Symmetrically for the samples in block b1 after the deletion
        // point
        let post_block_start = self.blocks[b1].start;
        let post_block_len = self.blocks[b1].file.len();
        let post_buffer_len =
            ((post_block_start + post_block_len as SampleCount) - (start + len)) as usize;
        if post_buffer_len > 0 {
            let scratch = scratch.get_or_insert_with(|| {
                SampleBuffer::new(scratch_size, self.format)
            });
            // start + len - 1 lies within block b1
            let pos = (start + len - post_block_start) as usize;
            if post_buffer_len >= self.min_samples || b1 == num_blocks - 1 {
                Self::read(
                    scratch.as_bytes_mut(),
                    self.format,
                    &self.blocks[b1],
                    pos,
                    post_buffer_len,
                    true,
                )?;
                let file = self.dir.new_simple_block_file(
                    scratch.as_bytes(),
                    post_buffer_len,
                    self.format,
                )?;
                new_blocks.push(SeqBlock::new(file, start));
            } else {
                let postpost_len = self.blocks[b1 + 1].file.len();
                let sum = postpost_len + post_buffer_len;

                Self::read(
                    scratch.as_bytes_mut(),
                    self.format,
                    &self.blocks[b1],
                    pos,
                    post_buffer_len,
                    true,
                )?;
                Self::read(
                    &mut scratch.as_bytes_mut()[post_buffer_len * seq_width..],
                    self.format,
                    &self.blocks[b1 + 1],
                    0,
                    postpost_len,
                    true,
                )?;

                Self::blockify(
                    &*self.dir,
                    self.max_samples,
                    self.format,
                    &mut new_blocks,
                    start,
                    scratch.as_bytes(),
                    sum,
                )?;
                b1 += 1;
            }
        }
        // else: deletion ends exactly on a block boundary

        // Shift the remaining blocks over
        for block in &self.blocks[b1 + 1..] {
            new_blocks.push(block.plus(-len));
        }

        self.commit_changes_if_consistent(new_blocks, self.num_samples - len, "Delete - branch two")
    }

    // ───────────────────────────────────────────────────────────────────────
    // Format conversion
    // ───────────────────────────────────────────────────────────────────────

    /// Convert every owned block to `format`, re-deriving the block size
    /// bounds. Aliased blocks are left as-is (their samples live in
    /// foreign files) and converted lazily at save. Strong guarantee.
    ///
    /// Returns false when the format is already `format`.
    pub fn convert_to_sample_format(&mut self, format: SampleFormat) -> SeqResult<bool> {
        if format == self.format {
            return Ok(false);
        }

        let new_min_samples = self.disk_bytes / format.bytes() / 2;
        let new_max_samples = new_min_samples * 2;

        if self.blocks.is_empty() {
            self.format = format;
            self.min_samples = new_min_samples;
            self.max_samples = new_max_samples;
            return Ok(true);
        }

        let old_format = self.format;
        let old_max_samples = self.max_samples;

        let mut new_blocks = BlockArray::new();
        // Use the ratio of old to new max_samples to make a reasonable
        // guess at the allocation
        new_blocks.reserve(
            1 + (self.blocks.len() as f64 * old_max_samples as f64 / new_max_samples as f64)
                as usize,
        );

        {
            let mut buffer_old = SampleBuffer::new(old_max_samples, old_format);
            let mut buffer_new = SampleBuffer::new(old_max_samples, format);

            for old_block in &self.blocks {
                if old_block.file.is_alias() {
                    new_blocks.push(old_block.clone());
                    continue;
                }

                let len = old_block.file.len();
                Self::read(
                    buffer_old.as_bytes_mut(),
                    old_format,
                    old_block,
                    0,
                    len,
                    true,
                )?;
                copy_samples(
                    buffer_old.as_bytes(),
                    old_format,
                    buffer_new.as_bytes_mut(),
                    format,
                    len,
                );

                // Blockify handles both a sub-minimum result (fewer bytes
                // per sample) and one longer than the new maximum
                Self::blockify(
                    &*self.dir,
                    new_max_samples,
                    format,
                    &mut new_blocks,
                    old_block.start,
                    buffer_new.as_bytes(),
                    len,
                )?;
            }
        }

        // Commit everything only after every write succeeded
        Self::check_consistency(
            &new_blocks,
            new_max_samples,
            0,
            self.num_samples,
            "ConvertToSampleFormat",
            true,
        )?;

        self.blocks = new_blocks;
        self.format = format;
        self.min_samples = new_min_samples;
        self.max_samples = new_max_samples;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wv_core::f32_to_samples;
    use wv_file::DiskDirManager;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        let mut data = vec![0u8; samples.len() * 4];
        f32_to_samples(samples, SampleFormat::Float, &mut data);
        data
    }

    fn small_sequence() -> (tempfile::TempDir, Sequence) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = DiskDirManager::new(dir.path().join("project")).unwrap();
        // 32 bytes of f32 -> min_samples 4, max_samples 8
        let seq = Sequence::with_disk_block_size(mgr, SampleFormat::Float, 32);
        (dir, seq)
    }

    fn read_all(seq: &Sequence) -> Vec<f32> {
        let n = seq.num_samples() as usize;
        let mut bytes = vec![0u8; n * 4];
        seq.get(&mut bytes, SampleFormat::Float, 0, n, true).unwrap();
        let mut out = vec![0f32; n];
        wv_core::samples_to_f32(&bytes, SampleFormat::Float, &mut out);
        out
    }

    #[test]
    fn test_block_bounds_derivation() {
        let (_t, seq) = small_sequence();
        assert_eq!(seq.min_block_size(), 4);
        assert_eq!(seq.max_block_size(), 8);
        assert_eq!(seq.ideal_block_size(), 8);
    }

    #[test]
    fn test_find_block_every_position() {
        let (_t, mut seq) = small_sequence();
        let samples: Vec<f32> = (0..37).map(|i| i as f32).collect();
        seq.append(&f32_bytes(&samples), SampleFormat::Float, samples.len())
            .unwrap();

        for pos in 0..seq.num_samples() {
            let b = seq.find_block(pos);
            let block = &seq.blocks()[b];
            assert!(block.start <= pos);
            assert!(pos < block.start + block.file.len() as SampleCount);
        }
    }

    #[test]
    fn test_blockify_sizes() {
        let (_t, mut seq) = small_sequence();
        // 20 samples with max 8 -> 3 blocks of sizes 6/7/7, all in [4, 8]
        let samples: Vec<f32> = (0..20).map(|i| i as f32 / 20.0).collect();
        seq.append(&f32_bytes(&samples), SampleFormat::Float, 20).unwrap();
        // Append splits into ideal chunks: 8 + 8 + 4
        let sizes: Vec<usize> = seq.blocks().iter().map(|b| b.file.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 20);
        assert!(sizes.iter().all(|&s| s <= 8));
    }

    #[test]
    fn test_ideal_append_len() {
        let (_t, mut seq) = small_sequence();
        assert_eq!(seq.ideal_append_len(), 8);
        seq.append(&f32_bytes(&[1.0; 10]), SampleFormat::Float, 10)
            .unwrap();
        // Last block has 2 samples; 6 more would fill it
        assert_eq!(seq.ideal_append_len(), 6);
    }

    #[test]
    fn test_best_block_size() {
        let (_t, mut seq) = small_sequence();
        let samples: Vec<f32> = (0..16).map(|i| i as f32).collect();
        seq.append(&f32_bytes(&samples), SampleFormat::Float, 16).unwrap();

        assert_eq!(seq.best_block_size(0), 8);
        assert_eq!(seq.best_block_size(3), 5);
        assert_eq!(seq.best_block_size(-1), seq.max_block_size());
        assert_eq!(seq.best_block_size(100), seq.max_block_size());
    }

    #[test]
    fn test_get_out_of_range() {
        let (_t, mut seq) = small_sequence();
        seq.append(&f32_bytes(&[1.0; 8]), SampleFormat::Float, 8).unwrap();

        let mut bytes = vec![0xffu8; 4 * 4];
        assert!(seq.get(&mut bytes, SampleFormat::Float, 6, 4, true).is_err());

        let ok = seq.get(&mut bytes, SampleFormat::Float, 6, 4, false).unwrap();
        assert!(!ok);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_append_coalesces_small_tail() {
        let (_t, mut seq) = small_sequence();
        let first: Vec<f32> = (1..=10).map(|i| i as f32).collect();
        seq.append(&f32_bytes(&first), SampleFormat::Float, 10).unwrap();
        let sizes: Vec<usize> = seq.blocks().iter().map(|b| b.file.len()).collect();
        assert_eq!(sizes, vec![8, 2]);

        let second: Vec<f32> = (11..=14).map(|i| i as f32).collect();
        seq.append(&f32_bytes(&second), SampleFormat::Float, 4).unwrap();
        let sizes: Vec<usize> = seq.blocks().iter().map(|b| b.file.len()).collect();
        assert_eq!(sizes, vec![8, 6]);

        let all = read_all(&seq);
        let expected: Vec<f32> = (1..=14).map(|i| i as f32).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_append_block_file_shares() {
        let (_t, mut seq) = small_sequence();
        let silent: Arc<dyn BlockFile> = SilentBlockFile::new(8, SampleFormat::Float);
        seq.append_block_file(Arc::clone(&silent)).unwrap();
        assert_eq!(seq.num_samples(), 8);
        assert!(Arc::ptr_eq(&seq.blocks()[0].file, &silent));
    }

    #[test]
    fn test_set_samples_overwrites_in_place() {
        let (_t, mut seq) = small_sequence();
        let samples: Vec<f32> = (0..16).map(|i| i as f32).collect();
        seq.append(&f32_bytes(&samples), SampleFormat::Float, 16).unwrap();

        seq.set_samples(
            Some(&f32_bytes(&[100.0, 101.0, 102.0])),
            SampleFormat::Float,
            6,
            3,
        )
        .unwrap();

        assert_eq!(seq.num_samples(), 16);
        let all = read_all(&seq);
        assert_eq!(&all[..6], &samples[..6]);
        assert_eq!(&all[6..9], &[100.0, 101.0, 102.0]);
        assert_eq!(&all[9..], &samples[9..]);
    }

    #[test]
    fn test_set_silence_total_block_becomes_silent() {
        let (_t, mut seq) = small_sequence();
        seq.append(&f32_bytes(&[1.0; 16]), SampleFormat::Float, 16).unwrap();

        // Zero the entire first block; no disk write should be needed
        seq.set_silence(0, 8).unwrap();
        assert!(seq.blocks()[0].file.file_name().is_none());
        let all = read_all(&seq);
        assert!(all[..8].iter().all(|&v| v == 0.0));
        assert!(all[8..].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_delete_within_block() {
        let (_t, mut seq) = small_sequence();
        let samples: Vec<f32> = (0..8).map(|i| i as f32).collect();
        seq.append(&f32_bytes(&samples), SampleFormat::Float, 8).unwrap();

        seq.delete(2, 2).unwrap();
        assert_eq!(seq.num_samples(), 6);
        assert_eq!(read_all(&seq), vec![0.0, 1.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(seq.blocks().len(), 1);
    }

    #[test]
    fn test_delete_rejects_bad_range() {
        let (_t, mut seq) = small_sequence();
        seq.append(&f32_bytes(&[1.0; 8]), SampleFormat::Float, 8).unwrap();
        assert!(seq.delete(-1, 2).is_err());
        assert!(seq.delete(8, 1).is_err());
        assert!(seq.delete(4, 10).is_err());
        seq.delete(4, 0).unwrap();
        assert_eq!(seq.num_samples(), 8);
    }

    #[test]
    fn test_convert_format_roundtrip_structure() {
        let (_t, mut seq) = small_sequence();
        let samples: Vec<f32> = (0..24).map(|i| (i as f32 / 24.0) - 0.5).collect();
        seq.append(&f32_bytes(&samples), SampleFormat::Float, 24).unwrap();

        let changed = seq.convert_to_sample_format(SampleFormat::Int16).unwrap();
        assert!(changed);
        assert_eq!(seq.sample_format(), SampleFormat::Int16);
        // 32 bytes / 2 bytes / 2 = 8 min, 16 max
        assert_eq!(seq.min_block_size(), 8);
        assert_eq!(seq.max_block_size(), 16);
        assert_eq!(seq.num_samples(), 24);

        // Samples survive within int16 precision
        let mut bytes = vec![0u8; 24 * 4];
        seq.get(&mut bytes, SampleFormat::Float, 0, 24, true).unwrap();
        let mut back = vec![0f32; 24];
        wv_core::samples_to_f32(&bytes, SampleFormat::Float, &mut back);
        for (a, b) in back.iter().zip(&samples) {
            assert!((a - b).abs() < 1e-3);
        }

        assert!(!seq.convert_to_sample_format(SampleFormat::Int16).unwrap());
    }

    #[test]
    fn test_od_flags_aggregate() {
        let (_t, mut seq) = small_sequence();
        assert_eq!(seq.od_flags(), 0);
        seq.append(&f32_bytes(&[0.5; 8]), SampleFormat::Float, 8).unwrap();
        assert_eq!(seq.od_flags(), 0);
    }
}

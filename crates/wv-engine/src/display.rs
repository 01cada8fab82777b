//! Waveform display reads
//!
//! Produces per-pixel-column min/max/rms arrays for rendering, mixing the
//! in-memory whole-block triples with on-disk summary reads at 1:1,
//! 1:256, or 1:65536 resolution, and piecing together partial blocks at
//! column boundaries. The display path never fails a read; missing data
//! becomes zeros and a not-yet-computed summary becomes a retry-later
//! sentinel in the block-status array.

use wv_core::{samples_to_f32, SampleCount, SampleFormat};

use crate::error::SeqResult;
use crate::sequence::Sequence;

/// Pooled min/max/sum-of-squares over raw samples or summary triples
struct MinMaxSumsq {
    min: f32,
    max: f32,
    sumsq: f32,
}

impl MinMaxSumsq {
    fn new(pv: &[f32], count: usize, divisor: usize) -> Self {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut sumsq = 0.0f32;
        match divisor {
            1 => {
                // array holds samples
                for &v in &pv[..count] {
                    if v < min {
                        min = v;
                    }
                    if v > max {
                        max = v;
                    }
                    sumsq += v * v;
                }
            }
            _ => {
                // array holds triples of min, max, and rms values
                for triple in pv[..count * 3].chunks_exact(3) {
                    if triple[0] < min {
                        min = triple[0];
                    }
                    if triple[1] > max {
                        max = triple[1];
                    }
                    sumsq += triple[2] * triple[2];
                }
            }
        }
        Self { min, max, sumsq }
    }
}

impl Sequence {
    /// Overall min and max of `[start, start + len)`.
    ///
    /// Whole blocks are answered from their cached triples; the partial
    /// first and last blocks only touch the disk when their whole-block
    /// bounds could actually extend the running answer.
    pub fn get_min_max(
        &self,
        start: SampleCount,
        len: SampleCount,
        may_throw: bool,
    ) -> SeqResult<(f32, f32)> {
        if len == 0 || self.blocks.is_empty() {
            return Ok((0.0, 0.0));
        }

        let mut min = f32::MAX;
        let mut max = f32::MIN;

        let block0 = self.find_block(start);
        let block1 = self.find_block(start + len - 1);

        // Blocks strictly inside the region are already summarized in
        // memory
        for b in block0 + 1..block1 {
            let results = self.blocks[b].file.min_max_rms(may_throw)?;
            if results.min < min {
                min = results.min;
            }
            if results.max > max {
                max = results.max;
            }
        }

        {
            let the_block = &self.blocks[block0];
            let results = the_block.file.min_max_rms(may_throw)?;
            if results.min < min || results.max > max {
                // start lies within the block
                let s0 = (start - the_block.start) as usize;
                let maxl0 =
                    (the_block.start + the_block.file.len() as SampleCount - start) as usize;
                debug_assert!(maxl0 <= self.max_samples);
                let l0 = maxl0.min(len as usize);

                let results = the_block.file.min_max_rms_range(s0, l0, may_throw)?;
                if results.min < min {
                    min = results.min;
                }
                if results.max > max {
                    max = results.max;
                }
            }
        }

        if block1 > block0 {
            let the_block = &self.blocks[block1];
            let results = the_block.file.min_max_rms(may_throw)?;
            if results.min < min || results.max > max {
                // start + len - 1 lies in the block
                let l0 = (start + len - the_block.start) as usize;
                debug_assert!(l0 <= self.max_samples);

                let results = the_block.file.min_max_rms_range(0, l0, may_throw)?;
                if results.min < min {
                    min = results.min;
                }
                if results.max > max {
                    max = results.max;
                }
            }
        }

        Ok((min, max))
    }

    /// Root-mean-square over `[start, start + len)`, pooling the cached
    /// per-block RMS values with windowed reads of the partial first and
    /// last blocks.
    pub fn get_rms(
        &self,
        start: SampleCount,
        len: SampleCount,
        may_throw: bool,
    ) -> SeqResult<f32> {
        if len == 0 || self.blocks.is_empty() {
            return Ok(0.0);
        }

        let mut sumsq = 0.0f64;
        let mut length: SampleCount = 0;

        let block0 = self.find_block(start);
        let block1 = self.find_block(start + len - 1);

        for b in block0 + 1..block1 {
            let the_block = &self.blocks[b];
            let results = the_block.file.min_max_rms(may_throw)?;
            let file_len = the_block.file.len();
            let block_rms = results.rms as f64;
            sumsq += block_rms * block_rms * file_len as f64;
            length += file_len as SampleCount;
        }

        {
            let the_block = &self.blocks[block0];
            // start lies within the block
            let s0 = (start - the_block.start) as usize;
            let maxl0 = (the_block.start + the_block.file.len() as SampleCount - start) as usize;
            debug_assert!(maxl0 <= self.max_samples);
            let l0 = maxl0.min(len as usize);

            let results = the_block.file.min_max_rms_range(s0, l0, may_throw)?;
            let partial_rms = results.rms as f64;
            sumsq += partial_rms * partial_rms * l0 as f64;
            length += l0 as SampleCount;
        }

        if block1 > block0 {
            let the_block = &self.blocks[block1];
            // start + len - 1 lies within the block
            let l0 = (start + len - the_block.start) as usize;
            debug_assert!(l0 <= self.max_samples);

            let results = the_block.file.min_max_rms_range(0, l0, may_throw)?;
            let partial_rms = results.rms as f64;
            sumsq += partial_rms * partial_rms * l0 as f64;
            length += l0 as SampleCount;
        }

        debug_assert!(length == len);
        Ok((sumsq / length as f64).sqrt() as f32)
    }

    /// Fill per-column display arrays for `min.len()` columns.
    ///
    /// Column `p` covers samples `[where_[p], where_[p + 1])`; `where_`
    /// must be non-decreasing with one more entry than there are columns.
    /// `block_status[p]` reports the block index a column was read from,
    /// or `-1 - index` when that block's summary is not computed yet and
    /// the caller should retry later.
    ///
    /// Returns false when the requested window lies entirely outside the
    /// sequence.
    pub fn get_wave_display(
        &self,
        min: &mut [f32],
        max: &mut [f32],
        rms: &mut [f32],
        block_status: &mut [i64],
        where_: &[SampleCount],
    ) -> bool {
        let len = min.len();
        debug_assert!(len > 0);
        debug_assert!(where_.len() > len);
        debug_assert!(max.len() >= len && rms.len() >= len && block_status.len() >= len);

        let s0 = where_[0].max(0);
        if s0 >= self.num_samples {
            // None of the samples asked for are in range
            return false;
        }

        // In case where_[len - 1] == where_[len], raise the limit by one
        // so the last column loads at least one sample
        let s1 = self
            .num_samples
            .min((1 + where_[len - 1]).max(where_[len]));
        let mut temp = vec![0f32; self.max_samples];
        let mut temp_bytes = vec![0u8; self.max_samples * SampleFormat::Float.bytes()];

        let mut pixel = 0usize;

        let mut src_x = s0;
        let mut next_src_x: SampleCount = 0;
        let mut last_rms_denom = 0usize;
        let mut last_divisor = 0usize;
        let mut where_now = (s1 - 1).min(where_[0]);
        let mut where_next: SampleCount = 0;

        // Loop over the block files, touching each not more than once
        let n_blocks = self.blocks.len();
        let block0 = self.find_block(s0);
        for b in block0..n_blocks {
            if b > block0 {
                src_x = next_src_x;
            }
            if src_x >= s1 {
                break;
            }

            // Sample range of this block that is in the display
            let seq_block = &self.blocks[b];
            let start = seq_block.start;
            next_src_x = s1.min(start + seq_block.file.len() as SampleCount);

            // Range of columns whose starting samples this block covers
            let next_pixel;
            if next_src_x >= s1 {
                // last pass
                next_pixel = len;
            } else {
                let mut np = pixel;
                // Taking min with s1 - 1, here and elsewhere, keeps the
                // last column supplied with at least one sample
                while np < len {
                    where_next = (s1 - 1).min(where_[np]);
                    if where_next >= next_src_x {
                        break;
                    }
                    np += 1;
                }
                next_pixel = np;
            }
            if next_pixel == pixel {
                // The entire block falls within one column; skip its
                // contribution rather than pay for it at every column of
                // a zoomed-out view
                continue;
            }
            if next_pixel == len {
                where_next = s1;
            }

            // Decide the summary level
            let samples_per_pixel =
                (where_next - where_now) as f64 / (next_pixel - pixel) as f64;
            let divisor: usize = if samples_per_pixel >= 65536.0 {
                65536
            } else if samples_per_pixel >= 256.0 {
                256
            } else {
                1
            };

            let mut status = b as i64;

            // How many samples or triples are needed
            let start_position = (((src_x - start) / divisor as SampleCount).max(0)) as usize;
            let inclusive_end_position = ((self.max_samples / divisor) as SampleCount - 1)
                .min((next_src_x - 1 - start) / divisor as SampleCount)
                as usize;
            let num = 1 + inclusive_end_position as isize - start_position as isize;
            if num <= 0 {
                // A zero length block file should be impossible
                debug_assert!(false, "empty block in display read");
                while pixel < next_pixel {
                    min[pixel] = 0.0;
                    max[pixel] = 0.0;
                    rms[pixel] = 0.0;
                    block_status[pixel] = status;
                    pixel += 1;
                }
                continue;
            }
            let num = num as usize;

            // Read from the block file or its summary
            match divisor {
                1 => {
                    // Raw samples; never throw on the display path
                    let read = seq_block.file.read_data(
                        &mut temp_bytes,
                        SampleFormat::Float,
                        start_position,
                        num,
                        false,
                    );
                    debug_assert!(read.is_ok());
                    samples_to_f32(&temp_bytes, SampleFormat::Float, &mut temp[..num]);
                }
                256 => {
                    if seq_block.file.is_summary_available() {
                        // Zero-filled on a failed read
                        seq_block.file.read_256(&mut temp, start_position, num);
                    } else {
                        // Not computed yet; tell the caller to retry later
                        status = -1 - b as i64;
                    }
                }
                _ => {
                    if seq_block.file.is_summary_available() {
                        seq_block.file.read_64k(&mut temp, start_position, num);
                    } else {
                        status = -1 - b as i64;
                    }
                }
            }

            let mut file_position = start_position;

            // The previous column might straddle blocks; impute some of
            // this block's data to it and re-pool its rms
            if b > block0 && pixel > 0 {
                // where_now and start are in the same block
                let mid_position = ((where_now - start) / divisor as SampleCount) as usize;
                let diff = mid_position as isize - file_position as isize;
                if diff > 0 {
                    let values = MinMaxSumsq::new(&temp, diff as usize, divisor);
                    let last_pixel = pixel - 1;
                    min[last_pixel] = min[last_pixel].min(values.min);
                    max[last_pixel] = max[last_pixel].max(values.max);
                    let last_num_samples = (last_rms_denom * last_divisor) as f32;
                    let last_rms = rms[last_pixel];
                    rms[last_pixel] = ((last_rms * last_rms * last_num_samples
                        + values.sumsq * divisor as f32)
                        / (last_num_samples + diff as f32 * divisor as f32))
                        .sqrt();

                    file_position = mid_position;
                }
            }

            // Loop over file positions
            let mut rms_denom = 0usize;
            while file_position <= inclusive_end_position {
                // Range of columns sharing this file position (normally
                // one, more when zoomed close) and the range of positions
                // for those columns
                let mut pixel_x = pixel + 1;
                let mut position_x = 0usize;
                while pixel_x < next_pixel {
                    position_x = (((s1 - 1).min(where_[pixel_x]) - start)
                        / divisor as SampleCount) as usize;
                    if file_position != position_x {
                        break;
                    }
                    pixel_x += 1;
                }
                if pixel_x >= next_pixel {
                    position_x = 1 + inclusive_end_position;
                }

                // Results to assign
                rms_denom = position_x - file_position;
                debug_assert!(rms_denom > 0);
                let pv_offset =
                    (file_position - start_position) * if divisor == 1 { 1 } else { 3 };
                let values = MinMaxSumsq::new(&temp[pv_offset..], rms_denom, divisor);

                let column_rms = (values.sumsq / rms_denom as f32).sqrt();
                for p in pixel..pixel_x {
                    min[p] = values.min;
                    max[p] = values.max;
                    rms[p] = column_rms;
                    block_status[p] = status;
                }

                pixel = pixel_x;
                file_position = position_x;
            }

            debug_assert!(pixel == next_pixel);
            where_now = where_next;
            pixel = next_pixel;
            last_divisor = divisor;
            last_rms_denom = rms_denom;
        }

        debug_assert!(pixel == len);
        true
    }
}

//! Multi-resolution block summaries
//!
//! Every block file carries a precomputed summary of its samples: the
//! whole-block (min, max, rms) triple plus triple arrays at 1:256 and
//! 1:65536 decimation. The display path reads these instead of raw
//! samples once a pixel column covers enough of them.

/// One summary triple
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MinMaxRms {
    pub min: f32,
    pub max: f32,
    pub rms: f32,
}

impl MinMaxRms {
    pub fn new(min: f32, max: f32, rms: f32) -> Self {
        Self { min, max, rms }
    }

    /// Serialize as 12 little-endian bytes
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&self.min.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.max.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.rms.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        Self {
            min: f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            max: f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            rms: f32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

/// Samples per frame at the fine summary level
pub const SUMMARY_256_DIVISOR: usize = 256;

/// Samples per frame at the coarse summary level
pub const SUMMARY_64K_DIVISOR: usize = 65536;

/// Compute the triple over a run of samples; zeros for an empty run
pub fn min_max_rms_of(samples: &[f32]) -> MinMaxRms {
    if samples.is_empty() {
        return MinMaxRms::default();
    }
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    let mut sumsq = 0.0f32;
    for &v in samples {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
        sumsq += v * v;
    }
    MinMaxRms::new(min, max, (sumsq / samples.len() as f32).sqrt())
}

/// The complete summary of one block's samples
#[derive(Debug, Clone)]
pub struct BlockSummary {
    pub total: MinMaxRms,
    pub frames_256: Vec<MinMaxRms>,
    pub frames_64k: Vec<MinMaxRms>,
}

impl BlockSummary {
    /// Compute both decimation levels and the whole-block triple
    pub fn compute(samples: &[f32]) -> Self {
        let frames_256 = samples
            .chunks(SUMMARY_256_DIVISOR)
            .map(min_max_rms_of)
            .collect();
        let frames_64k = samples
            .chunks(SUMMARY_64K_DIVISOR)
            .map(min_max_rms_of)
            .collect();
        Self {
            total: min_max_rms_of(samples),
            frames_256,
            frames_64k,
        }
    }

    /// All-zero summary for a silent run of `len` samples
    pub fn silent(len: usize) -> Self {
        Self {
            total: MinMaxRms::default(),
            frames_256: vec![MinMaxRms::default(); len.div_ceil(SUMMARY_256_DIVISOR)],
            frames_64k: vec![MinMaxRms::default(); len.div_ceil(SUMMARY_64K_DIVISOR)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triple_serialization() {
        let t = MinMaxRms::new(-0.5, 0.8, 0.3);
        let parsed = MinMaxRms::from_bytes(&t.to_bytes());
        assert_eq!(parsed, t);
    }

    #[test]
    fn test_min_max_rms_of() {
        let r = min_max_rms_of(&[3.0, -4.0]);
        assert_eq!(r.min, -4.0);
        assert_eq!(r.max, 3.0);
        // sqrt((9 + 16) / 2)
        assert!((r.rms - (12.5f32).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(min_max_rms_of(&[]), MinMaxRms::default());
    }

    #[test]
    fn test_frame_counts() {
        let samples = vec![0.25f32; 70000];
        let s = BlockSummary::compute(&samples);
        assert_eq!(s.frames_256.len(), 70000usize.div_ceil(256));
        assert_eq!(s.frames_64k.len(), 2);
        assert_eq!(s.total.max, 0.25);
        assert!((s.frames_64k[1].rms - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_silent_summary() {
        let s = BlockSummary::silent(1000);
        assert_eq!(s.frames_256.len(), 4);
        assert_eq!(s.frames_64k.len(), 1);
        assert_eq!(s.total, MinMaxRms::default());
    }
}

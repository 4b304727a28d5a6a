//! Loudness histogram
//!
//! Every completed RMS window adds one count at its loudness, measured in
//! hundredths of a dB. The representative loudness of a title or album is
//! read back as a percentile over these counts.

/// Histogram buckets per dB
pub const STEPS_PER_DB: usize = 100;

/// Loudness range covered by the histogram, in dB (normal max. values are 70 to 80 dB)
pub const MAX_DB: usize = 120;

/// Number of histogram buckets
pub const HISTOGRAM_LEN: usize = STEPS_PER_DB * MAX_DB;

/// Counts of RMS windows per 0.01 dB loudness bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoudnessHistogram {
    counts: Vec<u32>,
}

impl Default for LoudnessHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LoudnessHistogram {
    pub fn new() -> Self {
        Self {
            counts: vec![0; HISTOGRAM_LEN],
        }
    }

    /// Map a loudness value (0.01 dB units) to its bucket
    ///
    /// Floors and clamps into the histogram, so silence and anything below
    /// 0 dB land in bucket 0 and extreme levels in the last.
    pub fn bucket_for(value: f64) -> usize {
        // `as` saturates, and NaN becomes 0
        let bucket = value.floor() as i64;
        bucket.clamp(0, HISTOGRAM_LEN as i64 - 1) as usize
    }

    /// Count one window at `bucket`, clamped into range; counts saturate
    pub fn increment(&mut self, bucket: usize) {
        let bucket = bucket.min(HISTOGRAM_LEN - 1);
        self.counts[bucket] = self.counts[bucket].saturating_add(1);
    }

    /// Add every bucket of `other` into this histogram
    pub fn merge_from(&mut self, other: &LoudnessHistogram) {
        assert_eq!(self.counts.len(), other.counts.len());
        for (count, &add) in self.counts.iter_mut().zip(&other.counts) {
            *count = count.saturating_add(add);
        }
    }

    /// Zero every bucket
    pub fn clear(&mut self) {
        self.counts.fill(0);
    }

    /// Total number of counted windows
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// Raw bucket counts
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Bucket below which `percentile` of all windows fall
    ///
    /// Scans from the loudest bucket down until the loudest
    /// `ceil(total * (1 - percentile))` windows are used up. Returns `None`
    /// for an empty histogram.
    pub fn percentile_index(&self, percentile: f64) -> Option<usize> {
        let total = self.total();
        if total == 0 {
            return None;
        }

        let mut remaining = (total as f64 * (1.0 - percentile)).ceil() as i64;
        let mut index = 0;
        for (i, &count) in self.counts.iter().enumerate().rev() {
            remaining -= count as i64;
            if remaining <= 0 {
                index = i;
                break;
            }
        }

        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_for_clamps() {
        assert_eq!(LoudnessHistogram::bucket_for(-370.0), 0);
        assert_eq!(LoudnessHistogram::bucket_for(f64::NAN), 0);
        assert_eq!(LoudnessHistogram::bucket_for(0.99), 0);
        assert_eq!(LoudnessHistogram::bucket_for(6243.7), 6243);
        assert_eq!(LoudnessHistogram::bucket_for(1.0e9), HISTOGRAM_LEN - 1);
        assert_eq!(LoudnessHistogram::bucket_for(f64::INFINITY), HISTOGRAM_LEN - 1);
    }

    #[test]
    fn test_empty_histogram_has_no_percentile() {
        let hist = LoudnessHistogram::new();
        assert!(hist.is_empty());
        assert_eq!(hist.total(), 0);
        assert_eq!(hist.percentile_index(0.95), None);
    }

    #[test]
    fn test_single_window_percentile() {
        let mut hist = LoudnessHistogram::new();
        hist.increment(8153);
        assert_eq!(hist.percentile_index(0.95), Some(8153));
    }

    #[test]
    fn test_percentile_skips_loudest_windows() {
        let mut hist = LoudnessHistogram::new();
        for _ in 0..94 {
            hist.increment(4000);
        }
        for _ in 0..6 {
            hist.increment(9000);
        }
        assert_eq!(hist.percentile_index(0.95), Some(9000));
    }

    #[test]
    fn test_percentile_threshold_rounds_up() {
        // 1.0 - 0.95 is slightly above 0.05, so 100 windows need 6 from the top
        let mut hist = LoudnessHistogram::new();
        for _ in 0..95 {
            hist.increment(4000);
        }
        for _ in 0..5 {
            hist.increment(9000);
        }
        assert_eq!(hist.percentile_index(0.95), Some(4000));
    }

    #[test]
    fn test_merge_and_clear() {
        let mut title = LoudnessHistogram::new();
        title.increment(10);
        title.increment(10);
        title.increment(HISTOGRAM_LEN + 5);

        let mut album = LoudnessHistogram::new();
        album.increment(10);
        album.merge_from(&title);

        assert_eq!(album.counts()[10], 3);
        assert_eq!(album.counts()[HISTOGRAM_LEN - 1], 1);
        assert_eq!(album.total(), 4);

        title.clear();
        assert!(title.is_empty());
        assert_eq!(album.total(), 4);
    }

    #[test]
    fn test_counts_saturate() {
        let mut hist = LoudnessHistogram::new();
        hist.counts[5] = u32::MAX;
        hist.increment(5);
        assert_eq!(hist.counts()[5], u32::MAX);

        let mut album = LoudnessHistogram::new();
        album.increment(5);
        album.merge_from(&hist);
        assert_eq!(album.counts()[5], u32::MAX);
        assert_eq!(album.total(), u32::MAX as u64);
        assert_eq!(album.percentile_index(0.95), Some(5));
    }
}

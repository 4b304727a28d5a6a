//! ReplayGain loudness analysis
//!
//! The analyzer implements the ReplayGain 1.0 algorithm over streamed PCM:
//!
//! 1. Equal-loudness filter: an order-10 Yule-Walker stage followed by an
//!    order-2 Butterworth high-pass, run per channel
//! 2. Mean square of the filtered signal in 50 ms windows
//! 3. Window loudness counted into a 0.01 dB histogram
//! 4. 95th percentile of the histogram, relative to the pink noise
//!    calibration level, as the gain
//!
//! Samples arrive in batches of any size. Filter history is carried across
//! batches and across window boundaries, so splitting a stream differently
//! never changes the result.
//!
//! Samples are expected in the 16-bit range (-32768.0 to 32767.0).

use tracing::{debug, trace};

use crate::coefficients::{FilterCoefficients, FrequencyClass, MAX_ORDER};
use crate::error::{AnalysisError, Result};
use crate::histogram::{LoudnessHistogram, STEPS_PER_DB};
use crate::lookback::LookbackBuffer;
use crate::pipeline::{BoundPipeline, ChannelPipeline};

/// Length of one RMS window in milliseconds
pub const RMS_WINDOW_TIME_MS: usize = 50;

/// Highest supported sample rate in kHz
pub const MAX_SAMPLE_RATE_KHZ: usize = 96;

/// Largest RMS window of any supported rate, in samples
pub const MAX_WINDOW_LEN: usize = MAX_SAMPLE_RATE_KHZ * RMS_WINDOW_TIME_MS + 1;

/// Share of windows that must be quieter than the reported loudness
pub const RMS_PERCENTILE: f64 = 0.95;

/// Pink noise reference calibration constant
///
/// This is the loudness value produced by the algorithm when analyzing the
/// standard -14 dB FS pink noise reference signal. Gains are reported
/// relative to it.
/// Source: https://replaygain.hydrogenaud.io/calibration.html
pub const PINK_REF: f64 = 64.82;

/// Small constant to prevent denormal float slowdowns in the first stage
const DENORMAL_PREVENTION: f64 = 1e-10;

/// Added to the mean square so silence maps to a finite logarithm
const SILENCE_FLOOR: f64 = 1e-37;

/// Running sums of the RMS window being filled
#[derive(Debug, Clone, Default)]
struct RmsWindow {
    /// Window size in samples (50ms worth)
    len: usize,
    /// Number of samples accumulated so far
    accumulated: usize,
    /// Left channel sum of squares
    left_sum_sq: f64,
    /// Right channel sum of squares
    right_sum_sq: f64,
}

impl RmsWindow {
    fn new(len: usize) -> Self {
        Self {
            len,
            ..Default::default()
        }
    }

    fn room(&self) -> usize {
        self.len - self.accumulated
    }

    fn add(&mut self, count: usize, left_sum_sq: f64, right_sum_sq: f64) {
        self.left_sum_sq += left_sum_sq;
        self.right_sum_sq += right_sum_sq;
        self.accumulated += count;
        assert!(
            self.accumulated <= self.len,
            "RMS window overflow: {} samples in a window of {}",
            self.accumulated,
            self.len
        );
    }

    fn is_full(&self) -> bool {
        self.accumulated == self.len
    }

    /// Loudness of the accumulated samples in histogram units (0.01 dB)
    fn loudness(&self) -> f64 {
        // Mean square of both channels averaged
        let mean_square =
            (self.left_sum_sq + self.right_sum_sq) / self.accumulated as f64 * 0.5;
        STEPS_PER_DB as f64 * 10.0 * (mean_square + SILENCE_FLOOR).log10()
    }

    fn reset(&mut self) {
        self.accumulated = 0;
        self.left_sum_sq = 0.0;
        self.right_sum_sq = 0.0;
    }
}

/// Streaming ReplayGain analyzer for one sample rate
///
/// Feed samples with [`analyze`](Self::analyze), then call
/// [`title_gain`](Self::title_gain) at the end of every title and
/// [`album_gain`](Self::album_gain) once all titles are done. The filter
/// state is not reset between titles, so an album analyzed track by track
/// is treated as one continuous stream.
///
/// An analyzer is single-threaded state. Analyze independent streams with
/// independent instances.
#[derive(Debug, Clone)]
pub struct LoudnessAnalyzer {
    sample_rate: u32,
    class: FrequencyClass,
    coefficients: FilterCoefficients,
    left: ChannelPipeline,
    right: ChannelPipeline,
    window: RmsWindow,
    title: LoudnessHistogram,
    album: LoudnessHistogram,
}

impl LoudnessAnalyzer {
    /// Create an analyzer for `sample_rate`
    ///
    /// Fails with [`AnalysisError::UnsupportedSampleRate`] unless the rate is
    /// one of the twelve with filter coefficients.
    pub fn new(sample_rate: u32) -> Result<Self> {
        let class = FrequencyClass::from_sample_rate(sample_rate)
            .ok_or(AnalysisError::UnsupportedSampleRate(sample_rate))?;

        let window_len = window_len_for(sample_rate);
        debug!(sample_rate, ?class, window_len, "created loudness analyzer");

        Ok(Self {
            sample_rate,
            class,
            coefficients: class.coefficients(),
            left: ChannelPipeline::new(MAX_WINDOW_LEN),
            right: ChannelPipeline::new(MAX_WINDOW_LEN),
            window: RmsWindow::new(window_len),
            title: LoudnessHistogram::new(),
            album: LoudnessHistogram::new(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frequency_class(&self) -> FrequencyClass {
        self.class
    }

    /// RMS window length in samples
    pub fn window_len(&self) -> usize {
        self.window.len
    }

    /// Histogram of the title being analyzed
    pub fn title_histogram(&self) -> &LoudnessHistogram {
        &self.title
    }

    /// Histogram of every title drained so far
    pub fn album_histogram(&self) -> &LoudnessHistogram {
        &self.album
    }

    /// Analyze a batch of samples
    ///
    /// `right` of `None` means mono: `left` is used for both channels.
    /// An empty batch changes nothing.
    ///
    /// # Panics
    ///
    /// Panics if `left` and `right` differ in length.
    pub fn analyze(&mut self, left: &[f64], right: Option<&[f64]>) {
        let batch_len = left.len();
        if batch_len == 0 {
            return;
        }

        let right = right.unwrap_or(left);
        assert_eq!(
            batch_len,
            right.len(),
            "left and right channels must have the same length"
        );

        let coefficients = self.coefficients;
        let mut left_channel = self.left.bind_input(left);
        let mut right_channel = self.right.bind_input(right);

        let mut input_at = 0;
        while input_at < batch_len {
            let mut count = self.window.room().min(batch_len - input_at);
            // The first samples of a batch reach back into the input history
            if input_at < MAX_ORDER {
                count = count.min(MAX_ORDER - input_at);
            }

            let output_at = self.window.accumulated;
            let left_sum_sq =
                filter_chunk(&mut left_channel, &coefficients, input_at, output_at, count);
            let right_sum_sq =
                filter_chunk(&mut right_channel, &coefficients, input_at, output_at, count);

            self.window.add(count, left_sum_sq, right_sum_sq);
            input_at += count;

            if self.window.is_full() {
                let loudness = self.window.loudness();
                let bucket = LoudnessHistogram::bucket_for(loudness);
                trace!(loudness, bucket, "completed RMS window");
                self.title.increment(bucket);

                left_channel.capture_filter_history(self.window.accumulated);
                right_channel.capture_filter_history(self.window.accumulated);
                self.window.reset();
            }
        }

        left_channel.capture_input_history();
        right_channel.capture_input_history();
    }

    /// Gain of the title analyzed since the previous call, in dB
    ///
    /// On success the title histogram is merged into the album histogram
    /// and cleared, and the partial RMS window is discarded. Filter history
    /// is kept. Fails with [`AnalysisError::InsufficientSamples`] if no
    /// window completed, leaving all state untouched.
    pub fn title_gain(&mut self) -> Result<f64> {
        let gain = gain_from_histogram(&self.title)?;
        debug!(windows = self.title.total(), gain, "title gain");

        self.album.merge_from(&self.title);
        self.title.clear();
        self.window.reset();

        Ok(gain)
    }

    /// Gain over every title drained by [`title_gain`](Self::title_gain), in dB
    pub fn album_gain(&self) -> Result<f64> {
        let gain = gain_from_histogram(&self.album)?;
        debug!(windows = self.album.total(), gain, "album gain");
        Ok(gain)
    }
}

/// Number of samples in one RMS window at `sample_rate`
///
/// `ceil(sample_rate / 1000 * 50)`, computed in integers.
pub fn window_len_for(sample_rate: u32) -> usize {
    (sample_rate as usize * RMS_WINDOW_TIME_MS).div_ceil(1000)
}

/// Percentile gain of a histogram in dB
///
/// The percentile bucket is reported in whole dB: its index is divided by
/// the bucket count per dB in integer arithmetic before it is subtracted
/// from the calibration level.
pub fn gain_from_histogram(histogram: &LoudnessHistogram) -> Result<f64> {
    let index = histogram
        .percentile_index(RMS_PERCENTILE)
        .ok_or(AnalysisError::InsufficientSamples)?;
    Ok(PINK_REF - (index / STEPS_PER_DB) as f64)
}

/// Run both filter stages over `count` samples of one channel and return
/// the sum of squares of the result
fn filter_chunk(
    channel: &mut BoundPipeline<'_>,
    coefficients: &FilterCoefficients,
    input_at: usize,
    output_at: usize,
    count: usize,
) -> f64 {
    apply_recurrence(
        &channel.input,
        input_at,
        &mut *channel.filtered,
        output_at,
        count,
        coefficients.yule,
        DENORMAL_PREVENTION,
    );
    apply_recurrence(
        &*channel.filtered,
        output_at,
        &mut *channel.output,
        output_at,
        count,
        coefficients.butter,
        0.0,
    );

    channel.output.window()[output_at..output_at + count]
        .iter()
        .map(|&sample| sample * sample)
        .sum()
}

/// IIR recurrence with an interleaved kernel `[a0, b1, a1, ..., bN, aN]`
///
/// `y[t] = offset + x[t]*a0 - y[t-1]*b1 + x[t-1]*a1 - ... - y[t-N]*bN + x[t-N]*aN`,
/// summed in exactly that order.
fn apply_recurrence<W, H>(
    input: &LookbackBuffer<W, H>,
    input_at: usize,
    output: &mut LookbackBuffer,
    output_at: usize,
    count: usize,
    kernel: &[f64],
    offset: f64,
) where
    W: AsRef<[f64]>,
    H: AsRef<[f64]>,
{
    let order = kernel.len() / 2;
    for t in 0..count {
        let x = (input_at + t) as isize;
        let y = (output_at + t) as isize;

        let mut acc = offset + input.read(x) * kernel[0];
        for k in 1..=order {
            acc = acc - output.read(y - k as isize) * kernel[2 * k - 1]
                + input.read(x - k as isize) * kernel[2 * k];
        }
        output.write(y, acc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPPORTED_RATES: [u32; 12] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000,
    ];

    #[test]
    fn test_analyzer_creation() {
        for rate in SUPPORTED_RATES {
            let analyzer = LoudnessAnalyzer::new(rate);
            assert!(analyzer.is_ok(), "Sample rate {} should be supported", rate);
            assert_eq!(analyzer.unwrap().sample_rate(), rate);
        }

        assert_eq!(
            LoudnessAnalyzer::new(6000).unwrap_err(),
            AnalysisError::UnsupportedSampleRate(6000)
        );
    }

    #[test]
    fn test_window_lengths() {
        assert_eq!(window_len_for(8000), 400);
        assert_eq!(window_len_for(11025), 552);
        assert_eq!(window_len_for(22050), 1103);
        assert_eq!(window_len_for(44100), 2205);
        assert_eq!(window_len_for(96000), 4800);
        assert!(SUPPORTED_RATES
            .iter()
            .all(|&rate| window_len_for(rate) <= MAX_WINDOW_LEN));
    }

    #[test]
    fn test_gain_uses_whole_db_of_percentile_bucket() {
        let mut hist = LoudnessHistogram::new();
        hist.increment(6243);
        let gain = gain_from_histogram(&hist).unwrap();
        assert!((gain - 2.82).abs() < 1e-9, "gain {}", gain);

        hist.clear();
        hist.increment(0);
        assert_eq!(gain_from_histogram(&hist).unwrap(), PINK_REF);
    }

    #[test]
    fn test_empty_histogram_is_insufficient() {
        let hist = LoudnessHistogram::new();
        assert_eq!(
            gain_from_histogram(&hist),
            Err(AnalysisError::InsufficientSamples)
        );
    }

    #[test]
    fn test_recurrence_impulse_response() {
        // y[t] = x[t] - 0.5*y[t-1]
        let kernel = [1.0, 0.5, 0.0];
        let impulse = [1.0, 0.0, 0.0, 0.0];
        let input = LookbackBuffer::new(&impulse[..], vec![0.0; 2].into_boxed_slice());
        let mut output = LookbackBuffer::with_capacity(4, 2);

        apply_recurrence(&input, 0, &mut output, 0, 4, &kernel, 0.0);
        assert_eq!(output.window(), &[1.0, -0.5, 0.25, -0.125]);
    }

    #[test]
    fn test_recurrence_continues_across_calls() {
        let kernel = [0.5, -0.25, 0.5];
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let input = LookbackBuffer::new(&samples[..], vec![0.0; 1].into_boxed_slice());

        let mut whole = LookbackBuffer::with_capacity(6, 1);
        apply_recurrence(&input, 0, &mut whole, 0, 6, &kernel, 0.0);

        let mut split = LookbackBuffer::with_capacity(6, 1);
        apply_recurrence(&input, 0, &mut split, 0, 2, &kernel, 0.0);
        apply_recurrence(&input, 2, &mut split, 2, 4, &kernel, 0.0);

        assert_eq!(whole.window(), split.window());
    }

    #[test]
    #[should_panic(expected = "same length")]
    fn test_mismatched_channels_panic() {
        let mut analyzer = LoudnessAnalyzer::new(8000).unwrap();
        analyzer.analyze(&[0.0; 10], Some(&[0.0; 9][..]));
    }

    #[test]
    #[should_panic(expected = "RMS window overflow")]
    fn test_window_overflow_panics() {
        let mut window = RmsWindow::new(4);
        window.add(3, 0.0, 0.0);
        window.add(2, 0.0, 0.0);
    }

    #[test]
    fn test_title_gain_resets_partial_window() {
        let mut analyzer = LoudnessAnalyzer::new(8000).unwrap();
        analyzer.analyze(&[0.0; 600], None);
        assert_eq!(analyzer.window.accumulated, 200);

        analyzer.title_gain().unwrap();
        assert_eq!(analyzer.window.accumulated, 0);
        assert!(analyzer.title_histogram().is_empty());
        assert_eq!(analyzer.album_histogram().total(), 1);
    }
}

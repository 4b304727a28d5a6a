//! Per-channel filter state

use crate::coefficients::MAX_ORDER;
use crate::lookback::LookbackBuffer;

/// Processing state of one audio channel
///
/// Holds the three stages of the filter cascade. `filtered` and `output` own
/// a window sized for the longest RMS window of any supported rate, so they
/// are allocated once and reused. `input` never owns samples: it only keeps
/// the history of the previous batch, and each batch is bound to it by
/// reference through [`ChannelPipeline::bind_input`].
#[derive(Debug, Clone)]
pub struct ChannelPipeline {
    input: LookbackBuffer,
    filtered: LookbackBuffer,
    output: LookbackBuffer,
}

/// A [`ChannelPipeline`] with a batch of caller samples bound as input
#[derive(Debug)]
pub struct BoundPipeline<'a> {
    pub input: LookbackBuffer<&'a [f64], &'a mut [f64]>,
    pub filtered: &'a mut LookbackBuffer,
    pub output: &'a mut LookbackBuffer,
}

impl ChannelPipeline {
    /// Allocate a pipeline whose filter windows hold `window_capacity` samples
    pub fn new(window_capacity: usize) -> Self {
        Self {
            input: LookbackBuffer::with_capacity(0, MAX_ORDER),
            filtered: LookbackBuffer::with_capacity(window_capacity, MAX_ORDER),
            output: LookbackBuffer::with_capacity(window_capacity, MAX_ORDER),
        }
    }

    /// Bind `samples` as the current input window without copying them
    pub fn bind_input<'a>(&'a mut self, samples: &'a [f64]) -> BoundPipeline<'a> {
        BoundPipeline {
            input: LookbackBuffer::new(samples, self.input.history_mut()),
            filtered: &mut self.filtered,
            output: &mut self.output,
        }
    }

    /// Input history carried over from the previous batch
    pub fn input_history(&self) -> &[f64] {
        self.input.history()
    }

    /// Stage-1 output buffer
    pub fn filtered(&self) -> &LookbackBuffer {
        &self.filtered
    }

    /// Stage-2 output buffer
    pub fn output(&self) -> &LookbackBuffer {
        &self.output
    }
}

impl BoundPipeline<'_> {
    /// Keep the last [`MAX_ORDER`] samples of both filter stages, ending at
    /// `window_end`, so the next RMS window continues the recurrences
    pub fn capture_filter_history(&mut self, window_end: usize) {
        let start = window_end as isize - MAX_ORDER as isize;
        self.filtered.capture_history(start);
        self.output.capture_history(start);
    }

    /// Keep the last [`MAX_ORDER`] input samples for the next batch
    ///
    /// With a batch shorter than the history the start is negative and part
    /// of the old history is carried forward.
    pub fn capture_input_history(&mut self) {
        let start = self.input.len() as isize - MAX_ORDER as isize;
        self.input.capture_history(start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_input_reads_through_history() {
        let mut pipeline = ChannelPipeline::new(8);

        let first: Vec<f64> = (1..=12).map(f64::from).collect();
        {
            let mut bound = pipeline.bind_input(&first);
            assert_eq!(bound.input.read(0), 1.0);
            assert_eq!(bound.input.read(-1), 0.0);
            bound.capture_input_history();
        }
        assert_eq!(pipeline.input_history(), &first[2..]);

        let second = [13.0, 14.0];
        let bound = pipeline.bind_input(&second);
        assert_eq!(bound.input.read(-1), 12.0);
        assert_eq!(bound.input.read(-10), 3.0);
        assert_eq!(bound.input.read(-11), 0.0);
    }

    #[test]
    fn test_short_batch_carries_old_input_history() {
        let mut pipeline = ChannelPipeline::new(8);
        let first: Vec<f64> = (1..=10).map(f64::from).collect();
        pipeline.bind_input(&first).capture_input_history();

        let second = [11.0, 12.0, 13.0];
        pipeline.bind_input(&second).capture_input_history();

        let expected: Vec<f64> = (4..=13).map(f64::from).collect();
        assert_eq!(pipeline.input_history(), expected.as_slice());
    }

    #[test]
    fn test_capture_filter_history_takes_window_tail() {
        let mut pipeline = ChannelPipeline::new(16);
        let samples = [0.0; 4];
        {
            let mut bound = pipeline.bind_input(&samples);
            for i in 0..16 {
                bound.filtered.write(i, i as f64);
                bound.output.write(i, -(i as f64));
            }
            bound.capture_filter_history(12);
        }

        let expected: Vec<f64> = (2..12).map(|i| i as f64).collect();
        assert_eq!(pipeline.filtered().history(), expected.as_slice());
        assert_eq!(pipeline.output().read(-1), -11.0);
        assert_eq!(pipeline.output().read(-10), -2.0);
    }
}

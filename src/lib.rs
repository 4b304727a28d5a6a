//! # rgscan
//!
//! ReplayGain loudness analysis library.
//!
//! This library computes how much a track (or a whole album) has to be
//! amplified or attenuated to play back at the ReplayGain reference
//! loudness, and stores the result in APEv2 gain tags.
//!
//! ## Features
//!
//! - **Streaming**: samples arrive in batches of any size, results do not
//!   depend on how the stream is split
//! - **Album aware**: title gains drain into an album histogram without
//!   resetting the filters, so an album is analyzed as one stream
//! - **Reproducible**: full precision filter coefficients and fixed
//!   rounding rules, so the same samples always give the same gain
//! - **Tag support**: locate ID3v1, ID3v2 and APEv2 blocks, read and write
//!   ReplayGain items
//!
//! ## Example
//!
//! ```
//! use rgscan::LoudnessAnalyzer;
//!
//! let mut analyzer = LoudnessAnalyzer::new(44100).unwrap();
//!
//! // One second of silence, in the 16-bit sample range
//! let left = vec![0.0; 44100];
//! let right = vec![0.0; 44100];
//! analyzer.analyze(&left, Some(&right));
//!
//! let gain = analyzer.title_gain().unwrap();
//! assert_eq!(gain, 64.82);
//! ```
//!
//! With the `decode` feature (default), files can be analyzed directly:
//!
//! ```no_run
//! use rgscan::decode::analyze_file;
//! use std::path::Path;
//!
//! let result = analyze_file(Path::new("song.flac")).unwrap();
//! println!("{:+.2} dB, peak {:.6}", result.gain_db, result.peak);
//! ```
//!
//! ## Technical Details
//!
//! Supported sample rates: 8000, 11025, 12000, 16000, 22050, 24000, 32000,
//! 44100, 48000, 64000, 88200 and 96000 Hz. Loudness is measured over 50 ms
//! windows into a histogram with 0.01 dB resolution; the gain is the 95th
//! percentile subtracted from the 64.82 dB pink noise reference.

mod analyzer;
mod coefficients;
pub mod decode;
mod error;
mod histogram;
mod lookback;
mod pipeline;
pub mod tags;

pub use analyzer::{
    gain_from_histogram, window_len_for, LoudnessAnalyzer, MAX_SAMPLE_RATE_KHZ, MAX_WINDOW_LEN,
    PINK_REF, RMS_PERCENTILE, RMS_WINDOW_TIME_MS,
};
pub use coefficients::{
    is_supported_sample_rate, FilterCoefficients, FrequencyClass, BUTTER_LEN, BUTTER_ORDER,
    MAX_ORDER, YULE_LEN, YULE_ORDER,
};
pub use error::{AnalysisError, Result, TagError};
pub use histogram::{LoudnessHistogram, HISTOGRAM_LEN, MAX_DB, STEPS_PER_DB};
pub use lookback::LookbackBuffer;
pub use pipeline::{BoundPipeline, ChannelPipeline};

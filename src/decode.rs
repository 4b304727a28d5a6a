//! File analysis front-end
//!
//! Decodes audio files with symphonia and feeds the PCM samples to a
//! [`LoudnessAnalyzer`](crate::LoudnessAnalyzer). Available when compiled
//! with the `decode` feature (enabled by default).
//!
//! Samples are scaled to the 16-bit range the analyzer works in. Peaks are
//! reported normalized, 1.0 being full scale.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

#[cfg(feature = "decode")]
use anyhow::Context;
#[cfg(feature = "decode")]
use tracing::{debug, warn};

#[cfg(feature = "decode")]
use crate::LoudnessAnalyzer;

#[cfg(feature = "decode")]
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
#[cfg(feature = "decode")]
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
#[cfg(feature = "decode")]
use symphonia::core::formats::{FormatOptions, FormatReader};
#[cfg(feature = "decode")]
use symphonia::core::io::MediaSourceStream;
#[cfg(feature = "decode")]
use symphonia::core::meta::MetadataOptions;
#[cfg(feature = "decode")]
use symphonia::core::probe::Hint;
#[cfg(feature = "decode")]
use symphonia::core::sample::Sample;

/// Full scale of the analyzer's 16-bit sample range
#[cfg(feature = "decode")]
const PCM16_SCALE: f64 = 32768.0;

/// Result of analyzing a single file
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackGain {
    /// Recommended gain adjustment in dB
    pub gain_db: f64,
    /// Peak sample value (linear, 1.0 = full scale)
    pub peak: f64,
    /// Sample rate of the decoded track
    pub sample_rate: u32,
}

/// Result of analyzing several files as one album
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumGain {
    /// Per-file results, in input order
    pub tracks: Vec<TrackGain>,
    /// Album gain adjustment in dB
    pub gain_db: f64,
    /// Highest peak of all tracks
    pub peak: f64,
}

// =============================================================================
// Decoding
// =============================================================================

/// An opened file with its selected audio track
#[cfg(feature = "decode")]
struct DecodedTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
}

/// Planar samples of one decoded packet, scaled to the 16-bit range
#[cfg(feature = "decode")]
#[derive(Debug, Default)]
struct StereoBatch {
    left: Vec<f64>,
    right: Vec<f64>,
    stereo: bool,
    /// Largest absolute sample seen so far, in 16-bit units
    peak: f64,
}

#[cfg(feature = "decode")]
impl StereoBatch {
    fn fill<S: Sample>(&mut self, buf: &AudioBuffer<S>, to_pcm16: fn(S) -> f64) {
        let channels = buf.spec().channels.count();
        self.stereo = channels >= 2;

        self.left.clear();
        self.right.clear();
        self.left.extend(buf.chan(0).iter().map(|&s| to_pcm16(s)));
        if self.stereo {
            self.right.extend(buf.chan(1).iter().map(|&s| to_pcm16(s)));
        }

        let peak = self
            .left
            .iter()
            .chain(&self.right)
            .fold(0.0f64, |peak, s| peak.max(s.abs()));
        self.peak = self.peak.max(peak);
    }

    /// Load a decoded buffer of any sample format
    fn load(&mut self, buffer: &AudioBufferRef) {
        match buffer {
            AudioBufferRef::F32(buf) => self.fill(buf, |s| s as f64 * PCM16_SCALE),
            AudioBufferRef::F64(buf) => self.fill(buf, |s| s * PCM16_SCALE),
            AudioBufferRef::S8(buf) => self.fill(buf, |s| s as f64 * 256.0),
            AudioBufferRef::S16(buf) => self.fill(buf, |s| s as f64),
            AudioBufferRef::S24(buf) => self.fill(buf, |s| s.inner() as f64 / 256.0),
            AudioBufferRef::S32(buf) => self.fill(buf, |s| s as f64 / 65536.0),
            AudioBufferRef::U8(buf) => self.fill(buf, |s| (s as f64 - 128.0) * 256.0),
            AudioBufferRef::U16(buf) => self.fill(buf, |s| s as f64 - 32768.0),
            AudioBufferRef::U24(buf) => self.fill(buf, |s| (s.inner() as f64 - 8_388_608.0) / 256.0),
            AudioBufferRef::U32(buf) => self.fill(buf, |s| (s as f64 - 2_147_483_648.0) / 65536.0),
        }
    }

    fn analyze_into(&self, analyzer: &mut LoudnessAnalyzer) {
        let right = if self.stereo {
            Some(self.right.as_slice())
        } else {
            None
        };
        analyzer.analyze(&self.left, right);
    }
}

/// Open a file and select its first audio track
#[cfg(feature = "decode")]
fn open_track(file_path: &Path) -> Result<DecodedTrack> {
    let file = std::fs::File::open(file_path)
        .with_context(|| format!("Failed to open: {}", file_path.display()))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = file_path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("Failed to probe format: {}", file_path.display()))?;

    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow::anyhow!("No audio track found: {}", file_path.display()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow::anyhow!("Unknown sample rate: {}", file_path.display()))?;

    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
    if channels > 2 {
        warn!(
            file = %file_path.display(),
            channels,
            "only the first two channels are analyzed"
        );
    }

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .with_context(|| format!("Failed to create decoder: {}", file_path.display()))?;

    debug!(file = %file_path.display(), track_id, sample_rate, channels, "opened track");

    Ok(DecodedTrack {
        format,
        decoder,
        track_id,
        sample_rate,
    })
}

/// Decode every packet of the track into `analyzer`; returns the peak in
/// 16-bit units
#[cfg(feature = "decode")]
fn feed_track(track: &mut DecodedTrack, analyzer: &mut LoudnessAnalyzer) -> Result<f64> {
    let mut batch = StereoBatch::default();
    let mut skipped = 0usize;

    loop {
        let packet = match track.format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track.track_id {
            continue;
        }

        let decoded = match track.decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                debug!(msg, "skipping undecodable packet");
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        batch.load(&decoded);
        batch.analyze_into(analyzer);
    }

    if skipped > 0 {
        warn!(skipped, "packets skipped while decoding");
    }

    Ok(batch.peak)
}

/// Analyze one track into an existing analyzer and drain its title gain
#[cfg(feature = "decode")]
fn analyze_track_into(
    track: &mut DecodedTrack,
    analyzer: &mut LoudnessAnalyzer,
    file_path: &Path,
) -> Result<TrackGain> {
    let peak = feed_track(track, analyzer)?;
    let gain_db = analyzer
        .title_gain()
        .with_context(|| format!("Failed to compute gain: {}", file_path.display()))?;

    Ok(TrackGain {
        gain_db,
        peak: peak / PCM16_SCALE,
        sample_rate: track.sample_rate,
    })
}

// =============================================================================
// Public API
// =============================================================================

/// Analyze a single file and calculate its track gain
#[cfg(feature = "decode")]
pub fn analyze_file(file_path: &Path) -> Result<TrackGain> {
    let mut track = open_track(file_path)?;
    let mut analyzer = LoudnessAnalyzer::new(track.sample_rate)
        .with_context(|| format!("Cannot analyze: {}", file_path.display()))?;

    analyze_track_into(&mut track, &mut analyzer, file_path)
}

/// Analyze several files as one album
#[cfg(feature = "decode")]
pub fn analyze_album(files: &[&Path]) -> Result<AlbumGain> {
    analyze_album_with_progress(files, |_, _| {})
}

/// Analyze several files as one album, calling `on_track` after each file
///
/// All files run through one analyzer, so the album gain is taken over
/// every RMS window of every track and longer tracks weigh more. The files
/// must share one sample rate.
#[cfg(feature = "decode")]
pub fn analyze_album_with_progress<F>(files: &[&Path], mut on_track: F) -> Result<AlbumGain>
where
    F: FnMut(&Path, &TrackGain),
{
    let Some(first) = files.first() else {
        anyhow::bail!("No files to analyze");
    };

    let first_track = open_track(first)?;
    let mut analyzer = LoudnessAnalyzer::new(first_track.sample_rate)
        .with_context(|| format!("Cannot analyze: {}", first.display()))?;
    let mut pending = Some(first_track);
    let mut tracks = Vec::with_capacity(files.len());

    for file in files {
        let mut track = match pending.take() {
            Some(track) => track,
            None => open_track(file)?,
        };

        if track.sample_rate != analyzer.sample_rate() {
            anyhow::bail!(
                "Sample rate mismatch: {} is {} Hz, album is {} Hz",
                file.display(),
                track.sample_rate,
                analyzer.sample_rate()
            );
        }

        let result = analyze_track_into(&mut track, &mut analyzer, file)?;
        on_track(file, &result);
        tracks.push(result);
    }

    let gain_db = analyzer.album_gain()?;
    let peak = tracks.iter().fold(0.0f64, |peak, t| peak.max(t.peak));

    Ok(AlbumGain {
        tracks,
        gain_db,
        peak,
    })
}

// =============================================================================
// Stub implementations when feature is disabled
// =============================================================================

#[cfg(not(feature = "decode"))]
pub fn analyze_file(_file_path: &Path) -> Result<TrackGain> {
    anyhow::bail!(
        "File analysis requires the 'decode' feature.\n\
        Install with: cargo install rgscan --features decode"
    )
}

#[cfg(not(feature = "decode"))]
pub fn analyze_album(_files: &[&Path]) -> Result<AlbumGain> {
    anyhow::bail!(
        "File analysis requires the 'decode' feature.\n\
        Install with: cargo install rgscan --features decode"
    )
}

#[cfg(not(feature = "decode"))]
pub fn analyze_album_with_progress<F>(_files: &[&Path], _on_track: F) -> Result<AlbumGain>
where
    F: FnMut(&Path, &TrackGain),
{
    anyhow::bail!(
        "File analysis requires the 'decode' feature.\n\
        Install with: cargo install rgscan --features decode"
    )
}

/// Check if file decoding is available
pub fn is_available() -> bool {
    cfg!(feature = "decode")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_availability() {
        #[cfg(feature = "decode")]
        assert!(is_available());
        #[cfg(not(feature = "decode"))]
        assert!(!is_available());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = analyze_file(Path::new("/nonexistent/track.wav")).unwrap_err();
        #[cfg(feature = "decode")]
        assert!(err.to_string().contains("Failed to open"));
        #[cfg(not(feature = "decode"))]
        assert!(err.to_string().contains("decode"));
    }

    #[cfg(feature = "decode")]
    #[test]
    fn test_batch_scales_to_pcm16() {
        use symphonia::core::audio::{Channels, SignalSpec};

        let spec = SignalSpec::new(8000, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let mut buf = AudioBuffer::<f32>::new(4, spec);
        buf.render_reserved(Some(4));
        buf.chan_mut(0).copy_from_slice(&[0.5, -1.0, 0.0, 0.25]);
        buf.chan_mut(1).copy_from_slice(&[0.0, 0.0, 0.75, 0.0]);

        let mut batch = StereoBatch::default();
        batch.load(&AudioBufferRef::F32(std::borrow::Cow::Borrowed(&buf)));

        assert!(batch.stereo);
        assert_eq!(batch.left, vec![16384.0, -32768.0, 0.0, 8192.0]);
        assert_eq!(batch.right, vec![0.0, 0.0, 24576.0, 0.0]);
        assert_eq!(batch.peak, 32768.0);
    }

    #[cfg(feature = "decode")]
    #[test]
    fn test_mono_batch_has_no_right_channel() {
        use symphonia::core::audio::{Channels, SignalSpec};

        let spec = SignalSpec::new(8000, Channels::FRONT_LEFT);
        let mut buf = AudioBuffer::<i16>::new(2, spec);
        buf.render_reserved(Some(2));
        buf.chan_mut(0).copy_from_slice(&[1000, -2000]);

        let mut batch = StereoBatch::default();
        batch.load(&AudioBufferRef::S16(std::borrow::Cow::Borrowed(&buf)));

        assert!(!batch.stereo);
        assert!(batch.right.is_empty());
        assert_eq!(batch.left, vec![1000.0, -2000.0]);
        assert_eq!(batch.peak, 2000.0);
    }

    #[cfg(feature = "decode")]
    #[test]
    fn test_24_bit_batch_scales_to_pcm16() {
        use symphonia::core::audio::{Channels, SignalSpec};
        use symphonia::core::sample::{i24, u24};

        let spec = SignalSpec::new(8000, Channels::FRONT_LEFT);
        let mut buf = AudioBuffer::<i24>::new(3, spec);
        buf.render_reserved(Some(3));
        buf.chan_mut(0).copy_from_slice(&[i24(0x7F_FFFF), i24(-0x80_0000), i24(256)]);

        let mut batch = StereoBatch::default();
        batch.load(&AudioBufferRef::S24(std::borrow::Cow::Borrowed(&buf)));
        assert_eq!(batch.left, vec![8_388_607.0 / 256.0, -32768.0, 1.0]);
        assert_eq!(batch.peak, 32768.0);

        let mut buf = AudioBuffer::<u24>::new(2, spec);
        buf.render_reserved(Some(2));
        buf.chan_mut(0).copy_from_slice(&[u24(0x80_0000), u24(0)]);

        let mut batch = StereoBatch::default();
        batch.load(&AudioBufferRef::U24(std::borrow::Cow::Borrowed(&buf)));
        assert_eq!(batch.left, vec![0.0, -32768.0]);
    }

    #[cfg(feature = "decode")]
    #[test]
    fn test_unsigned_and_8_bit_batches_are_centred() {
        use symphonia::core::audio::{Channels, SignalSpec};

        let spec = SignalSpec::new(8000, Channels::FRONT_LEFT);
        let mut buf = AudioBuffer::<u16>::new(2, spec);
        buf.render_reserved(Some(2));
        buf.chan_mut(0).copy_from_slice(&[32768, 0]);

        let mut batch = StereoBatch::default();
        batch.load(&AudioBufferRef::U16(std::borrow::Cow::Borrowed(&buf)));
        assert_eq!(batch.left, vec![0.0, -32768.0]);

        let mut buf = AudioBuffer::<u32>::new(1, spec);
        buf.render_reserved(Some(1));
        buf.chan_mut(0).copy_from_slice(&[u32::MAX]);

        let mut batch = StereoBatch::default();
        batch.load(&AudioBufferRef::U32(std::borrow::Cow::Borrowed(&buf)));
        assert!((batch.left[0] - 32768.0).abs() < 1e-3);

        let mut buf = AudioBuffer::<i8>::new(2, spec);
        buf.render_reserved(Some(2));
        buf.chan_mut(0).copy_from_slice(&[-128, 64]);

        let mut batch = StereoBatch::default();
        batch.load(&AudioBufferRef::S8(std::borrow::Cow::Borrowed(&buf)));
        assert_eq!(batch.left, vec![-32768.0, 16384.0]);
    }
}

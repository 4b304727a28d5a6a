//! Integration tests for file analysis
//!
//! Test files are 16- and 24-bit PCM WAV files written to a temp directory.

#![cfg(feature = "decode")]

use approx::assert_abs_diff_eq;
use rgscan::decode::{analyze_album, analyze_file};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

/// Write little-endian PCM sample bytes as a WAV file
fn write_pcm_wav(
    dir: &TempDir,
    name: &str,
    sample_rate: u32,
    channels: u16,
    bits: u16,
    data: &[u8],
) -> PathBuf {
    let data_len = data.len() as u32;
    let block_align = channels * bits / 8;

    let mut wav = Vec::with_capacity(44 + data.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(data);

    let path = dir.path().join(name);
    fs::write(&path, wav).expect("Failed to write WAV file");
    path
}

/// Write interleaved 16-bit samples as a PCM WAV file
fn write_wav(
    dir: &TempDir,
    name: &str,
    sample_rate: u32,
    channels: u16,
    samples: &[i16],
) -> PathBuf {
    let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    write_pcm_wav(dir, name, sample_rate, channels, 16, &data)
}

/// Write interleaved 24-bit samples as a PCM WAV file
fn write_wav24(
    dir: &TempDir,
    name: &str,
    sample_rate: u32,
    channels: u16,
    samples: &[i32],
) -> PathBuf {
    let data: Vec<u8> = samples
        .iter()
        .flat_map(|s| s.to_le_bytes().into_iter().take(3))
        .collect();
    write_pcm_wav(dir, name, sample_rate, channels, 24, &data)
}

/// Deterministic white noise, uniform over the 16-bit range
fn generate_noise(seed: u64, len: usize) -> Vec<i16> {
    let mut seed = seed;
    (0..len)
        .map(|_| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((seed >> 33) as f64 / (1u64 << 31) as f64 * 65535.0 - 32768.0).floor() as i16
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_silent_wav() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir, "silence.wav", 8000, 2, &[0; 1600]);

    let result = analyze_file(&path).unwrap();
    assert_eq!(result.sample_rate, 8000);
    assert_eq!(result.gain_db, 64.82);
    assert_eq!(result.peak, 0.0);
}

#[test]
fn test_full_scale_wav() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir, "loud.wav", 8000, 1, &[i16::MAX; 400]);

    let result = analyze_file(&path).unwrap();
    assert_abs_diff_eq!(result.gain_db, 2.82, epsilon = 1e-5);
    assert_abs_diff_eq!(result.peak, 32767.0 / 32768.0, epsilon = 1e-12);
}

#[test]
fn test_24_bit_wav() {
    let dir = TempDir::new().unwrap();
    let path = write_wav24(&dir, "hires.wav", 8000, 1, &[0x7F_FFFF; 400]);

    let result = analyze_file(&path).unwrap();
    assert_eq!(result.sample_rate, 8000);
    assert_abs_diff_eq!(result.gain_db, 2.82, epsilon = 1e-5);
    assert_abs_diff_eq!(result.peak, 1.0, epsilon = 1e-6);
}

#[test]
fn test_long_24_bit_wav_is_analyzed() {
    let dir = TempDir::new().unwrap();
    let path = write_wav24(&dir, "long.wav", 8000, 1, &[0x7F_FFFF; 8000]);

    let result = analyze_file(&path).unwrap();
    assert!(result.gain_db < 64.82);
    assert_abs_diff_eq!(result.peak, 1.0, epsilon = 1e-6);
}

#[test]
fn test_noise_wav() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir, "noise.wav", 8000, 1, &generate_noise(1, 1000));

    let result = analyze_file(&path).unwrap();
    assert_abs_diff_eq!(result.gain_db, -16.18, epsilon = 0.01);
    assert!(result.peak > 0.9 && result.peak <= 1.0);
}

#[test]
fn test_too_short_wav() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir, "short.wav", 8000, 1, &[0; 100]);

    let err = analyze_file(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("Insufficient"));
}

#[test]
fn test_unsupported_rate_wav() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir, "odd.wav", 44000, 1, &[0; 4400]);

    let err = analyze_file(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("Unsupported sample rate: 44000"));
}

#[test]
fn test_album() {
    let dir = TempDir::new().unwrap();
    let quiet = write_wav(&dir, "quiet.wav", 8000, 1, &[0; 7600]);
    let loud = write_wav(&dir, "loud.wav", 8000, 1, &[i16::MAX; 400]);
    let files: Vec<&Path> = vec![quiet.as_path(), loud.as_path()];

    let album = analyze_album(&files).unwrap();
    assert_eq!(album.tracks.len(), 2);
    assert_eq!(album.tracks[0].gain_db, 64.82);
    assert_eq!(album.peak, album.tracks[1].peak);

    // 19 silent windows and 1 loud one: the loud window is within the top 5%
    assert_eq!(album.gain_db, 64.82);
}

#[test]
fn test_album_sample_rate_mismatch() {
    let dir = TempDir::new().unwrap();
    let a = write_wav(&dir, "a.wav", 8000, 1, &[0; 800]);
    let b = write_wav(&dir, "b.wav", 11025, 1, &[0; 1200]);

    let err = analyze_album(&[a.as_path(), b.as_path()]).unwrap_err();
    assert!(err.to_string().contains("Sample rate mismatch"));
}

#[test]
fn test_album_requires_files() {
    assert!(analyze_album(&[]).is_err());
}

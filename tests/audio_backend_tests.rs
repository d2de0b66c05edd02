// Unit tests for audio types and file decoding
//
// These tests verify the core audio types, the simulated devices and the
// WAV/symphonia path used for replay files and synthesized speech.

use anyhow::Result;
use loqa_voice::audio::backend::{duration_to_samples, rms, samples_to_duration};
use loqa_voice::audio::file::{decode_bytes, write_wav};
use loqa_voice::audio::{AudioClip, AudioFile, AudioFrame, AudioInput, ScriptedMicrophone};
use std::time::Duration;

#[test]
fn test_audio_frame_creation() {
    let frame = AudioFrame {
        samples: vec![100, -100, 100, -100],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 1000,
    };

    assert_eq!(frame.samples.len(), 4);
    assert_eq!(frame.rms(), 100);
    assert_eq!(frame.duration(), Duration::from_micros(250));
    assert_eq!(frame.timestamp_ms, 1000);
}

#[test]
fn test_rms_of_silence_and_empty() {
    assert_eq!(rms(&[]), 0);
    assert_eq!(rms(&[0; 512]), 0);
    assert_eq!(rms(&[3000, -3000]), 3000);
}

#[test]
fn test_duration_conversions() {
    assert_eq!(duration_to_samples(Duration::from_millis(64), 16000, 1), 1024);
    assert_eq!(duration_to_samples(Duration::from_millis(10), 48000, 2), 960);
    assert_eq!(samples_to_duration(16000, 16000, 1), Duration::from_secs(1));
    assert_eq!(samples_to_duration(100, 0, 1), Duration::ZERO);
}

#[test]
fn test_stereo_clip_mixes_down() {
    let clip = AudioClip::new(vec![100, 300, -200, 200, 50, 50], 24000, 2);
    let mono = clip.to_mono();

    assert_eq!(mono.channels, 1);
    assert_eq!(mono.samples, vec![200, 0, 50]);
    assert_eq!(mono.duration(), clip.duration());
}

#[test]
fn test_audio_file_open_wav() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("utterance.wav");
    let clip = AudioClip::new((0..8000).map(|i| ((i % 50) * 40) as i16).collect(), 16000, 1);
    write_wav(&path, &clip)?;

    let audio = AudioFile::open(&path)?;

    assert!((audio.duration_seconds - 0.5).abs() < 1e-9);
    assert_eq!(audio.clip.sample_rate, 16000);
    assert_eq!(audio.clip.channels, 1);
    assert_eq!(audio.clip.samples, clip.samples);
    assert!(audio.path.contains("utterance.wav"));
    Ok(())
}

#[test]
fn test_replayed_file_feeds_capture() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stereo.wav");
    let clip = AudioClip::new(vec![1000; 3200], 16000, 2);
    write_wav(&path, &clip)?;

    let audio = AudioFile::open(&path)?;
    let mut mic = ScriptedMicrophone::from_clip(&audio.clip);
    let frame = mic.read_frame(1600)?;

    assert_eq!(mic.sample_rate(), 16000);
    assert_eq!(frame.channels, 1);
    assert_eq!(frame.rms(), 1000);
    assert!(mic.is_exhausted());
    Ok(())
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(AudioFile::open("/nonexistent/file.wav").is_err());
}

#[test]
fn test_unknown_bytes_do_not_decode() {
    assert!(decode_bytes(b"definitely not audio".to_vec(), Some("mp3")).is_err());
}

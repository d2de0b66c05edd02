//! Hardware-free audio devices.
//!
//! `ScriptedMicrophone` replays an energy script (or a decoded file) as if it
//! were a live input, and `TimedSpeaker` "plays" clips by waiting out their
//! duration. Capture timing in the engine is derived from sample counts, so a
//! scripted microphone returns frames as fast as they are requested; once the
//! script runs out it falls back to real-time silence like a quiet room.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::backend::{
    duration_to_samples, samples_to_duration, AudioClip, AudioFrame, AudioInput, AudioOutput,
    PlaybackEnd,
};

/// A stretch of constant energy in a microphone script
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// RMS energy of the segment
    pub energy: i16,
    pub duration: Duration,
}

impl Segment {
    pub fn new(energy: i16, duration: Duration) -> Self {
        Self { energy, duration }
    }

    pub fn secs(energy: i16, seconds: f64) -> Self {
        Self::new(energy, Duration::from_secs_f64(seconds))
    }
}

/// Microphone that plays back a fixed timeline of samples
pub struct ScriptedMicrophone {
    timeline: Vec<i16>,
    position: usize,
    repeat: bool,
    sample_rate: u32,
    emitted: u64,
    /// Reads left to fail before the script resumes
    failing_reads: u32,
    name: String,
}

impl ScriptedMicrophone {
    /// Square-wave segments: a square wave of amplitude `e` has RMS exactly `e`.
    pub fn from_segments(segments: &[Segment], sample_rate: u32) -> Self {
        let mut timeline = Vec::new();
        for segment in segments {
            let n = duration_to_samples(segment.duration, sample_rate, 1);
            timeline.extend((0..n).map(|i| {
                if i % 2 == 0 {
                    segment.energy
                } else {
                    segment.energy.saturating_neg()
                }
            }));
        }
        Self {
            timeline,
            position: 0,
            repeat: false,
            sample_rate,
            emitted: 0,
            failing_reads: 0,
            name: "scripted microphone".to_string(),
        }
    }

    /// Replay a recording (mixed down to mono)
    pub fn from_clip(clip: &AudioClip) -> Self {
        let mono = clip.to_mono();
        Self {
            timeline: mono.samples,
            position: 0,
            repeat: false,
            sample_rate: mono.sample_rate,
            emitted: 0,
            failing_reads: 0,
            name: "file replay".to_string(),
        }
    }

    /// Loop the script forever instead of falling silent
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Fail the first `reads` frame reads, as a glitching device would
    pub fn with_failed_reads(mut self, reads: u32) -> Self {
        self.failing_reads = reads;
        self
    }

    pub fn is_exhausted(&self) -> bool {
        !self.repeat && self.position >= self.timeline.len()
    }
}

impl AudioInput for ScriptedMicrophone {
    fn read_frame(&mut self, samples: usize) -> Result<AudioFrame> {
        if samples == 0 {
            bail!("frame length must be non-zero");
        }
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            bail!("input overrun");
        }

        let exhausted = self.is_exhausted() || self.timeline.is_empty();
        let mut out = Vec::with_capacity(samples);
        if exhausted {
            std::thread::sleep(samples_to_duration(samples, self.sample_rate, 1));
            out.resize(samples, 0);
        } else {
            while out.len() < samples {
                if self.position >= self.timeline.len() {
                    if self.repeat {
                        self.position = 0;
                    } else {
                        out.resize(samples, 0);
                        break;
                    }
                }
                let take = (samples - out.len()).min(self.timeline.len() - self.position);
                out.extend_from_slice(&self.timeline[self.position..self.position + take]);
                self.position += take;
            }
        }

        let timestamp_ms = self.emitted * 1000 / self.sample_rate as u64;
        self.emitted += samples as u64;

        Ok(AudioFrame {
            samples: out,
            sample_rate: self.sample_rate,
            channels: 1,
            timestamp_ms,
        })
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// One call to [`TimedSpeaker::play`]
#[derive(Debug, Clone)]
pub struct PlaybackRecord {
    pub clip_duration: Duration,
    pub played: Duration,
    pub stopped: bool,
}

/// Speaker that sleeps for the clip's duration and records what it "played"
#[derive(Clone, Default)]
pub struct TimedSpeaker {
    log: Arc<Mutex<Vec<PlaybackRecord>>>,
    fail: bool,
}

impl TimedSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A speaker whose device has gone away: every play fails
    pub fn failing() -> Self {
        Self {
            log: Arc::default(),
            fail: true,
        }
    }

    /// Shared view of everything played so far
    pub fn history(&self) -> Vec<PlaybackRecord> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

const PLAYBACK_SLICE: Duration = Duration::from_millis(5);

impl AudioOutput for TimedSpeaker {
    fn play(&mut self, clip: &AudioClip, stop: &AtomicBool) -> Result<PlaybackEnd> {
        if self.fail {
            bail!("output device disconnected");
        }

        let total = clip.duration();
        let started = Instant::now();
        let mut end = PlaybackEnd::Finished;
        loop {
            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }
            if stop.load(Ordering::SeqCst) {
                end = PlaybackEnd::Stopped;
                break;
            }
            std::thread::sleep(PLAYBACK_SLICE.min(total - elapsed));
        }

        if let Ok(mut log) = self.log.lock() {
            log.push(PlaybackRecord {
                clip_duration: total,
                played: started.elapsed().min(total),
                stopped: end == PlaybackEnd::Stopped,
            });
        }
        Ok(end)
    }

    fn name(&self) -> &str {
        "timed speaker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_produces_requested_energy() {
        let mut mic = ScriptedMicrophone::from_segments(
            &[Segment::secs(600, 0.1), Segment::secs(100, 0.1)],
            16000,
        );
        let loud = mic.read_frame(1600).unwrap();
        let quiet = mic.read_frame(1600).unwrap();
        assert_eq!(loud.rms(), 600);
        assert_eq!(quiet.rms(), 100);
        assert_eq!(quiet.timestamp_ms, 100);
        assert!(mic.is_exhausted());
    }

    #[test]
    fn repeating_script_wraps_around() {
        let mut mic = ScriptedMicrophone::from_segments(&[Segment::secs(700, 0.01)], 16000).repeating();
        for _ in 0..5 {
            assert_eq!(mic.read_frame(160).unwrap().rms(), 700);
        }
        assert!(!mic.is_exhausted());
    }

    #[test]
    fn speaker_stops_when_flag_is_raised() {
        let mut speaker = TimedSpeaker::new();
        let clip = AudioClip::new(vec![0; 16000], 16000, 1);
        let stop = AtomicBool::new(true);
        let end = speaker.play(&clip, &stop).unwrap();
        assert_eq!(end, PlaybackEnd::Stopped);
        let history = speaker.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].stopped);
        assert!(history[0].played < Duration::from_millis(100));
    }
}

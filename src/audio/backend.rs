use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate, self.channels)
    }

    /// RMS energy of the frame
    pub fn rms(&self) -> u32 {
        rms(&self.samples)
    }
}

/// A complete piece of audio (a synthesized reply, a decoded file)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate, self.channels)
    }

    /// Average interleaved channels down to mono
    pub fn to_mono(&self) -> AudioClip {
        if self.channels <= 1 {
            return self.clone();
        }
        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect();
        AudioClip::new(samples, self.sample_rate, 1)
    }
}

/// Root-mean-square energy of 16-bit samples, on the same scale as the
/// configured thresholds (silence ~100-400, speech ~500+).
pub fn rms(samples: &[i16]) -> u32 {
    if samples.is_empty() {
        return 0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as u32
}

pub fn samples_to_duration(samples: usize, sample_rate: u32, channels: u16) -> Duration {
    if sample_rate == 0 || channels == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples as f64 / (sample_rate as f64 * channels as f64))
}

pub fn duration_to_samples(duration: Duration, sample_rate: u32, channels: u16) -> usize {
    (duration.as_secs_f64() * sample_rate as f64).round() as usize * channels as usize
}

/// How a call to [`AudioOutput::play`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    /// Every sample was played
    Finished,
    /// The stop flag was raised first
    Stopped,
}

/// Blocking microphone.
///
/// Implementations:
/// - `CpalMicrophone`: live input device
/// - `ScriptedMicrophone`: energy scripts and file replay (tests, dry runs)
pub trait AudioInput: Send {
    /// Block until `samples` mono samples are available and return them
    fn read_frame(&mut self, samples: usize) -> Result<AudioFrame>;

    /// Drop audio buffered since the last read
    fn flush(&mut self) {}

    fn sample_rate(&self) -> u32;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Blocking speaker.
pub trait AudioOutput: Send {
    /// Play `clip`, returning early with [`PlaybackEnd::Stopped`] once `stop`
    /// is raised. Must poll `stop` at least every few tens of milliseconds.
    fn play(&mut self, clip: &AudioClip, stop: &AtomicBool) -> Result<PlaybackEnd>;

    /// Device name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_square_wave_is_its_amplitude() {
        let samples: Vec<i16> = (0..1000).map(|i| if i % 2 == 0 { 600 } else { -600 }).collect();
        assert_eq!(rms(&samples), 600);
    }

    #[test]
    fn rms_of_nothing_is_zero() {
        assert_eq!(rms(&[]), 0);
    }

    #[test]
    fn duration_round_trips_through_sample_count() {
        let d = Duration::from_millis(250);
        let n = duration_to_samples(d, 16000, 1);
        assert_eq!(n, 4000);
        assert_eq!(samples_to_duration(n, 16000, 1), d);
    }

    #[test]
    fn to_mono_averages_channels() {
        let clip = AudioClip::new(vec![100, 300, -200, 200], 24000, 2);
        let mono = clip.to_mono();
        assert_eq!(mono.samples, vec![200, 0]);
        assert_eq!(mono.channels, 1);
    }
}

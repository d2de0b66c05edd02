//! Microphone sampling with energy-based voice activity detection.
//!
//! All timing here is measured in captured audio (sample counts), which for a
//! live device tracks wall-clock time and for a scripted one is deterministic.

use anyhow::{anyhow, bail, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::backend::{duration_to_samples, rms, samples_to_duration, AudioFrame, AudioInput};

/// Consecutive failed reads tolerated before a capture call gives up
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 25;

/// Result of [`AudioCaptureService::wait_for_speech`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// A frame exceeded the threshold
    Speech { rms: u32 },
    /// The timeout elapsed without speech
    TimedOut,
}

/// Why [`AudioCaptureService::listen_until_silence`] stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    Silence,
    MaxDuration,
}

/// One recorded utterance
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    /// Mono 16-bit PCM
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Samples up to the end of the last frame at or above the silence threshold
    pub voiced_samples: usize,
    pub end: CaptureEnd,
}

impl CapturedAudio {
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate, 1)
    }

    /// Length excluding the trailing silence that ended the recording
    pub fn voiced_duration(&self) -> Duration {
        samples_to_duration(self.voiced_samples, self.sample_rate, 1)
    }
}

struct CaptureInner {
    input: Box<dyn AudioInput>,
    /// Frame that triggered the last wake; it starts the next recording
    preroll: Option<AudioFrame>,
}

/// Exclusive owner of the microphone.
///
/// Cloning shares the same device. Every method blocks the calling thread, so
/// async callers should run them through `spawn_blocking`.
#[derive(Clone)]
pub struct AudioCaptureService {
    inner: Arc<Mutex<CaptureInner>>,
    sample_rate: u32,
    frame_samples: usize,
    window_samples: usize,
}

impl AudioCaptureService {
    pub fn new(input: Box<dyn AudioInput>, frame: Duration, rms_window: Duration) -> Self {
        let sample_rate = input.sample_rate();
        let frame_samples = duration_to_samples(frame, sample_rate, 1).max(1);
        let window_samples = duration_to_samples(rms_window, sample_rate, 1).max(1);

        debug!(
            device = input.name(),
            sample_rate, frame_samples, window_samples, "audio capture service ready"
        );

        Self {
            inner: Arc::new(Mutex::new(CaptureInner {
                input,
                preroll: None,
            })),
            sample_rate,
            frame_samples,
            window_samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_duration(&self) -> Duration {
        samples_to_duration(self.frame_samples, self.sample_rate, 1)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CaptureInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("audio capture lock poisoned"))
    }

    /// Poll frames until one exceeds `threshold` or `timeout` worth of audio
    /// has been sampled.
    pub fn wait_for_speech(&self, threshold: u32, timeout: Duration) -> Result<WakeOutcome> {
        let mut inner = self.lock()?;
        inner.preroll = None;
        inner.input.flush();

        let budget = duration_to_samples(timeout, self.sample_rate, 1);
        let mut sampled = 0usize;
        let mut read_errors = 0u32;

        while sampled < budget {
            let frame = match inner.input.read_frame(self.frame_samples) {
                Ok(frame) => {
                    read_errors = 0;
                    frame
                }
                Err(e) => {
                    read_errors += 1;
                    sampled += self.frame_samples;
                    skip_frame(&e, read_errors)?;
                    continue;
                }
            };
            sampled += frame.samples.len();

            let energy = frame.rms();
            trace!(rms = energy, threshold, "wake poll");
            if energy > threshold {
                inner.preroll = Some(frame);
                return Ok(WakeOutcome::Speech { rms: energy });
            }
        }

        Ok(WakeOutcome::TimedOut)
    }

    /// Record until `silence_duration` of continuous sub-threshold audio or
    /// `max_duration` in total, whichever comes first.
    ///
    /// The silence counter resets on any frame at or above
    /// `silence_threshold`. Reads are shortened near either limit so the
    /// recording never overshoots them.
    pub fn listen_until_silence(
        &self,
        silence_threshold: u32,
        silence_duration: Duration,
        max_duration: Duration,
    ) -> Result<CapturedAudio> {
        let mut inner = self.lock()?;

        let silence_needed = duration_to_samples(silence_duration, self.sample_rate, 1).max(1);
        let max_samples = duration_to_samples(max_duration, self.sample_rate, 1).max(1);

        let mut samples: Vec<i16> = Vec::with_capacity(max_samples.min(self.sample_rate as usize * 30));
        let mut silent = 0usize;
        let mut voiced = 0usize;

        if let Some(preroll) = inner.preroll.take() {
            let take = preroll.samples.len().min(max_samples);
            let chunk = &preroll.samples[..take];
            absorb(chunk, silence_threshold, &mut samples, &mut silent, &mut voiced);
        }

        let mut read_errors = 0u32;
        let end = loop {
            if samples.len() >= max_samples {
                break CaptureEnd::MaxDuration;
            }
            if silent >= silence_needed {
                break CaptureEnd::Silence;
            }

            let want = self
                .frame_samples
                .min(max_samples - samples.len())
                .min(silence_needed - silent);

            let frame = match inner.input.read_frame(want) {
                Ok(frame) => {
                    read_errors = 0;
                    frame
                }
                Err(e) => {
                    read_errors += 1;
                    skip_frame(&e, read_errors)?;
                    continue;
                }
            };

            let take = frame.samples.len().min(max_samples - samples.len());
            absorb(
                &frame.samples[..take],
                silence_threshold,
                &mut samples,
                &mut silent,
                &mut voiced,
            );
        };

        let captured = CapturedAudio {
            samples,
            sample_rate: self.sample_rate,
            voiced_samples: voiced,
            end,
        };
        debug!(
            seconds = captured.duration().as_secs_f64(),
            voiced = captured.voiced_duration().as_secs_f64(),
            end = ?captured.end,
            "recording finished"
        );
        Ok(captured)
    }

    /// Instantaneous energy of a short window of fresh audio
    pub fn current_rms(&self) -> Result<u32> {
        let mut inner = self.lock()?;
        inner.input.flush();
        let frame = inner.input.read_frame(self.window_samples)?;
        Ok(frame.rms())
    }
}

/// Append one frame and update the silence bookkeeping
fn absorb(
    chunk: &[i16],
    silence_threshold: u32,
    samples: &mut Vec<i16>,
    silent: &mut usize,
    voiced: &mut usize,
) {
    samples.extend_from_slice(chunk);
    if rms(chunk) < silence_threshold {
        *silent += chunk.len();
    } else {
        *silent = 0;
        *voiced = samples.len();
    }
}

/// Tolerate a bad read unless the device has failed too many in a row
pub(crate) fn skip_frame(err: &anyhow::Error, consecutive: u32) -> Result<()> {
    if consecutive >= MAX_CONSECUTIVE_READ_ERRORS {
        bail!("microphone failed {} reads in a row: {:#}", consecutive, err);
    }
    warn!(error = %err, "dropping unreadable audio frame");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::simulated::{ScriptedMicrophone, Segment};

    fn service(segments: &[Segment]) -> AudioCaptureService {
        let mic = ScriptedMicrophone::from_segments(segments, 16000);
        AudioCaptureService::new(Box::new(mic), Duration::from_millis(20), Duration::from_millis(100))
    }

    #[test]
    fn preroll_is_kept_at_the_start_of_the_recording() {
        let capture = service(&[Segment::secs(900, 0.02), Segment::secs(0, 1.0)]);
        let wake = capture.wait_for_speech(500, Duration::from_secs(1)).unwrap();
        assert_eq!(wake, WakeOutcome::Speech { rms: 900 });

        let audio = capture
            .listen_until_silence(400, Duration::from_millis(200), Duration::from_secs(5))
            .unwrap();
        assert_eq!(audio.samples[0], 900);
        assert_eq!(audio.voiced_duration(), Duration::from_millis(20));
        assert_eq!(audio.duration(), Duration::from_millis(220));
    }

    #[test]
    fn current_rms_reads_one_window() {
        let capture = service(&[Segment::secs(1200, 0.1), Segment::secs(50, 0.1)]);
        assert_eq!(capture.current_rms().unwrap(), 1200);
        assert_eq!(capture.current_rms().unwrap(), 50);
    }
}

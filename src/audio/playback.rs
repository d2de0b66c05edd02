//! Speech output with barge-in.
//!
//! `speak` runs two blocking tasks side by side: the speaker playing the
//! synthesized clip, and an energy monitor polling the microphone. Whichever
//! of {playback finished, barge-in energy, external interrupt} happens first
//! wins and raises the shared stop flag so the other winds down.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::backend::{AudioClip, AudioOutput, PlaybackEnd};
use super::capture::{skip_frame, AudioCaptureService};
use crate::error::ProviderError;
use crate::providers::SpeechSynthesizer;

/// What cut a reply short
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// Microphone energy crossed the barge-in threshold
    BargeIn { rms: u32 },
    /// [`AudioPlaybackService::interrupt`] was called
    External,
}

#[derive(Debug)]
pub enum SpeakFailure {
    Synthesis(ProviderError),
    Playback(anyhow::Error),
}

impl std::fmt::Display for SpeakFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeakFailure::Synthesis(e) => write!(f, "{}", e),
            SpeakFailure::Playback(e) => write!(f, "playback failed: {:#}", e),
        }
    }
}

#[derive(Debug)]
pub enum SpeakOutcome {
    Completed,
    Interrupted(Interruption),
    Failed(SpeakFailure),
    /// Nothing to say
    Skipped,
}

#[derive(Debug)]
pub struct SpeakReport {
    pub outcome: SpeakOutcome,
    /// When audio output ended (full, interrupted, or failed mid-way).
    /// `None` if nothing reached the speaker.
    pub finished_at: Option<Instant>,
    /// Length of the synthesized clip
    pub clip_duration: Duration,
}

/// Exclusive owner of the output device.
pub struct AudioPlaybackService {
    output: Arc<Mutex<Box<dyn AudioOutput>>>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    capture: AudioCaptureService,
    voice_id: String,
    barge_in_threshold: u32,
    poll_interval: Duration,
    interrupt: Arc<Notify>,
    last_finished: Mutex<Option<Instant>>,
}

impl AudioPlaybackService {
    pub fn new(
        output: Box<dyn AudioOutput>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        capture: AudioCaptureService,
        voice_id: impl Into<String>,
        barge_in_threshold: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            output: Arc::new(Mutex::new(output)),
            synthesizer,
            capture,
            voice_id: voice_id.into(),
            barge_in_threshold,
            poll_interval,
            interrupt: Arc::new(Notify::new()),
            last_finished: Mutex::new(None),
        }
    }

    /// Handle used to cut the current reply short from outside.
    ///
    /// `notify_waiters` keeps no permit, so an interrupt while nothing is
    /// playing does not leak into the next reply.
    pub fn interrupt_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.interrupt)
    }

    pub fn interrupt(&self) {
        self.interrupt.notify_waiters();
    }

    /// When the last reply stopped producing audio
    pub fn last_finished_at(&self) -> Option<Instant> {
        self.last_finished.lock().ok().and_then(|t| *t)
    }

    /// Synthesize `text` and play it, stopping early on barge-in or interrupt.
    pub async fn speak(&self, text: &str) -> SpeakReport {
        let text = text.trim();
        if text.is_empty() {
            return SpeakReport {
                outcome: SpeakOutcome::Skipped,
                finished_at: None,
                clip_duration: Duration::ZERO,
            };
        }

        let clip = match self.synthesizer.synthesize(text, &self.voice_id).await {
            Ok(clip) if clip.is_empty() => Err(ProviderError::EmptyAudio),
            other => other,
        };
        let clip = match clip {
            Ok(clip) => clip,
            Err(e) => {
                warn!(provider = self.synthesizer.name(), error = %e, "speech synthesis failed");
                return SpeakReport {
                    outcome: SpeakOutcome::Failed(SpeakFailure::Synthesis(e)),
                    finished_at: None,
                    clip_duration: Duration::ZERO,
                };
            }
        };
        let clip_duration = clip.duration();
        debug!(seconds = clip_duration.as_secs_f64(), "playing reply");

        let interrupted = self.interrupt.notified();
        tokio::pin!(interrupted);
        interrupted.as_mut().enable();

        let stop = Arc::new(AtomicBool::new(false));
        let mut playback = tokio::task::spawn_blocking({
            let output = Arc::clone(&self.output);
            let stop = Arc::clone(&stop);
            move || play_clip(&output, &clip, &stop)
        });
        let mut monitor = tokio::task::spawn_blocking({
            let capture = self.capture.clone();
            let stop = Arc::clone(&stop);
            let threshold = self.barge_in_threshold;
            let poll = self.poll_interval;
            move || watch_for_barge_in(&capture, threshold, poll, &stop)
        });

        let mut monitoring = true;
        let race = loop {
            tokio::select! {
                result = &mut playback => {
                    break Race::Played(
                        result
                            .map_err(|e| anyhow!("playback task panicked: {}", e))
                            .and_then(|r| r),
                    );
                }
                result = &mut monitor, if monitoring => {
                    monitoring = false;
                    match result {
                        Ok(Ok(Some(rms))) => break Race::BargeIn(rms),
                        Ok(Ok(None)) => {}
                        Ok(Err(e)) => warn!(error = %e, "barge-in monitor stopped"),
                        Err(e) => warn!(error = %e, "barge-in monitor panicked"),
                    }
                }
                _ = &mut interrupted => break Race::External,
            }
        };

        stop.store(true, Ordering::SeqCst);
        let outcome = match race {
            Race::Played(Ok(PlaybackEnd::Finished)) => SpeakOutcome::Completed,
            // Only the monitor raises the flag before playback returns.
            Race::Played(Ok(PlaybackEnd::Stopped)) if monitoring => {
                monitoring = false;
                match (&mut monitor).await {
                    Ok(Ok(Some(rms))) => SpeakOutcome::Interrupted(Interruption::BargeIn { rms }),
                    _ => SpeakOutcome::Completed,
                }
            }
            Race::Played(Ok(PlaybackEnd::Stopped)) => SpeakOutcome::Completed,
            Race::Played(Err(e)) => SpeakOutcome::Failed(SpeakFailure::Playback(e)),
            Race::BargeIn(rms) => {
                join_playback(playback).await;
                SpeakOutcome::Interrupted(Interruption::BargeIn { rms })
            }
            Race::External => {
                join_playback(playback).await;
                SpeakOutcome::Interrupted(Interruption::External)
            }
        };
        if monitoring {
            let _ = monitor.await;
        }

        let finished_at = Instant::now();
        if let Ok(mut last) = self.last_finished.lock() {
            *last = Some(finished_at);
        }

        if let SpeakOutcome::Interrupted(reason) = &outcome {
            info!(?reason, "reply interrupted");
        }

        SpeakReport {
            outcome,
            finished_at: Some(finished_at),
            clip_duration,
        }
    }
}

enum Race {
    Played(Result<PlaybackEnd>),
    BargeIn(u32),
    External,
}

async fn join_playback(playback: tokio::task::JoinHandle<Result<PlaybackEnd>>) {
    match playback.await {
        Ok(Err(e)) => warn!(error = %e, "playback failed while stopping"),
        Err(e) => warn!(error = %e, "playback task panicked"),
        Ok(Ok(_)) => {}
    }
}

fn play_clip(
    output: &Mutex<Box<dyn AudioOutput>>,
    clip: &AudioClip,
    stop: &AtomicBool,
) -> Result<PlaybackEnd> {
    let mut output = output
        .lock()
        .map_err(|_| anyhow!("audio output lock poisoned"))?;
    let end = output.play(clip, stop);
    // Playback is over either way; release the monitor.
    stop.store(true, Ordering::SeqCst);
    end
}

/// Poll microphone energy until it crosses `threshold` (returns the reading)
/// or `stop` is raised (returns `None`).
fn watch_for_barge_in(
    capture: &AudioCaptureService,
    threshold: u32,
    poll: Duration,
    stop: &AtomicBool,
) -> Result<Option<u32>> {
    let mut read_errors = 0;
    while !stop.load(Ordering::SeqCst) {
        let energy = match capture.current_rms() {
            Ok(energy) => {
                read_errors = 0;
                energy
            }
            Err(e) => {
                read_errors += 1;
                skip_frame(&e, read_errors)?;
                std::thread::sleep(poll);
                continue;
            }
        };
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if energy > threshold {
            stop.store(true, Ordering::SeqCst);
            return Ok(Some(energy));
        }
        std::thread::sleep(poll);
    }
    Ok(None)
}

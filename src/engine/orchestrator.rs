//! The conversational turn loop.
//!
//! One turn at a time: wait for wake energy, honour the post-speech cooldown,
//! record, recognize, check for control intents, generate, speak. Provider
//! failures are absorbed here and turn into a status message plus a return
//! to Idle; only a panicked worker task escapes `run`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::breaker::FailureBreaker;
use super::events::{EngineEvent, SessionSnapshot};
use super::handle::EngineHandle;
use crate::audio::{
    AudioCaptureService, AudioInput, AudioOutput, AudioPlaybackService, CapturedAudio,
    SpeakFailure, SpeakOutcome, SpeakReport, WakeOutcome,
};
use crate::config::{AudioConfig, SessionConfig};
use crate::intent::{Intent, IntentClassifier, PhraseIntentClassifier};
use crate::providers::Providers;
use crate::session::{
    ConversationHistoryManager, ConversationTurn, SessionState, SessionStats,
};

/// Longest stretch of wake polling between stop checks
const WAKE_SLICE: Duration = Duration::from_millis(250);

/// What a finished session leaves behind
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub stats: SessionStats,
    /// Every turn of the session, including those before a reset
    pub transcript: Vec<ConversationTurn>,
    /// Turns since the last reset
    pub turns: Vec<ConversationTurn>,
    pub context_len: usize,
    pub transcript_path: Option<PathBuf>,
}

enum TurnEnd {
    Continue,
    Terminate,
}

pub struct TurnOrchestrator {
    audio: AudioConfig,
    session: SessionConfig,
    capture: AudioCaptureService,
    playback: AudioPlaybackService,
    providers: Providers,
    classifier: Box<dyn IntentClassifier>,
    history: ConversationHistoryManager,
    stats: SessionStats,
    breaker: FailureBreaker,
    state: SessionState,
    stop: CancellationToken,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl TurnOrchestrator {
    /// Wire the engine to already-opened devices and providers.
    pub fn new(
        audio: AudioConfig,
        session: SessionConfig,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
        providers: Providers,
    ) -> Result<(Self, EngineHandle)> {
        audio.validate().context("Invalid engine configuration")?;

        let capture = AudioCaptureService::new(input, audio.frame(), audio.rms_window());
        let playback = AudioPlaybackService::new(
            output,
            Arc::clone(&providers.synthesizer),
            capture.clone(),
            session.voice_id.clone(),
            audio.barge_in_threshold,
            audio.barge_in_poll(),
        );
        let classifier = Box::new(PhraseIntentClassifier::with_matching(
            &session.exit_phrases,
            &session.reset_phrases,
            session.intent_matching,
        ));
        let history = ConversationHistoryManager::new(audio.max_history_turns);
        let stats = SessionStats::new();

        let (snapshot, snapshot_rx) = watch::channel(SessionSnapshot {
            session_id: history.session_id().to_string(),
            state: SessionState::Idle,
            stats: stats.clone(),
            turns: Vec::new(),
        });
        let stop = CancellationToken::new();
        let handle = EngineHandle::new(stop.clone(), playback.interrupt_handle(), snapshot_rx);

        let breaker = FailureBreaker::new(audio.max_consecutive_failures);
        Ok((
            Self {
                audio,
                session,
                capture,
                playback,
                providers,
                classifier,
                history,
                stats,
                breaker,
                state: SessionState::Idle,
                stop,
                events: None,
                snapshot,
            },
            handle,
        ))
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.history =
            ConversationHistoryManager::with_session_id(session_id, self.audio.max_history_turns);
        self.publish();
        self
    }

    pub fn session_id(&self) -> &str {
        self.history.session_id()
    }

    /// Run turns until an exit intent or a stop request, then save the
    /// transcript and report.
    pub async fn run(mut self) -> Result<SessionReport> {
        info!(
            session_id = %self.history.session_id(),
            recognizer = self.providers.recognizer.name(),
            model = self.providers.model.name(),
            synthesizer = self.providers.synthesizer.name(),
            "voice engine started"
        );
        self.emit(EngineEvent::Status("Listening...".to_string()));

        while !self.stop.is_cancelled() {
            if let TurnEnd::Terminate = self.turn().await? {
                break;
            }
        }

        self.set_state(SessionState::Terminated);
        self.emit(EngineEvent::Terminated);
        self.shutdown()
    }

    async fn turn(&mut self) -> Result<TurnEnd> {
        self.set_state(SessionState::Idle);

        let rms = match self.wait_for_wake().await? {
            Some(rms) => rms,
            None => return Ok(TurnEnd::Terminate),
        };
        self.emit(EngineEvent::WakeDetected { rms });

        if let Some(remaining) = self.cooldown_remaining() {
            debug!(remaining_ms = remaining.as_millis() as u64, "wake inside cooldown, ignoring");
            self.set_state(SessionState::Cooldown);
            self.emit(EngineEvent::CooldownHold { remaining });
            self.sleep_or_stop(remaining).await;
            return Ok(TurnEnd::Continue);
        }
        if self.stop.is_cancelled() {
            return Ok(TurnEnd::Terminate);
        }

        self.set_state(SessionState::Listening);
        let captured = match self.record().await? {
            Ok(captured) => captured,
            Err(e) => {
                self.failure("capture", format!("{:#}", e), None).await;
                return Ok(TurnEnd::Continue);
            }
        };

        let voiced = captured.voiced_duration();
        if voiced < self.audio.min_capture_duration() {
            debug!(voiced_ms = voiced.as_millis() as u64, "capture too short, discarding");
            self.emit(EngineEvent::CaptureDiscarded { voiced });
            return Ok(TurnEnd::Continue);
        }

        self.set_state(SessionState::Processing);
        let turn_id = self.stats.record_capture(captured.duration());
        self.emit(EngineEvent::Status("Transcribing...".to_string()));

        let transcript = match self
            .providers
            .recognizer
            .transcribe(&captured.samples, captured.sample_rate)
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                self.failure("recognition", e.to_string(), None).await;
                return Ok(TurnEnd::Continue);
            }
        };
        if transcript.is_empty() {
            self.emit(EngineEvent::Status("Could not understand audio".to_string()));
            return Ok(TurnEnd::Continue);
        }

        info!(turn_id, transcript = %transcript, "user said");
        self.emit(EngineEvent::Transcribed {
            turn_id,
            text: transcript.clone(),
        });

        match self.classifier.classify(&transcript) {
            Intent::Exit => {
                info!("exit requested");
                let farewell = self.session.farewell.clone();
                self.speak(&farewell).await;
                return Ok(TurnEnd::Terminate);
            }
            Intent::Reset => {
                self.history.reset();
                self.emit(EngineEvent::HistoryReset);
                let confirmation = self.session.reset_confirmation.clone();
                self.speak(&confirmation).await;
                return Ok(TurnEnd::Continue);
            }
            Intent::Converse => {}
        }

        self.emit(EngineEvent::Status("Thinking...".to_string()));
        let started = Instant::now();
        let reply = self
            .providers
            .model
            .generate(&transcript, self.history.context())
            .await;
        let inference = started.elapsed();
        let reply = match reply {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => {
                let message = self.session.error_message.clone();
                self.failure("generation", "empty reply".to_string(), Some(message))
                    .await;
                return Ok(TurnEnd::Continue);
            }
            Err(e) => {
                let message = self.session.error_message.clone();
                self.failure("generation", e.to_string(), Some(message)).await;
                return Ok(TurnEnd::Continue);
            }
        };
        info!(
            turn_id,
            latency_ms = inference.as_millis() as u64,
            reply = %reply,
            "reply generated"
        );

        let report = self.speak(&reply).await;

        let turn = ConversationTurn::new(turn_id, transcript, reply, inference);
        self.history.record_turn(turn.clone());
        self.emit(EngineEvent::TurnCompleted(turn));

        match report.outcome {
            SpeakOutcome::Failed(failure) => {
                let stage = match failure {
                    SpeakFailure::Synthesis(_) => "synthesis",
                    SpeakFailure::Playback(_) => "playback",
                };
                self.failure(stage, failure.to_string(), None).await;
            }
            _ => {
                self.stats.record_success(inference);
                self.breaker.record_success();
            }
        }
        self.publish();

        Ok(TurnEnd::Continue)
    }

    /// Poll for wake energy in short slices so a stop request is seen
    /// between them. `None` means stop was requested.
    async fn wait_for_wake(&mut self) -> Result<Option<u32>> {
        let threshold = self.audio.wake_threshold;
        let mut quiet = Duration::ZERO;
        loop {
            if self.stop.is_cancelled() {
                return Ok(None);
            }

            let capture = self.capture.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                capture.wait_for_speech(threshold, WAKE_SLICE)
            })
            .await
            .context("wake detection task panicked")?;

            match outcome {
                Ok(WakeOutcome::Speech { rms }) => return Ok(Some(rms)),
                Ok(WakeOutcome::TimedOut) => {
                    quiet += WAKE_SLICE;
                    if quiet >= self.audio.wake_poll() {
                        debug!(quiet_secs = quiet.as_secs_f64(), "no speech yet");
                        quiet = Duration::ZERO;
                    }
                }
                Err(e) => {
                    self.failure("capture", format!("{:#}", e), None).await;
                }
            }
        }
    }

    async fn record(&self) -> Result<Result<CapturedAudio>> {
        let capture = self.capture.clone();
        let silence_threshold = self.audio.silence_threshold;
        let silence = self.audio.silence_window();
        let max = self.audio.max_record();
        tokio::task::spawn_blocking(move || {
            capture.listen_until_silence(silence_threshold, silence, max)
        })
        .await
        .context("recording task panicked")
    }

    /// Time left before the microphone may be trusted again
    fn cooldown_remaining(&self) -> Option<Duration> {
        let finished = self.playback.last_finished_at()?;
        self.audio.cooldown().checked_sub(finished.elapsed()).filter(|d| !d.is_zero())
    }

    async fn speak(&mut self, text: &str) -> SpeakReport {
        self.set_state(SessionState::Speaking);
        let report = self.playback.speak(text).await;

        let interrupted = match &report.outcome {
            SpeakOutcome::Interrupted(reason) => {
                self.stats.record_interruption();
                self.emit(EngineEvent::Status("Interrupted".to_string()));
                Some(*reason)
            }
            _ => None,
        };
        if let Some(at) = report.finished_at {
            self.emit(EngineEvent::SpeechFinished { at, interrupted });
        }
        report
    }

    /// Count a recoverable failure, tell the user, and degrade if failures
    /// keep coming.
    async fn failure(&mut self, stage: &'static str, message: String, spoken: Option<String>) {
        warn!(stage, error = %message, "turn failed");
        self.stats.record_error();
        self.emit(EngineEvent::Error {
            stage,
            message: message.clone(),
        });
        self.emit(EngineEvent::Status(format!("Error during {}: {}", stage, message)));

        if self.breaker.record_failure() {
            let backoff = self.audio.backoff();
            error!(
                backoff_secs = backoff.as_secs_f64(),
                "too many consecutive failures, backing off"
            );
            self.emit(EngineEvent::Degraded { backoff });
            let notice = self.session.degraded_message.clone();
            self.speak(&notice).await;
            self.sleep_or_stop(backoff).await;
        } else if let Some(text) = spoken {
            self.speak(&text).await;
        }
        self.publish();
    }

    async fn sleep_or_stop(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop.cancelled() => {}
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "state change");
        self.state = state;
        self.emit(EngineEvent::StateChanged {
            state,
            at: Instant::now(),
        });
        self.publish();
    }

    fn emit(&self, event: EngineEvent) {
        if let EngineEvent::Status(line) = &event {
            info!(status = %line);
        }
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            session_id: self.history.session_id().to_string(),
            state: self.state,
            stats: self.stats.clone(),
            turns: self.history.transcript().to_vec(),
        });
    }

    fn shutdown(self) -> Result<SessionReport> {
        info!("Shutting down...");
        let transcript_path = if self.session.save_transcripts {
            match self.history.save_transcript(&self.session.sessions_path()) {
                Ok(path) => path,
                Err(e) => {
                    error!(error = %e, "failed to save transcript");
                    None
                }
            }
        } else {
            None
        };

        Ok(SessionReport {
            session_id: self.history.session_id().to_string(),
            stats: self.stats.clone(),
            transcript: self.history.transcript().to_vec(),
            turns: self.history.turns().to_vec(),
            context_len: self.history.context().len(),
            transcript_path,
        })
    }
}

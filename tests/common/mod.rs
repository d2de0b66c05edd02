// Shared harness for engine-level integration tests
//
// Builds a TurnOrchestrator over a scripted microphone, a timed speaker and
// scripted providers, with timings shrunk so a session runs in well under a
// second per turn.

#![allow(dead_code)]

use loqa_voice::audio::{ScriptedMicrophone, Segment, TimedSpeaker};
use loqa_voice::config::{AudioConfig, SessionConfig};
use loqa_voice::engine::{EngineEvent, EngineHandle, SessionReport, TurnOrchestrator};
use loqa_voice::providers::scripted::{
    ScriptedLanguageModel, ScriptedRecognizer, ScriptedSynthesizer,
};
use loqa_voice::providers::Providers;
use loqa_voice::session::SessionState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const SAMPLE_RATE: u32 = 16000;

pub fn fast_audio_config() -> AudioConfig {
    AudioConfig {
        wake_threshold: 500,
        silence_threshold: 400,
        silence_duration: 0.2,
        max_record_seconds: 5.0,
        post_speech_cooldown: 0.1,
        barge_in_threshold: 1500,
        max_history_turns: 20,
        wake_timeout: 1.0,
        min_capture: 0.3,
        frame_ms: 20,
        rms_window_ms: 20,
        barge_in_poll_ms: 10,
        max_consecutive_failures: 3,
        failure_backoff: 0.2,
    }
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        save_transcripts: false,
        ..SessionConfig::default()
    }
}

/// One spoken utterance followed by a pause long enough to end it
pub fn utterance() -> Vec<Segment> {
    vec![Segment::secs(900, 0.8), Segment::secs(0, 0.6)]
}

pub fn utterances(count: usize) -> Vec<Segment> {
    (0..count).flat_map(|_| utterance()).collect()
}

pub struct Harness {
    pub recognizer: ScriptedRecognizer,
    pub model: ScriptedLanguageModel,
    pub synthesizer: ScriptedSynthesizer,
    pub speaker: TimedSpeaker,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            recognizer: ScriptedRecognizer::new(),
            model: ScriptedLanguageModel::new(),
            synthesizer: ScriptedSynthesizer::new(),
            speaker: TimedSpeaker::new(),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            recognizer: Arc::new(self.recognizer.clone()),
            synthesizer: Arc::new(self.synthesizer.clone()),
            model: Arc::new(self.model.clone()),
        }
    }

    pub fn build(
        &self,
        mic: ScriptedMicrophone,
        audio: AudioConfig,
        session: SessionConfig,
    ) -> (TurnOrchestrator, EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
        let (engine, handle) = TurnOrchestrator::new(
            audio,
            session,
            Box::new(mic),
            Box::new(self.speaker.clone()),
            self.providers(),
        )
        .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (engine.with_events(tx), handle, rx)
    }

    pub fn spawn(
        &self,
        mic: ScriptedMicrophone,
        audio: AudioConfig,
        session: SessionConfig,
    ) -> (
        JoinHandle<anyhow::Result<SessionReport>>,
        EngineHandle,
        mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let (engine, handle, rx) = self.build(mic, audio, session);
        (tokio::spawn(engine.run()), handle, rx)
    }

    /// Run a session over `segments` to completion and collect its events
    pub async fn run_script(
        &self,
        segments: &[Segment],
        audio: AudioConfig,
        session: SessionConfig,
    ) -> (SessionReport, Vec<EngineEvent>) {
        let mic = ScriptedMicrophone::from_segments(segments, SAMPLE_RATE);
        let (engine, _handle, rx) = self.build(mic, audio, session);
        let report = tokio::time::timeout(Duration::from_secs(20), engine.run())
            .await
            .expect("session did not terminate")
            .unwrap();
        (report, drain(rx).await)
    }
}

pub async fn drain(mut rx: mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn count_state(events: &[EngineEvent], wanted: SessionState) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::StateChanged { state, .. } if *state == wanted))
        .count()
}

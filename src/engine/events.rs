use serde::Serialize;
use std::time::{Duration, Instant};

use crate::audio::Interruption;
use crate::session::{ConversationTurn, SessionState, SessionStats};

/// Progress notifications from the turn loop
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged {
        state: SessionState,
        at: Instant,
    },
    WakeDetected {
        rms: u32,
    },
    /// Wake energy arrived inside the post-speech window and was ignored
    CooldownHold {
        remaining: Duration,
    },
    /// Capture too short to be speech; never sent for recognition
    CaptureDiscarded {
        voiced: Duration,
    },
    Transcribed {
        turn_id: u64,
        text: String,
    },
    /// Audio output for one reply (or canned phrase) ended
    SpeechFinished {
        at: Instant,
        interrupted: Option<Interruption>,
    },
    TurnCompleted(ConversationTurn),
    HistoryReset,
    /// Short human-readable status line
    Status(String),
    Error {
        stage: &'static str,
        message: String,
    },
    /// Too many failures in a row; backing off
    Degraded {
        backoff: Duration,
    },
    Terminated,
}

/// Point-in-time view of the session for observers
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub stats: SessionStats,
    pub turns: Vec<ConversationTurn>,
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the turn loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Waiting for wake energy
    Idle,
    /// Recording an utterance
    Listening,
    /// Recognizing and generating
    Processing,
    /// Playing a reply
    Speaking,
    /// Holding off after a reply so the microphone does not hear the speaker
    Cooldown,
    Terminated,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        self == SessionState::Terminated
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Processing => "processing",
            SessionState::Speaking => "speaking",
            SessionState::Cooldown => "cooldown",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

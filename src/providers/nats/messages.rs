use serde::{Deserialize, Serialize};

/// Audio frame message published to NATS
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    /// Identifies one utterance within the session
    pub utterance_id: String,
    pub sequence: u32,
    pub pcm: String, // Base64-encoded s16le PCM
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: String, // RFC3339 timestamp
    #[serde(rename = "final")]
    pub final_frame: bool,
}

/// Transcript message received from STT service
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub session_id: String,
    #[serde(default)]
    pub utterance_id: Option<String>,
    pub text: String,
    pub partial: bool,
    pub timestamp: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl TranscriptMessage {
    /// Whether this is the final transcript for `utterance_id` of `session_id`.
    ///
    /// Services that do not echo an utterance id are matched on session alone.
    pub fn completes(&self, session_id: &str, utterance_id: &str) -> bool {
        !self.partial
            && self.session_id == session_id
            && self
                .utterance_id
                .as_deref()
                .map_or(true, |id| id == utterance_id)
    }
}

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::history::ConversationTurn;

/// One turn as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub turn_id: u64,
    pub time: DateTime<Utc>,
    pub user_text: String,
    pub reply_text: String,
    /// Seconds
    pub inference_duration: f64,
}

impl From<&ConversationTurn> for TranscriptTurn {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            turn_id: turn.turn_id,
            time: turn.timestamp,
            user_text: turn.user_text.clone(),
            reply_text: turn.reply_text.clone(),
            inference_duration: turn.inference_duration.as_secs_f64(),
        }
    }
}

impl From<&TranscriptTurn> for ConversationTurn {
    fn from(turn: &TranscriptTurn) -> Self {
        Self {
            turn_id: turn.turn_id,
            timestamp: turn.time,
            user_text: turn.user_text.clone(),
            reply_text: turn.reply_text.clone(),
            inference_duration: Duration::try_from_secs_f64(turn.inference_duration)
                .unwrap_or_default(),
        }
    }
}

/// The persisted record of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTranscript {
    pub session_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub turns: Vec<TranscriptTurn>,
}

impl SessionTranscript {
    pub fn file_name(session_id: &str) -> String {
        format!("session_{}.json", session_id)
    }

    /// Write as pretty JSON into `dir`, creating it if needed
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create sessions directory {}", dir.display()))?;
        let path = dir.join(Self::file_name(&self.session_id));
        let json = serde_json::to_string_pretty(self).context("Failed to serialize transcript")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write transcript {}", path.display()))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read transcript {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed transcript {}", path.display()))
    }

    pub fn conversation_turns(&self) -> Vec<ConversationTurn> {
        self.turns.iter().map(ConversationTurn::from).collect()
    }
}

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::transcript::{SessionTranscript, TranscriptTurn};
use crate::providers::DialogueEntry;

/// One completed exchange. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: u64,
    pub timestamp: DateTime<Utc>,
    pub user_text: String,
    pub reply_text: String,
    pub inference_duration: Duration,
}

impl ConversationTurn {
    pub fn new(
        turn_id: u64,
        user_text: impl Into<String>,
        reply_text: impl Into<String>,
        inference_duration: Duration,
    ) -> Self {
        Self {
            turn_id,
            timestamp: Utc::now(),
            user_text: user_text.into(),
            reply_text: reply_text.into(),
            inference_duration,
        }
    }
}

/// Owns the dialogue context handed to the language model and the record of
/// every turn in the session.
///
/// The context is a sliding window of at most `max_turns` user/assistant
/// pairs. The transcript keeps every turn ever recorded, including those from
/// before a [`reset`](Self::reset).
pub struct ConversationHistoryManager {
    session_id: String,
    started_at: DateTime<Utc>,
    max_turns: usize,
    /// Turns since the last reset
    turns: Vec<ConversationTurn>,
    transcript: Vec<ConversationTurn>,
    context: Vec<DialogueEntry>,
}

impl ConversationHistoryManager {
    /// Start a session identified by the local start time (`YYYYmmdd_HHMMSS`)
    pub fn new(max_turns: usize) -> Self {
        let session_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::with_session_id(session_id, max_turns)
    }

    pub fn with_session_id(session_id: impl Into<String>, max_turns: usize) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: Utc::now(),
            max_turns: max_turns.max(1),
            turns: Vec::new(),
            transcript: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// What the language model sees on the next call
    pub fn context(&self) -> &[DialogueEntry] {
        &self.context
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn transcript(&self) -> &[ConversationTurn] {
        &self.transcript
    }

    /// Append a completed turn and prune the context
    pub fn record_turn(&mut self, turn: ConversationTurn) {
        self.context.push(DialogueEntry::user(turn.user_text.clone()));
        self.context.push(DialogueEntry::assistant(turn.reply_text.clone()));
        self.turns.push(turn.clone());
        self.transcript.push(turn);
        self.prune_history();
    }

    /// Keep only the most recent `max_turns * 2` context entries.
    /// Returns whether anything was dropped.
    pub fn prune_history(&mut self) -> bool {
        let limit = self.max_turns * 2;
        if self.context.len() <= limit {
            return false;
        }
        let excess = self.context.len() - limit;
        self.context = self.context.split_off(excess);
        debug!(dropped = excess, kept = limit, "pruned dialogue context");
        true
    }

    /// Start a fresh dialogue. The session transcript is kept.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.context = Vec::new();
        info!("conversation history reset");
    }

    pub fn to_transcript(&self) -> SessionTranscript {
        SessionTranscript {
            session_id: self.session_id.clone(),
            start_timestamp: self.started_at,
            turns: self.transcript.iter().map(TranscriptTurn::from).collect(),
        }
    }

    /// Write the full transcript into `dir`. Does nothing if no turn was recorded.
    pub fn save_transcript(&self, dir: &Path) -> Result<Option<PathBuf>> {
        if self.transcript.is_empty() {
            return Ok(None);
        }
        let path = self.to_transcript().save(dir)?;
        info!(turns = self.transcript.len(), "Transcript saved: {}", path.display());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(id: u64) -> ConversationTurn {
        ConversationTurn::new(id, format!("question {}", id), format!("answer {}", id), Duration::from_millis(100))
    }

    #[test]
    fn context_keeps_the_most_recent_pairs() {
        let mut history = ConversationHistoryManager::with_session_id("test", 2);
        for id in 1..=3 {
            history.record_turn(turn(id));
        }
        let texts: Vec<&str> = history.context().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["question 2", "answer 2", "question 3", "answer 3"]);
        assert!(!history.prune_history());
    }

    #[test]
    fn reset_keeps_transcript() {
        let mut history = ConversationHistoryManager::with_session_id("test", 5);
        history.record_turn(turn(1));
        history.reset();
        history.record_turn(turn(2));
        assert_eq!(history.turns().len(), 1);
        assert_eq!(history.context().len(), 2);
        assert_eq!(history.transcript().len(), 2);
    }

    #[test]
    fn session_id_is_a_timestamp() {
        let history = ConversationHistoryManager::new(1);
        assert_eq!(history.session_id().len(), "20260101_120000".len());
        assert_eq!(&history.session_id()[8..9], "_");
    }
}

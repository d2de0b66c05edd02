//! Conversation session state
//!
//! This module provides:
//! - `SessionState`: where the turn loop is
//! - `SessionStats`: counters reported at shutdown and over the control API
//! - `ConversationHistoryManager`: the bounded dialogue context plus the
//!   complete turn transcript
//! - `SessionTranscript`: the JSON record written at the end of a session

mod history;
mod state;
mod stats;
mod transcript;

pub use history::{ConversationHistoryManager, ConversationTurn};
pub use state::SessionState;
pub use stats::SessionStats;
pub use transcript::{SessionTranscript, TranscriptTurn};

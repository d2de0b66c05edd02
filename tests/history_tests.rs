// Integration tests for conversation history and transcript persistence

use anyhow::Result;
use loqa_voice::session::{ConversationHistoryManager, ConversationTurn, SessionTranscript};
use std::time::Duration;

fn turn(id: u64) -> ConversationTurn {
    ConversationTurn::new(
        id,
        format!("user line {}", id),
        format!("reply line {}", id),
        Duration::from_millis(250 * id),
    )
}

#[test]
fn test_window_is_bounded_while_transcript_keeps_everything() {
    let mut history = ConversationHistoryManager::with_session_id("20260101_120000", 2);
    for id in 1..=5 {
        history.record_turn(turn(id));
    }

    assert!(history.context().len() <= 4);
    assert_eq!(history.context().len(), 4);
    assert_eq!(history.context()[0].text, "user line 4");
    assert_eq!(history.transcript().len(), 5);
    assert_eq!(history.to_transcript().turns.len(), 5);
}

#[test]
fn test_prune_is_a_no_op_within_bounds() {
    let mut history = ConversationHistoryManager::with_session_id("s", 3);
    history.record_turn(turn(1));
    assert!(!history.prune_history());
    assert_eq!(history.context().len(), 2);
}

#[test]
fn test_reset_is_idempotent() {
    let mut history = ConversationHistoryManager::with_session_id("s", 4);
    history.record_turn(turn(1));
    history.record_turn(turn(2));

    history.reset();
    assert!(history.turns().is_empty());
    assert!(history.context().is_empty());

    history.reset();
    assert!(history.turns().is_empty());
    assert!(history.context().is_empty());
}

#[test]
fn test_transcript_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut history = ConversationHistoryManager::with_session_id("20260101_120000", 2);
    for id in 1..=3 {
        history.record_turn(turn(id));
    }

    let path = history.save_transcript(dir.path())?.expect("turns were recorded");
    assert_eq!(path.file_name().unwrap(), "session_20260101_120000.json");

    let loaded = SessionTranscript::load(&path)?;
    assert_eq!(loaded.session_id, "20260101_120000");
    assert_eq!(loaded.start_timestamp, history.started_at());

    let reloaded = loaded.conversation_turns();
    assert_eq!(reloaded.len(), 3);
    for (original, restored) in history.transcript().iter().zip(&reloaded) {
        assert_eq!(restored.turn_id, original.turn_id);
        assert_eq!(restored.timestamp, original.timestamp);
        assert_eq!(restored.user_text, original.user_text);
        assert_eq!(restored.reply_text, original.reply_text);
    }
    Ok(())
}

#[test]
fn test_save_without_turns_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let history = ConversationHistoryManager::with_session_id("empty", 2);

    assert!(history.save_transcript(dir.path())?.is_none());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_transcript_json_layout() -> Result<()> {
    let mut history = ConversationHistoryManager::with_session_id("abc", 2);
    history.record_turn(turn(1));

    let json = serde_json::to_value(history.to_transcript())?;
    assert_eq!(json["session_id"], "abc");
    assert!(json["start_timestamp"].is_string());
    let first = &json["turns"][0];
    assert_eq!(first["turn_id"], 1);
    assert_eq!(first["user_text"], "user line 1");
    assert_eq!(first["reply_text"], "reply line 1");
    assert_eq!(first["inference_duration"], 0.25);
    assert!(first["time"].is_string());
    Ok(())
}

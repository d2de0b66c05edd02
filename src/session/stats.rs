use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregate counters for one engine run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Utterances submitted for recognition
    pub total_turns: u64,

    /// Turns that produced a reply and were recorded
    pub successful_turns: u64,

    /// Provider and playback failures
    pub errors: u64,

    /// Replies cut short by barge-in or an interrupt request
    pub interruptions: u64,

    /// Seconds of captured speech sent for recognition
    pub total_audio_secs: f64,

    /// Seconds spent waiting on the language model for successful turns
    pub total_inference_secs: f64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            total_turns: 0,
            successful_turns: 0,
            errors: 0,
            interruptions: 0,
            total_audio_secs: 0.0,
            total_inference_secs: 0.0,
        }
    }

    /// Count an utterance going to recognition; returns its turn number
    pub fn record_capture(&mut self, audio: Duration) -> u64 {
        self.total_turns += 1;
        self.total_audio_secs += audio.as_secs_f64();
        self.total_turns
    }

    pub fn record_success(&mut self, inference: Duration) {
        self.successful_turns += 1;
        self.total_inference_secs += inference.as_secs_f64();
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn record_interruption(&mut self) {
        self.interruptions += 1;
    }

    pub fn average_inference_secs(&self) -> f64 {
        self.total_inference_secs / self.successful_turns.max(1) as f64
    }

    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    /// Human-readable end-of-session report
    pub fn summary(&self) -> String {
        format!(
            "Session summary\n\
             \x20 Duration:        {:.1} minutes\n\
             \x20 Total turns:     {}\n\
             \x20 Successful:      {}\n\
             \x20 Total audio:     {:.1}s processed\n\
             \x20 Avg inference:   {:.2}s per turn\n\
             \x20 Interruptions:   {}\n\
             \x20 Errors:          {}",
            self.elapsed().as_secs_f64() / 60.0,
            self.total_turns,
            self.successful_turns,
            self.total_audio_secs,
            self.average_inference_secs(),
            self.interruptions,
            self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_ignores_failed_turns() {
        let mut stats = SessionStats::new();
        assert_eq!(stats.record_capture(Duration::from_secs(2)), 1);
        assert_eq!(stats.record_capture(Duration::from_secs(1)), 2);
        stats.record_success(Duration::from_millis(1500));
        stats.record_error();

        assert_eq!(stats.average_inference_secs(), 1.5);
        assert_eq!(stats.total_audio_secs, 3.0);
        let summary = stats.summary();
        assert!(summary.contains("Total turns:     2"));
        assert!(summary.contains("Errors:          1"));
    }

    #[test]
    fn average_is_zero_without_turns() {
        assert_eq!(SessionStats::new().average_inference_secs(), 0.0);
    }
}

//! In-memory providers driven by queued responses.
//!
//! Used by the test suite and by `loqa-voice run --dry-run`. Each provider
//! pops its next scripted result per call and falls back to a default once
//! the queue is empty. Calls are recorded so tests can assert on them.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{DialogueEntry, LanguageModel, SpeechRecognizer, SpeechSynthesizer};
use crate::audio::AudioClip;
use crate::error::ProviderError;

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().ok().and_then(|mut q| q.pop_front())
}

/// Recognizer that returns queued transcripts
#[derive(Clone, Default)]
pub struct ScriptedRecognizer {
    responses: Arc<Mutex<VecDeque<Result<String, ProviderError>>>>,
    /// Sample counts of every buffer submitted
    calls: Arc<Mutex<Vec<usize>>>,
    fallback: Option<String>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transcripts<I, S>(transcripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let recognizer = Self::new();
        for text in transcripts {
            recognizer.push(Ok(text.into()));
        }
        recognizer
    }

    /// Transcript returned once the queue is drained (default: empty)
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    pub fn push(&self, response: Result<String, ProviderError>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(response);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn submitted_lengths(&self) -> Vec<usize> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn transcribe(&self, pcm: &[i16], _sample_rate: u32) -> Result<String, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(pcm.len());
        }
        match pop(&self.responses) {
            Some(response) => response,
            None => Ok(self.fallback.clone().unwrap_or_default()),
        }
    }

    fn name(&self) -> &str {
        "scripted-recognizer"
    }
}

/// A call seen by [`ScriptedLanguageModel`]
#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub prompt: String,
    pub history: Vec<DialogueEntry>,
}

/// Language model that returns queued replies, or echoes the prompt
#[derive(Clone, Default)]
pub struct ScriptedLanguageModel {
    responses: Arc<Mutex<VecDeque<Result<String, ProviderError>>>>,
    calls: Arc<Mutex<Vec<GenerationCall>>>,
    latency: Duration,
}

impl ScriptedLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::new();
        for reply in replies {
            model.push(Ok(reply.into()));
        }
        model
    }

    /// Simulated inference time per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, response: Result<String, ProviderError>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(response);
        }
    }

    pub fn calls(&self) -> Vec<GenerationCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    async fn generate(
        &self,
        prompt: &str,
        history: &[DialogueEntry],
    ) -> Result<String, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(GenerationCall {
                prompt: prompt.to_string(),
                history: history.to_vec(),
            });
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match pop(&self.responses) {
            Some(response) => response,
            None => Ok(format!("You said: {}", prompt)),
        }
    }

    fn name(&self) -> &str {
        "scripted-model"
    }
}

/// Synthesizer producing silent clips of queued lengths
#[derive(Clone)]
pub struct ScriptedSynthesizer {
    durations: Arc<Mutex<VecDeque<Duration>>>,
    failures: Arc<Mutex<VecDeque<ProviderError>>>,
    texts: Arc<Mutex<Vec<String>>>,
    default_duration: Duration,
    sample_rate: u32,
}

impl Default for ScriptedSynthesizer {
    fn default() -> Self {
        Self {
            durations: Arc::default(),
            failures: Arc::default(),
            texts: Arc::default(),
            default_duration: Duration::from_millis(50),
            sample_rate: 16000,
        }
    }
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clip length used once the duration queue is empty
    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    pub fn push_duration(&self, duration: Duration) {
        if let Ok(mut q) = self.durations.lock() {
            q.push_back(duration);
        }
    }

    /// Fail the next call (failures are consumed before durations)
    pub fn push_failure(&self, error: ProviderError) {
        if let Ok(mut q) = self.failures.lock() {
            q.push_back(error);
        }
    }

    /// Every text submitted, including failed calls
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, _voice_id: &str) -> Result<AudioClip, ProviderError> {
        if let Ok(mut texts) = self.texts.lock() {
            texts.push(text.to_string());
        }
        if let Some(error) = pop(&self.failures) {
            return Err(error);
        }
        let duration = pop(&self.durations).unwrap_or(self.default_duration);
        let samples = (duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        Ok(AudioClip::new(vec![0; samples], self.sample_rate, 1))
    }

    fn name(&self) -> &str {
        "scripted-synthesizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recognizer_drains_queue_then_falls_back() {
        let recognizer = ScriptedRecognizer::with_transcripts(["hello"]).with_fallback("again");
        assert_eq!(recognizer.transcribe(&[0; 10], 16000).await.unwrap(), "hello");
        assert_eq!(recognizer.transcribe(&[0; 20], 16000).await.unwrap(), "again");
        assert_eq!(recognizer.submitted_lengths(), vec![10, 20]);
    }

    #[tokio::test]
    async fn model_records_history_it_was_given() {
        let model = ScriptedLanguageModel::with_replies(["hi there"]);
        let history = vec![DialogueEntry::user("a"), DialogueEntry::assistant("b")];
        assert_eq!(model.generate("hey", &history).await.unwrap(), "hi there");
        assert_eq!(model.generate("echo", &[]).await.unwrap(), "You said: echo");

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].history, history);
    }

    #[tokio::test]
    async fn synthesizer_fails_before_using_durations() {
        let synth = ScriptedSynthesizer::new();
        synth.push_failure(ProviderError::Synthesis("quota".into()));
        synth.push_duration(Duration::from_millis(100));

        assert!(synth.synthesize("one", "onyx").await.is_err());
        let clip = synth.synthesize("two", "onyx").await.unwrap();
        assert_eq!(clip.samples.len(), 1600);
        assert_eq!(synth.texts(), vec!["one", "two"]);
    }
}

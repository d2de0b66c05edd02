//! Capability interfaces for the external services a conversation depends on.
//!
//! Each capability is one trait with one operation. Adapters:
//! - `openai`: OpenAI-compatible HTTP (chat completions, speech, transcriptions)
//! - `nats`: loqa-core speech recognition over NATS
//! - `scripted`: in-memory providers for tests and dry runs

pub mod nats;
pub mod openai;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audio::AudioClip;
use crate::error::ProviderError;

/// Speaker of a dialogue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the dialogue context handed to the language model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueEntry {
    pub role: Role,
    pub text: String,
}

impl DialogueEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Speech to text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribe mono 16-bit PCM. An empty string means no speech was
    /// recognized, which is not an error.
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String, ProviderError>;

    fn name(&self) -> &str;
}

/// Text to speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice_id`. Returning no samples is treated the
    /// same as an error by the caller.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioClip, ProviderError>;

    fn name(&self) -> &str;
}

/// Reply generation.
///
/// The model is stateless: the bounded dialogue context is owned by the
/// conversation history and passed in on every call.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        history: &[DialogueEntry],
    ) -> Result<String, ProviderError>;

    fn name(&self) -> &str;
}

/// The provider set injected into the engine at construction
#[derive(Clone)]
pub struct Providers {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub model: Arc<dyn LanguageModel>,
}

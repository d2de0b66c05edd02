//! OpenAI-compatible HTTP adapters.
//!
//! Works against api.openai.com or any server exposing the same
//! `/chat/completions`, `/audio/speech` and `/audio/transcriptions` routes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::{DialogueEntry, LanguageModel, Role, SpeechRecognizer, SpeechSynthesizer};
use crate::audio::file::{decode_bytes, encode_wav};
use crate::audio::AudioClip;
use crate::config::{OpenAiConfig, ProviderConfig};
use crate::error::ProviderError;

/// Sample rate of `response_format = "pcm"` speech
const PCM_SPEECH_RATE: u32 = 24000;

/// Shared HTTP plumbing for the three adapters
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let openai = &config.openai;
        let api_key = std::env::var(&openai.api_key_env).map_err(|_| {
            ProviderError::Config(format!("environment variable {} is not set", openai.api_key_env))
        })?;
        let timeout = Duration::try_from_secs_f64(config.request_timeout).map_err(|_| {
            ProviderError::Config(format!("invalid request_timeout {}", config.request_timeout))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: openai.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn transport(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::from(err)
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, String> {
        let status = response.status();
        debug!(status = %status, "received response");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "OpenAI API error");
        Err(format!("API error {}: {}", status, body))
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions language model
pub struct OpenAiChat {
    http: OpenAiClient,
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl OpenAiChat {
    pub fn new(http: OpenAiClient, config: &OpenAiConfig, system_prompt: impl Into<String>) -> Self {
        Self {
            http,
            model: config.chat_model.clone(),
            temperature: config.temperature,
            system_prompt: system_prompt.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn generate(
        &self,
        prompt: &str,
        history: &[DialogueEntry],
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &self.system_prompt,
            });
        }
        for entry in history {
            messages.push(ChatMessage {
                role: match entry.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &entry.text,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let started = Instant::now();
        let response = self
            .http
            .client
            .post(self.http.url("chat/completions"))
            .bearer_auth(&self.http.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.http.transport(e))?;
        let response = self
            .http
            .check(response)
            .await
            .map_err(ProviderError::Generation)?;

        let body: ChatResponse = response.json().await.map_err(|e| self.http.transport(e))?;
        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::Generation("empty completion".to_string()))?;

        info!(
            model = %self.model,
            latency_ms = started.elapsed().as_millis() as u64,
            "reply generated"
        );
        Ok(reply)
    }

    fn name(&self) -> &str {
        "openai-chat"
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Text to speech via `/audio/speech`
pub struct OpenAiSpeech {
    http: OpenAiClient,
    model: String,
    format: String,
}

impl OpenAiSpeech {
    pub fn new(http: OpenAiClient, config: &OpenAiConfig) -> Self {
        Self {
            http,
            model: config.speech_model.clone(),
            format: config.speech_format.clone(),
        }
    }
}

/// Raw little-endian 16-bit PCM to samples; a trailing odd byte is dropped
fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioClip, ProviderError> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: voice_id,
            response_format: &self.format,
        };

        let response = self
            .http
            .client
            .post(self.http.url("audio/speech"))
            .bearer_auth(&self.http.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.http.transport(e))?;
        let response = self
            .http
            .check(response)
            .await
            .map_err(ProviderError::Synthesis)?;
        let bytes = response.bytes().await.map_err(|e| self.http.transport(e))?;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyAudio);
        }

        let clip = if self.format == "pcm" {
            AudioClip::new(pcm_from_le_bytes(&bytes), PCM_SPEECH_RATE, 1)
        } else {
            let format = self.format.clone();
            let bytes = bytes.to_vec();
            tokio::task::spawn_blocking(move || decode_bytes(bytes, Some(&format)))
                .await
                .map_err(|e| ProviderError::Synthesis(e.to_string()))?
                .map_err(|e| ProviderError::Synthesis(format!("{:#}", e)))?
        };

        debug!(
            seconds = clip.duration().as_secs_f64(),
            format = %self.format,
            "speech synthesized"
        );
        Ok(clip)
    }

    fn name(&self) -> &str {
        "openai-speech"
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Whisper transcription via `/audio/transcriptions`
pub struct OpenAiTranscriber {
    http: OpenAiClient,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(http: OpenAiClient, config: &OpenAiConfig) -> Self {
        Self {
            http,
            model: config.transcription_model.clone(),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for OpenAiTranscriber {
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String, ProviderError> {
        let clip = AudioClip::new(pcm.to_vec(), sample_rate, 1);
        let wav = encode_wav(&clip).map_err(|e| ProviderError::Recognition(format!("{:#}", e)))?;
        debug!(audio_bytes = wav.len(), "starting transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ProviderError::Recognition(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .http
            .client
            .post(self.http.url("audio/transcriptions"))
            .bearer_auth(&self.http.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.http.transport(e))?;
        let response = self
            .http
            .check(response)
            .await
            .map_err(ProviderError::Recognition)?;

        let result: TranscriptionResponse =
            response.json().await.map_err(|e| self.http.transport(e))?;
        let text = result.text.trim().to_string();
        info!(transcript = %text, "transcription complete");
        Ok(text)
    }

    fn name(&self) -> &str {
        "openai-whisper"
    }
}

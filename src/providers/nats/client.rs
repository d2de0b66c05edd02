use anyhow::{Context, Result};
use async_nats::Client;
use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::messages::{AudioFrameMessage, TranscriptMessage};
use crate::error::ProviderError;
use crate::providers::SpeechRecognizer;

pub struct NatsClient {
    client: Client,
    session_id: String,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str, session_id: String) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client, session_id })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Publish audio frame to NATS
    pub async fn publish_audio_frame(
        &self,
        utterance_id: &str,
        pcm_bytes: &[u8],
        sample_rate: u32,
        sequence: u32,
        is_final: bool,
    ) -> Result<()> {
        let subject = format!("audio.frame.voice-{}", self.session_id);

        let message = AudioFrameMessage {
            session_id: self.session_id.clone(),
            utterance_id: utterance_id.to_string(),
            sequence,
            pcm: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
            sample_rate,
            channels: 1,
            timestamp: chrono::Utc::now().to_rfc3339(),
            final_frame: is_final,
        };

        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish audio frame")?;

        debug!(
            "Published audio frame to {} (seq={}, bytes={}, final={})",
            subject,
            sequence,
            pcm_bytes.len(),
            is_final
        );

        Ok(())
    }

    /// Subscribe to transcript messages
    pub async fn subscribe_transcripts(&self) -> Result<async_nats::Subscriber> {
        // loqa-core publishes to stt.text.partial and stt.text.final;
        // session filtering happens on the payload
        let subject = "stt.text.>";

        let subscriber = self
            .client
            .subscribe(subject)
            .await
            .context("Failed to subscribe to transcripts")?;

        debug!("Subscribed to {}", subject);

        Ok(subscriber)
    }
}

/// Recognizer that streams an utterance to loqa-core and waits for its final transcript
pub struct NatsRecognizer {
    client: NatsClient,
    chunk_samples: usize,
    timeout: Duration,
}

impl NatsRecognizer {
    pub fn new(client: NatsClient, timeout: Duration) -> Self {
        Self {
            client,
            // half a second at 16kHz
            chunk_samples: 8000,
            timeout,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for NatsRecognizer {
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String, ProviderError> {
        let utterance_id = uuid::Uuid::new_v4().to_string();
        let transport = |e: anyhow::Error| ProviderError::Transport(format!("{:#}", e));

        // Subscribe before publishing so a fast reply is not missed
        let mut transcripts = self.client.subscribe_transcripts().await.map_err(transport)?;

        let chunks: Vec<&[i16]> = pcm.chunks(self.chunk_samples.max(1)).collect();
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let bytes: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
            self.client
                .publish_audio_frame(&utterance_id, &bytes, sample_rate, i as u32, i == last)
                .await
                .map_err(transport)?;
        }
        if chunks.is_empty() {
            self.client
                .publish_audio_frame(&utterance_id, &[], sample_rate, 0, true)
                .await
                .map_err(transport)?;
        }

        let session_id = self.client.session_id().to_string();
        let wait = async {
            while let Some(message) = transcripts.next().await {
                let transcript: TranscriptMessage = match serde_json::from_slice(&message.payload) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "ignoring malformed transcript message");
                        continue;
                    }
                };
                if transcript.completes(&session_id, &utterance_id) {
                    return Ok(transcript);
                }
            }
            Err(ProviderError::Transport(
                "transcript subscription closed".to_string(),
            ))
        };

        let transcript = tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))??;

        if let Err(e) = transcripts.unsubscribe().await {
            debug!(error = %e, "failed to unsubscribe from transcripts");
        }

        info!(
            transcript = %transcript.text,
            confidence = ?transcript.confidence,
            "transcription complete"
        );
        Ok(transcript.text.trim().to_string())
    }

    fn name(&self) -> &str {
        "nats-stt"
    }
}

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration, loaded from `config/loqa-voice.toml` and
/// `LOQA_VOICE__*` environment overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub engine: AudioConfig,
    pub device: DeviceConfig,
    pub session: SessionConfig,
    pub providers: ProviderConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1".to_string(),
            port: 3095,
        }
    }
}

/// Turn-taking tunables. Immutable once the engine starts.
///
/// Energies are RMS of 16-bit PCM; durations are seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Energy that wakes the engine from Idle
    pub wake_threshold: u32,
    /// Frames below this energy count towards end-of-utterance
    pub silence_threshold: u32,
    /// Continuous silence that ends a recording
    pub silence_duration: f64,
    /// Hard cap on a single recording
    pub max_record_seconds: f64,
    /// Quiet period after speaking before wake detection re-arms
    pub post_speech_cooldown: f64,
    /// Energy during playback that interrupts the reply
    pub barge_in_threshold: u32,
    /// Exchanges kept in the provider-visible dialogue context
    pub max_history_turns: usize,

    /// How long one wake poll lasts before the loop re-checks for stop
    pub wake_timeout: f64,
    /// Voiced audio shorter than this is dropped without recognition
    pub min_capture: f64,
    /// Analysis frame length in milliseconds
    pub frame_ms: u64,
    /// Window sampled by a single energy reading (wake/barge-in polling)
    pub rms_window_ms: u64,
    /// Pause between barge-in energy polls during playback
    pub barge_in_poll_ms: u64,
    /// Consecutive provider failures before the engine backs off
    pub max_consecutive_failures: u32,
    /// Back-off applied once the failure limit is reached
    pub failure_backoff: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            wake_threshold: 500,
            silence_threshold: 400,
            silence_duration: 1.0,
            max_record_seconds: 60.0,
            post_speech_cooldown: 2.0,
            barge_in_threshold: 1500,
            max_history_turns: 20,
            wake_timeout: 30.0,
            min_capture: 0.3,
            frame_ms: 64,
            rms_window_ms: 100,
            barge_in_poll_ms: 50,
            max_consecutive_failures: 3,
            failure_backoff: 10.0,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.silence_threshold > self.wake_threshold {
            bail!(
                "silence_threshold ({}) must not exceed wake_threshold ({})",
                self.silence_threshold,
                self.wake_threshold
            );
        }
        for (name, value) in [
            ("silence_duration", self.silence_duration),
            ("max_record_seconds", self.max_record_seconds),
            ("wake_timeout", self.wake_timeout),
        ] {
            if !(value > 0.0) {
                bail!("{} must be positive, got {}", name, value);
            }
        }
        for (name, value) in [
            ("post_speech_cooldown", self.post_speech_cooldown),
            ("min_capture", self.min_capture),
            ("failure_backoff", self.failure_backoff),
        ] {
            if !(value >= 0.0) {
                bail!("{} must not be negative, got {}", name, value);
            }
        }
        if self.max_record_seconds < self.silence_duration {
            bail!(
                "max_record_seconds ({}) is shorter than silence_duration ({})",
                self.max_record_seconds,
                self.silence_duration
            );
        }
        if self.max_history_turns == 0 {
            bail!("max_history_turns must be at least 1");
        }
        if self.frame_ms == 0 || self.rms_window_ms == 0 {
            bail!("frame_ms and rms_window_ms must be non-zero");
        }
        if self.max_consecutive_failures == 0 {
            bail!("max_consecutive_failures must be at least 1");
        }
        Ok(())
    }

    pub fn silence_window(&self) -> Duration {
        Duration::from_secs_f64(self.silence_duration)
    }

    pub fn max_record(&self) -> Duration {
        Duration::from_secs_f64(self.max_record_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.post_speech_cooldown)
    }

    pub fn wake_poll(&self) -> Duration {
        Duration::from_secs_f64(self.wake_timeout)
    }

    pub fn min_capture_duration(&self) -> Duration {
        Duration::from_secs_f64(self.min_capture)
    }

    pub fn frame(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }

    pub fn rms_window(&self) -> Duration {
        Duration::from_millis(self.rms_window_ms)
    }

    pub fn barge_in_poll(&self) -> Duration {
        Duration::from_millis(self.barge_in_poll_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs_f64(self.failure_backoff)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Capture rate handed to recognition (16kHz for Whisper)
    pub sample_rate: u32,
    /// Input device name; the host default when unset
    pub input_device: Option<String>,
    /// Output device name; the host default when unset
    pub output_device: Option<String>,
    /// Seconds of microphone audio buffered before the oldest is dropped
    pub input_buffer_secs: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            input_device: None,
            output_device: None,
            input_buffer_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Where session transcripts are written (`~` is expanded)
    pub sessions_dir: String,
    pub save_transcripts: bool,
    pub voice_id: String,
    pub system_prompt: String,
    pub farewell: String,
    pub reset_confirmation: String,
    pub error_message: String,
    pub degraded_message: String,
    pub exit_phrases: Vec<String>,
    pub reset_phrases: Vec<String>,
    pub intent_matching: IntentMatching,
}

/// How intent phrases are looked up in a transcript
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentMatching {
    /// Anywhere in the text, so "exit" also fires on "exiting"
    #[default]
    Substring,
    /// Whole words only
    Word,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sessions_dir: "~/.loqa/voice-sessions".to_string(),
            save_transcripts: true,
            voice_id: "onyx".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            farewell: "Peace out! Catch you later!".to_string(),
            reset_confirmation: "Memory cleared. Starting fresh!".to_string(),
            error_message: "Sorry, I couldn't come up with an answer. Try again?".to_string(),
            degraded_message: "I'm having trouble reaching my services. Give me a moment."
                .to_string(),
            exit_phrases: ["goodbye", "exit", "quit", "shut down", "stop listening", "bye"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            reset_phrases: ["forget everything", "clear memory", "start fresh", "reset"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            intent_matching: IntentMatching::Substring,
        }
    }
}

impl SessionConfig {
    pub fn sessions_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.sessions_dir).as_ref())
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a voice assistant. \
Keep replies concise: one to three sentences for casual chat. \
Use natural speech patterns and summarize technical details instead of reading them out.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerKind {
    /// OpenAI-compatible `/audio/transcriptions`
    Openai,
    /// loqa-core STT over NATS
    Nats,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub recognizer: RecognizerKind,
    /// Per-request timeout for HTTP providers, seconds
    pub request_timeout: f64,
    pub openai: OpenAiConfig,
    pub nats: NatsConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            recognizer: RecognizerKind::Openai,
            request_timeout: 30.0,
            openai: OpenAiConfig::default(),
            nats: NatsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub chat_model: String,
    pub temperature: f32,
    pub speech_model: String,
    /// `pcm` (raw 24kHz s16le), `wav` or `mp3`
    pub speech_format: String,
    pub transcription_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            temperature: 1.0,
            speech_model: "tts-1".to_string(),
            speech_format: "pcm".to_string(),
            transcription_model: "whisper-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    /// Seconds to wait for a final transcript after the last frame
    pub transcript_timeout: f64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            transcript_timeout: 15.0,
        }
    }
}

impl Config {
    /// Load `path` (extension optional, file may be absent) and apply
    /// `LOQA_VOICE__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LOQA_VOICE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.engine.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = AudioConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.cooldown(), Duration::from_secs(2));
        assert_eq!(cfg.max_history_turns, 20);
    }

    #[test]
    fn rejects_silence_above_wake() {
        let cfg = AudioConfig {
            silence_threshold: 900,
            wake_threshold: 500,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_history() {
        let cfg = AudioConfig {
            max_history_turns: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_negative_cooldown() {
        let cfg = AudioConfig {
            post_speech_cooldown: -1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load("/nonexistent/loqa-voice").unwrap();
        assert_eq!(cfg.engine.wake_threshold, 500);
        assert_eq!(cfg.providers.recognizer, RecognizerKind::Openai);
    }

    #[test]
    fn file_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[engine]\nwake_threshold = 800\nsilence_threshold = 300\n\n[providers]\nrecognizer = \"nats\""
        )
        .unwrap();

        let cfg = Config::load(path.with_extension("").to_str().unwrap()).unwrap();
        assert_eq!(cfg.engine.wake_threshold, 800);
        assert_eq!(cfg.engine.silence_threshold, 300);
        assert_eq!(cfg.engine.barge_in_threshold, 1500);
        assert_eq!(cfg.providers.recognizer, RecognizerKind::Nats);
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.toml");
        std::fs::write(&path, "[engine]\nmax_history_turns = 4\n").unwrap();

        // Keys no other test in this module reads, since the environment is shared
        std::env::set_var("LOQA_VOICE__ENGINE__MAX_HISTORY_TURNS", "7");
        std::env::set_var("LOQA_VOICE__SESSION__INTENT_MATCHING", "word");
        let loaded = Config::load(path.with_extension("").to_str().unwrap());
        std::env::remove_var("LOQA_VOICE__ENGINE__MAX_HISTORY_TURNS");
        std::env::remove_var("LOQA_VOICE__SESSION__INTENT_MATCHING");

        let cfg = loaded.unwrap();
        assert_eq!(cfg.engine.max_history_turns, 7);
        assert_eq!(cfg.session.intent_matching, IntentMatching::Word);
        assert_eq!(cfg.engine.wake_threshold, 500);
    }
}

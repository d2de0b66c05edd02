pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod intent;
pub mod providers;
pub mod session;

pub use audio::{
    AudioCaptureService, AudioClip, AudioFile, AudioFrame, AudioInput, AudioOutput,
    AudioPlaybackService, SpeakOutcome,
};
pub use config::{AudioConfig, Config};
pub use engine::{EngineEvent, EngineHandle, SessionReport, TurnOrchestrator};
pub use error::{DeviceError, ProviderError};
pub use http::{create_router, AppState};
pub use intent::{Intent, IntentClassifier, PhraseIntentClassifier};
pub use providers::{LanguageModel, Providers, SpeechRecognizer, SpeechSynthesizer};
pub use session::{ConversationHistoryManager, ConversationTurn, SessionState, SessionStats};

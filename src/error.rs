//! Typed failures at the provider and device boundaries.
//!
//! Everything else in the crate propagates `anyhow::Error` with context; these
//! two enums exist because the orchestrator has to branch on *what* failed.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a recognition, generation or synthesis provider.
///
/// Every variant is recoverable: the orchestrator counts it, surfaces a short
/// message and returns to Idle.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("recognition failed: {0}")]
    Recognition(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("provider returned no audio")]
    EmptyAudio,

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured timeout on the error
            ProviderError::Timeout(Duration::ZERO)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Failure to acquire or drive an audio device.
///
/// Raised while opening devices this is fatal: the engine refuses to start.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no input device available{}", fmt_name(.0))]
    NoInputDevice(Option<String>),

    #[error("no output device available{}", fmt_name(.0))]
    NoOutputDevice(Option<String>),

    #[error("no supported stream configuration: {0}")]
    UnsupportedConfig(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("input device produced no audio for {0:?}")]
    Stalled(Duration),
}

fn fmt_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" (requested \"{}\")", name),
        None => String::new(),
    }
}

impl From<cpal::DevicesError> for DeviceError {
    fn from(err: cpal::DevicesError) -> Self {
        DeviceError::Stream(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for DeviceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        DeviceError::UnsupportedConfig(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for DeviceError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        DeviceError::UnsupportedConfig(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for DeviceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        DeviceError::Stream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for DeviceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        DeviceError::Stream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_mentions_requested_name() {
        let err = DeviceError::NoInputDevice(Some("Wave Link".to_string()));
        assert_eq!(
            err.to_string(),
            "no input device available (requested \"Wave Link\")"
        );
        assert_eq!(
            DeviceError::NoOutputDevice(None).to_string(),
            "no output device available"
        );
    }
}

//! Speech recognition through loqa-core over NATS.

pub mod client;
pub mod messages;

pub use client::{NatsClient, NatsRecognizer};
pub use messages::{AudioFrameMessage, TranscriptMessage};

//! The turn loop and its control surface.

mod breaker;
mod events;
mod handle;
mod orchestrator;

pub use breaker::FailureBreaker;
pub use events::{EngineEvent, SessionSnapshot};
pub use handle::EngineHandle;
pub use orchestrator::{SessionReport, TurnOrchestrator};

pub mod backend;
pub mod calibrate;
pub mod capture;
pub mod device;
pub mod file;
pub mod playback;
pub mod simulated;

pub use backend::{AudioClip, AudioFrame, AudioInput, AudioOutput, PlaybackEnd};
pub use calibrate::{calibrate, Calibration};
pub use capture::{AudioCaptureService, CaptureEnd, CapturedAudio, WakeOutcome};
pub use device::{list_devices, CpalMicrophone, CpalSpeaker, DeviceList};
pub use file::AudioFile;
pub use playback::{AudioPlaybackService, Interruption, SpeakFailure, SpeakOutcome, SpeakReport};
pub use simulated::{ScriptedMicrophone, Segment, TimedSpeaker};

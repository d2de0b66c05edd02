//! Ambient-noise calibration of the energy thresholds.

use anyhow::{bail, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use super::capture::AudioCaptureService;
use crate::config::AudioConfig;

/// Lowest silence threshold ever suggested, for near-silent rooms
const SILENCE_FLOOR: u32 = 200;

/// Ambient noise measurement and the thresholds derived from it
#[derive(Debug, Clone, Serialize)]
pub struct Calibration {
    pub windows: usize,
    pub ambient_mean: u32,
    pub ambient_p90: u32,
    pub ambient_peak: u32,
    pub silence_threshold: u32,
    pub wake_threshold: u32,
    pub barge_in_threshold: u32,
}

impl Calibration {
    /// Derive thresholds from per-window RMS readings of a quiet room
    pub fn from_readings(readings: &[u32]) -> Result<Self> {
        if readings.is_empty() {
            bail!("no audio sampled during calibration");
        }
        let mut sorted = readings.to_vec();
        sorted.sort_unstable();

        let mean = (sorted.iter().map(|&r| r as u64).sum::<u64>() / sorted.len() as u64) as u32;
        let p90 = sorted[((sorted.len() - 1) * 9) / 10];
        let peak = sorted[sorted.len() - 1];

        let silence_threshold = (p90 * 2).max(SILENCE_FLOOR);
        let wake_threshold = silence_threshold * 5 / 4;
        let barge_in_threshold = wake_threshold * 3;

        Ok(Self {
            windows: readings.len(),
            ambient_mean: mean,
            ambient_p90: p90,
            ambient_peak: peak,
            silence_threshold,
            wake_threshold,
            barge_in_threshold,
        })
    }

    pub fn apply(&self, config: &mut AudioConfig) {
        config.silence_threshold = self.silence_threshold;
        config.wake_threshold = self.wake_threshold;
        config.barge_in_threshold = self.barge_in_threshold;
    }

    /// TOML snippet for the `[engine]` section
    pub fn to_toml(&self) -> String {
        format!(
            "[engine]\nwake_threshold = {}\nsilence_threshold = {}\nbarge_in_threshold = {}\n",
            self.wake_threshold, self.silence_threshold, self.barge_in_threshold
        )
    }
}

/// Sample `duration` of ambient audio. Blocks the calling thread.
pub fn calibrate(capture: &AudioCaptureService, window: Duration, duration: Duration) -> Result<Calibration> {
    let windows = (duration.as_secs_f64() / window.as_secs_f64().max(0.001)).ceil() as usize;
    info!("Calibrating: sampling {:.1}s of ambient audio, stay quiet", duration.as_secs_f64());

    let mut readings = Vec::with_capacity(windows);
    for _ in 0..windows.max(1) {
        readings.push(capture.current_rms()?);
    }

    let calibration = Calibration::from_readings(&readings)?;
    info!(
        mean = calibration.ambient_mean,
        p90 = calibration.ambient_p90,
        peak = calibration.ambient_peak,
        "ambient noise measured"
    );
    Ok(calibration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::simulated::{ScriptedMicrophone, Segment};

    #[test]
    fn quiet_room_uses_the_floor() {
        let cal = Calibration::from_readings(&[10, 20, 30, 15]).unwrap();
        assert_eq!(cal.silence_threshold, 200);
        assert_eq!(cal.wake_threshold, 250);
        assert_eq!(cal.barge_in_threshold, 750);
        assert!(cal.silence_threshold < cal.wake_threshold);
    }

    #[test]
    fn noisy_room_scales_thresholds() {
        let capture = AudioCaptureService::new(
            Box::new(ScriptedMicrophone::from_segments(&[Segment::secs(300, 2.0)], 16000)),
            Duration::from_millis(20),
            Duration::from_millis(100),
        );
        let cal = calibrate(&capture, Duration::from_millis(100), Duration::from_secs(1)).unwrap();
        assert_eq!(cal.windows, 10);
        assert_eq!(cal.ambient_p90, 300);
        assert_eq!(cal.silence_threshold, 600);

        let mut config = AudioConfig::default();
        cal.apply(&mut config);
        config.validate().unwrap();
        assert!(cal.to_toml().contains("wake_threshold = 750"));
    }

    #[test]
    fn empty_readings_fail() {
        assert!(Calibration::from_readings(&[]).is_err());
    }
}

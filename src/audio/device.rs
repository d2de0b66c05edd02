//! Live audio devices via cpal.
//!
//! The microphone stream lives on its own thread (cpal streams are not
//! `Send`) and feeds a bounded buffer that `read_frame` drains. The speaker
//! builds a fresh output stream per clip and tears it down afterwards.

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::backend::{AudioClip, AudioFrame, AudioInput, AudioOutput, PlaybackEnd};
use crate::config::DeviceConfig;
use crate::error::DeviceError;

/// How long `read_frame` waits for the device before declaring it stalled
const STALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Input and output devices reported by the host
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub default_input: Option<String>,
    pub default_output: Option<String>,
}

pub fn list_devices() -> Result<DeviceList, DeviceError> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(DeviceList {
        inputs,
        outputs,
        default_input: host.default_input_device().and_then(|d| d.name().ok()),
        default_output: host.default_output_device().and_then(|d| d.name().ok()),
    })
}

fn find_input(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or(DeviceError::NoInputDevice(None)),
        Some(wanted) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n.contains(wanted)).unwrap_or(false))
            .ok_or_else(|| DeviceError::NoInputDevice(Some(wanted.to_string()))),
    }
}

fn find_output(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or(DeviceError::NoOutputDevice(None)),
        Some(wanted) => host
            .output_devices()?
            .find(|d| d.name().map(|n| n.contains(wanted)).unwrap_or(false))
            .ok_or_else(|| DeviceError::NoOutputDevice(Some(wanted.to_string()))),
    }
}

struct SampleQueue {
    samples: Mutex<VecDeque<i16>>,
    ready: Condvar,
    capacity: usize,
}

impl SampleQueue {
    fn push(&self, chunk: &[i16]) {
        if let Ok(mut queue) = self.samples.lock() {
            queue.extend(chunk.iter().copied());
            let excess = queue.len().saturating_sub(self.capacity);
            if excess > 0 {
                queue.drain(..excess);
            }
            self.ready.notify_all();
        }
    }
}

/// Microphone backed by a cpal input stream
pub struct CpalMicrophone {
    name: String,
    sample_rate: u32,
    queue: Arc<SampleQueue>,
    read_total: u64,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    /// Open the configured input device and start streaming.
    ///
    /// Fails if the device is missing or refuses every configuration; callers
    /// treat that as fatal.
    pub fn open(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let target_rate = config.sample_rate;
        let queue = Arc::new(SampleQueue {
            samples: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            capacity: (target_rate * config.input_buffer_secs.max(1)) as usize,
        });

        let (ready_tx, ready_rx) = mpsc::channel::<Result<String, DeviceError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let device_name = config.input_device.clone();
        let thread_queue = Arc::clone(&queue);

        let thread = std::thread::Builder::new()
            .name("loqa-voice-mic".to_string())
            .spawn(move || {
                let stream = match build_input_stream(device_name.as_deref(), target_rate, thread_queue) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until the microphone is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("microphone stream closed");
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        let name = ready_rx
            .recv()
            .map_err(|_| DeviceError::Stream("microphone thread exited".to_string()))??;

        info!("Microphone opened: {} ({}Hz mono)", name, target_rate);

        Ok(Self {
            name,
            sample_rate: target_rate,
            queue,
            read_total: 0,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

fn build_input_stream(
    name: Option<&str>,
    target_rate: u32,
    queue: Arc<SampleQueue>,
) -> Result<(cpal::Stream, String), DeviceError> {
    let device = find_input(name)?;
    let device_name = device.name().unwrap_or_else(|_| "unknown input".to_string());

    // Prefer capturing at the target rate; otherwise take the default and convert.
    let supported = device
        .supported_input_configs()?
        .find(|c| c.min_sample_rate().0 <= target_rate && c.max_sample_rate().0 >= target_rate)
        .map(|c| c.with_sample_rate(cpal::SampleRate(target_rate)));
    let supported = match supported {
        Some(config) => config,
        None => device.default_input_config()?,
    };

    let format = supported.sample_format();
    let config: StreamConfig = supported.config();
    debug!(
        device = %device_name,
        device_rate = config.sample_rate.0,
        channels = config.channels,
        ?format,
        "building input stream"
    );

    let stream = match format {
        SampleFormat::F32 => input_stream::<f32>(&device, &config, target_rate, queue)?,
        SampleFormat::I16 => input_stream::<i16>(&device, &config, target_rate, queue)?,
        SampleFormat::U16 => input_stream::<u16>(&device, &config, target_rate, queue)?,
        SampleFormat::I32 => input_stream::<i32>(&device, &config, target_rate, queue)?,
        other => {
            return Err(DeviceError::UnsupportedConfig(format!(
                "input sample format {:?}",
                other
            )))
        }
    };
    stream.play()?;
    Ok((stream, device_name))
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    target_rate: u32,
    queue: Arc<SampleQueue>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data
                .chunks(channels)
                .map(|frame| {
                    frame.iter().map(|&s| <f32 as FromSample<T>>::from_sample_(s)).sum::<f32>() / frame.len() as f32
                })
                .collect();
            let resampled = resample_nearest(&mono, device_rate, target_rate);
            let pcm: Vec<i16> = resampled
                .iter()
                .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .collect();
            queue.push(&pcm);
        },
        |err| {
            error!(error = %err, "audio capture error");
        },
        None,
    )?;
    Ok(stream)
}

/// Nearest-neighbour rate conversion; adequate for energy detection and speech recognition
fn resample_nearest(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to as u64 / from as u64) as usize;
    (0..out_len)
        .map(|i| {
            let src = (i as u64 * from as u64 / to as u64) as usize;
            samples[src.min(samples.len() - 1)]
        })
        .collect()
}

impl AudioInput for CpalMicrophone {
    fn read_frame(&mut self, samples: usize) -> Result<AudioFrame> {
        let queue = self
            .queue
            .samples
            .lock()
            .map_err(|_| anyhow!("microphone buffer lock poisoned"))?;
        let (mut queue, timeout) = self
            .queue
            .ready
            .wait_timeout_while(queue, STALL_TIMEOUT, |q| q.len() < samples)
            .map_err(|_| anyhow!("microphone buffer lock poisoned"))?;
        if timeout.timed_out() && queue.len() < samples {
            return Err(DeviceError::Stalled(STALL_TIMEOUT).into());
        }

        let frame: Vec<i16> = queue.drain(..samples).collect();
        let timestamp_ms = self.read_total * 1000 / self.sample_rate as u64;
        self.read_total += samples as u64;

        Ok(AudioFrame {
            samples: frame,
            sample_rate: self.sample_rate,
            channels: 1,
            timestamp_ms,
        })
    }

    fn flush(&mut self) {
        if let Ok(mut queue) = self.queue.samples.lock() {
            self.read_total += queue.len() as u64;
            queue.clear();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("microphone thread panicked");
            }
        }
    }
}

/// Speaker backed by a cpal output device
pub struct CpalSpeaker {
    name: String,
    device_name: Option<String>,
}

impl CpalSpeaker {
    /// Verify the configured output device exists.
    pub fn open(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let device = find_output(config.output_device.as_deref())?;
        device.default_output_config()?;
        let name = device.name().unwrap_or_else(|_| "unknown output".to_string());
        info!("Speaker opened: {}", name);
        Ok(Self {
            name,
            device_name: config.output_device.clone(),
        })
    }
}

impl AudioOutput for CpalSpeaker {
    fn play(&mut self, clip: &AudioClip, stop: &AtomicBool) -> Result<PlaybackEnd> {
        if clip.is_empty() {
            return Ok(PlaybackEnd::Finished);
        }
        let device = find_output(self.device_name.as_deref())?;
        let clip = clip.to_mono();
        let rate = clip.sample_rate;

        let supported = device
            .supported_output_configs()
            .map_err(DeviceError::from)?
            .filter(|c| c.min_sample_rate().0 <= rate && c.max_sample_rate().0 >= rate)
            .min_by_key(|c| c.channels())
            .map(|c| c.with_sample_rate(cpal::SampleRate(rate)));
        let supported = match supported {
            Some(config) => config,
            None => device.default_output_config().map_err(DeviceError::from)?,
        };
        let format = supported.sample_format();
        let config: StreamConfig = supported.config();

        let samples: Vec<f32> = clip.samples.iter().map(|&s| s as f32 / 32768.0).collect();
        let samples = Arc::new(resample_nearest(&samples, rate, config.sample_rate.0));
        let position = Arc::new(AtomicUsize::new(0));

        let stream = match format {
            SampleFormat::F32 => output_stream::<f32>(&device, &config, &samples, &position)?,
            SampleFormat::I16 => output_stream::<i16>(&device, &config, &samples, &position)?,
            SampleFormat::U16 => output_stream::<u16>(&device, &config, &samples, &position)?,
            SampleFormat::I32 => output_stream::<i32>(&device, &config, &samples, &position)?,
            other => {
                return Err(DeviceError::UnsupportedConfig(format!(
                    "output sample format {:?}",
                    other
                ))
                .into())
            }
        };
        stream.play().map_err(DeviceError::from)?;

        let total = samples.len();
        let expected = Duration::from_secs_f64(total as f64 / config.sample_rate.0 as f64);
        let deadline = Instant::now() + expected + Duration::from_millis(500);

        let mut end = PlaybackEnd::Finished;
        while position.load(Ordering::SeqCst) < total {
            if stop.load(Ordering::SeqCst) {
                end = PlaybackEnd::Stopped;
                break;
            }
            if Instant::now() > deadline {
                warn!("playback overran its expected duration");
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        if end == PlaybackEnd::Finished {
            // Let the device drain its last buffer.
            std::thread::sleep(Duration::from_millis(100));
        }
        drop(stream);

        debug!(samples = total, ?end, "playback complete");
        Ok(end)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    samples: &Arc<Vec<f32>>,
    position: &Arc<AtomicUsize>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let samples = Arc::clone(samples);
    let position = Arc::clone(position);
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                let pos = position.load(Ordering::Relaxed);
                let sample = samples.get(pos).copied().unwrap_or(0.0);
                if pos < samples.len() {
                    position.store(pos + 1, Ordering::Relaxed);
                }
                for out in frame.iter_mut() {
                    *out = T::from_sample(sample);
                }
            }
        },
        |err| {
            error!(error = %err, "audio playback error");
        },
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_halves_length_when_downsampling_by_two() {
        let samples: Vec<f32> = (0..320).map(|i| i as f32).collect();
        let out = resample_nearest(&samples, 32000, 16000);
        assert_eq!(out.len(), 160);
        assert_eq!(out[1], 2.0);
    }

    #[test]
    fn resample_is_identity_at_equal_rates() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_nearest(&samples, 16000, 16000), samples);
    }
}

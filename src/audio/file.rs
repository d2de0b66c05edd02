use anyhow::{anyhow, Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use super::backend::AudioClip;

/// A decoded audio file
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub clip: AudioClip,
}

impl AudioFile {
    /// Decode any container/codec symphonia knows (wav, mp3, flac, ogg, ...)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file {}", path.display()))?;
        let extension = path.extension().and_then(|e| e.to_str());
        let clip = decode(Box::new(file), extension)
            .with_context(|| format!("Failed to decode {}", path.display()))?;

        let duration_seconds = clip.duration().as_secs_f64();
        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            clip.sample_rate,
            clip.channels,
            clip.samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            clip,
        })
    }
}

/// Decode an in-memory encoded stream, e.g. a provider's mp3 response
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<AudioClip> {
    decode(Box::new(Cursor::new(bytes)), extension)
}

fn decode(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<AudioClip> {
    let stream = MediaSourceStream::new(source, Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Unrecognized audio format")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("No decodable audio track"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    let mut samples: Vec<i16> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if sample_rate == 0 {
        return Err(anyhow!("Audio stream has no sample rate"));
    }
    debug!(samples = samples.len(), sample_rate, channels, "decoded audio");
    Ok(AudioClip::new(samples, sample_rate, channels))
}

/// Encode a clip as 16-bit PCM WAV
pub fn encode_wav(clip: &AudioClip) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: clip.channels,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).context("Failed to start WAV stream")?;
        for &sample in &clip.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize().context("Failed to finalize WAV stream")?;
    }
    Ok(cursor.into_inner())
}

pub fn write_wav(path: impl AsRef<Path>, clip: &AudioClip) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode_wav(clip)?;
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write WAV file {}", path.display()))
}

//! WAV file I/O
//!
//! Sources are decoded to f32 and resampled to the engine rate on import.
//! Sample rate conversion uses linear interpolation.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::error::{Result, SequencerError};

/// Bit depth for rendered WAV files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitDepth {
    Int16,
    #[default]
    Int24,
    Float32,
}

impl BitDepth {
    pub fn from_bits(bits: u16) -> Result<Self> {
        match bits {
            16 => Ok(BitDepth::Int16),
            24 => Ok(BitDepth::Int24),
            32 => Ok(BitDepth::Float32),
            other => Err(SequencerError::UnsupportedFormat {
                format: format!("{}-bit audio (only 16, 24, 32 supported)", other),
            }),
        }
    }

    fn bits(self) -> u16 {
        match self {
            BitDepth::Int16 => 16,
            BitDepth::Int24 => 24,
            BitDepth::Float32 => 32,
        }
    }
}

/// Decode a WAV file and convert it to `target_rate`
///
/// # Errors
/// * `LoadFailure` - missing file or undecodable data
/// * `UnsupportedFormat` - more than two channels or an odd bit depth
pub fn import_wav(path: &Path, target_rate: u32) -> Result<AudioBuffer> {
    let source_ref = path.display().to_string();
    let load_failure = |reason: String| SequencerError::LoadFailure {
        source_ref: source_ref.clone(),
        reason,
    };

    if !path.exists() {
        return Err(load_failure("file not found".to_string()));
    }

    let reader = WavReader::open(path).map_err(|e| load_failure(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let layout = ChannelLayout::from_count(channels).ok_or_else(|| SequencerError::UnsupportedFormat {
        format: format!("{}-channel audio (only mono/stereo supported)", channels),
    })?;

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)
        .map_err(|e| match e {
            hound::Error::Unsupported => SequencerError::UnsupportedFormat {
                format: format!("{}-bit {:?} audio", spec.bits_per_sample, spec.sample_format),
            },
            other => load_failure(other.to_string()),
        })?;

    let buffer = AudioBuffer::from_interleaved(&interleaved, layout, spec.sample_rate)?;
    if buffer.is_empty() {
        return Err(load_failure("no audio frames".to_string()));
    }

    Ok(resample(&buffer, target_rate))
}

/// Write a buffer to a WAV file at its own sample rate
pub fn export_wav(buffer: &AudioBuffer, path: &Path, depth: BitDepth) -> Result<()> {
    let spec = WavSpec {
        channels: buffer.channels() as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: depth.bits(),
        sample_format: match depth {
            BitDepth::Float32 => SampleFormat::Float,
            _ => SampleFormat::Int,
        },
    };

    let mut writer = WavWriter::create(path, spec).map_err(hound_to_io)?;
    for sample in buffer.to_interleaved() {
        match depth {
            BitDepth::Int16 => {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled).map_err(hound_to_io)?;
            }
            BitDepth::Int24 => {
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled).map_err(hound_to_io)?;
            }
            BitDepth::Float32 => writer.write_sample(sample).map_err(hound_to_io)?,
        }
    }
    writer.finalize().map_err(hound_to_io)?;

    tracing::debug!(path = %path.display(), frames = buffer.len(), "wav exported");
    Ok(())
}

/// Resample a buffer with linear interpolation
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> AudioBuffer {
    if buffer.sample_rate == target_rate || buffer.sample_rate == 0 {
        return buffer.clone();
    }

    let ratio = target_rate as f64 / buffer.sample_rate as f64;
    let target_len = (buffer.len() as f64 * ratio).ceil() as usize;
    let samples = (0..buffer.channels())
        .map(|ch| {
            (0..target_len)
                .map(|i| buffer.sample_at(ch, i as f64 / ratio))
                .collect()
        })
        .collect();

    AudioBuffer {
        samples,
        sample_rate: target_rate,
    }
}

/// Generate a mono sine tone
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> AudioBuffer {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let mut buffer = AudioBuffer::new(num_samples, ChannelLayout::Mono, sample_rate);
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    for (i, sample) in buffer.samples[0].iter_mut().enumerate() {
        *sample = (angular_freq * i as f32).sin();
    }
    buffer
}

/// Generate a decaying sine burst, handy as a drum-like one-shot
pub fn generate_click(frequency: f32, duration_secs: f32, sample_rate: u32) -> AudioBuffer {
    let mut buffer = generate_test_tone(frequency, duration_secs, sample_rate);
    let len = buffer.len().max(1) as f32;
    for (i, sample) in buffer.samples[0].iter_mut().enumerate() {
        *sample *= 1.0 - i as f32 / len;
    }
    buffer
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> std::result::Result<Vec<f32>, hound::Error> {
    match (sample_format, bits_per_sample) {
        (SampleFormat::Float, _) => reader.samples::<f32>().collect(),
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect(),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect(),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect(),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect(),
        _ => Err(hound::Error::Unsupported),
    }
}

fn hound_to_io(e: hound::Error) -> SequencerError {
    match e {
        hound::Error::IoError(io) => SequencerError::Io(io),
        other => SequencerError::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
    }
}

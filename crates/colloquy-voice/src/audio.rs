//! Raw PCM audio framing shared by capture, transport encoding, and playback.
//!
//! All audio in a session is single-channel 16-bit signed little-endian PCM.
//! The core never resamples: the microphone produces 16 kHz frames, the
//! endpoint returns 24 kHz audio, and each side of the pipeline is configured
//! with the matching `AudioFormat`.

use crate::error::VoiceResult;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Fixed per-session audio format: mono PCM16LE at a given sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Channel count. The wire format is mono.
    pub channels: u16,
}

impl AudioFormat {
    /// Microphone input format: 16 kHz mono.
    pub const INPUT: AudioFormat = AudioFormat {
        sample_rate: 16_000,
        channels: 1,
    };

    /// Endpoint output format: 24 kHz mono.
    pub const OUTPUT: AudioFormat = AudioFormat {
        sample_rate: 24_000,
        channels: 1,
    };
}

/// One immutable chunk of raw PCM16LE audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
}

impl AudioFrame {
    /// Wrap raw PCM16LE bytes.
    pub fn new(pcm: Vec<u8>) -> Self {
        Self { pcm }
    }

    /// Build a frame from normalized f32 samples (-1.0..1.0), as produced by
    /// the capture callback.
    pub fn from_f32_samples(samples: &[f32]) -> Self {
        Self {
            pcm: f32_to_pcm16le(samples),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pcm
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Encode the frame for an `input_audio_buffer.append` payload.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.pcm)
    }

    /// Decode a base64 wire payload into a frame.
    pub fn from_base64(payload: &str) -> VoiceResult<Self> {
        Ok(Self {
            pcm: decode_base64(payload)?,
        })
    }
}

/// Decode a base64 audio payload (e.g. a `response.audio.delta` chunk).
pub fn decode_base64(payload: &str) -> VoiceResult<Vec<u8>> {
    Ok(BASE64.decode(payload.as_bytes())?)
}

/// Convert normalized f32 samples to PCM16LE bytes.
pub fn f32_to_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert PCM16LE bytes to i16 samples for the playback device.
/// A trailing odd byte (malformed chunk boundary) is dropped.
pub fn pcm16le_to_i16(bytes: &[u8]) -> Vec<i16> {
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        samples.push(i16::from_le_bytes([chunk[0], chunk[1]]));
    }
    samples
}

//! **Audio frame codec** — raw PCM samples to/from the wire representation.
//!
//! The live endpoint speaks base64-encoded 16-bit little-endian PCM in both
//! directions: 16 kHz mono up (microphone), 24 kHz mono down (synthesis).
//! Everything here is pure; the only failure mode is a payload whose byte
//! length is not a whole number of samples.

use crate::error::{VoiceError, VoiceResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

/// Sample rate the endpoint expects for microphone audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the endpoint's synthesized audio.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Synthesized audio is mono.
pub const OUTPUT_CHANNELS: u16 = 1;

/// Bytes per sample on the wire (PCM16).
const SAMPLE_WIDTH: usize = 2;

/// One outbound block of captured audio, ready for the wire.
///
/// Produced per capture tick and consumed immediately by the session's
/// `send`; never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Declared encoding, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Base64 of the PCM16LE sample bytes.
    pub data: String,
}

/// Encode a block of linear-PCM f32 samples in [-1, 1] into the wire frame.
pub fn encode_frame(samples: &[f32]) -> AudioFrame {
    let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let i = (clamped * 32767.0).round() as i16;
        bytes.extend_from_slice(&i.to_le_bytes());
    }
    AudioFrame {
        mime_type: format!("audio/pcm;rate={}", INPUT_SAMPLE_RATE),
        data: B64.encode(&bytes),
    }
}

/// A decoded inbound audio block, ready for scheduling on the output clock.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// PCM samples (f32, -1.0..1.0), channel-interleaved.
    pub samples: Vec<f32>,
    /// Sample rate in Hz (24000 for the live endpoint).
    pub sample_rate: u32,
    /// Channel count (1 for the live endpoint).
    pub channels: u16,
}

impl PlaybackBuffer {
    /// Playback duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Decode raw PCM16LE sample bytes into a playback buffer.
///
/// Fails only when `bytes.len()` is not a multiple of the sample width.
pub fn decode_wire_audio(bytes: &[u8], sample_rate: u32, channels: u16) -> VoiceResult<PlaybackBuffer> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(VoiceError::Protocol(format!(
            "audio payload of {} bytes is not a whole number of samples",
            bytes.len()
        )));
    }
    let mut samples = Vec::with_capacity(bytes.len() / SAMPLE_WIDTH);
    for chunk in bytes.chunks_exact(SAMPLE_WIDTH) {
        let i = i16::from_le_bytes([chunk[0], chunk[1]]);
        samples.push(i as f32 / 32768.0);
    }
    Ok(PlaybackBuffer {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn encode_frame_tags_input_rate() {
        let frame = encode_frame(&[0.0, 0.5, -0.5]);
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert!(!frame.data.is_empty());
    }

    #[test]
    fn encode_frame_clamps_out_of_range() {
        let frame = encode_frame(&[2.0, -2.0]);
        let bytes = B64.decode(&frame.data).unwrap();
        let hi = i16::from_le_bytes([bytes[0], bytes[1]]);
        let lo = i16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(hi, 32767);
        assert_eq!(lo, -32767);
    }

    #[test]
    fn decode_rejects_odd_length() {
        let err = decode_wire_audio(&[0x00, 0x01, 0x02], OUTPUT_SAMPLE_RATE, 1);
        assert!(matches!(err, Err(VoiceError::Protocol(_))));
    }

    #[test]
    fn decode_duration_matches_sample_count() {
        // 24000 samples at 24kHz mono = exactly one second
        let bytes = vec![0u8; 24_000 * 2];
        let buf = decode_wire_audio(&bytes, OUTPUT_SAMPLE_RATE, 1).unwrap();
        assert_eq!(buf.samples.len(), 24_000);
        assert!((buf.duration_secs() - 1.0).abs() < 1e-9);
    }
}

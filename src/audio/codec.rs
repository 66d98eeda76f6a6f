//! 16-bit PCM sample codec.
//!
//! Converts f32 samples in [-1, 1] to signed 16-bit little-endian PCM and
//! back. Pure and stateless: no I/O, no allocation beyond the output.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::warn;

use crate::error::AudioError;

/// Capture rate of outbound audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Rate of synthesized audio received from the remote agent.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

const BYTES_PER_SAMPLE: usize = 2;

/// Decoded audio, one `Vec<f32>` per channel (planar).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Build a mono buffer.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Playback length at the buffer's sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.frames() as u64 * 1_000_000_000 / self.sample_rate as u64)
    }

    /// Interleave channels back into a single sample vector (device order).
    pub fn interleaved(&self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels[0].clone();
        }
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for i in 0..frames {
            for ch in &self.channels {
                out.push(ch[i]);
            }
        }
        out
    }
}

/// Serialized PCM as it travels over the remote channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireChunk {
    pub encoded_samples: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl WireChunk {
    /// Outbound chunk: 16 kHz mono.
    pub fn outbound(encoded_samples: Vec<u8>) -> Self {
        Self {
            encoded_samples,
            sample_rate: INPUT_SAMPLE_RATE,
            channels: 1,
        }
    }

    /// Parse a base64 transport payload.
    pub fn from_base64(data: &str, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let encoded_samples = BASE64
            .decode(data.trim())
            .map_err(|e| AudioError::InvalidFormat(format!("invalid base64 audio: {e}")))?;
        Ok(Self {
            encoded_samples,
            sample_rate,
            channels,
        })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.encoded_samples)
    }

    /// Mime type announced to the remote service, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Decode leniently (see [`decode`]).
    pub fn decode(&self) -> Result<AudioBuffer, AudioError> {
        decode(&self.encoded_samples, self.sample_rate, self.channels)
    }
}

/// Encode f32 samples as 16-bit little-endian PCM.
///
/// Samples are clamped to [-1, 1]. Negative values scale by 2^15 and
/// non-negative values by 2^15 - 1, so both ends map onto the full i16 range.
pub fn encode(frame: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() * BYTES_PER_SAMPLE);
    for &sample in frame {
        out.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    out
}

fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    // `as` truncates toward zero and maps NaN to 0.
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Decode PCM, rejecting input that is not a whole number of frames.
pub fn decode_strict(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer, AudioError> {
    validate_format(sample_rate, channels)?;
    let frame_bytes = BYTES_PER_SAMPLE * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(AudioError::MalformedAudioData {
            len: bytes.len(),
            frame_bytes,
        });
    }
    Ok(deinterleave(bytes, sample_rate, channels))
}

/// Decode PCM into planar f32 channels.
///
/// Upstream chunks may be split mid-sample, so a misaligned tail is logged
/// and dropped instead of failing the whole chunk.
pub fn decode(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer, AudioError> {
    match decode_strict(bytes, sample_rate, channels) {
        Err(AudioError::MalformedAudioData { len, frame_bytes }) => {
            warn!(len, frame_bytes, "Audio chunk not frame-aligned, dropping tail");
            let aligned = len - len % frame_bytes;
            Ok(deinterleave(&bytes[..aligned], sample_rate, channels))
        }
        other => other,
    }
}

fn validate_format(sample_rate: u32, channels: u16) -> Result<(), AudioError> {
    if channels == 0 {
        return Err(AudioError::InvalidFormat("channel count must be > 0".into()));
    }
    if sample_rate == 0 {
        return Err(AudioError::InvalidFormat("sample rate must be > 0".into()));
    }
    Ok(())
}

fn deinterleave(bytes: &[u8], sample_rate: u32, channels: u16) -> AudioBuffer {
    let ch = channels as usize;
    let frames = bytes.len() / BYTES_PER_SAMPLE / ch;
    let mut planes = vec![Vec::with_capacity(frames); ch];
    for (i, pair) in bytes.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        planes[i % ch].push(sample as f32 / 32768.0);
    }
    AudioBuffer {
        sample_rate,
        channels: planes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_full_scale() {
        let bytes = encode(&[-1.0, 1.0, 0.0]);
        assert_eq!(bytes, vec![0x00, 0x80, 0xFF, 0x7F, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        assert_eq!(encode(&[-3.5]), encode(&[-1.0]));
        assert_eq!(encode(&[2.0]), encode(&[1.0]));
    }

    #[test]
    fn test_encode_nan_is_silence() {
        assert_eq!(encode(&[f32::NAN]), vec![0, 0]);
    }

    #[test]
    fn test_encode_is_little_endian() {
        // 0.5 * 32767 = 16383.5 -> 16383 = 0x3FFF
        assert_eq!(encode(&[0.5]), vec![0xFF, 0x3F]);
        // -0.5 * 32768 = -16384 = 0xC000
        assert_eq!(encode(&[-0.5]), vec![0x00, 0xC0]);
    }

    #[test]
    fn test_decode_divides_by_32768() {
        let buf = decode_strict(&[0x00, 0x80, 0x00, 0x40], 24_000, 1).unwrap();
        assert_eq!(buf.channel(0).unwrap(), &[-1.0, 0.5]);
        assert_eq!(buf.sample_rate(), 24_000);
    }

    #[test]
    fn test_decode_deinterleaves_channels() {
        let mut bytes = Vec::new();
        for s in [1i16, -1, 2, -2, 3, -3] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let buf = decode_strict(&bytes, 24_000, 2).unwrap();
        assert_eq!(buf.channel_count(), 2);
        assert_eq!(buf.frames(), 3);
        let left: Vec<i32> = buf.channel(0).unwrap().iter().map(|s| (s * 32768.0) as i32).collect();
        let right: Vec<i32> = buf.channel(1).unwrap().iter().map(|s| (s * 32768.0) as i32).collect();
        assert_eq!(left, vec![1, 2, 3]);
        assert_eq!(right, vec![-1, -2, -3]);
        assert_eq!(buf.interleaved().len(), 6);
    }

    #[test]
    fn test_decode_strict_rejects_misaligned() {
        let err = decode_strict(&[0, 0, 0], 24_000, 1).unwrap_err();
        assert!(matches!(
            err,
            AudioError::MalformedAudioData { len: 3, frame_bytes: 2 }
        ));

        // 6 bytes is sample-aligned but not frame-aligned for stereo.
        let err = decode_strict(&[0; 6], 24_000, 2).unwrap_err();
        assert!(matches!(err, AudioError::MalformedAudioData { frame_bytes: 4, .. }));
    }

    #[test]
    fn test_decode_lenient_truncates_tail() {
        let buf = decode(&[0x00, 0x40, 0x7F], 24_000, 1).unwrap();
        assert_eq!(buf.frames(), 1);
        assert_eq!(buf.channel(0).unwrap(), &[0.5]);
    }

    #[test]
    fn test_decode_rejects_zero_channels() {
        assert!(matches!(
            decode(&[0, 0], 24_000, 0),
            Err(AudioError::InvalidFormat(_))
        ));
        assert!(matches!(
            decode(&[0, 0], 0, 1),
            Err(AudioError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_round_trip_within_one_step_of_each_scale() {
        // Positive samples are scaled by 32767 but read back over 32768, so the
        // bound is one quantization step plus the scale mismatch (< 2 / 32768).
        let bound = 2.0 / 32768.0;
        for i in -1000..=1000 {
            let s = i as f32 / 1000.0;
            let back = decode(&encode(&[s]), INPUT_SAMPLE_RATE, 1).unwrap();
            let got = back.channel(0).unwrap()[0];
            assert!((got - s).abs() <= bound, "sample {s} decoded as {got}");
        }
    }

    #[test]
    fn test_round_trip_negative_side_is_tight() {
        for i in 0..=1000 {
            let s = -(i as f32) / 1000.0;
            let back = decode(&encode(&[s]), INPUT_SAMPLE_RATE, 1).unwrap();
            let got = back.channel(0).unwrap()[0];
            assert!((got - s).abs() <= 1.0 / 32768.0, "sample {s} decoded as {got}");
        }
    }

    #[test]
    fn test_duration() {
        let buf = AudioBuffer::mono(vec![0.0; 12_000], OUTPUT_SAMPLE_RATE);
        assert_eq!(buf.duration(), Duration::from_millis(500));
        assert!(AudioBuffer::mono(Vec::new(), OUTPUT_SAMPLE_RATE).is_empty());
    }

    #[test]
    fn test_wire_chunk_base64() {
        let chunk = WireChunk::outbound(encode(&[0.25, -0.25]));
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
        let parsed = WireChunk::from_base64(&chunk.to_base64(), INPUT_SAMPLE_RATE, 1).unwrap();
        assert_eq!(parsed, chunk);
        assert!(WireChunk::from_base64("not base64!!", OUTPUT_SAMPLE_RATE, 1).is_err());
    }
}

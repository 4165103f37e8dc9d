//! Float-to-PCM16 frame encoding.
//!
//! The conversion is a wire contract with the transcription service
//! (`encoding=linear16`) and must stay bit-exact: clip to [-1, 1], then
//! scale positive samples by 32767 and negative samples by 32768, rounding
//! to nearest. These are pure functions with no buffering; they run inside
//! the capture thread and must not allocate beyond the output frame.

/// Convert one float sample to a signed 16-bit wire sample.
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s >= 0.0 {
        (s * 32767.0).round() as i16
    } else {
        (s * 32768.0).round() as i16
    }
}

/// Encode a block of float samples into a PCM16 frame.
pub fn encode_frame(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(encode_sample).collect()
}

/// Serialize a PCM16 frame as interleaved little-endian bytes, no envelope.
pub fn frame_to_bytes(frame: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for sample in frame {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

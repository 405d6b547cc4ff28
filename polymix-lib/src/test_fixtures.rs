//! In-memory WAV fixtures for tests.

/// Deterministic 16-bit PCM payload: a low-amplitude ramp, interleaved.
pub(crate) fn wav_payload(frames: usize, channels: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(frames * channels as usize * 2);
    for frame in 0..frames {
        for channel in 0..channels {
            let sample = ((frame % 128) as i16 - 64) * 50 + channel as i16;
            payload.extend_from_slice(&sample.to_le_bytes());
        }
    }
    payload
}

/// A complete little-endian 16-bit PCM WAV file.
pub(crate) fn wav_bytes(frames: usize, channels: u16, sample_rate: u32) -> Vec<u8> {
    let payload = wav_payload(frames, channels);
    let block_align = channels * 2;
    let byte_rate = sample_rate * block_align as u32;

    let mut bytes = Vec::with_capacity(44 + payload.len());
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes
}

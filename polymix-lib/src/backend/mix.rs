//! Additive PCM mix accumulator shared by every backend implementation.

use crate::format::{AudioFormat, Encoding, Endianness};

/// Accumulates 16-bit PCM contributors into a widened buffer and drains the
/// saturated sum. Samples are widened to `i32` while summing so simultaneous
/// full-scale contributors clip at the sample range instead of wrapping.
pub struct MixAccumulator {
    format: AudioFormat,
    acc: Vec<i32>,
    filled: usize,
}

impl MixAccumulator {
    pub fn new(format: AudioFormat, buffer_size: usize) -> Self {
        let samples = (buffer_size / format.sample_size()).max(1);
        Self {
            format,
            acc: vec![0; samples],
            filled: 0,
        }
    }

    /// Add one contributor. For stereo output, `left_gain` applies to even
    /// sample indices and `right_gain` to odd ones; mono uses `left_gain`.
    pub fn accumulate(&mut self, data: &[u8], len: usize, left_gain: f32, right_gain: f32) {
        if len == 0 {
            return;
        }
        let len = len.min(data.len());
        let samples = len / 2;
        if self.acc.len() < samples {
            self.acc.resize(samples, 0);
        }

        let stereo = self.format.channels == 2;
        for i in 0..samples {
            let sample = decode_sample(&self.format, &data[2 * i..2 * i + 2]);
            let gain = if stereo && i % 2 == 1 {
                right_gain
            } else {
                left_gain
            };
            self.acc[i] += (sample as f32 * gain) as i32;
        }
        self.filled = self.filled.max(samples);
    }

    /// Drain the mix into `out` and reset. Returns bytes written.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let samples = self.filled.min(out.len() / 2);
        for i in 0..samples {
            let sample = self.acc[i].clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            encode_sample(&self.format, sample, &mut out[2 * i..2 * i + 2]);
        }
        for value in &mut self.acc[..self.filled] {
            *value = 0;
        }
        self.filled = 0;
        samples * 2
    }

    /// Scale PCM bytes in place with per-side gains.
    pub fn scale(&self, data: &mut [u8], len: usize, left_gain: f32, right_gain: f32) {
        let len = len.min(data.len());
        let stereo = self.format.channels == 2;
        for i in 0..len / 2 {
            let sample = decode_sample(&self.format, &data[2 * i..2 * i + 2]);
            let gain = if stereo && i % 2 == 1 {
                right_gain
            } else {
                left_gain
            };
            let scaled = (sample as f32 * gain)
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            encode_sample(&self.format, scaled, &mut data[2 * i..2 * i + 2]);
        }
    }
}

fn decode_sample(format: &AudioFormat, bytes: &[u8]) -> i16 {
    let raw = match format.endianness {
        Endianness::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
        Endianness::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
    };
    match format.encoding {
        Encoding::Signed => raw as i16,
        Encoding::Unsigned => (raw ^ 0x8000) as i16,
    }
}

fn encode_sample(format: &AudioFormat, sample: i16, out: &mut [u8]) {
    let raw = match format.encoding {
        Encoding::Signed => sample as u16,
        Encoding::Unsigned => (sample as u16) ^ 0x8000,
    };
    let bytes = match format.endianness {
        Endianness::Little => raw.to_le_bytes(),
        Endianness::Big => raw.to_be_bytes(),
    };
    out[0] = bytes[0];
    out[1] = bytes[1];
}

/// Decode a backend sample as `f32` in `[-1, 1]` for device delivery.
pub(crate) fn sample_to_f32(format: &AudioFormat, bytes: &[u8]) -> f32 {
    decode_sample(format, bytes) as f32 / 32768.0
}

//! Audio backend boundary: additive mixing primitives plus device delivery.

use std::fmt::{Display, Formatter};

mod device;
mod memory;
mod mix;

pub use device::DeviceBackend;
pub use memory::MemoryBackend;
pub use mix::MixAccumulator;

/// Error type for device writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    /// The write length was not aligned to the output frame size.
    InvalidArgument,
    /// The device could not accept data; transient and non-fatal.
    DeviceUnavailable,
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "write length not frame aligned"),
            Self::DeviceUnavailable => write!(f, "audio device unavailable"),
        }
    }
}

impl std::error::Error for BackendError {}

/// A physical (or captured) audio output behind the mixing thread.
///
/// The mixing thread feeds one contributor at a time through
/// [`set_stream_data`](AudioBackend::set_stream_data), drains the additive
/// accumulator with [`pull_mixed`](AudioBackend::pull_mixed), and delivers the
/// result with [`write`](AudioBackend::write). Exactly one thread drives a
/// backend; implementations are owned and closed by that thread.
pub trait AudioBackend {
    /// Accumulate one contributor's PCM bytes into the mix with the given
    /// per-side gains. A zero `len` is a silent, zero-length contribution.
    fn set_stream_data(&mut self, data: &[u8], len: usize, left_gain: f32, right_gain: f32);

    /// Drain the accumulated mix into `out`, clamping to the sample range,
    /// and reset the accumulator. Returns the number of bytes produced.
    fn pull_mixed(&mut self, out: &mut [u8]) -> usize;

    /// Scale raw PCM bytes in place (single-channel passthrough path).
    fn scale_volume(&mut self, data: &mut [u8], len: usize, left_gain: f32, right_gain: f32);

    /// Deliver `len` bytes starting at `offset` to the output device.
    fn write(&mut self, data: &[u8], offset: usize, len: usize) -> Result<(), BackendError>;

    /// Release the device. Idempotent.
    fn close(&mut self);
}

//! Headless backend capturing device writes in memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::format::AudioFormat;

use super::mix::MixAccumulator;
use super::{AudioBackend, BackendError};

/// Backend that records everything written to the "device".
///
/// Used by the library's own tests and useful for embedding the engine where
/// no physical output exists. The captured byte stream is exactly what a
/// device would have received, alignment rules included.
pub struct MemoryBackend {
    accumulator: MixAccumulator,
    format: AudioFormat,
    written: Arc<Mutex<Vec<u8>>>,
    unavailable: Arc<AtomicBool>,
    closed: bool,
}

impl MemoryBackend {
    pub fn new(format: AudioFormat, buffer_size: usize) -> Self {
        Self {
            accumulator: MixAccumulator::new(format, buffer_size),
            format,
            written: Arc::new(Mutex::new(Vec::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
            closed: false,
        }
    }

    /// Handle to the captured output bytes.
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        self.written.clone()
    }

    /// Handle simulating a transient device outage: while `true`, every
    /// `write` fails with [`BackendError::DeviceUnavailable`].
    pub fn outage_flag(&self) -> Arc<AtomicBool> {
        self.unavailable.clone()
    }
}

impl AudioBackend for MemoryBackend {
    fn set_stream_data(&mut self, data: &[u8], len: usize, left_gain: f32, right_gain: f32) {
        self.accumulator.accumulate(data, len, left_gain, right_gain);
    }

    fn pull_mixed(&mut self, out: &mut [u8]) -> usize {
        self.accumulator.drain_into(out)
    }

    fn scale_volume(&mut self, data: &mut [u8], len: usize, left_gain: f32, right_gain: f32) {
        self.accumulator.scale(data, len, left_gain, right_gain);
    }

    fn write(&mut self, data: &[u8], offset: usize, len: usize) -> Result<(), BackendError> {
        if self.closed || self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::DeviceUnavailable);
        }
        if offset + len > data.len() || len % self.format.frame_size() != 0 {
            return Err(BackendError::InvalidArgument);
        }
        self.written
            .lock()
            .unwrap()
            .extend_from_slice(&data[offset..offset + len]);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

//! Real audio device backend backed by a rodio output stream.

use log::warn;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use std::thread;
use std::time::Duration;

use crate::format::AudioFormat;

use super::mix::{sample_to_f32, MixAccumulator};
use super::{AudioBackend, BackendError};

const OPEN_RETRIES: usize = 20;
const OPEN_RETRY_MS: u64 = 100;

/// Number of queued buffers above which `write` blocks. This is what paces
/// the mixing thread to soft real time: the device drains at the sample rate
/// and the mixer refills as slots open up.
const MAX_PENDING_CHUNKS: usize = 3;
const PACING_SLEEP_MS: u64 = 2;

/// Physical output backend.
///
/// The stream is opened on the mixing thread and never crosses threads; the
/// underlying device handle is not required to be `Send`.
pub struct DeviceBackend {
    _stream: OutputStream,
    sink: Sink,
    accumulator: MixAccumulator,
    format: AudioFormat,
    closed: bool,
}

impl DeviceBackend {
    /// Open the default output device at the given format.
    ///
    /// Transient open failures are retried the same way playback runtimes
    /// usually retry a busy device before giving up.
    pub fn open(format: AudioFormat, buffer_size: usize) -> Result<Self, BackendError> {
        let mut attempt = 0;
        let stream = loop {
            attempt += 1;
            match OutputStreamBuilder::open_default_stream() {
                Ok(stream) => break stream,
                Err(err) if attempt < OPEN_RETRIES => {
                    warn!(
                        "open_default_stream attempt {}/{} failed: {}",
                        attempt, OPEN_RETRIES, err
                    );
                    thread::sleep(Duration::from_millis(OPEN_RETRY_MS));
                }
                Err(err) => {
                    warn!(
                        "failed to open default output stream after {} attempts: {}",
                        OPEN_RETRIES, err
                    );
                    return Err(BackendError::DeviceUnavailable);
                }
            }
        };
        let sink = Sink::connect_new(stream.mixer());

        Ok(Self {
            _stream: stream,
            sink,
            accumulator: MixAccumulator::new(format, buffer_size),
            format,
            closed: false,
        })
    }
}

impl AudioBackend for DeviceBackend {
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
        if self.closed {
            return Err(BackendError::DeviceUnavailable);
        }
        if offset + len > data.len() || len % self.format.frame_size() != 0 {
            return Err(BackendError::InvalidArgument);
        }
        if len == 0 {
            return Ok(());
        }

        let samples: Vec<f32> = data[offset..offset + len]
            .chunks_exact(2)
            .map(|bytes| sample_to_f32(&self.format, bytes))
            .collect();
        let buffer = SamplesBuffer::new(self.format.channels, self.format.frequency, samples);

        while self.sink.len() > MAX_PENDING_CHUNKS {
            thread::sleep(Duration::from_millis(PACING_SLEEP_MS));
        }
        self.sink.append(buffer);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sink.stop();
    }
}

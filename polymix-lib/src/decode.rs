//! Decode cursors: pull PCM bytes in the mixer's open format from a sound.

use dasp_ring_buffer::Bounded;
use log::warn;
use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::format::{AudioFormat, Encoding, Endianness};

/// Error type for opening a decode cursor.
#[derive(Debug)]
pub enum DecodeError {
    Io(std::io::Error),
    Unsupported(String),
    NoTrack,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Unsupported(err) => write!(f, "unsupported format: {}", err),
            Self::NoTrack => write!(f, "no decodeable audio track"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Shared, immutable audio bytes. Reopening a cursor over the same bytes
/// clones the handle, not the data.
#[derive(Debug, Clone)]
pub(crate) struct SharedBytes(Arc<Vec<u8>>);

impl SharedBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(bytes))
    }
}

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Where a sound's audio data lives.
#[derive(Debug, Clone)]
pub(crate) enum SoundSource {
    Path(PathBuf),
    Bytes(SharedBytes),
}

impl SoundSource {
    fn open_reader(&self) -> Result<Box<dyn FormatReader>, DecodeError> {
        let mut hint = Hint::new();
        let mss = match self {
            Self::Path(path) => {
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    hint.with_extension(ext);
                }
                let file = std::fs::File::open(path)?;
                MediaSourceStream::new(Box::new(file), Default::default())
            }
            Self::Bytes(bytes) => {
                let source = ReadOnlySource::new(Cursor::new(bytes.clone()));
                MediaSourceStream::new(Box::new(source), Default::default())
            }
        };

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|err| DecodeError::Unsupported(err.to_string()))?;
        Ok(probed.format)
    }
}

/// Total length of the source in seconds, when the container reports it.
pub(crate) fn duration_seconds(source: &SoundSource) -> Option<f64> {
    let reader = source.open_reader().ok()?;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)?;
    let frames = track.codec_params.n_frames?;
    let rate = track.codec_params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(frames as f64 / rate as f64)
}

/// A readable position inside one sound's decoded byte stream.
///
/// `read` hands back PCM bytes already converted to the mixer's open format:
/// interleaved 16-bit samples at the requested encoding and byte order, with
/// the source's channel layout adapted to the output layout. No resampling is
/// performed. A return of `0` means end-of-stream; decode and I/O failures
/// are treated the same way.
pub(crate) struct DecodeCursor {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<i16>>,
    ring: Bounded<Vec<u8>>,
    spill: VecDeque<u8>,
    format: AudioFormat,
    eos: bool,
}

impl DecodeCursor {
    pub fn open(
        source: &SoundSource,
        format: &AudioFormat,
        buffer_size: usize,
    ) -> Result<Self, DecodeError> {
        let reader = source.open_reader()?;
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;
        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|err| DecodeError::Unsupported(err.to_string()))?;

        let ring_capacity = buffer_size.max(16 * 1024);
        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_buf: None,
            ring: Bounded::from(vec![0u8; ring_capacity]),
            spill: VecDeque::new(),
            format: *format,
            eos: false,
        })
    }

    /// Read the next chunk of PCM bytes into `buf`. Returns `0` at
    /// end-of-stream (or on a fatal decode error, treated identically).
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        loop {
            self.refill_ring();
            if self.ring.len() >= buf.len() || self.eos {
                break;
            }
            if !self.decode_next_packet() {
                self.eos = true;
            }
        }

        let available = self.ring.len().min(buf.len());
        // Hand out whole frames only, so a trimmed device write never splits
        // the stream mid-frame; any sub-frame tail is flushed at EOS.
        let mut len = available - available % self.format.frame_size();
        if len == 0 && self.eos && self.spill.is_empty() {
            len = available;
        }
        for byte in buf.iter_mut().take(len) {
            *byte = self.ring.pop().unwrap_or(0);
        }
        len
    }

    fn refill_ring(&mut self) {
        while self.ring.len() < self.ring.max_len() {
            match self.spill.pop_front() {
                Some(byte) => {
                    self.ring.push(byte);
                }
                None => break,
            }
        }
    }

    /// Decode packets until one yields samples. Returns `false` at EOS.
    fn decode_next_packet(&mut self) -> bool {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                // EOF and I/O failure are both end-of-stream to the caller.
                Err(_) => return false,
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    // SampleBuffer capacity counts samples, AudioBuffer
                    // capacity counts frames.
                    let needed = decoded.capacity() * spec.channels.count();
                    let needs_new = match &self.sample_buf {
                        Some(existing) => existing.capacity() < needed,
                        None => true,
                    };
                    if needs_new {
                        self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    let sample_buf = self.sample_buf.as_mut().unwrap();
                    sample_buf.copy_interleaved_ref(decoded);

                    let src_channels = spec.channels.count().max(1);
                    let samples: Vec<i16> = sample_buf.samples().to_vec();
                    self.queue_samples(&samples, src_channels);
                    return true;
                }
                Err(SymphoniaError::DecodeError(err)) => {
                    warn!("decode error: {}", err);
                    continue;
                }
                Err(_) => return false,
            }
        }
    }

    /// Adapt the source channel layout to the output layout and serialize.
    fn queue_samples(&mut self, samples: &[i16], src_channels: usize) {
        let dst_channels = self.format.channels as usize;
        match (src_channels, dst_channels) {
            (1, 2) => {
                for &sample in samples {
                    self.queue_sample(sample);
                    self.queue_sample(sample);
                }
            }
            (2, 1) => {
                for pair in samples.chunks_exact(2) {
                    let mixed = ((pair[0] as i32 + pair[1] as i32) / 2) as i16;
                    self.queue_sample(mixed);
                }
            }
            (src, dst) if src == dst => {
                for &sample in samples {
                    self.queue_sample(sample);
                }
            }
            (src, dst) => {
                // Multichannel source: keep the first output-channel samples
                // of each frame.
                for frame in samples.chunks_exact(src) {
                    for &sample in frame.iter().take(dst) {
                        self.queue_sample(sample);
                    }
                }
            }
        }
    }

    fn queue_sample(&mut self, sample: i16) {
        let raw = match self.format.encoding {
            Encoding::Signed => sample as u16,
            Encoding::Unsigned => (sample as u16) ^ 0x8000,
        };
        let bytes = match self.format.endianness {
            Endianness::Little => raw.to_le_bytes(),
            Endianness::Big => raw.to_be_bytes(),
        };
        for byte in bytes {
            if self.spill.is_empty() && self.ring.len() < self.ring.max_len() {
                self.ring.push(byte);
            } else {
                self.spill.push_back(byte);
            }
        }
    }
}

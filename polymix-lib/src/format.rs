//! Output format model for the mixing engine.

/// Sample encoding of the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Signed,
    Unsigned,
}

/// Byte order of the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Requested output configuration passed to [`crate::mixer::Mixer::init`].
#[derive(Debug, Clone, Copy)]
pub struct AudioSpec {
    /// Sample rate in Hz.
    pub frequency: u32,
    /// Bits per sample. Only 16-bit PCM is currently supported.
    pub bits: u16,
    pub encoding: Encoding,
    pub endianness: Endianness,
    /// Output channel count; values above 2 are treated as stereo.
    pub channels: u16,
    /// Mixing buffer size in bytes.
    pub buffer: usize,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            frequency: 22050,
            bits: 16,
            encoding: Encoding::Signed,
            endianness: Endianness::Little,
            channels: 2,
            buffer: 4096,
        }
    }
}

/// The format an initialized mixer is actually running at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub frequency: u32,
    pub bits: u16,
    pub encoding: Encoding,
    pub endianness: Endianness,
    pub channels: u16,
}

impl AudioFormat {
    /// Lock in a requested spec, or `None` when the engine cannot serve it.
    pub fn from_spec(spec: &AudioSpec) -> Option<Self> {
        if spec.bits != 16 || spec.frequency == 0 || spec.buffer == 0 {
            return None;
        }
        let channels = if spec.channels <= 1 { 1 } else { 2 };
        Some(Self {
            frequency: spec.frequency,
            bits: spec.bits,
            encoding: spec.encoding,
            endianness: spec.endianness,
            channels,
        })
    }

    /// Bytes per frame (one sample for every output channel).
    pub fn frame_size(&self) -> usize {
        (self.bits as usize / 8) * self.channels as usize
    }

    /// Bytes per single sample.
    pub fn sample_size(&self) -> usize {
        self.bits as usize / 8
    }
}

//! # Polymix
//!
//! A channel-pool audio mixing engine. Callers request playback of shared,
//! immutable [`mixer::Sound`]s on a bounded pool of [`mixer::Channel`]s; a
//! single dedicated mixing thread decodes and additively mixes every active
//! channel into one physical output stream each cycle.

pub mod backend;
mod decode;
pub mod format;
pub mod mixer;

pub use format::{AudioFormat, AudioSpec, Encoding, Endianness};
pub use mixer::{Channel, Mixer, Music, Sound};

#[cfg(test)]
pub(crate) mod test_fixtures;

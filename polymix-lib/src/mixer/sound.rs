//! Shareable audio data with a shared volume setting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::decode::{duration_seconds, SharedBytes, SoundSource};

use super::{Channel, MixerCore};

static NEXT_SOUND_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable audio data plus a volume shared by every clone.
///
/// Any number of channels may play the same sound concurrently; each opens
/// its own decode cursor over the shared source. Equality is identity: two
/// sounds loaded from the same file are distinct.
#[derive(Clone)]
pub struct Sound {
    id: u64,
    source: SoundSource,
    volume: Arc<Mutex<f32>>,
    core: Arc<MixerCore>,
}

impl PartialEq for Sound {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Sound {}

impl Sound {
    pub(crate) fn from_path(core: Arc<MixerCore>, path: PathBuf) -> Self {
        Self::new(core, SoundSource::Path(path))
    }

    pub(crate) fn from_bytes(core: Arc<MixerCore>, bytes: Vec<u8>) -> Self {
        Self::new(core, SoundSource::Bytes(SharedBytes::new(bytes)))
    }

    fn new(core: Arc<MixerCore>, source: SoundSource) -> Self {
        Self {
            id: NEXT_SOUND_ID.fetch_add(1, Ordering::Relaxed),
            source,
            volume: Arc::new(Mutex::new(1.0)),
            core,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn source(&self) -> &SoundSource {
        &self.source
    }

    /// Claim an available channel and start playing on it. `loops` counts
    /// extra playthroughs (`-1` = forever). `None` when the engine is not
    /// initialized or no channel is available; an exhausted pool is not
    /// reclaimed by force here.
    pub fn play(&self, loops: i32) -> Option<Channel> {
        if !self.core.is_open() {
            return None;
        }
        let id = self.core.pool().retrieve()?;
        let channel = match self.core.channel_handle(id) {
            Some(channel) => channel,
            // Claimed id raced with a capacity shrink; give it back.
            None => {
                self.core.pool().deactivate(id);
                self.core.pool().restore(id);
                return None;
            }
        };
        channel.play(self, loops);
        Some(channel)
    }

    /// Stop every pooled channel currently playing this sound.
    pub fn stop(&self) {
        for id in self.core.pool().active_snapshot() {
            if id < 0 {
                continue;
            }
            if let Some(channel) = self.core.channel_handle(id) {
                if channel.bound_sound_id() == Some(self.id) {
                    channel.stop();
                }
            }
        }
    }

    /// Volume applied on top of each playing channel's own volume.
    /// Clamped to `[0, 1]`.
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = volume.clamp(0.0, 1.0);
    }

    pub fn get_volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    /// Number of pooled channels currently playing this sound.
    pub fn get_num_channels(&self) -> usize {
        self.core
            .pool()
            .active_snapshot()
            .into_iter()
            .filter(|&id| id >= 0)
            .filter_map(|id| self.core.channel_handle(id))
            .filter(|channel| channel.bound_sound_id() == Some(self.id))
            .count()
    }

    /// Length of the audio data in seconds, `0.0` when unknown.
    pub fn get_length(&self) -> f64 {
        duration_seconds(&self.source).unwrap_or(0.0)
    }
}

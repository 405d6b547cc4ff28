//! Dedicated background-track channel, outside the pool.

use std::path::PathBuf;
use std::sync::Arc;

use super::sound::Sound;
use super::{Channel, MixerCore};

/// Control surface for the background track.
///
/// The music channel carries id `-1` and is never part of the pool: it can
/// not be claimed, found or force-reclaimed, and mixer-wide stop/pause
/// leave it alone. Volume operations address the loaded sound. Every
/// operation is a no-op before `init`.
#[derive(Clone)]
pub struct Music {
    core: Arc<MixerCore>,
}

impl Music {
    pub(crate) fn new(core: Arc<MixerCore>) -> Self {
        Self { core }
    }

    fn channel(&self) -> Option<Channel> {
        self.core.channel_handle(-1)
    }

    /// Load a track, replacing (and stopping) any previous one.
    pub fn load(&self, path: impl Into<PathBuf>) {
        let sound = Sound::from_path(self.core.clone(), path.into());
        let mut music = self.core.music_state();
        if let Some(state) = music.as_mut() {
            state.channel.stop();
            state.sound = Some(sound);
        }
    }

    /// Stop playback and drop the loaded track.
    pub fn unload(&self) {
        let mut music = self.core.music_state();
        if let Some(state) = music.as_mut() {
            state.channel.stop();
            state.sound = None;
        }
    }

    /// Play the loaded track. `loops` counts extra playthroughs (`-1` =
    /// forever). No-op when nothing is loaded.
    pub fn play(&self, loops: i32) {
        // Opening the decode cursor can block; do it outside the music lock.
        let bound = {
            let music = self.core.music_state();
            music.as_ref().and_then(|state| {
                state
                    .sound
                    .clone()
                    .map(|sound| (state.channel.clone(), sound))
            })
        };
        if let Some((channel, sound)) = bound {
            channel.play(&sound, loops);
        }
    }

    pub fn stop(&self) {
        if let Some(channel) = self.channel() {
            channel.stop();
        }
    }

    pub fn pause(&self) {
        if let Some(channel) = self.channel() {
            channel.pause();
        }
    }

    pub fn unpause(&self) {
        if let Some(channel) = self.channel() {
            channel.unpause();
        }
    }

    /// Volume of the loaded track, clamped to `[0, 1]`.
    pub fn set_volume(&self, volume: f32) {
        let music = self.core.music_state();
        if let Some(sound) = music.as_ref().and_then(|state| state.sound.as_ref()) {
            sound.set_volume(volume);
        }
    }

    pub fn get_volume(&self) -> f32 {
        let music = self.core.music_state();
        match music.as_ref().and_then(|state| state.sound.as_ref()) {
            Some(sound) => sound.get_volume(),
            None => 1.0,
        }
    }

    pub fn get_busy(&self) -> bool {
        self.channel().is_some_and(|channel| channel.get_busy())
    }
}

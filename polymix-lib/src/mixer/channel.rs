//! Per-slot playback state machine.

use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::decode::DecodeCursor;
use crate::format::AudioFormat;

use super::pool::ChannelPool;
use super::sound::Sound;

/// A playback slot: Idle until a sound is bound, Playing while the mixing
/// thread pulls from it, Paused when it holds its slot without contributing.
///
/// Cheap-clone handle; all clones address the same slot. The active flag is
/// the one word the mixing thread reads without locking, so it is an atomic
/// and the rest of the slot state lives behind a mutex.
#[derive(Clone)]
pub struct Channel {
    id: i32,
    shared: Arc<ChannelShared>,
}

struct ChannelShared {
    active: AtomicBool,
    state: Mutex<ChannelState>,
    pool: Arc<ChannelPool>,
    format: AudioFormat,
    buffer_size: usize,
}

struct ChannelState {
    sound: Option<Sound>,
    cursor: Option<DecodeCursor>,
    loops: i32,
    paused: bool,
    volume: f32,
    lvolume: f32,
    rvolume: f32,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            sound: None,
            cursor: None,
            loops: 0,
            paused: false,
            volume: 1.0,
            lvolume: 1.0,
            rvolume: 1.0,
        }
    }
}

impl Channel {
    pub(crate) fn new(
        id: i32,
        pool: Arc<ChannelPool>,
        format: AudioFormat,
        buffer_size: usize,
    ) -> Self {
        Self {
            id,
            shared: Arc::new(ChannelShared {
                active: AtomicBool::new(false),
                state: Mutex::new(ChannelState::default()),
                pool,
                format,
                buffer_size,
            }),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Bind a sound and start playing. `loops` counts *extra* playthroughs;
    /// `-1` loops forever. If a sound is already bound the channel is stopped
    /// first, keeping its left/right volume across the rebind.
    pub fn play(&self, sound: &Sound, loops: i32) {
        // Open before locking: the mixing thread takes this mutex every
        // cycle and must not wait out a file probe.
        let cursor =
            match DecodeCursor::open(sound.source(), &self.shared.format, self.shared.buffer_size) {
                Ok(cursor) => cursor,
                Err(err) => {
                    warn!("channel {}: failed to open sound: {}", self.id, err);
                    // Give back a slot claimed for this play; a channel that
                    // is already playing keeps its current sound.
                    if !self.shared.active.load(Ordering::SeqCst)
                        && self.shared.pool.is_active(self.id)
                    {
                        self.shared.pool.deactivate(self.id);
                        self.shared.pool.restore(self.id);
                    }
                    return;
                }
            };

        let mut state = self.shared.state.lock().unwrap();
        if state.sound.is_some() {
            let (lvolume, rvolume) = (state.lvolume, state.rvolume);
            self.stop_locked(&mut state);
            state.lvolume = lvolume;
            state.rvolume = rvolume;
        }
        state.sound = Some(sound.clone());
        state.cursor = Some(cursor);
        state.loops = loops;
        state.paused = false;
        self.shared.active.store(true, Ordering::SeqCst);
        self.shared.pool.activate(self.id);
    }

    /// Pull one buffer of PCM for the mixing cycle.
    ///
    /// Returns the byte count plus the effective left/right gains (channel
    /// volume times the bound sound's volume). At end-of-stream a looping
    /// channel reopens its cursor and reports a zero-length cycle, so every
    /// loop restart leaves a one-cycle gap; a non-looping channel stops.
    /// `None` when the channel is not actively playing.
    pub(crate) fn pull(&self, buf: &mut [u8]) -> Option<(usize, f32, f32)> {
        if !self.shared.active.load(Ordering::SeqCst) {
            return None;
        }
        let mut state = self.shared.state.lock().unwrap();
        let sound_volume = match &state.sound {
            Some(sound) => sound.get_volume(),
            None => return None,
        };

        let len = match state.cursor.as_mut() {
            Some(cursor) => cursor.read(buf),
            None => 0,
        };
        if len > 0 {
            return Some((
                len,
                state.lvolume * sound_volume,
                state.rvolume * sound_volume,
            ));
        }

        if state.loops == 0 {
            self.stop_locked(&mut state);
            return Some((0, 1.0, 1.0));
        }
        if state.loops > 0 {
            state.loops -= 1;
        }
        let source = state.sound.as_ref().map(|s| s.source().clone());
        if let Some(source) = source {
            match DecodeCursor::open(&source, &self.shared.format, self.shared.buffer_size) {
                Ok(cursor) => state.cursor = Some(cursor),
                Err(err) => {
                    warn!("channel {}: failed to restart loop: {}", self.id, err);
                    self.stop_locked(&mut state);
                }
            }
        }
        Some((0, 1.0, 1.0))
    }

    /// Stop playback and release the slot. No-op unless actively playing, so
    /// a paused channel keeps its slot and its sound.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        self.stop_locked(&mut state);
    }

    /// Stop with the state mutex already held. `pull` hits end-of-stream
    /// with the lock taken, where calling `stop` would deadlock.
    fn stop_locked(&self, state: &mut ChannelState) {
        if !self.shared.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.pool.deactivate(self.id);
        state.cursor = None;
        state.sound = None;
        state.paused = false;
        state.loops = 0;
        state.volume = 1.0;
        state.lvolume = 1.0;
        state.rvolume = 1.0;
        self.shared.pool.restore(self.id);
    }

    /// Suspend playback without releasing the slot: the id stays registered
    /// active so nobody else claims it, but the mixing cycle skips it.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if self.shared.active.swap(false, Ordering::SeqCst) {
            state.paused = true;
        }
    }

    pub fn unpause(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.paused {
            state.paused = false;
            self.shared.active.store(true, Ordering::SeqCst);
        }
    }

    /// Set both stereo sides at once; this is the value `get_volume`
    /// reports. Clamped to `[0, 1]`.
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let mut state = self.shared.state.lock().unwrap();
        state.volume = volume;
        state.lvolume = volume;
        state.rvolume = volume;
    }

    /// Set the stereo sides independently, leaving the mono volume reading
    /// untouched. Clamped to `[0, 1]`.
    pub fn set_stereo_volume(&self, left: f32, right: f32) {
        let mut state = self.shared.state.lock().unwrap();
        state.lvolume = left.clamp(0.0, 1.0);
        state.rvolume = right.clamp(0.0, 1.0);
    }

    pub fn get_volume(&self) -> f32 {
        self.shared.state.lock().unwrap().volume
    }

    /// True while the channel is actively playing. A paused channel reports
    /// not busy even though it still owns its slot.
    pub fn get_busy(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn get_sound(&self) -> Option<Sound> {
        self.shared.state.lock().unwrap().sound.clone()
    }

    pub(crate) fn bound_sound_id(&self) -> Option<u64> {
        self.shared
            .state
            .lock()
            .unwrap()
            .sound
            .as_ref()
            .map(|sound| sound.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioSpec;

    fn idle_channel() -> (Channel, Arc<ChannelPool>) {
        let pool = Arc::new(ChannelPool::new(2));
        let format = AudioFormat::from_spec(&AudioSpec::default()).unwrap();
        (Channel::new(0, pool.clone(), format, 4096), pool)
    }

    #[test]
    fn volume_is_clamped_and_mirrored() {
        let (channel, _pool) = idle_channel();
        channel.set_volume(1.5);
        assert_eq!(channel.get_volume(), 1.0);
        channel.set_volume(-0.1);
        assert_eq!(channel.get_volume(), 0.0);
        channel.set_volume(0.4);
        assert_eq!(channel.get_volume(), 0.4);
    }

    #[test]
    fn stereo_volume_leaves_the_mono_reading() {
        let (channel, _pool) = idle_channel();
        channel.set_volume(0.8);
        channel.set_stereo_volume(0.1, 2.0);
        assert_eq!(channel.get_volume(), 0.8);
    }

    #[test]
    fn stop_on_an_idle_channel_is_a_no_op() {
        let (channel, pool) = idle_channel();
        channel.stop();
        channel.stop();
        assert_eq!(pool.available_snapshot(), vec![0, 1]);
        assert!(!channel.get_busy());
    }

    #[test]
    fn pause_on_an_idle_channel_does_not_activate() {
        let (channel, pool) = idle_channel();
        channel.pause();
        channel.unpause();
        assert!(!channel.get_busy());
        assert!(!pool.busy());
    }

    #[test]
    fn idle_channel_pulls_nothing() {
        let (channel, _pool) = idle_channel();
        let mut buf = vec![0u8; 64];
        assert!(channel.pull(&mut buf).is_none());
    }
}

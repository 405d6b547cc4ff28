//! The mixing engine: channel pool, playback channels, music track and the
//! background mixing thread behind one cheap-clone handle.

mod channel;
mod music;
mod pool;
mod runner;
mod sound;

pub use channel::Channel;
pub use music::Music;
pub use sound::Sound;

use log::warn;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::backend::{AudioBackend, DeviceBackend};
use crate::format::{AudioFormat, AudioSpec};

use pool::ChannelPool;
use runner::{spawn_mix_thread, BackendFactory, MixRunnerArgs};

const DEFAULT_CHANNELS: usize = 8;

#[derive(Clone, Copy)]
struct OpenConfig {
    format: AudioFormat,
    buffer_size: usize,
}

pub(crate) struct MusicState {
    pub(crate) channel: Channel,
    pub(crate) sound: Option<Sound>,
}

/// Engine state shared by every handle and the mixing thread.
pub(crate) struct MixerCore {
    pool: Arc<ChannelPool>,
    channels: Mutex<Vec<Channel>>,
    music: Mutex<Option<MusicState>>,
    config: Mutex<Option<OpenConfig>>,
}

impl MixerCore {
    pub(crate) fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    pub(crate) fn is_open(&self) -> bool {
        self.config.lock().unwrap().is_some()
    }

    /// Slot handle by id; `-1` addresses the music channel. `None` for ids
    /// that raced with a capacity shrink or before `init`.
    pub(crate) fn channel_handle(&self, id: i32) -> Option<Channel> {
        if id == -1 {
            return self
                .music
                .lock()
                .unwrap()
                .as_ref()
                .map(|state| state.channel.clone());
        }
        self.channels.lock().unwrap().get(id as usize).cloned()
    }

    pub(crate) fn music_state(&self) -> MutexGuard<'_, Option<MusicState>> {
        self.music.lock().unwrap()
    }

    /// Stop every slot, music included. Runs on the mixing thread during
    /// teardown.
    pub(crate) fn stop_all(&self) {
        let channels: Vec<Channel> = self.channels.lock().unwrap().clone();
        for channel in channels {
            channel.stop();
        }
        let music_channel = self
            .music
            .lock()
            .unwrap()
            .as_ref()
            .map(|state| state.channel.clone());
        if let Some(channel) = music_channel {
            channel.stop();
        }
    }
}

/// The audio mixing engine.
///
/// Cheap-clone handle: clones share the engine, so one part of a program
/// can `init` and another can play. Playback calls made before `init` (or
/// after `quit`) are no-ops, except [`Mixer::channel`] which treats
/// pre-init access as a programming error.
#[derive(Clone)]
pub struct Mixer {
    core: Arc<MixerCore>,
    initialized: Arc<AtomicBool>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            core: Arc::new(MixerCore {
                pool: Arc::new(ChannelPool::new(DEFAULT_CHANNELS)),
                channels: Mutex::new(Vec::new()),
                music: Mutex::new(None),
                config: Mutex::new(None),
            }),
            initialized: Arc::new(AtomicBool::new(false)),
            thread: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the default output device and start the mixing thread.
    ///
    /// Returns the locked-in format, or `None` when the spec is unsupported
    /// or no device could be opened; the engine then stays uninitialized.
    /// Calling `init` on an initialized engine returns the open format.
    pub fn init(&self, spec: AudioSpec) -> Option<AudioFormat> {
        let format = AudioFormat::from_spec(&spec)?;
        let buffer_size = spec.buffer;
        let factory: BackendFactory = Box::new(move || {
            DeviceBackend::open(format, buffer_size)
                .map(|backend| Box::new(backend) as Box<dyn AudioBackend>)
        });
        self.init_inner(format, buffer_size, factory)
    }

    pub fn pre_init(&self, spec: AudioSpec) -> Option<AudioFormat> {
        self.init(spec)
    }

    /// Same as [`Mixer::init`] with a caller-supplied backend, for headless
    /// embedding and tests.
    pub fn init_with_backend(
        &self,
        spec: AudioSpec,
        backend: Box<dyn AudioBackend + Send>,
    ) -> Option<AudioFormat> {
        let format = AudioFormat::from_spec(&spec)?;
        let factory: BackendFactory = Box::new(move || Ok(backend as Box<dyn AudioBackend>));
        self.init_inner(format, spec.buffer, factory)
    }

    fn init_inner(
        &self,
        format: AudioFormat,
        buffer_size: usize,
        backend_factory: BackendFactory,
    ) -> Option<AudioFormat> {
        let mut config = self.core.config.lock().unwrap();
        if let Some(open) = config.as_ref() {
            return Some(open.format);
        }

        {
            let mut channels = self.core.channels.lock().unwrap();
            channels.clear();
            for id in 0..self.core.pool.capacity() as i32 {
                channels.push(Channel::new(id, self.core.pool.clone(), format, buffer_size));
            }
        }
        *self.core.music.lock().unwrap() = Some(MusicState {
            channel: Channel::new(-1, self.core.pool.clone(), format, buffer_size),
            sound: None,
        });
        self.initialized.store(true, Ordering::SeqCst);

        // The backend is built on the mixing thread (device handles need not
        // be Send); wait for it to report ready before declaring the engine
        // open.
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let args = MixRunnerArgs {
            core: self.core.clone(),
            initialized: self.initialized.clone(),
            backend_factory,
            format,
            buffer_size,
            ready: ready_tx,
        };
        let handle = match spawn_mix_thread(args) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("failed to spawn mixing thread: {}", err);
                self.rollback_init();
                return None;
            }
        };
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("audio backend unavailable: {}", err);
                let _ = handle.join();
                self.rollback_init();
                return None;
            }
            Err(_) => {
                warn!("mixing thread exited before reporting ready");
                let _ = handle.join();
                self.rollback_init();
                return None;
            }
        }

        *self.thread.lock().unwrap() = Some(handle);
        *config = Some(OpenConfig {
            format,
            buffer_size,
        });
        Some(format)
    }

    fn rollback_init(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        *self.core.music.lock().unwrap() = None;
        self.core.channels.lock().unwrap().clear();
    }

    /// The open format, `None` while uninitialized.
    pub fn get_init(&self) -> Option<AudioFormat> {
        self.core.config.lock().unwrap().map(|open| open.format)
    }

    /// Shut the engine down: the mixing thread stops all channels and
    /// releases the device, and `quit` joins it so the device is free when
    /// this returns. Idempotent.
    pub fn quit(&self) {
        let handle = {
            let mut config = self.core.config.lock().unwrap();
            if config.take().is_none() {
                return;
            }
            self.initialized.store(false, Ordering::SeqCst);
            self.thread.lock().unwrap().take()
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("mixing thread panicked during join");
            }
        }

        // Paused channels survive stop(); release their slots so the pool
        // partition is whole for a later re-init.
        for id in self.core.pool.active_snapshot() {
            self.core.pool.deactivate(id);
            self.core.pool.restore(id);
        }
        *self.core.music.lock().unwrap() = None;
        self.core.channels.lock().unwrap().clear();
    }

    /// Stop every actively playing pooled channel. The music channel is not
    /// touched.
    pub fn stop(&self) {
        for channel in self.pooled_active() {
            channel.stop();
        }
    }

    pub fn pause(&self) {
        for channel in self.pooled_active() {
            channel.pause();
        }
    }

    pub fn unpause(&self) {
        for channel in self.pooled_active() {
            channel.unpause();
        }
    }

    fn pooled_active(&self) -> Vec<Channel> {
        self.core
            .pool
            .active_snapshot()
            .into_iter()
            .filter(|&id| id >= 0)
            .filter_map(|id| self.core.channel_handle(id))
            .collect()
    }

    /// Resize the channel pool. Shrinking stops the dropped high channels
    /// first; growing registers fresh idle slots.
    pub fn set_num_channels(&self, count: usize) {
        let config = self.core.config.lock().unwrap();
        let open = match config.as_ref() {
            Some(open) => *open,
            // Not open yet: only the pool size carries over into init.
            None => {
                self.core.pool.set_capacity(count);
                return;
            }
        };

        let mut channels = self.core.channels.lock().unwrap();
        let old = channels.len();
        if count < old {
            for channel in &channels[count..] {
                channel.stop();
            }
            channels.truncate(count);
        } else {
            for id in old as i32..count as i32 {
                channels.push(Channel::new(
                    id,
                    self.core.pool.clone(),
                    open.format,
                    open.buffer_size,
                ));
            }
        }
        self.core.pool.set_capacity(count);
    }

    pub fn get_num_channels(&self) -> usize {
        self.core.pool.capacity()
    }

    /// Reserve channels `[0, count)`: they are skipped by `Sound::play` and
    /// plain `find_channel` and only handed out via the reserved fallback.
    pub fn set_reserved(&self, count: usize) {
        self.core.pool.set_reserved(count);
    }

    /// Peek an idle channel without claiming it. With `force`, an engine
    /// with no idle channel reclaims the longest-running one instead.
    /// `None` before `init`.
    pub fn find_channel(&self, force: bool) -> Option<Channel> {
        if !self.core.is_open() {
            return None;
        }
        if let Some(id) = self.core.pool.find() {
            return self.core.channel_handle(id);
        }
        if force {
            return self.core.channel_handle(self.core.pool.force_find());
        }
        None
    }

    /// True while any pooled channel is actively playing. Paused channels
    /// and the music channel do not count.
    pub fn get_busy(&self) -> bool {
        self.pooled_active()
            .iter()
            .any(|channel| channel.get_busy())
    }

    /// Direct slot access. Out-of-range ids (including any access before
    /// `init`) are a programming error.
    ///
    /// # Panics
    /// When `id` is not a registered slot.
    pub fn channel(&self, id: usize) -> Channel {
        let channels = self.core.channels.lock().unwrap();
        match channels.get(id) {
            Some(channel) => channel.clone(),
            None => panic!(
                "channel {} is not registered ({} channels open)",
                id,
                channels.len()
            ),
        }
    }

    /// Load a sound from a file. Decoding is deferred to playback; a broken
    /// file surfaces as a channel that never becomes busy.
    pub fn sound(&self, path: impl Into<PathBuf>) -> Sound {
        Sound::from_path(self.core.clone(), path.into())
    }

    /// Load a sound from raw encoded bytes (a complete file image, not bare
    /// PCM). The bytes are shared by every clone of the sound.
    pub fn sound_from_bytes(&self, bytes: Vec<u8>) -> Sound {
        Sound::from_bytes(self.core.clone(), bytes)
    }

    pub fn music(&self) -> Music {
        Music::new(self.core.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::test_fixtures::{wav_bytes, wav_payload};
    use std::io::Write as _;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until(timeout_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn open_mixer() -> (Mixer, Arc<Mutex<Vec<u8>>>) {
        let mixer = Mixer::new();
        let spec = AudioSpec::default();
        let format = AudioFormat::from_spec(&spec).unwrap();
        let backend = MemoryBackend::new(format, spec.buffer);
        let written = backend.written();
        assert!(mixer.init_with_backend(spec, Box::new(backend)).is_some());
        (mixer, written)
    }

    #[test]
    fn init_and_quit_lifecycle() {
        let (mixer, _written) = open_mixer();
        let format = mixer.get_init().unwrap();
        assert_eq!(format.frequency, 22050);

        // Re-init is idempotent.
        let again = mixer.init(AudioSpec::default());
        assert_eq!(again.unwrap().frequency, 22050);

        mixer.quit();
        assert!(mixer.get_init().is_none());
        mixer.quit();
    }

    #[test]
    fn unsupported_bit_depth_refuses_init() {
        let mixer = Mixer::new();
        let spec = AudioSpec {
            bits: 8,
            ..AudioSpec::default()
        };
        assert!(mixer.init(spec).is_none());
        assert!(mixer.get_init().is_none());
    }

    #[test]
    fn playback_drains_byte_exact() {
        let (mixer, written) = open_mixer();
        let frames = 300;
        let sound = mixer.sound_from_bytes(wav_bytes(frames, 2, 22050));

        let channel = sound.play(0).unwrap();
        assert_eq!(channel.id(), 0);
        assert!(wait_until(2000, || !mixer.get_busy()));

        assert_eq!(*written.lock().unwrap(), wav_payload(frames, 2));
        // The slot is reusable once drained.
        assert!(mixer.find_channel(false).is_some());
        mixer.quit();
    }

    #[test]
    fn two_loops_play_three_times() {
        let (mixer, written) = open_mixer();
        let frames = 200;
        let sound = mixer.sound_from_bytes(wav_bytes(frames, 2, 22050));

        sound.play(2).unwrap();
        assert!(wait_until(5000, || !mixer.get_busy()));

        assert_eq!(*written.lock().unwrap(), wav_payload(frames, 2).repeat(3));
        mixer.quit();
    }

    #[test]
    fn exhausted_pool_refuses_to_play() {
        let (mixer, _written) = open_mixer();
        mixer.set_num_channels(1);
        let sound = mixer.sound_from_bytes(wav_bytes(16, 2, 22050));

        assert!(sound.play(-1).is_some());
        assert!(sound.play(0).is_none());
        assert!(mixer.find_channel(false).is_none());
        // Forced lookup reclaims the playing channel instead.
        assert_eq!(mixer.find_channel(true).unwrap().id(), 0);
        mixer.quit();
    }

    #[test]
    fn failed_rebind_keeps_the_channel_playing() {
        let (mixer, _written) = open_mixer();
        let sound = mixer.sound_from_bytes(wav_bytes(16, 2, 22050));
        let channel = sound.play(-1).unwrap();

        let broken = mixer.sound_from_bytes(vec![0xAB; 64]);
        channel.play(&broken, 0);
        assert!(channel.get_busy());
        assert!(channel.get_sound().unwrap() == sound);
        mixer.quit();
    }

    #[test]
    fn broken_sound_releases_its_claimed_slot() {
        let (mixer, _written) = open_mixer();
        mixer.set_num_channels(1);
        let broken = mixer.sound_from_bytes(vec![0xAB; 64]);

        // play hands out the channel, but the channel never starts.
        assert!(broken.play(0).is_some());
        assert!(!mixer.get_busy());

        let sound = mixer.sound_from_bytes(wav_bytes(16, 2, 22050));
        assert!(sound.play(-1).is_some());
        mixer.quit();
    }

    #[test]
    fn sound_volume_is_clamped() {
        let (mixer, _written) = open_mixer();
        let sound = mixer.sound_from_bytes(wav_bytes(16, 2, 22050));
        sound.set_volume(1.5);
        assert_eq!(sound.get_volume(), 1.0);
        sound.set_volume(-0.1);
        assert_eq!(sound.get_volume(), 0.0);
        sound.set_volume(0.4);
        assert_eq!(sound.get_volume(), 0.4);
        mixer.quit();
    }

    #[test]
    fn sound_length_reports_seconds() {
        let (mixer, _written) = open_mixer();
        let sound = mixer.sound_from_bytes(wav_bytes(22050, 2, 22050));
        assert!((sound.get_length() - 1.0).abs() < 1e-6);
        let broken = mixer.sound_from_bytes(vec![0u8; 32]);
        assert_eq!(broken.get_length(), 0.0);
        mixer.quit();
    }

    #[test]
    fn pause_keeps_the_slot_without_counting_busy() {
        let (mixer, _written) = open_mixer();
        mixer.set_num_channels(1);
        let sound = mixer.sound_from_bytes(wav_bytes(16, 2, 22050));

        let channel = sound.play(-1).unwrap();
        assert!(wait_until(1000, || mixer.get_busy()));

        channel.pause();
        assert!(!channel.get_busy());
        assert!(!mixer.get_busy());
        // The paused channel still owns its slot.
        assert!(mixer.find_channel(false).is_none());
        // stop() leaves a paused channel alone.
        channel.stop();
        assert!(channel.get_sound().is_some());

        channel.unpause();
        assert!(channel.get_busy());
        mixer.quit();
    }

    #[test]
    fn shrink_stops_the_dropped_channels() {
        let (mixer, _written) = open_mixer();
        mixer.set_num_channels(2);
        let sound = mixer.sound_from_bytes(wav_bytes(16, 2, 22050));

        let first = sound.play(-1).unwrap();
        let second = sound.play(-1).unwrap();
        assert_eq!(second.id(), 1);

        mixer.set_num_channels(1);
        assert_eq!(mixer.get_num_channels(), 1);
        assert!(!second.get_busy());
        assert!(first.get_busy());
        mixer.quit();
    }

    #[test]
    fn reserved_channels_are_skipped_by_play() {
        let (mixer, _written) = open_mixer();
        mixer.set_reserved(2);
        let sound = mixer.sound_from_bytes(wav_bytes(16, 2, 22050));

        let channel = sound.play(-1).unwrap();
        assert!(channel.id() >= 2);
        mixer.quit();
    }

    #[test]
    fn sound_counts_and_stops_its_channels() {
        let (mixer, _written) = open_mixer();
        let sound = mixer.sound_from_bytes(wav_bytes(16, 2, 22050));
        let other = mixer.sound_from_bytes(wav_bytes(16, 2, 22050));

        sound.play(-1).unwrap();
        sound.play(-1).unwrap();
        other.play(-1).unwrap();
        assert_eq!(sound.get_num_channels(), 2);
        assert_eq!(other.get_num_channels(), 1);

        sound.stop();
        assert_eq!(sound.get_num_channels(), 0);
        assert_eq!(other.get_num_channels(), 1);
        mixer.quit();
    }

    #[test]
    fn music_plays_outside_the_pool() {
        let (mixer, written) = open_mixer();
        let frames = 200;
        let mut file = tempfile::NamedTempFile::with_suffix(".wav").unwrap();
        file.write_all(&wav_bytes(frames, 2, 22050)).unwrap();
        file.flush().unwrap();

        let music = mixer.music();
        assert_eq!(music.get_volume(), 1.0);
        music.load(file.path());
        music.play(0);

        assert!(wait_until(1000, || music.get_busy()));
        // Pooled busy-ness never includes the music channel.
        assert!(!mixer.get_busy());
        assert!(wait_until(2000, || !music.get_busy()));
        assert_eq!(*written.lock().unwrap(), wav_payload(frames, 2));

        music.unload();
        assert_eq!(music.get_volume(), 1.0);
        mixer.quit();
    }

    #[test]
    fn device_outage_drops_cycles_without_killing_the_engine() {
        let mixer = Mixer::new();
        let spec = AudioSpec::default();
        let format = AudioFormat::from_spec(&spec).unwrap();
        let backend = MemoryBackend::new(format, spec.buffer);
        let written = backend.written();
        let outage = backend.outage_flag();
        mixer.init_with_backend(spec, Box::new(backend)).unwrap();

        outage.store(true, std::sync::atomic::Ordering::SeqCst);
        let sound = mixer.sound_from_bytes(wav_bytes(64, 2, 22050));
        sound.play(0).unwrap();
        assert!(wait_until(2000, || !mixer.get_busy()));

        assert!(written.lock().unwrap().is_empty());
        assert!(mixer.get_init().is_some());
        mixer.quit();
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn out_of_range_channel_access_panics() {
        let (mixer, _written) = open_mixer();
        mixer.channel(99);
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn pre_init_channel_access_panics() {
        let mixer = Mixer::new();
        mixer.channel(0);
    }
}

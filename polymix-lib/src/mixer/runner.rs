//! The dedicated mixing thread.

use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::backend::{AudioBackend, BackendError};
use crate::format::AudioFormat;

use super::{Channel, MixerCore};

const IDLE_BACKOFF_MS: u64 = 10;

/// Builds the backend on the mixing thread itself: device handles are not
/// required to be `Send`, so the stream must be opened where it is used.
pub(crate) type BackendFactory =
    Box<dyn FnOnce() -> Result<Box<dyn AudioBackend>, BackendError> + Send>;

pub(crate) struct MixRunnerArgs {
    pub core: Arc<MixerCore>,
    pub initialized: Arc<AtomicBool>,
    pub backend_factory: BackendFactory,
    pub format: AudioFormat,
    pub buffer_size: usize,
    pub ready: mpsc::SyncSender<Result<(), BackendError>>,
}

pub(crate) fn spawn_mix_thread(args: MixRunnerArgs) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("polymix-mixer".to_string())
        .spawn(move || {
            let backend = match (args.backend_factory)() {
                Ok(backend) => backend,
                Err(err) => {
                    let _ = args.ready.send(Err(err));
                    return;
                }
            };
            let _ = args.ready.send(Ok(()));
            run(
                args.core,
                args.initialized,
                backend,
                args.format,
                args.buffer_size,
            );
        })
}

fn run(
    core: Arc<MixerCore>,
    initialized: Arc<AtomicBool>,
    mut backend: Box<dyn AudioBackend>,
    format: AudioFormat,
    buffer_size: usize,
) {
    let mut pull_buf = vec![0u8; buffer_size];
    let mut mix_buf = vec![0u8; buffer_size];

    while initialized.load(Ordering::SeqCst) {
        if !core.pool().busy() {
            thread::sleep(Duration::from_millis(IDLE_BACKOFF_MS));
            continue;
        }

        // Snapshot of everything playing this cycle. Paused channels sit in
        // the active set but report not busy and are skipped.
        let playing: Vec<Channel> = core
            .pool()
            .active_snapshot()
            .into_iter()
            .filter_map(|id| core.channel_handle(id))
            .filter(|channel| channel.get_busy())
            .collect();

        match playing.len() {
            0 => {
                thread::sleep(Duration::from_millis(IDLE_BACKOFF_MS));
            }
            1 => {
                // Single contributor: skip the accumulator and write the
                // channel's bytes straight through, scaled when attenuated.
                if let Some((len, lgain, rgain)) = playing[0].pull(&mut pull_buf) {
                    if len > 0 {
                        if lgain < 1.0 || rgain < 1.0 {
                            backend.scale_volume(&mut pull_buf, len, lgain, rgain);
                        }
                        write_device(backend.as_mut(), &format, &pull_buf, len);
                    }
                }
            }
            _ => {
                for channel in &playing {
                    if let Some((len, lgain, rgain)) = channel.pull(&mut pull_buf) {
                        if len > 0 {
                            backend.set_stream_data(&pull_buf, len, lgain, rgain);
                        }
                    }
                }
                let mixed = backend.pull_mixed(&mut mix_buf);
                if mixed > 0 {
                    write_device(backend.as_mut(), &format, &mix_buf, mixed);
                }
            }
        }
    }

    // Teardown runs here, exactly once, so the device is released on the
    // thread that opened it.
    core.stop_all();
    backend.close();
}

/// One device write per mixed cycle. A misaligned length gets one retry
/// trimmed to a whole-frame multiple; an unavailable device drops the cycle.
fn write_device(backend: &mut dyn AudioBackend, format: &AudioFormat, data: &[u8], len: usize) {
    match backend.write(data, 0, len) {
        Ok(()) => {}
        Err(BackendError::InvalidArgument) => {
            let trimmed = len - len % format.frame_size();
            if trimmed > 0 {
                if let Err(err) = backend.write(data, 0, trimmed) {
                    warn!("device write failed after frame-aligned retry: {}", err);
                }
            }
        }
        Err(BackendError::DeviceUnavailable) => {}
    }
}

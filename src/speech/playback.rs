//! Platform audio-playback seam.
//!
//! The queue hands a clip and a token to the backend; the backend reports
//! completion as a [`PlayerEvent`] message rather than a callback, so the
//! queue's control loop stays the single writer of playback state. Tokens
//! let the loop drop finished events from a playback it already stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tokio::sync::mpsc;

use super::{AudioClip, SpeechError};

/// Completion events emitted by a playback backend.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Finished { token: u64 },
    Failed { token: u64, message: String },
}

/// Platform audio-playback capability consumed by the speech queue.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Begin playing a clip. Returns once playback has started; completion
    /// arrives later as a `PlayerEvent` carrying the same token.
    async fn start(
        &self,
        clip: Arc<AudioClip>,
        token: u64,
        events: mpsc::Sender<PlayerEvent>,
    ) -> Result<(), SpeechError>;

    /// Stop the current playback, if any. No `Finished` event is emitted
    /// for a stopped playback.
    async fn stop(&self);
}

/// Real playback backend: parses the WAV clip with hound and feeds it to
/// the default CPAL output device on a dedicated thread.
pub struct CpalPlayer {
    // Flag shared with the live playback thread; setting it stops playback.
    stop_flag: Mutex<Option<Arc<AtomicBool>>>,
}

impl CpalPlayer {
    pub fn new() -> Self {
        Self {
            stop_flag: Mutex::new(None),
        }
    }

    fn halt_current(&self) {
        if let Ok(mut guard) = self.stop_flag.lock() {
            if let Some(flag) = guard.take() {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }
}

impl Default for CpalPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackBackend for CpalPlayer {
    async fn start(
        &self,
        clip: Arc<AudioClip>,
        token: u64,
        events: mpsc::Sender<PlayerEvent>,
    ) -> Result<(), SpeechError> {
        // Parse before spawning so format errors surface synchronously.
        let reader = hound::WavReader::new(std::io::Cursor::new(clip.data.clone()))
            .map_err(|e| SpeechError::PlaybackFailed(format!("bad WAV: {}", e)))?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => reader
                .into_samples::<i16>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / i16::MAX as f32)
                .collect(),
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .filter_map(|s| s.ok())
                .collect(),
        };

        if samples.is_empty() {
            return Err(SpeechError::PlaybackFailed("empty clip".into()));
        }

        self.halt_current();

        let stop = Arc::new(AtomicBool::new(false));
        if let Ok(mut guard) = self.stop_flag.lock() {
            *guard = Some(stop.clone());
        }

        let channels = spec.channels;
        let sample_rate = spec.sample_rate;
        std::thread::spawn(move || {
            run_playback_thread(samples, channels, sample_rate, stop, token, events);
        });

        log::debug!("Playback started (token {})", token);
        Ok(())
    }

    async fn stop(&self) {
        self.halt_current();
    }
}

struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Body of the playback thread: owns the output stream for one clip.
fn run_playback_thread(
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    token: u64,
    events: mpsc::Sender<PlayerEvent>,
) {
    let fail = |message: String| {
        log::error!("Playback failed (token {}): {}", token, message);
        let _ = events.blocking_send(PlayerEvent::Failed { token, message });
    };

    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => return fail("no output device".into()),
    };

    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples,
        position: 0,
        finished: false,
    }));
    let buffer_clone = buffer.clone();

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut buf = match buffer_clone.lock() {
                Ok(b) => b,
                Err(_) => return,
            };
            for sample in data.iter_mut() {
                if buf.position < buf.samples.len() {
                    *sample = buf.samples[buf.position];
                    buf.position += 1;
                } else {
                    *sample = 0.0;
                    buf.finished = true;
                }
            }
        },
        |err| log::error!("Audio output stream error: {}", err),
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => return fail(e.to_string()),
    };
    if let Err(e) = stream.play() {
        return fail(e.to_string());
    }

    loop {
        std::thread::sleep(std::time::Duration::from_millis(10));
        if stop.load(Ordering::SeqCst) {
            // Preempted or cleared; exit silently without a Finished event.
            log::debug!("Playback stopped (token {})", token);
            return;
        }
        let done = buffer.lock().map(|b| b.finished).unwrap_or(true);
        if done {
            break;
        }
    }

    drop(stream);
    log::debug!("Playback finished (token {})", token);
    let _ = events.blocking_send(PlayerEvent::Finished { token });
}

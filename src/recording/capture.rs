//! Platform capture backend: CPAL input stream + hound WAV writing.
//!
//! `cpal::Stream` is not `Send`, so the real backend parks each live stream
//! on a dedicated audio thread and talks to it over a channel. The async
//! side only ever holds the channel sender.

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use hound::{WavSpec, WavWriter};
use uuid::Uuid;

use super::paths::generate_wav_path;

/// Settle time after stopping capture before the WAV file is read.
/// The platform contract promises the file is reliably readable only
/// ~200ms after the stream stops.
const SETTLE_AFTER_STOP: Duration = Duration::from_millis(200);

/// Errors that can occur during audio capture.
#[derive(Debug, Clone)]
pub enum CaptureError {
    /// Microphone permission refused, or no input device visible to us.
    PermissionDenied,
    /// The input device exists but is held by another consumer.
    DeviceBusy,
    /// Any other platform failure (stream build, file IO, ...).
    Hardware(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::PermissionDenied => write!(f, "Microphone permission denied"),
            CaptureError::DeviceBusy => write!(f, "Audio input device is busy"),
            CaptureError::Hardware(e) => write!(f, "Audio hardware error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

/// A completed capture: path to the finalized WAV file plus its size.
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    pub wav_path: PathBuf,
    pub size_bytes: u64,
}

/// Platform audio-capture capability consumed by the recording controller.
///
/// The contract mirrors the mobile platform service: permission request,
/// defensive prepare (release stale resources, configure the audio mode),
/// then start/stop bracketing one session.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Request microphone permission. `Ok(false)` means the user refused.
    async fn request_permission(&self) -> Result<bool, CaptureError>;

    /// Release any stale capture resource from a previous session and
    /// configure the platform audio mode for recording.
    async fn prepare(&self) -> Result<(), CaptureError>;

    /// Begin capturing to a fresh file for the given session.
    async fn start(&self, session_id: Uuid) -> Result<(), CaptureError>;

    /// Halt capture, wait for the file to settle, and return the result.
    async fn stop(&self) -> Result<CapturedAudio, CaptureError>;
}

enum CaptureThreadCmd {
    Stop {
        reply: std_mpsc::Sender<Result<CapturedAudio, CaptureError>>,
    },
}

struct ActiveCapture {
    cmd_tx: std_mpsc::Sender<CaptureThreadCmd>,
}

/// Real capture backend using the default CPAL input device.
pub struct CpalCapture {
    active: Mutex<Option<ActiveCapture>>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    fn take_active(&self) -> Option<ActiveCapture> {
        self.active.lock().ok().and_then(|mut guard| guard.take())
    }

    fn stop_thread(active: ActiveCapture) -> Result<CapturedAudio, CaptureError> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        active
            .cmd_tx
            .send(CaptureThreadCmd::Stop { reply: reply_tx })
            .map_err(|_| CaptureError::Hardware("capture thread already gone".into()))?;
        reply_rx
            .recv()
            .map_err(|_| CaptureError::Hardware("capture thread dropped reply".into()))?
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureBackend for CpalCapture {
    async fn request_permission(&self) -> Result<bool, CaptureError> {
        // Desktop hosts have no runtime permission prompt; an input device
        // being enumerable is the closest observable signal.
        let granted = tokio::task::spawn_blocking(|| {
            cpal::default_host().default_input_device().is_some()
        })
        .await
        .map_err(|e| CaptureError::Hardware(e.to_string()))?;
        Ok(granted)
    }

    async fn prepare(&self) -> Result<(), CaptureError> {
        // A prior session may have failed to release cleanly; force-release
        // before acquiring a new stream. Audio-mode configuration (silent
        // mode playback + record) is a no-op on desktop hosts.
        if let Some(stale) = self.take_active() {
            log::warn!("Releasing stale capture resource before new session");
            if let Err(e) = Self::stop_thread(stale) {
                log::debug!("Stale capture release reported: {}", e);
            }
        }
        Ok(())
    }

    async fn start(&self, session_id: Uuid) -> Result<(), CaptureError> {
        if self.take_active().is_some() {
            log::warn!("start() with a live capture thread; releasing it first");
        }

        let wav_path =
            generate_wav_path(session_id).map_err(|e| CaptureError::Hardware(e.to_string()))?;

        let (cmd_tx, cmd_rx) = std_mpsc::channel::<CaptureThreadCmd>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();

        let thread_path = wav_path.clone();
        std::thread::spawn(move || {
            run_capture_thread(thread_path, cmd_rx, ready_tx);
        });

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| CaptureError::Hardware(e.to_string()))?
            .map_err(|_| CaptureError::Hardware("capture thread exited early".into()))?;
        ready?;

        if let Ok(mut guard) = self.active.lock() {
            *guard = Some(ActiveCapture { cmd_tx });
        }

        log::info!("Recording started: {:?}", wav_path);
        Ok(())
    }

    async fn stop(&self) -> Result<CapturedAudio, CaptureError> {
        let active = self
            .take_active()
            .ok_or_else(|| CaptureError::Hardware("no active capture".into()))?;

        tokio::task::spawn_blocking(move || Self::stop_thread(active))
            .await
            .map_err(|e| CaptureError::Hardware(e.to_string()))?
    }
}

/// Body of the dedicated audio thread: owns the stream and the WAV writer
/// for exactly one session.
fn run_capture_thread(
    wav_path: PathBuf,
    cmd_rx: std_mpsc::Receiver<CaptureThreadCmd>,
    ready_tx: std_mpsc::Sender<Result<(), CaptureError>>,
) {
    let setup = (|| {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::PermissionDenied)?;

        log::info!("Using audio input device: {:?}", device.name());

        let supported = device
            .default_input_config()
            .map_err(|e| CaptureError::Hardware(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        let spec = WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate.0,
            bits_per_sample: 16, // Always write as 16-bit
            sample_format: hound::SampleFormat::Int,
        };

        let writer = WavWriter::create(&wav_path, spec)
            .map_err(|e| CaptureError::Hardware(e.to_string()))?;
        let writer = Arc::new(Mutex::new(Some(writer)));

        let stream = build_stream(&device, &config, sample_format, writer.clone())?;
        stream.play().map_err(map_play_error)?;

        Ok::<_, CaptureError>((stream, writer))
    })();

    let (stream, writer) = match setup {
        Ok(pair) => {
            let _ = ready_tx.send(Ok(()));
            pair
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Block until stop. If the sender is dropped without a Stop, finalize
    // and exit so the WAV is not left corrupt.
    let reply = match cmd_rx.recv() {
        Ok(CaptureThreadCmd::Stop { reply }) => Some(reply),
        Err(_) => None,
    };

    drop(stream);

    let finalize = (|| {
        let mut guard = writer
            .lock()
            .map_err(|_| CaptureError::Hardware("WAV writer lock poisoned".into()))?;
        if let Some(w) = guard.take() {
            w.finalize()
                .map_err(|e| CaptureError::Hardware(e.to_string()))?;
        }
        Ok::<_, CaptureError>(())
    })();

    // Give the filesystem its settle window before reporting the file.
    std::thread::sleep(SETTLE_AFTER_STOP);

    let result = finalize.and_then(|_| {
        let size_bytes = std::fs::metadata(&wav_path)
            .map(|m| m.len())
            .map_err(|e| CaptureError::Hardware(e.to_string()))?;
        log::info!("Recording stopped, WAV finalized: {:?}", wav_path);
        Ok(CapturedAudio {
            wav_path: wav_path.clone(),
            size_bytes,
        })
    });

    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

type SharedWriter = Arc<Mutex<Option<WavWriter<std::io::BufWriter<std::fs::File>>>>>;

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    writer: SharedWriter,
) -> Result<cpal::Stream, CaptureError> {
    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(device, config, writer),
        SampleFormat::U16 => build_stream_typed::<u16>(device, config, writer),
        SampleFormat::F32 => build_stream_typed::<f32>(device, config, writer),
        other => Err(CaptureError::Hardware(format!(
            "unsupported sample format {:?}",
            other
        ))),
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    writer: SharedWriter,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::Sample<Float = f32> + cpal::SizedSample + Send + 'static,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut guard = match writer.lock() {
                    Ok(g) => g,
                    Err(_) => return,
                };
                if let Some(ref mut w) = *guard {
                    for &sample in data {
                        let sample_i16 = sample_to_i16(sample);
                        if w.write_sample(sample_i16).is_err() {
                            log::error!("Failed to write sample");
                            break;
                        }
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceBusy,
            other => CaptureError::Hardware(other.to_string()),
        })
}

fn map_play_error(e: cpal::PlayStreamError) -> CaptureError {
    match e {
        cpal::PlayStreamError::DeviceNotAvailable => CaptureError::DeviceBusy,
        other => CaptureError::Hardware(other.to_string()),
    }
}

/// Convert any sample type to i16 for WAV writing.
fn sample_to_i16<T: cpal::Sample<Float = f32>>(sample: T) -> i16 {
    let f32_sample: f32 = sample.to_float_sample();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

//! Audio capture module.
//!
//! The [`RecordingController`] owns the lifecycle of one capture session at
//! a time; the [`CaptureBackend`] trait abstracts the platform microphone
//! (CPAL + hound WAV writing in the real backend).

mod capture;
mod controller;
mod paths;

pub use capture::{CaptureBackend, CaptureError, CapturedAudio, CpalCapture};
pub use controller::{RecorderState, RecordingController, StartOutcome, StopOutcome};
pub use paths::{cleanup_old_recordings, create_temp_audio_dir, generate_wav_path};

//! Speech pipeline for a narrated chat client.
//!
//! Three cooperating components, composed by a thin shell (the chat UI, or
//! the CLI harness in `main.rs`):
//!
//! - [`recording::RecordingController`] — lifecycle of a single microphone
//!   capture session (start/stop/cancel, minimum-duration gate).
//! - [`transcription::TranscriptionClient`] — one-shot speech-to-text call
//!   with a deadline and cooperative cancellation.
//! - [`speech::SpeechQueue`] — FIFO text-to-speech pipeline: synthesizes
//!   narration (or reuses cached audio) and plays items one at a time.
//!
//! The shell owns the sequencing between components: `stop()` must complete
//! before `transcribe()` is invoked, and recognized text is submitted back
//! to the queue by the shell, not by the pipeline itself.

pub mod recording;
pub mod settings;
pub mod speech;
pub mod transcription;

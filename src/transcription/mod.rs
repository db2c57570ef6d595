//! Speech-to-text transcription via a remote endpoint.

mod client;

pub use client::{is_api_key_configured, TranscriptionClient, TranscriptionError};

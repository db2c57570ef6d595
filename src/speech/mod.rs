//! Text-to-speech pipeline: FIFO narration queue, synthesis client,
//! bounded audio cache, and the platform playback seam.

mod cache;
mod markup;
mod playback;
mod queue;
mod synthesis;

pub use cache::AudioCache;
pub use markup::build_ssml;
pub use playback::{CpalPlayer, PlaybackBackend, PlayerEvent};
pub use queue::{Notice, QueueSnapshot, SpeechQueue, SpeechQueueItem};
pub use synthesis::{HttpSynthesisClient, SynthesisBackend, SynthesisOptions, VoiceSettings};

/// Synthesized audio, WAV-encoded.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub data: Vec<u8>,
}

/// Failures raised inside the speech queue. Each one surfaces as exactly
/// one user-visible notice and never halts the queue.
#[derive(Debug, Clone)]
pub enum SpeechError {
    SynthesisFailed(String),
    PlaybackFailed(String),
    /// `play_message` with an id that is neither cached nor accompanied
    /// by text to synthesize.
    AudioUnavailable,
}

impl std::fmt::Display for SpeechError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeechError::SynthesisFailed(e) => write!(f, "Speech synthesis failed: {}", e),
            SpeechError::PlaybackFailed(e) => write!(f, "Audio playback failed: {}", e),
            SpeechError::AudioUnavailable => write!(f, "Audio unavailable for replay"),
        }
    }
}

impl std::error::Error for SpeechError {}

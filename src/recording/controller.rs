//! Recording lifecycle state machine.
//!
//! One capture session at a time. The state is an explicit enum rather than
//! boolean guards: invalid calls are rejected by construction, and every
//! exit path lands back in `Idle`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use super::capture::{CaptureBackend, CaptureError, CapturedAudio};

/// Internal state of the recording workflow.
#[derive(Debug, Clone)]
pub enum RecorderState {
    Idle,
    Starting,
    Recording {
        session_id: Uuid,
        started_at: Instant,
    },
    Stopping,
}

/// Result of a `start()` call. A second start while a session is live is a
/// deliberate no-op (debounce against rapid double-taps), not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
}

/// Result of a `stop()` call.
#[derive(Debug)]
pub enum StopOutcome {
    /// Capture succeeded and passed the minimum-duration gate.
    Captured(CapturedAudio),
    /// Recording was shorter than the configured minimum and was discarded.
    /// Treated as an accidental tap; nothing is forwarded to transcription.
    TooShort { duration: Duration },
    /// stop() arrived while Idle or still Starting; ignored.
    Ignored,
}

/// Manages the lifecycle of a single audio capture session.
pub struct RecordingController {
    backend: Arc<dyn CaptureBackend>,
    state: RecorderState,
    min_duration: Duration,
}

impl RecordingController {
    pub fn new(backend: Arc<dyn CaptureBackend>, min_duration: Duration) -> Self {
        Self {
            backend,
            state: RecorderState::Idle,
            min_duration,
        }
    }

    pub fn state(&self) -> &RecorderState {
        &self.state
    }

    /// Elapsed time of the live session, if one is recording. The shell
    /// uses this to enforce a maximum recording duration.
    pub fn elapsed(&self) -> Option<Duration> {
        match &self.state {
            RecorderState::Recording { started_at, .. } => Some(started_at.elapsed()),
            _ => None,
        }
    }

    /// Start a new capture session. Valid only from `Idle`; any other state
    /// returns `AlreadyActive` without side effects.
    pub async fn start(&mut self) -> Result<StartOutcome, CaptureError> {
        if !matches!(self.state, RecorderState::Idle) {
            log::debug!("start() ignored in state {:?}", self.state);
            return Ok(StartOutcome::AlreadyActive);
        }

        self.state = RecorderState::Starting;

        let result = self.do_start().await;
        match result {
            Ok(session_id) => {
                self.state = RecorderState::Recording {
                    session_id,
                    started_at: Instant::now(),
                };
                log::info!("Recording session {} started", session_id);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                // Failure edge: always back to Idle, controller stays usable.
                self.state = RecorderState::Idle;
                log::error!("Failed to start recording: {}", e);
                Err(e)
            }
        }
    }

    async fn do_start(&mut self) -> Result<Uuid, CaptureError> {
        if !self.backend.request_permission().await? {
            return Err(CaptureError::PermissionDenied);
        }

        // Release stale resources and configure the audio mode before
        // acquiring a fresh stream.
        self.backend.prepare().await?;

        let session_id = Uuid::new_v4();
        self.backend.start(session_id).await?;
        Ok(session_id)
    }

    /// Stop the live session and return the captured audio, unless the
    /// recording was shorter than the minimum duration. Calls while still
    /// `Starting` are ignored to avoid tearing down a session mid-acquire.
    pub async fn stop(&mut self) -> Result<StopOutcome, CaptureError> {
        let (session_id, started_at) = match self.state {
            RecorderState::Recording {
                session_id,
                started_at,
            } => (session_id, started_at),
            ref other => {
                log::debug!("stop() ignored in state {:?}", other);
                return Ok(StopOutcome::Ignored);
            }
        };

        self.state = RecorderState::Stopping;
        let result = self.backend.stop().await;
        // Unconditionally back to Idle, even on error.
        self.state = RecorderState::Idle;

        let captured = result?;
        let duration = started_at.elapsed();

        if duration < self.min_duration {
            log::warn!(
                "Discarding session {}: {}ms < {}ms minimum",
                session_id,
                duration.as_millis(),
                self.min_duration.as_millis()
            );
            discard_file(&captured).await;
            return Ok(StopOutcome::TooShort { duration });
        }

        log::info!(
            "Recording session {} captured: {}ms, {} bytes",
            session_id,
            duration.as_millis(),
            captured.size_bytes
        );
        Ok(StopOutcome::Captured(captured))
    }

    /// Stop the live session and discard the result unconditionally.
    pub async fn cancel(&mut self) -> Result<(), CaptureError> {
        let session_id = match self.state {
            RecorderState::Recording { session_id, .. } => session_id,
            ref other => {
                log::debug!("cancel() ignored in state {:?}", other);
                return Ok(());
            }
        };

        self.state = RecorderState::Stopping;
        let result = self.backend.stop().await;
        self.state = RecorderState::Idle;

        match result {
            Ok(captured) => {
                log::info!("Recording session {} cancelled", session_id);
                discard_file(&captured).await;
                Ok(())
            }
            Err(e) => {
                log::warn!("Cancel of session {} reported: {}", session_id, e);
                Err(e)
            }
        }
    }
}

async fn discard_file(captured: &CapturedAudio) {
    if let Err(e) = tokio::fs::remove_file(&captured.wav_path).await {
        log::debug!("Could not remove {:?}: {}", captured.wav_path, e);
    }
}

//! Speech-to-text client: one multipart upload per captured clip, bounded
//! by a deadline and cancellable via a caller-held token.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Environment variable carrying the speech-to-text credential.
const API_KEY_ENV: &str = "FABLEVOICE_STT_API_KEY";

/// Global HTTP client for reuse across requests (avoids TLS handshake
/// overhead). The per-call deadline is enforced by the caller-side select,
/// not a client-wide timeout.
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Failure taxonomy surfaced to the caller. Timeout and cancellation are
/// first-class outcomes because the shell words them differently.
#[derive(Debug)]
pub enum TranscriptionError {
    /// Credential not configured at all (distinct from a rejected one).
    MissingApiKey,
    /// Empty handle or zero-length file; caught before any network time.
    InvalidAudio(String),
    /// Caller cancelled via the token mid-flight.
    Cancelled,
    /// Deadline exceeded; the underlying request was aborted.
    Timeout,
    /// Transport-level failure.
    Network(String),
    /// Credential rejected by the endpoint.
    AuthFailed,
    RateLimited,
    PayloadTooLarge,
    UnsupportedFormat,
    /// Successful call whose transcript was empty after trimming.
    NoSpeechDetected,
    /// Any other endpoint error.
    Api { status: u16, message: String },
    /// Response body did not match the expected shape.
    Parse(String),
}

impl std::fmt::Display for TranscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptionError::MissingApiKey => write!(
                f,
                "Speech-to-text key not configured. Set {} environment variable.",
                API_KEY_ENV
            ),
            TranscriptionError::InvalidAudio(e) => write!(f, "Invalid audio: {}", e),
            TranscriptionError::Cancelled => write!(f, "Transcription cancelled"),
            TranscriptionError::Timeout => write!(f, "Transcription timed out"),
            TranscriptionError::Network(e) => write!(f, "Network error: {}", e),
            TranscriptionError::AuthFailed => write!(f, "Speech-to-text credential rejected"),
            TranscriptionError::RateLimited => write!(f, "Speech-to-text rate limit reached"),
            TranscriptionError::PayloadTooLarge => write!(f, "Audio clip too large to upload"),
            TranscriptionError::UnsupportedFormat => write!(f, "Audio format not supported"),
            TranscriptionError::NoSpeechDetected => write!(f, "No speech detected"),
            TranscriptionError::Api { status, message } => {
                write!(f, "Speech-to-text error ({}): {}", status, message)
            }
            TranscriptionError::Parse(e) => write!(f, "Failed to parse response: {}", e),
        }
    }
}

impl std::error::Error for TranscriptionError {}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    text: String,
}

/// Endpoint error body, when it is JSON at all.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn get_api_key() -> Option<String> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.is_empty() => Some(key),
        _ => None,
    }
}

/// Check if an API key is configured (for status display).
pub fn is_api_key_configured() -> bool {
    get_api_key().is_some()
}

/// Client for the remote speech-to-text endpoint.
///
/// At most one request should be in flight per captured clip; the client
/// does not queue concurrent calls — the shell serializes them.
pub struct TranscriptionClient {
    endpoint: String,
    model: String,
    deadline: Duration,
}

impl TranscriptionClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, deadline: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            deadline,
        }
    }

    /// Transcribe a captured clip. Returns the trimmed recognized text.
    ///
    /// An empty transcript is `NoSpeechDetected`, not an empty success.
    /// Cancelling the token yields `Cancelled`; exceeding the deadline
    /// yields `Timeout` and aborts the request.
    pub async fn transcribe(
        &self,
        wav_path: &Path,
        language_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, TranscriptionError> {
        let api_key = get_api_key().ok_or(TranscriptionError::MissingApiKey)?;

        // Validate before spending network time.
        if wav_path.as_os_str().is_empty() {
            return Err(TranscriptionError::InvalidAudio("empty path".into()));
        }
        let metadata = tokio::fs::metadata(wav_path)
            .await
            .map_err(|e| TranscriptionError::InvalidAudio(e.to_string()))?;
        if metadata.len() == 0 {
            return Err(TranscriptionError::InvalidAudio("zero-length file".into()));
        }

        let file_bytes = tokio::fs::read(wav_path)
            .await
            .map_err(|e| TranscriptionError::InvalidAudio(e.to_string()))?;

        let filename = wav_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        log::info!(
            "Transcribing audio file: {} ({} bytes)",
            filename,
            file_bytes.len()
        );

        let file_part = Part::bytes(file_bytes)
            .file_name(filename)
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::Parse(e.to_string()))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone());
        if let Some(language) = language_hint {
            form = form.text("language", language.to_string());
        }

        let request = get_http_client()
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .multipart(form)
            .send();

        // Dropping the request future aborts the underlying call, so both
        // the deadline and the token leave nothing dangling.
        let response = tokio::select! {
            res = request => res.map_err(|e| TranscriptionError::Network(e.to_string()))?,
            _ = tokio::time::sleep(self.deadline) => {
                log::warn!("Transcription deadline ({:?}) exceeded, aborting", self.deadline);
                return Err(TranscriptionError::Timeout);
            }
            _ = cancel.cancelled() => {
                log::info!("Transcription cancelled by caller");
                return Err(TranscriptionError::Cancelled);
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), response.text().await.ok()));
        }

        let parsed: TranscriptResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Parse(e.to_string()))?;

        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            log::info!("Transcript empty after trimming; treating as no speech");
            return Err(TranscriptionError::NoSpeechDetected);
        }

        log::info!("Transcription successful: {} chars", text.len());
        Ok(text)
    }
}

/// Map HTTP status codes onto the user-facing failure taxonomy.
fn classify_status(status: u16, body: Option<String>) -> TranscriptionError {
    match status {
        401 | 403 => TranscriptionError::AuthFailed,
        429 => TranscriptionError::RateLimited,
        413 => TranscriptionError::PayloadTooLarge,
        415 => TranscriptionError::UnsupportedFormat,
        _ => {
            let raw = body.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&raw)
                .map(|r| r.error.message)
                .unwrap_or(raw);
            log::error!("Speech-to-text error ({}): {}", status, message);
            TranscriptionError::Api { status, message }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert!(matches!(classify_status(401, None), TranscriptionError::AuthFailed));
        assert!(matches!(classify_status(403, None), TranscriptionError::AuthFailed));
        assert!(matches!(classify_status(429, None), TranscriptionError::RateLimited));
        assert!(matches!(classify_status(413, None), TranscriptionError::PayloadTooLarge));
        assert!(matches!(classify_status(415, None), TranscriptionError::UnsupportedFormat));
        assert!(matches!(
            classify_status(500, Some("oops".into())),
            TranscriptionError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn api_error_body_message_is_extracted() {
        let body = r#"{"error":{"message":"model overloaded"}}"#.to_string();
        match classify_status(503, Some(body)) {
            TranscriptionError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "model overloaded");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn error_display_distinguishes_cancel_and_timeout() {
        assert!(TranscriptionError::Cancelled.to_string().contains("cancelled"));
        assert!(TranscriptionError::Timeout.to_string().contains("timed out"));
    }

    #[test]
    fn error_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TranscriptionError>();
    }
}

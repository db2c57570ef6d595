//! XDG path helpers for audio temp files
//!
//! Audio files are stored in: ~/.local/share/fablevoice/temp/audio/

use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

const MAX_RECORDINGS: usize = 5;

/// Get the temp audio directory path.
/// Returns: ~/.local/share/fablevoice/temp/audio/
fn temp_audio_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fablevoice")
        .join("temp")
        .join("audio")
}

/// Create the temp audio directory if it doesn't exist.
pub fn create_temp_audio_dir() -> std::io::Result<PathBuf> {
    let dir = temp_audio_dir();
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Generate a unique WAV file path for a capture session.
/// Format: <unix-seconds>_<uuid>.wav
pub fn generate_wav_path(session_id: Uuid) -> std::io::Result<PathBuf> {
    let dir = create_temp_audio_dir()?;
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let filename = format!("{}_{}.wav", secs, session_id);
    Ok(dir.join(filename))
}

/// Clean up old recordings, keeping only the most recent N files.
pub fn cleanup_old_recordings() -> std::io::Result<usize> {
    let dir = temp_audio_dir();
    if !dir.exists() {
        return Ok(0);
    }

    let mut entries: Vec<_> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "wav")
                .unwrap_or(false)
        })
        .collect();

    if entries.len() <= MAX_RECORDINGS {
        return Ok(0);
    }

    // Sort by modified time (oldest first)
    entries.sort_by(|a, b| {
        let time_a = a.metadata().and_then(|m| m.modified()).ok();
        let time_b = b.metadata().and_then(|m| m.modified()).ok();
        time_a.cmp(&time_b)
    });

    let to_delete = entries.len() - MAX_RECORDINGS;
    let mut deleted = 0;

    for entry in entries.into_iter().take(to_delete) {
        if fs::remove_file(entry.path()).is_ok() {
            log::debug!("Cleaned up old recording: {:?}", entry.path());
            deleted += 1;
        }
    }

    Ok(deleted)
}

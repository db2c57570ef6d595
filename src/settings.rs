//! Application settings: JSON file under the user config directory, with
//! serde defaults so a missing or partial file still yields a working
//! configuration. Saves are atomic (temp file + rename).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::speech::{SynthesisOptions, VoiceSettings};

const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Recordings shorter than this are discarded as accidental taps.
    pub min_recording_ms: u64,

    /// Recordings are force-stopped after this long.
    pub max_recording_secs: u64,

    /// Deadline for one speech-to-text call.
    pub transcription_timeout_secs: u64,

    pub transcription_model: String,

    /// Language hint forwarded to the speech-to-text endpoint.
    pub language: Option<String>,

    pub stt_endpoint: String,
    pub tts_endpoint: String,

    pub voice: VoiceSettings,
    pub speaking_rate: f32,
    /// Pitch shift in semitones.
    pub pitch: f32,

    /// Maximum number of synthesized clips kept in the audio cache.
    pub cache_capacity: usize,

    /// Lowercased word -> phonetic spelling, applied during markup.
    pub pronunciations: HashMap<String, String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            min_recording_ms: 300,
            max_recording_secs: 120,
            transcription_timeout_secs: 30,
            transcription_model: "whisper-1".to_string(),
            language: None,
            stt_endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            tts_endpoint: "https://texttospeech.googleapis.com/v1/text:synthesize".to_string(),
            voice: VoiceSettings::default(),
            speaking_rate: 1.0,
            pitch: 0.0,
            cache_capacity: 64,
            pronunciations: HashMap::new(),
        }
    }
}

impl AppSettings {
    /// Synthesis options derived from the configured voice and prosody.
    pub fn synthesis_options(&self) -> SynthesisOptions {
        SynthesisOptions {
            voice: self.voice.clone(),
            speaking_rate: self.speaking_rate,
            pitch: self.pitch,
            pronunciations: self.pronunciations.clone(),
        }
    }
}

/// Default settings path: `<config dir>/fablevoice/settings.json`.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fablevoice").join(SETTINGS_FILE_NAME))
}

pub fn load_settings(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then
    // rename. This prevents a partial settings.json if we crash mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename atomically replaces the destination. On Windows it
    // fails if the destination exists, so remove it first.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_contract() {
        let settings = AppSettings::default();
        assert_eq!(settings.min_recording_ms, 300);
        assert_eq!(settings.transcription_timeout_secs, 30);
        assert_eq!(settings.max_recording_secs, 120);
        assert_eq!(settings.cache_capacity, 64);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = AppSettings::default();
        settings.min_recording_ms = 450;
        settings
            .pronunciations
            .insert("lyra".to_string(), "LEE-rah".to_string());

        save_settings(&path, &settings).unwrap();
        let loaded = load_settings(&path);

        assert_eq!(loaded.min_recording_ms, 450);
        assert_eq!(loaded.pronunciations.get("lyra").unwrap(), "LEE-rah");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings(&dir.path().join("nope.json"));
        assert_eq!(loaded.min_recording_ms, 300);
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let loaded = load_settings(&path);
        assert_eq!(loaded.min_recording_ms, 300);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"minRecordingMs": 100}"#).unwrap();
        // Unknown casing: field names are snake_case on the wire.
        let loaded = load_settings(&path);
        assert_eq!(loaded.min_recording_ms, 300);

        std::fs::write(&path, r#"{"min_recording_ms": 100}"#).unwrap();
        let loaded = load_settings(&path);
        assert_eq!(loaded.min_recording_ms, 100);
        assert_eq!(loaded.cache_capacity, 64);
    }
}

//! Speech-synthesis client.
//!
//! One JSON POST per narration item: `{input:{ssml}, voice, audioConfig}`
//! in, base64 `audioContent` out. LINEAR16 is requested so the playback
//! backend can parse the result as WAV.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::markup::build_ssml;
use super::{AudioClip, SpeechError};

/// Environment variable carrying the speech-synthesis credential.
const API_KEY_ENV: &str = "FABLEVOICE_TTS_API_KEY";

static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Voice selection passed through to the synthesis endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub language_code: String,
    pub name: String,
    pub ssml_gender: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            language_code: "en-US".to_string(),
            name: "en-US-Neural2-D".to_string(),
            ssml_gender: "MALE".to_string(),
        }
    }
}

/// Per-item synthesis options carried by each queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOptions {
    pub voice: VoiceSettings,
    pub speaking_rate: f32,
    /// Pitch shift in semitones.
    pub pitch: f32,
    /// Lowercased word -> phonetic spelling substitutions.
    pub pronunciations: HashMap<String, String>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            voice: VoiceSettings::default(),
            speaking_rate: 1.0,
            pitch: 0.0,
            pronunciations: HashMap::new(),
        }
    }
}

/// Audio-synthesis capability consumed by the speech queue.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Synthesize plain narration text (markup construction happens inside
    /// the backend) into a playable clip.
    async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<AudioClip, SpeechError>;
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    input: SsmlInput<'a>,
    voice: VoiceSelection<'a>,
    #[serde(rename = "audioConfig")]
    audio_config: AudioConfig,
}

#[derive(Serialize)]
struct SsmlInput<'a> {
    ssml: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: &'a str,
    ssml_gender: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    speaking_rate: f32,
    pitch: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Real client for the remote speech-synthesis endpoint.
pub struct HttpSynthesisClient {
    endpoint: String,
}

impl HttpSynthesisClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SynthesisBackend for HttpSynthesisClient {
    async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<AudioClip, SpeechError> {
        let api_key = match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => key,
            _ => {
                return Err(SpeechError::SynthesisFailed(format!(
                    "{} not configured",
                    API_KEY_ENV
                )))
            }
        };

        let ssml = build_ssml(text, options);
        let request = SynthesizeRequest {
            input: SsmlInput { ssml: &ssml },
            voice: VoiceSelection {
                language_code: &options.voice.language_code,
                name: &options.voice.name,
                ssml_gender: &options.voice.ssml_gender,
            },
            audio_config: AudioConfig {
                audio_encoding: "LINEAR16",
                speaking_rate: options.speaking_rate,
                pitch: options.pitch,
            },
        };

        log::debug!("Synthesizing {} chars of narration", text.len());

        let response = get_http_client()
            .post(&self.endpoint)
            .header("X-Goog-Api-Key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SpeechError::SynthesisFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Synthesis error ({}): {}", status.as_u16(), body);
            return Err(SpeechError::SynthesisFailed(format!(
                "endpoint returned {}",
                status.as_u16()
            )));
        }

        let parsed: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::SynthesisFailed(e.to_string()))?;

        let data = STANDARD
            .decode(parsed.audio_content.as_bytes())
            .map_err(|e| SpeechError::SynthesisFailed(format!("bad audio payload: {}", e)))?;

        log::info!("Synthesis complete: {} bytes of audio", data.len());
        Ok(AudioClip { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_camel_case_wire_names() {
        let request = SynthesizeRequest {
            input: SsmlInput {
                ssml: "<speak>hi</speak>",
            },
            voice: VoiceSelection {
                language_code: "en-US",
                name: "en-US-Neural2-D",
                ssml_gender: "MALE",
            },
            audio_config: AudioConfig {
                audio_encoding: "LINEAR16",
                speaking_rate: 1.0,
                pitch: 0.0,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["input"]["ssml"], "<speak>hi</speak>");
        assert_eq!(json["voice"]["languageCode"], "en-US");
        assert_eq!(json["voice"]["ssmlGender"], "MALE");
        assert_eq!(json["audioConfig"]["audioEncoding"], "LINEAR16");
        assert!(json["audioConfig"]["speakingRate"].is_number());
    }

    #[test]
    fn response_deserializes_audio_content() {
        let parsed: SynthesizeResponse =
            serde_json::from_str(r#"{"audioContent":"UklGRg=="}"#).unwrap();
        assert_eq!(
            STANDARD.decode(parsed.audio_content.as_bytes()).unwrap(),
            b"RIFF"
        );
    }

    #[test]
    fn default_options_are_neutral() {
        let opts = SynthesisOptions::default();
        assert_eq!(opts.speaking_rate, 1.0);
        assert_eq!(opts.pitch, 0.0);
        assert!(opts.pronunciations.is_empty());
    }
}

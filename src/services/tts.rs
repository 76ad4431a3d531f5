use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::{
    path::PathBuf,
    time::{Duration, SystemTime},
};
use tracing::{debug, error, info, warn};

use super::{check_status, ServiceError, HTTP_TIMEOUT};
use crate::{audio::queue::AudioClip, config::Config};

const SYNTHESIZE_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    speaking_rate: f32,
    pitch: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Cliente de Google Cloud Text-to-Speech
pub struct TtsService {
    client: reqwest::Client,
    api_key: String,
    language_code: String,
    voice_name: String,
    speaking_rate: f32,
    pitch: f32,
    temp_dir: PathBuf,
}

impl TtsService {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_key: config.google_api_key.clone(),
            language_code: config.tts_language_code.clone(),
            voice_name: config.tts_voice_name.clone(),
            speaking_rate: config.tts_speaking_rate,
            pitch: config.tts_pitch,
            temp_dir: config.audio_temp_dir.clone(),
        })
    }

    fn request<'a>(&'a self, text: &'a str) -> SynthesizeRequest<'a> {
        SynthesizeRequest {
            input: SynthesisInput { text },
            voice: VoiceSelection {
                language_code: &self.language_code,
                name: &self.voice_name,
            },
            audio_config: AudioConfig {
                audio_encoding: "MP3",
                speaking_rate: self.speaking_rate,
                pitch: self.pitch,
            },
        }
    }

    /// Genera un MP3 temporal con el texto narrado.
    ///
    /// El archivo se borra cuando el último `AudioClip` que lo referencia se
    /// descarta, normalmente al salir de la cola.
    pub async fn synthesize(&self, text: &str) -> Result<AudioClip, ServiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ServiceError::EmptyText);
        }

        debug!("🗣️ Generando audio ({} caracteres)", text.chars().count());

        let response = self
            .client
            .post(SYNTHESIZE_URL)
            .query(&[("key", &self.api_key)])
            .json(&self.request(text))
            .send()
            .await?;
        let response = match check_status(response).await {
            Ok(response) => response,
            Err(e) => {
                error!("❌ Text-to-Speech API: {}", e);
                return Err(e);
            }
        };

        let body: SynthesizeResponse = response.json().await?;
        let audio = STANDARD.decode(body.audio_content.as_bytes())?;
        if audio.is_empty() {
            return Err(ServiceError::InvalidResponse("audio vacío".to_string()));
        }

        let temp = tempfile::Builder::new()
            .prefix("tts_")
            .suffix(".mp3")
            .tempfile_in(&self.temp_dir)?
            .into_temp_path();
        tokio::fs::write(&temp, &audio).await?;

        debug!("✅ Audio generado: {} ({} bytes)", temp.display(), audio.len());
        Ok(AudioClip::from_temp(temp))
    }
}

/// Borra audios huérfanos de ejecuciones anteriores
pub async fn cleanup_stale_files(dir: &std::path::Path, max_age: Duration) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("⚠️ Error al eliminar {}: {}", entry.path().display(), e),
        }
    }

    if removed > 0 {
        info!("🧹 {} audios temporales antiguos eliminados", removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_body_shape() {
        let service = TtsService::new(&Config::default()).unwrap();
        let body = serde_json::to_value(service.request("hello")).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "input": { "text": "hello" },
                "voice": { "languageCode": "en-US", "name": "en-US-Neural2-D" },
                "audioConfig": { "audioEncoding": "MP3", "speakingRate": 1.0, "pitch": 0.0 }
            })
        );
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected() {
        let service = TtsService::new(&Config::default()).unwrap();
        let err = service.synthesize("   \n").await.unwrap_err();
        assert!(matches!(err, ServiceError::EmptyText));
    }

    #[tokio::test]
    async fn test_cleanup_respects_age() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.mp3"), b"mp3").unwrap();

        let kept = cleanup_stale_files(dir.path(), Duration::from_secs(3600)).await.unwrap();
        assert_eq!(kept, 0);
        assert!(dir.path().join("old.mp3").exists());

        let removed = cleanup_stale_files(dir.path(), Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("old.mp3").exists());
    }
}

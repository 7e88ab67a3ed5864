//! Speech-to-text.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use smartcar_types::CarError;
use tracing::debug;

/// Turns recorded audio into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CarError::TranscriptionFailure`] when the audio cannot be
    /// transcribed.
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, CarError>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for a Whisper server exposing the OpenAI-compatible
/// `/v1/audio/transcriptions` endpoint (e.g. `faster-whisper-server`,
/// `whisper.cpp --server`).
pub struct HttpTranscriber {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, CarError> {
        if audio.is_empty() {
            return Err(CarError::TranscriptionFailure("empty recording".into()));
        }
        let bytes = audio.len();
        // Browsers record voice commands as WebM/Opus.
        let file = Part::bytes(audio)
            .file_name("voice_command.webm")
            .mime_str("audio/webm")
            .map_err(|e| CarError::TranscriptionFailure(e.to_string()))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone());

        let url = format!("{}/v1/audio/transcriptions", self.base_url);
        let response: TranscriptionResponse = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CarError::TranscriptionFailure(e.to_string()))?
            .json()
            .await
            .map_err(|e| CarError::TranscriptionFailure(e.to_string()))?;

        debug!(bytes, chars = response.text.len(), "transcribed");
        Ok(response.text.trim().to_string())
    }
}

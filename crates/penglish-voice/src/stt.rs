//! **Speech-to-Text (STT)**: turn a recorded caller utterance into text.
//!
//! Implement `SpeechToText` for any transcription service. `OpenAiStt` talks to an
//! OpenAI-compatible `/audio/transcriptions` endpoint (OpenAI Whisper, OpenRouter, etc.).

use crate::audio::TurnAudio;
use crate::error::ProviderError;
use crate::locale::LanguageTag;
use async_trait::async_trait;
use std::time::Duration;

/// Backend for converting one turn's audio to text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe one turn as plain text. Empty string if nothing was recognized.
    async fn transcribe(
        &self,
        audio: &TurnAudio,
        language: &LanguageTag,
    ) -> Result<String, ProviderError>;
}

/// OpenAI-compatible transcription API.
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    api_key: String,
    /// whisper-1, gpt-4o-transcribe, ...
    pub model: String,
    client: reqwest::Client,
}

impl OpenAiStt {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl SpeechToText for OpenAiStt {
    async fn transcribe(
        &self,
        audio: &TurnAudio,
        language: &LanguageTag,
    ) -> Result<String, ProviderError> {
        let bytes = tokio::fs::read(audio.path()).await?;
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(audio.file_name())
            .mime_str("audio/mpeg")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", language.primary())
            .text("response_format", "text");
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                service: "STT",
                status,
                body,
            });
        }
        // response_format=text: the body is the transcript itself.
        Ok(res.text().await?.trim().to_string())
    }
}

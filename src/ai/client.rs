//! Ollama backend client.
//!
//! A thin transport around the `/api/generate` endpoint: one text call, one
//! vision call, no streaming. All failures are folded into [`AiError`] so the
//! pipeline can carry them back to the control thread inside completion
//! messages.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::config::AiConfig;

/// Errors from the AI backend, shaped for direct display in the status line.
///
/// `Clone` because completions travel inside iced messages.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AiError {
    #[error("Could not connect to Ollama server")]
    Connection(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected response format from server")]
    Malformed(String),

    #[error("Could not read or encode image at {0}")]
    ImageRead(String),
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for the Ollama generate API.
pub struct OllamaClient {
    http: reqwest::Client,
    config: AiConfig,
}

impl OllamaClient {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| AiError::Request(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Send a text-generation request and return the raw response string.
    pub async fn generate_text(&self, prompt: &str) -> Result<String, AiError> {
        let body = json!({
            "model": self.config.text_model,
            "prompt": prompt,
            "stream": false,
        });
        self.generate(body).await
    }

    /// Send a vision-generation request for the given image bytes.
    pub async fn generate_vision(
        &self,
        image_bytes: &[u8],
        prompt: &str,
    ) -> Result<String, AiError> {
        let body = json!({
            "model": self.config.vision_model,
            "prompt": prompt,
            "images": [BASE64.encode(image_bytes)],
            "stream": false,
        });
        self.generate(body).await
    }

    /// Read an image from disk and run the configured vision prompt on it.
    pub async fn describe_image(&self, path: &Path) -> Result<String, AiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|_| AiError::ImageRead(path.display().to_string()))?;
        self.generate_vision(&bytes, &self.config.vision_prompt).await
    }

    async fn generate(&self, body: serde_json::Value) -> Result<String, AiError> {
        let response = self
            .http
            .post(&self.config.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    AiError::Connection(e.to_string())
                } else {
                    AiError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %text, "Ollama request failed");
            return Err(AiError::Request(format!("status {status}")));
        }

        let decoded: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AiError::Malformed(e.to_string()))?;

        Ok(decoded.response)
    }
}

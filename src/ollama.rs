//! Ollama transport for spec generation
//!
//! Thin client for a locally hosted Ollama instance. The controller only
//! sees the `Generator` trait, so tests substitute a deterministic fake.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5-coder:7b-instruct";

/// Why a generation attempt produced no usable candidate. Both variants are
/// recoverable: they consume an attempt and the file is retried.
#[derive(Debug, Clone)]
pub enum GenerationError {
    /// Backend unreachable, errored, or timed out.
    Unavailable(String),
    /// Backend answered but returned no usable text.
    Empty,
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::Unavailable(reason) => {
                write!(f, "inference backend unavailable: {}", reason)
            }
            GenerationError::Empty => write!(f, "inference backend returned no code"),
        }
    }
}

/// Capability seam between the run loop and the inference backend.
pub trait Generator {
    fn generate(
        &self,
        system: &str,
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<String, GenerationError>> + Send;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Real client against `POST {host}/api/generate`.
pub struct OllamaClient {
    host: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(host: &str, model: &str, timeout: Duration) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

impl Generator for OllamaClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
        };
        let url = format!("{}/api/generate", self.host);

        // A hung model must not stall the whole run; the timeout turns a
        // hang into a recoverable Unavailable that costs one attempt.
        let send = self.client.post(&url).json(&request).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(GenerationError::Unavailable(e.to_string())),
            Err(_) => {
                return Err(GenerationError::Unavailable(format!(
                    "no response within {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        let status = response.status();
        let text = match tokio::time::timeout(self.timeout, response.text()).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(GenerationError::Unavailable(e.to_string())),
            Err(_) => {
                return Err(GenerationError::Unavailable(
                    "response body read timed out".to_string(),
                ))
            }
        };

        if !status.is_success() {
            return Err(GenerationError::Unavailable(format!(
                "HTTP {}: {}",
                status,
                crate::util::truncate(&text, 200)
            )));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text).map_err(|e| {
            GenerationError::Unavailable(format!("unexpected response shape: {}", e))
        })?;

        if parsed.response.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_trailing_slash_normalized() {
        let client = OllamaClient::new(
            "http://localhost:11434/",
            DEFAULT_MODEL,
            Duration::from_secs(1),
        );
        assert_eq!(client.host, "http://localhost:11434");
    }

    #[test]
    fn test_generation_error_display() {
        let err = GenerationError::Unavailable("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
        assert!(GenerationError::Empty.to_string().contains("no code"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        // Port 9 (discard) is not an HTTP server; the request fails fast.
        let client = OllamaClient::new("http://127.0.0.1:9", DEFAULT_MODEL, Duration::from_secs(2));
        let result = client.generate("sys", "prompt").await;
        assert!(matches!(result, Err(GenerationError::Unavailable(_))));
    }
}

//! Narrative service boundary.
//!
//! A narrative service turns one prompt into one text. Failures are
//! reported per request; the pipeline decides how to degrade.

use async_trait::async_trait;
use cyclewatch_core::config::NarrativeConfig;
use cyclewatch_core::error::{CycleWatchError, Result};
use serde::{Deserialize, Serialize};

/// Text returned when the service answers without a `response` field.
pub const EMPTY_RESPONSE: &str = "(no response)";

/// Generates analyst narratives from prompts.
#[async_trait]
pub trait NarrativeService: Send + Sync {
    /// Generate a narrative for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Client for an Ollama-style `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    config: NarrativeConfig,
    http_client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client; every request carries the configured timeout.
    pub fn new(config: NarrativeConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CycleWatchError::config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

#[async_trait]
impl NarrativeService for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        let response = self
            .http_client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CycleWatchError::Timeout(self.config.timeout())
                } else {
                    CycleWatchError::narrative(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CycleWatchError::narrative(format!(
                "service returned {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CycleWatchError::narrative(format!("unreadable response: {e}")))?;

        Ok(body
            .response
            .unwrap_or_else(|| EMPTY_RESPONSE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the endpoint URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let reply = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(reply.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/api/generate")
    }

    fn client(endpoint: String, timeout_secs: u64) -> OllamaClient {
        OllamaClient::new(NarrativeConfig {
            endpoint,
            timeout_secs,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_body() {
        let json = serde_json::to_value(GenerateRequest {
            model: "gemma:2b",
            prompt: "p",
            stream: false,
        })
        .unwrap();
        assert_eq!(json["model"], "gemma:2b");
        assert_eq!(json["stream"], false);
    }

    #[tokio::test]
    async fn test_reads_response_field() {
        let endpoint = serve_once("200 OK", r#"{"response":"funds looped A-B-C-A"}"#).await;
        let text = client(endpoint, 5).generate("prompt").await.unwrap();
        assert_eq!(text, "funds looped A-B-C-A");
    }

    #[tokio::test]
    async fn test_missing_response_field() {
        let endpoint = serve_once("200 OK", r#"{"done":true}"#).await;
        let text = client(endpoint, 5).generate("prompt").await.unwrap();
        assert_eq!(text, EMPTY_RESPONSE);
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let endpoint = serve_once("503 Service Unavailable", r#"{"error":"busy"}"#).await;
        let err = client(endpoint, 5).generate("prompt").await.unwrap_err();
        assert!(err.is_per_account());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        // bind then drop to get a closed port
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let err = client(format!("http://{addr}/api/generate"), 5)
            .generate("prompt")
            .await
            .unwrap_err();
        assert!(err.is_per_account());
    }

    #[test]
    fn test_timeout_from_config() {
        let c = client("http://localhost:1/api/generate".into(), 7);
        assert_eq!(c.config.timeout(), Duration::from_secs(7));
        assert_eq!(c.endpoint(), "http://localhost:1/api/generate");
    }
}

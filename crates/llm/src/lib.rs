//! Local model client.
//!
//! A lightweight client for Ollama-compatible HTTP endpoints implementing
//! the engine's [`LanguageModel`] capability. It focuses on:
//!
//! - Constructing an HTTP client with sensible defaults
//! - Discovering the endpoint from `WAYPOINT_MODEL_BASE_URL`
//! - Validating the base URL for safety (localhost gets plain HTTP,
//!   anything else must be HTTPS)
//! - Single-shot generate and chat calls (`stream: false`); the engine
//!   never retries, so neither does the client
//!
//! # Example
//!
//! ```ignore
//! use waypoint_llm::ModelClient;
//!
//! let client = ModelClient::new_from_env()?;
//! let text = client.generate(request).await?;
//! ```

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use waypoint_engine::{
    Attachment, AttachmentKind, ChatRequest, GenerateRequest, LanguageModel,
};

/// Environment variable overriding the endpoint base URL.
pub const BASE_URL_ENV: &str = "WAYPOINT_MODEL_BASE_URL";
/// Default local endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
/// Model used when neither the request nor the workflow names one.
pub const DEFAULT_MODEL: &str = "llama3";

/// Hostnames allowed to use plain HTTP.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1", "::1"];

/// Thin wrapper around a configured `reqwest::Client` for a local model
/// endpoint.
#[derive(Debug, Clone)]
pub struct ModelClient {
    base_url: String,
    http: Client,
    default_model: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ChatResponseMessage,
}

#[derive(Deserialize, Default)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

impl ModelClient {
    /// Construct a client from `WAYPOINT_MODEL_BASE_URL`, falling back to
    /// the default local endpoint.
    pub fn new_from_env() -> Result<Self> {
        let base_url = env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    /// Construct a client for an explicit base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        validate_base_url(&base_url)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build http client")?;
        Ok(Self {
            base_url,
            http,
            default_model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Override the model used when a request names none.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn model_for<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.default_model)
    }

    fn options_object(options: &indexmap::IndexMap<String, Value>) -> Map<String, Value> {
        options
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Base64 image payloads for the `images` field; text attachments are
    /// folded into the prompt by the caller of `generate`.
    fn image_payloads(attachments: &[Attachment]) -> Vec<String> {
        attachments
            .iter()
            .filter(|attachment| attachment.kind == AttachmentKind::Image)
            .map(|attachment| attachment.content.clone())
            .collect()
    }

    fn fold_text_attachments(prompt: &str, attachments: &[Attachment]) -> String {
        let texts: Vec<&Attachment> = attachments
            .iter()
            .filter(|attachment| attachment.kind == AttachmentKind::Text)
            .collect();
        if texts.is_empty() {
            return prompt.to_string();
        }
        let mut folded = String::new();
        for attachment in texts {
            folded.push_str(&format!(
                "--- {} ---\n{}\n\n",
                attachment.filename, attachment.content
            ));
        }
        folded.push_str(prompt);
        folded
    }
}

#[async_trait]
impl LanguageModel for ModelClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let model = self.model_for(request.model.as_deref());
        let mut body = json!({
            "model": model,
            "prompt": Self::fold_text_attachments(&request.prompt, &request.attachments),
            "stream": false,
        });
        let images = Self::image_payloads(&request.attachments);
        if !images.is_empty() {
            body["images"] = json!(images);
        }
        if !request.options.is_empty() {
            body["options"] = Value::Object(Self::options_object(&request.options));
        }

        debug!(%url, model, "sending generate request");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("model endpoint unreachable at {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("model endpoint returned {status}: {detail}");
        }
        let payload: GenerateResponse = response
            .json()
            .await
            .context("model endpoint returned an unexpected payload")?;
        Ok(payload.response)
    }

    async fn chat(&self, request: ChatRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let model = self.model_for(request.model.as_deref());
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| json!({ "role": message.role, "content": message.content }))
            .collect();
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if !request.options.is_empty() {
            body["options"] = Value::Object(Self::options_object(&request.options));
        }

        debug!(%url, model, "sending chat request");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("model endpoint unreachable at {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("model endpoint returned {status}: {detail}");
        }
        let payload: ChatResponse = response
            .json()
            .await
            .context("model endpoint returned an unexpected payload")?;
        Ok(payload.message.content)
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules: the URL must be http(s); plain HTTP is only allowed for
/// localhost hosts.
fn validate_base_url(base_url: &str) -> Result<()> {
    let (scheme, rest) = base_url
        .split_once("://")
        .with_context(|| format!("base URL '{base_url}' has no scheme"))?;
    let authority = rest.split('/').next().unwrap_or_default();
    let host = match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or_default(),
        None => authority.split(':').next().unwrap_or_default(),
    };

    match scheme {
        "https" => Ok(()),
        "http" if LOCALHOST_DOMAINS.contains(&host) => Ok(()),
        "http" => bail!("plain http is only allowed for localhost, got '{host}'"),
        other => bail!("unsupported scheme '{other}' in base URL"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_engine::ChatMessage;

    #[test]
    fn accepts_localhost_http() {
        assert!(ModelClient::new("http://localhost:11434").is_ok());
        assert!(ModelClient::new("http://127.0.0.1:11434/").is_ok());
        assert!(ModelClient::new("http://[::1]:11434").is_ok());
    }

    #[test]
    fn rejects_remote_http() {
        assert!(ModelClient::new("http://models.example.com").is_err());
    }

    #[test]
    fn accepts_remote_https() {
        assert!(ModelClient::new("https://models.example.com").is_ok());
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(ModelClient::new("ftp://localhost").is_err());
        assert!(ModelClient::new("localhost:11434").is_err());
    }

    #[test]
    fn folds_text_attachments_ahead_of_the_prompt() {
        let attachments = vec![
            Attachment {
                filename: "notes.txt".into(),
                mime_type: "text/plain".into(),
                kind: AttachmentKind::Text,
                content: "remember the outage".into(),
            },
            Attachment {
                filename: "diagram.png".into(),
                mime_type: "image/png".into(),
                kind: AttachmentKind::Image,
                content: "aGVsbG8=".into(),
            },
        ];
        let folded = ModelClient::fold_text_attachments("What happened?", &attachments);
        assert!(folded.starts_with("--- notes.txt ---"));
        assert!(folded.ends_with("What happened?"));
        assert_eq!(ModelClient::image_payloads(&attachments), vec!["aGVsbG8="]);
    }

    #[test]
    fn chat_messages_serialize_in_order() {
        let request = ChatRequest {
            model: Some("llama3".into()),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: "be brief".into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: "hi".into(),
                },
            ],
            options: Default::default(),
        };
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content, "hi");
    }
}

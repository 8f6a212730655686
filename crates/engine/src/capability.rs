//! Seams to the engine's external collaborators.
//!
//! The executor only ever talks to the model, the retriever, the tool
//! host, and the attachment loader through these traits, so runs can be
//! driven against HTTP backends in production and scripted fakes in
//! tests. Implementations live outside the engine (`waypoint-llm`,
//! `waypoint-mcp`, the CLI's collaborators).

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use waypoint_types::{RagConfig, ToolServerConfig};

/// One model invocation.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Model identifier; implementations choose their own default when
    /// absent.
    pub model: Option<String>,
    /// Fully rendered prompt text (retrieval context already applied).
    pub prompt: String,
    /// Per-call options passed through verbatim.
    pub options: IndexMap<String, JsonValue>,
    /// Attachments riding along with the call.
    pub attachments: Vec<Attachment>,
    /// Names of tool servers registered for this call.
    pub tool_servers: Vec<String>,
}

/// One message of a chat exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// A multi-turn chat invocation.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub options: IndexMap<String, JsonValue>,
}

/// A classified, loaded file attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub kind: AttachmentKind,
    /// Text content, or base64 payload for binary kinds.
    pub content: String,
}

/// Attachment payload classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Text,
    Image,
}

/// One retrieved context chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub source: String,
}

/// The language-model capability. One call per request; the engine never
/// retries internally.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a completion for a single rendered prompt.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Produce a completion for a chat exchange. The default folds the
    /// messages into one prompt for backends without a chat surface.
    async fn chat(&self, request: ChatRequest) -> Result<String> {
        let prompt = request
            .messages
            .iter()
            .map(|message| format!("{}: {}", message.role, message.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.generate(GenerateRequest {
            model: request.model,
            prompt,
            options: request.options,
            ..Default::default()
        })
        .await
    }
}

/// The retrieval capability. Internals (chunking, embeddings, caching)
/// are the implementation's business; the engine hands over the query and
/// the workflow's configuration.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, config: &RagConfig) -> Result<Vec<RetrievedChunk>>;
}

/// The tool-server capability: process-backed servers registered before
/// first use and torn down deterministically when the run ends.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Ensure the named server is running. Registration is idempotent
    /// within a run.
    async fn register(&self, name: &str, config: &ToolServerConfig) -> Result<()>;

    /// Tear down every server started for this run.
    async fn shutdown_all(&self);
}

/// Classifies and loads a file path into an attachment.
pub trait AttachmentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Attachment>;
}

/// The capability bundle handed to an executor.
#[derive(Clone)]
pub struct Capabilities {
    pub model: Arc<dyn LanguageModel>,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub tools: Option<Arc<dyn ToolHost>>,
    pub attachments: Option<Arc<dyn AttachmentLoader>>,
}

impl Capabilities {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            retriever: None,
            tools: None,
            attachments: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolHost>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_attachments(mut self, attachments: Arc<dyn AttachmentLoader>) -> Self {
        self.attachments = Some(attachments);
        self
    }
}

/// A model that echoes the prompt back. Useful for previews and unit
/// tests that do not need a real endpoint.
pub struct EchoModel;

#[async_trait]
impl LanguageModel for EchoModel {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        Ok(request.prompt)
    }
}

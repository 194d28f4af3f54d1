use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::model::{Message, Role};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("inference service unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("inference service answered with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn from_history(model: &str, history: &[Message], stream: bool) -> Self {
        let messages = history
            .iter()
            .map(|message| ChatTurn {
                role: message.role,
                content: message.content.clone(),
            })
            .collect();

        Self {
            model: model.to_string(),
            messages,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Assistant text carried by one line of a chat response, if any.
fn chunk_content(line: &[u8]) -> Option<String> {
    let line = std::str::from_utf8(line).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<ChatChunk>(line) {
        Ok(chunk) => chunk.message.map(|m| m.content),
        Err(err) => {
            tracing::warn!(%err, "unparseable chat chunk");
            None
        }
    }
}

/// Rebuilds the assistant reply from a relayed response body. A non-streamed
/// response is one JSON object; a streamed one is newline-delimited JSON that may
/// be split across chunks at any byte.
#[derive(Debug, Default)]
pub struct ReplyCollector {
    pending: Vec<u8>,
    reply: String,
}

impl ReplyCollector {
    pub fn absorb(&mut self, chunk: &[u8]) {
        // only the new bytes can complete a line
        let mut rest = chunk;
        while let Some(end) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..=end]);
            let line = std::mem::take(&mut self.pending);
            self.push_line(&line);
            rest = &rest[end + 1..];
        }
        self.pending.extend_from_slice(rest);
    }

    pub fn finish(mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        self.push_line(&rest);
        self.reply
    }

    fn push_line(&mut self, line: &[u8]) {
        if let Some(content) = chunk_content(line) {
            self.reply.push_str(&content);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTag {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends the request and hands back the successful response unread, so the
    /// caller can relay its body as-is.
    pub async fn chat(&self, request: &ChatRequest) -> Result<reqwest::Response, UpstreamError> {
        tracing::debug!(
            model = %request.model,
            turns = request.messages.len(),
            stream = request.stream,
            "forwarding chat"
        );

        let response = self
            .http
            .post(self.endpoint("/api/chat"))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }
        Ok(response)
    }

    /// Models installed on the inference service.
    pub async fn models(&self) -> Result<Vec<ModelTag>, UpstreamError> {
        let response = self.http.get(self.endpoint("/api/tags")).send().await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        let list: ModelList = response.json().await?;
        Ok(list.models)
    }
}

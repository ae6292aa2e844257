//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, Together AI and any other
//! endpoint exposing `/v1/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming)
//! - Streaming SSE, reassembled from `choices[0].delta.content` fragments

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thinkchain_core::error::ProviderError;
use thinkchain_core::message::Message;
use thinkchain_core::provider::*;
use tracing::{debug, trace, warn};

/// Default wait suggested to callers when a 429 carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// An OpenAI-compatible LLM provider.
///
/// No request timeout is set on the client: every attempt is bounded by the
/// caller's retry policy instead.
pub struct OpenAiCompatProvider {
    name: String,
    completions_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl AsRef<str>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("thinkchain/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            completions_url: completions_url(base_url.as_ref()),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com", api_key)
    }

    /// The full chat-completions URL this provider posts to.
    pub fn url(&self) -> &str {
        &self.completions_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        accept: &str,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(&self.completions_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", accept)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
        Err(status_error(status, error_body, retry_after))
    }
}

/// Build `{base}/v1/chat/completions` without doubling a trailing `/v1`.
pub fn completions_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

/// Map a non-success HTTP status onto the provider error taxonomy.
fn status_error(status: u16, body: String, retry_after: Option<u64>) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        404 => ProviderError::ModelNotFound(if body.is_empty() {
            "endpoint returned 404".into()
        } else {
            body
        }),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Pull the raw turn text out of a non-streaming response body.
fn extract_content(
    api_response: ApiResponse,
) -> std::result::Result<(String, Option<Usage>, Option<String>), ProviderError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

    let content = choice
        .message
        .content
        .ok_or_else(|| {
            ProviderError::MalformedResponse("First choice has no message content".into())
        })?;

    let usage = api_response.usage.map(|u| u.into());
    Ok((content, usage, api_response.model))
}

#[async_trait]
impl thinkchain_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(&body, "application/json").await?;

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
            } else {
                map_reqwest_error(e)
            }
        })?;

        let (content, usage, model) = extract_content(api_response)?;

        Ok(ProviderResponse {
            message: Message::assistant(content),
            usage,
            model: model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body, "text/event-stream").await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            pump_sse(response.bytes_stream(), tx, &provider_name).await;
        });

        Ok(rx)
    }
}

fn done_chunk() -> StreamChunk {
    StreamChunk {
        content: None,
        done: true,
        usage: None,
    }
}

/// Forward the content deltas of an SSE byte stream as [`StreamChunk`]s.
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across network chunks is decoded intact. A `done` chunk
/// is always sent last, unless the stream fails or the receiver is dropped.
async fn pump_sse<S, B, E>(
    byte_stream: S,
    tx: tokio::sync::mpsc::Sender<std::result::Result<StreamChunk, ProviderError>>,
    provider_name: &str,
) where
    S: futures::Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };

        buffer.extend_from_slice(bytes.as_ref());

        for line in drain_lines(&mut buffer) {
            match parse_sse_line(&line) {
                SseLine::Delta(text) => {
                    let chunk = StreamChunk {
                        content: Some(text),
                        done: false,
                        usage: None,
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        return; // receiver dropped
                    }
                }
                SseLine::Done => {
                    let _ = tx.send(Ok(done_chunk())).await;
                    return;
                }
                SseLine::Ignored(data) => {
                    trace!(provider = %provider_name, data = %data, "Ignoring unparseable SSE chunk");
                }
                SseLine::Skip => {}
            }
        }
    }

    // Stream ended without [DONE]
    let _ = tx.send(Ok(done_chunk())).await;
}

/// Remove and return every complete line in `buffer`, leaving any partial tail.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=line_end).collect();
        let line = String::from_utf8_lossy(&raw[..line_end]);
        lines.push(line.trim_end_matches('\r').to_string());
    }
    lines
}

#[derive(Debug, PartialEq)]
enum SseLine {
    /// A non-empty content fragment
    Delta(String),
    /// The `[DONE]` sentinel
    Done,
    /// A `data:` payload that is not a recognizable chunk
    Ignored(String),
    /// Blank lines, comments, other SSE fields, or empty deltas
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamResponse>(data) {
        Ok(stream_resp) => stream_resp
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|c| !c.is_empty())
            .map(SseLine::Delta)
            .unwrap_or(SseLine::Skip),
        Err(_) => SseLine::Ignored(data.to_string()),
    }
}

/// Builds an [`OpenAiCompatProvider`] from per-request credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiCompatConnector;

impl Connector for OpenAiCompatConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> std::result::Result<Arc<dyn thinkchain_core::Provider>, ProviderError> {
        let base_url = endpoint.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ProviderError::NotConfigured(format!(
                "base URL must start with http:// or https://, got '{base_url}'"
            )));
        }
        if endpoint.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured("missing API key".into()));
        }

        Ok(Arc::new(OpenAiCompatProvider::new(
            "openai-compat",
            base_url,
            endpoint.api_key.trim(),
        )))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

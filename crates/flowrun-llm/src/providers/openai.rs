use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flowrun_core::config::LlmConfig;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::flow::is_reasoning_model;
use flowrun_core::traits::{CompletionClient, HttpTransport};
use flowrun_core::types::*;

use crate::placeholder;
use crate::streaming::{SseEvent, SseStream};
use crate::transport::ReqwestTransport;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible chat-completions client.
///
/// Without a credential the client answers every request with a labeled
/// placeholder and never touches the transport.
pub struct OpenAiClient<T = ReqwestTransport> {
    transport: T,
    api_key: Option<String>,
    endpoint: String,
    placeholder_delay: Duration,
}

impl OpenAiClient<ReqwestTransport> {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_transport(ReqwestTransport::new(), api_key)
    }

    /// Client built from config, with the request timeout applied.
    pub fn from_config(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        let transport = ReqwestTransport::with_timeout(config.request_timeout())?;
        Ok(Self::with_transport(transport, api_key)
            .with_endpoint(config.endpoint.clone())
            .with_placeholder_delay(config.placeholder_delay()))
    }
}

impl<T: HttpTransport> OpenAiClient<T> {
    pub fn with_transport(transport: T, api_key: Option<String>) -> Self {
        Self {
            transport,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: OPENAI_API_URL.to_string(),
            placeholder_delay: Duration::from_millis(50),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_placeholder_delay(mut self, delay: Duration) -> Self {
        self.placeholder_delay = delay;
        self
    }

    pub fn is_placeholder_mode(&self) -> bool {
        self.api_key.is_none()
    }

    async fn send(&self, api_key: &str, request: &CompletionRequest, stream: bool) -> Result<HttpResponse> {
        let body = serde_json::to_value(build_body(request, stream))?;
        debug!(model = %request.model, stream, "Sending completion request");

        let response = self
            .transport
            .post(HttpRequest {
                url: self.endpoint.clone(),
                bearer_token: api_key.to_string(),
                body,
            })
            .await?;

        if !response.is_success() {
            let status = response.status;
            let body = read_body(response.body).await.unwrap_or_default();
            return Err(FlowError::upstream(Some(status), upstream_message(&body)));
        }

        Ok(response)
    }
}

impl Default for OpenAiClient<ReqwestTransport> {
    fn default() -> Self {
        Self::new(None)
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [OaiMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Deserialize, Debug)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

fn build_body(request: &CompletionRequest, stream: bool) -> ChatRequest<'_> {
    let reasoning = is_reasoning_model(&request.model);

    let (temperature, reasoning_effort) = match (reasoning, request.sampling) {
        (true, Sampling::Effort(effort)) => (None, Some(effort.as_str())),
        // reasoning models only run at their default temperature
        (true, Sampling::Temperature(_)) => (None, None),
        (false, Sampling::Temperature(t)) => (Some(t), None),
        (false, Sampling::Effort(effort)) => {
            debug!(model = %request.model, effort = effort.as_str(), "Ignoring effort for non-reasoning model");
            (None, None)
        }
    };

    ChatRequest {
        model: &request.model,
        messages: [
            OaiMessage {
                role: "system",
                content: &request.system_prompt,
            },
            OaiMessage {
                role: "user",
                content: &request.user_prompt,
            },
        ],
        max_tokens: (!reasoning).then_some(request.max_tokens),
        max_completion_tokens: reasoning.then_some(request.max_tokens),
        temperature,
        reasoning_effort,
        stream,
    }
}

/// Pull `error.message` out of an upstream error body.
fn upstream_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

async fn read_body(
    mut body: BoxStream<'static, std::result::Result<bytes::Bytes, FlowError>>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

/// Text delta carried by one stream event, if any.
///
/// The `[DONE]` sentinel and malformed payloads yield nothing.
pub(crate) fn parse_delta(event: &SseEvent) -> Option<String> {
    if event.is_done() {
        return None;
    }

    match serde_json::from_str::<StreamChunk>(&event.data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|text| !text.is_empty()),
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse completion stream chunk");
            None
        }
    }
}

impl<T: HttpTransport> CompletionClient for OpenAiClient<T> {
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let Some(api_key) = self.api_key.as_deref() else {
                return Ok(placeholder::text(&request));
            };

            let response = self.send(api_key, &request, false).await?;
            let body = read_body(response.body).await?;
            let parsed: ChatResponse =
                serde_json::from_slice(&body).map_err(|e| FlowError::Decode(e.to_string()))?;

            Ok(parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "No response".to_string()))
        })
    }

    fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<String>>>> {
        Box::pin(async move {
            let Some(api_key) = self.api_key.as_deref() else {
                let delay = self.placeholder_delay;
                let slices = placeholder::slices(&placeholder::text(&request), placeholder::SLICE_CHARS);
                let emulated = stream::iter(slices.into_iter().enumerate()).then(move |(i, slice)| async move {
                    if i > 0 && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Ok::<_, FlowError>(slice)
                });
                return Ok(Box::pin(emulated) as BoxStream<'_, Result<String>>);
            };

            let response = self.send(api_key, &request, true).await?;
            let deltas = SseStream::new(response.body).filter_map(|event| {
                futures::future::ready(match event {
                    Ok(event) => parse_delta(&event).map(Ok),
                    Err(e) => Some(Err(e)),
                })
            });

            Ok(Box::pin(deltas) as BoxStream<'_, Result<String>>)
        })
    }
}

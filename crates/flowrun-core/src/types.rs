use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FlowError;
use crate::flow::{AgentSpec, ReasoningEffort};

/// Unique run identifier, fresh per invocation.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sampling control requested by an agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    Temperature(f64),
    Effort(ReasoningEffort),
}

/// Input record supplied with every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    pub prompt: String,
}

impl RunInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

/// One call to the completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub sampling: Sampling,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Build the request an agent makes for a given user input.
    pub fn for_agent(agent: &AgentSpec, user_prompt: impl Into<String>) -> Self {
        Self {
            model: agent.model.clone(),
            system_prompt: agent.system_prompt.clone(),
            user_prompt: user_prompt.into(),
            sampling: agent.sampling(),
            max_tokens: agent.max_tokens,
        }
    }
}

/// Diagnostic payload attached to an agent result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a single agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawPayload>,
}

impl AgentRunResult {
    pub fn success(output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            raw: Some(RawPayload {
                provider_response: Some(serde_json::Value::String(output.clone())),
                error: None,
            }),
            output,
        }
    }

    /// Error-tagged result: output `Error: <message>`, message kept in `raw.error`.
    pub fn failure(error: &FlowError) -> Self {
        let message = error.to_string();
        Self {
            output: format!("Error: {}", message),
            raw: Some(RawPayload {
                provider_response: None,
                error: Some(message),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.raw.as_ref().and_then(|r| r.error.as_deref())
    }
}

/// Per-chain report: which agents the chain names and the results of the
/// steps that actually ran, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRun {
    pub agent_ids: Vec<String>,
    pub steps: Vec<AgentRunResult>,
}

impl ChainRun {
    /// True when every agent in the chain ran and none failed.
    pub fn completed(&self) -> bool {
        self.steps.len() == self.agent_ids.len() && self.steps.iter().all(|s| !s.is_error())
    }
}

/// Aggregated result of one run, keyed by agent id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRunResult {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub agents: BTreeMap<String, AgentRunResult>,
    #[serde(default)]
    pub chains: Vec<ChainRun>,
}

/// Outgoing HTTP request for the completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub bearer_token: String,
    pub body: serde_json::Value,
}

/// Status plus a lazily-read body.
pub struct HttpResponse {
    pub status: u16,
    pub body: BoxStream<'static, std::result::Result<bytes::Bytes, FlowError>>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Events published while a run executes.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Run started with this many chains planned.
    RunStarted { run_id: RunId, chains: usize },
    /// An agent invocation was issued.
    AgentStarted { run_id: RunId, agent_id: String },
    /// Incremental text from a streaming agent.
    AgentDelta {
        run_id: RunId,
        agent_id: String,
        delta: String,
    },
    /// An agent produced its output.
    AgentCompleted { run_id: RunId, agent_id: String },
    /// An agent failed; the rest of its chain is abandoned.
    AgentFailed {
        run_id: RunId,
        agent_id: String,
        error: String,
    },
    /// All chains settled.
    RunCompleted {
        run_id: RunId,
        agents: usize,
        failed: usize,
    },
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Graph errors
    #[error("Invalid flow: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid flow format: {0}")]
    InvalidFlow(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Illegal connection: {0}")]
    IllegalConnection(String),

    // Completion errors
    #[error("{message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("Completion transport failed: {0}")]
    Transport(String),

    #[error("Completion stream decode error: {0}")]
    Decode(String),

    // Execution errors
    #[error("Agent timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Build an upstream failure, falling back to a generic message when the
    /// service did not provide one.
    pub fn upstream(status: Option<u16>, message: Option<String>) -> Self {
        Self::Upstream {
            status,
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "API call failed".to_string()),
        }
    }
}

/// Reasons a flow is structurally unexecutable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Flow must have exactly one Start node")]
    MissingEntry,

    #[error("Flow can only have one Start node")]
    MultipleEntries,

    #[error("Node id {id} is used more than once")]
    DuplicateNode { id: String },

    #[error("Flow must have at least one Agent node")]
    NoAgents,

    #[error("Start node must connect to at least one Agent node")]
    EntryNotConnected,

    #[error("Edge {edge} references unknown node {node}")]
    DanglingEdge { edge: String, node: String },

    #[error("Edge {edge} connects {source_kind} → {target_kind}, which is not allowed")]
    IllegalEdge {
        edge: String,
        source_kind: String,
        target_kind: String,
    },

    #[error("Agent {agent} has invalid settings: {reason}")]
    InvalidAgent { agent: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_message_fallback() {
        let err = FlowError::upstream(Some(500), None);
        assert_eq!(err.to_string(), "API call failed");

        let err = FlowError::upstream(Some(401), Some("   ".into()));
        assert_eq!(err.to_string(), "API call failed");

        let err = FlowError::upstream(Some(429), Some("Rate limit reached".into()));
        assert_eq!(err.to_string(), "Rate limit reached");
    }

    #[test]
    fn test_validation_error_wraps() {
        let err: FlowError = ValidationError::MissingEntry.into();
        assert!(err.to_string().contains("Start node"));
    }
}

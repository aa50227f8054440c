use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::flow::ChainPolicy;

/// Top-level flowrun configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Bearer credential. Absent means placeholder mode.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Chat-completions endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Seconds allowed for connecting and for each read of the response.
    /// A stream that keeps delivering bytes is never cut off. Default: 120.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Delay between placeholder slices when streaming without a credential.
    #[serde(default = "default_placeholder_delay")]
    pub placeholder_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout(),
            placeholder_delay_ms: default_placeholder_delay(),
        }
    }
}

impl LlmConfig {
    /// The configured credential, treating blanks and unexpanded
    /// `${VAR}` references as absent.
    pub fn credential(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && !(k.starts_with("${") && k.ends_with('}')))
            .map(str::to_string)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn placeholder_delay(&self) -> Duration {
        Duration::from_millis(self.placeholder_delay_ms)
    }
}

fn default_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_request_timeout() -> u64 { 120 }
fn default_placeholder_delay() -> u64 { 50 }

/// Execution engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Chain discovery policy. Default: sequential.
    #[serde(default)]
    pub policy: ChainPolicy,
    /// Per-agent timeout in seconds. None = wait indefinitely.
    #[serde(default)]
    pub agent_timeout_secs: Option<u64>,
}

impl EngineConfig {
    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Load config from a TOML file when it exists, else use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse TOML text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))
    }

    /// Copy with the credential masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.llm.api_key.is_some() {
            copy.llm.api_key = Some("********".to_string());
        }
        copy
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Leave the reference as written if the var is unset
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_FLOWRUN_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_FLOWRUN_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_FLOWRUN_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_FLOWRUN_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_FLOWRUN_VAR}\"");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.llm.endpoint, "https://api.openai.com/v1/chat/completions");
        assert_eq!(config.llm.request_timeout_secs, 120);
        assert_eq!(config.llm.placeholder_delay_ms, 50);
        assert_eq!(config.engine.policy, ChainPolicy::Sequential);
        assert!(config.engine.agent_timeout().is_none());
    }

    #[test]
    fn test_credential_ignores_unexpanded_reference() {
        let config = AppConfig::parse(
            r#"
[llm]
api_key = "${NONEXISTENT_FLOWRUN_KEY}"
"#,
        )
        .unwrap();
        assert!(config.llm.credential().is_none());

        let config = AppConfig::parse("[llm]\napi_key = \"  \"\n").unwrap();
        assert!(config.llm.credential().is_none());

        let config = AppConfig::parse("[llm]\napi_key = \"sk-live\"\n").unwrap();
        assert_eq!(config.llm.credential().as_deref(), Some("sk-live"));
    }

    #[test]
    fn test_engine_section() {
        let config = AppConfig::parse(
            r#"
[engine]
policy = "direct_fanout"
agent_timeout_secs = 30
"#,
        )
        .unwrap();
        assert_eq!(config.engine.policy, ChainPolicy::DirectFanout);
        assert_eq!(config.engine.agent_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_unknown_policy_is_config_error() {
        let err = AppConfig::parse("[engine]\npolicy = \"sideways\"\n").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn test_redacted_masks_key() {
        let config = AppConfig::parse("[llm]\napi_key = \"sk-secret\"\n").unwrap();
        let shown = toml::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("********"));
    }
}

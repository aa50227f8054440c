use std::io::Write;
use std::time::Duration;

use flowrun_core::config::AppConfig;
use flowrun_core::error::FlowError;
use flowrun_core::flow::ChainPolicy;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[llm]
api_key = "sk-test-key"
endpoint = "http://localhost:8080/v1/chat/completions"
request_timeout_secs = 30
placeholder_delay_ms = 5

[engine]
policy = "direct_fanout"
agent_timeout_secs = 45
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.llm.credential().as_deref(), Some("sk-test-key"));
    assert_eq!(config.llm.endpoint, "http://localhost:8080/v1/chat/completions");
    assert_eq!(config.llm.request_timeout(), Duration::from_secs(30));
    assert_eq!(config.llm.placeholder_delay(), Duration::from_millis(5));
    assert_eq!(config.engine.policy, ChainPolicy::DirectFanout);
    assert_eq!(config.engine.agent_timeout(), Some(Duration::from_secs(45)));
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("FLOWRUN_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[llm]
api_key = "${FLOWRUN_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.llm.credential().as_deref(), Some("expanded-key-value"));

    std::env::remove_var("FLOWRUN_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\n").expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert!(config.llm.credential().is_none());
    assert_eq!(config.llm.request_timeout_secs, 120);
    assert_eq!(config.llm.placeholder_delay_ms, 50);
    assert_eq!(config.engine.policy, ChainPolicy::Sequential);
    assert!(config.engine.agent_timeout_secs.is_none());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("absent.toml");

    let err = AppConfig::load(&path).unwrap_err();
    assert!(matches!(err, FlowError::ConfigNotFound(_)));

    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.engine.policy, ChainPolicy::Sequential);
}

#[test]
fn test_malformed_toml_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[llm\napi_key = 1").expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, FlowError::Config(_)));
}

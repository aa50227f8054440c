pub mod placeholder;
pub mod providers;
pub mod streaming;
pub mod transport;

use std::sync::Arc;

use flowrun_core::config::LlmConfig;
use flowrun_core::error::Result;
use flowrun_core::traits::CompletionClient;

pub use flowrun_core::flow::is_reasoning_model;
pub use providers::openai::OpenAiClient;
pub use transport::ReqwestTransport;

/// Create the completion client for a config and an explicitly sourced credential.
///
/// `None` puts the client in placeholder mode; no request ever leaves the process.
pub fn create_client(config: &LlmConfig, credential: Option<String>) -> Result<Arc<dyn CompletionClient>> {
    Ok(Arc::new(OpenAiClient::from_config(config, credential)?))
}

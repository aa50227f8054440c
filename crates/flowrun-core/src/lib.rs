pub mod config;
pub mod error;
pub mod event;
pub mod flow;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{FlowError, Result, ValidationError};
pub use event::EventBus;
pub use flow::*;
pub use types::*;

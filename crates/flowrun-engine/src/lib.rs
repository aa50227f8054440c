//! Flow execution engine.
//!
//! A flow is validated, resolved into agent chains under a [`ChainPolicy`],
//! and executed against a [`CompletionClient`]: independent chains run
//! concurrently, agents within a chain run in order with each output feeding
//! the next, and a failing agent only abandons the rest of its own chain.
//!
//! [`ChainPolicy`]: flowrun_core::flow::ChainPolicy
//! [`CompletionClient`]: flowrun_core::traits::CompletionClient

pub mod executor;
pub mod resolver;
pub mod streaming;
pub mod validator;

pub use executor::{agent_spec, ChunkSink, FlowExecutor};
pub use resolver::{resolve_chains, resolve_fanout, Chain, ExecutionPlan};
pub use streaming::{StreamingAgents, StreamingGuard};
pub use validator::{validate, ValidationReport};

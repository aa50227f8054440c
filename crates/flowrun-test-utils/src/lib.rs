//! Stubs and fixtures shared by the flowrun test suites.

pub mod clients;
pub mod fixtures;
pub mod transport;

pub use clients::{EchoClient, ScriptedClient};
pub use transport::StubTransport;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::CompletionClient;
use flowrun_core::types::CompletionRequest;

/// Deterministic client that answers `[<system prompt>] <user prompt>`.
///
/// Requests whose system prompt is listed via [`EchoClient::failing_on`]
/// fail with an upstream error instead.
#[derive(Default)]
pub struct EchoClient {
    fail_on: Vec<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl EchoClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every request carrying this system prompt.
    pub fn failing_on(mut self, system_prompt: impl Into<String>) -> Self {
        self.fail_on.push(system_prompt.into());
        self
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn echo(request: &CompletionRequest) -> String {
        format!("[{}] {}", request.system_prompt, request.user_prompt)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests in the order they were issued.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn respond(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_on.iter().any(|s| *s == request.system_prompt) {
            return Err(FlowError::upstream(
                Some(500),
                Some(format!("injected failure for {}", request.system_prompt)),
            ));
        }

        Ok(Self::echo(request))
    }
}

impl CompletionClient for EchoClient {
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { self.respond(&request).await })
    }

    fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<String>>>> {
        Box::pin(async move {
            let text = self.respond(&request).await?;
            let chars: Vec<char> = text.chars().collect();
            let chunks: Vec<Result<String>> =
                chars.chunks(4).map(|c| Ok(c.iter().collect())).collect();
            Ok(stream::iter(chunks).boxed())
        })
    }
}

/// Client that streams a fixed list of chunks, optionally failing afterwards.
pub struct ScriptedClient {
    chunks: Vec<String>,
    fail_after: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fail_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// After the scripted chunks, end the stream with an upstream error.
    pub fn fail_after(mut self, message: impl Into<String>) -> Self {
        self.fail_after = Some(message.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletionClient for ScriptedClient {
    fn complete(&self, _request: CompletionRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_after {
                Some(message) => Err(FlowError::upstream(None, Some(message.clone()))),
                None => Ok(self.chunks.concat()),
            }
        })
    }

    fn complete_stream(
        &self,
        _request: CompletionRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<String>>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut items: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
            if let Some(message) = &self.fail_after {
                items.push(Err(FlowError::upstream(None, Some(message.clone()))));
            }
            Ok(stream::iter(items).boxed())
        })
    }
}

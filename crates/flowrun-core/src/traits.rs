use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};

use crate::error::Result;
use crate::types::*;

/// Text-completion service, in blocking or incrementally-streamed mode.
pub trait CompletionClient: Send + Sync + 'static {
    /// Send a request and wait for the full completion text.
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<String>>;

    /// Send a request and receive a stream of text deltas.
    fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<String>>>>;

    /// Stream a completion, handing every non-empty delta to `on_delta`, and
    /// resolve with the concatenated text.
    fn complete_streaming<'a>(
        &'a self,
        request: CompletionRequest,
        on_delta: &'a mut (dyn FnMut(&str) + Send),
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let mut stream = self.complete_stream(request).await?;
            let mut full = String::new();
            while let Some(delta) = stream.next().await {
                let delta = delta?;
                if delta.is_empty() {
                    continue;
                }
                on_delta(&delta);
                full.push_str(&delta);
            }
            Ok(full)
        })
    }
}

/// HTTP seam under the completion client.
pub trait HttpTransport: Send + Sync + 'static {
    /// POST a JSON body with bearer auth.
    fn post(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

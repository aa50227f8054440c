use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};

use flowrun_core::error::Result;
use flowrun_core::traits::HttpTransport;
use flowrun_core::types::{HttpRequest, HttpResponse};

#[derive(Default)]
struct Inner {
    responses: Mutex<VecDeque<(u16, Vec<bytes::Bytes>)>>,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
}

/// Transport that replays scripted responses and records every request.
///
/// Clones share state, so a test can keep one handle and give another to the
/// client under test. Unscripted calls get an empty 500.
#[derive(Clone, Default)]
pub struct StubTransport {
    inner: Arc<Inner>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response whose body arrives as the given chunks.
    pub fn respond(self, status: u16, chunks: Vec<&str>) -> Self {
        let chunks = chunks
            .into_iter()
            .map(|c| bytes::Bytes::from(c.to_string()))
            .collect();
        self.inner
            .responses
            .lock()
            .unwrap()
            .push_back((status, chunks));
        self
    }

    /// Number of requests received.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for StubTransport {
    fn post(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            self.inner.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.requests.lock().unwrap().push(request);

            let (status, chunks) = self
                .inner
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((500, vec![]));

            Ok(HttpResponse {
                status,
                body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
            })
        })
    }
}

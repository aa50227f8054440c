use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::StreamExt;
use reqwest::Client;

use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::HttpTransport;
use flowrun_core::types::{HttpRequest, HttpResponse};

/// reqwest-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    /// Transport that gives up when connecting, or waiting on the next read,
    /// takes longer than `timeout`. Streamed bodies may run past it.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| FlowError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for ReqwestTransport {
    fn post(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let response = self
                .http
                .post(&request.url)
                .header("Authorization", format!("Bearer {}", request.bearer_token))
                .json(&request.body)
                .send()
                .await
                .map_err(|e| FlowError::Transport(e.to_string()))?;

            let status = response.status().as_u16();
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| FlowError::Transport(e.to_string())))
                .boxed();

            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one chunked response, one `data:` line every `gap`.
    async fn drip_server(lines: usize, gap: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            for i in 0..lines {
                tokio::time::sleep(gap).await;
                let line = format!("data: {}\n", i);
                let chunk = format!("{:x}\r\n{}\r\n", line.len(), line);
                socket.write_all(chunk.as_bytes()).await.unwrap();
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    #[tokio::test]
    async fn test_stream_outlives_timeout_while_bytes_arrive() {
        let url = drip_server(6, Duration::from_millis(60)).await;
        let transport = ReqwestTransport::with_timeout(Duration::from_millis(200)).unwrap();

        let response = transport
            .post(HttpRequest {
                url,
                bearer_token: "sk-test".into(),
                body: serde_json::json!({"model": "gpt-4o"}),
            })
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        // the whole body takes longer than the timeout, no single gap does
        let chunks: Vec<_> = response.body.collect().await;
        let body: Vec<u8> = chunks
            .into_iter()
            .map(|c| c.unwrap())
            .flat_map(|b| b.to_vec())
            .collect();
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.lines().count(), 6);
        assert!(text.ends_with("data: 5\n"));
    }
}

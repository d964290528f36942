//! Transport layer abstraction for HTTP steps.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// One POST of a sync step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Full URL, query string included.
    pub url: String,
    /// Headers in send order.
    pub headers: Vec<(String, String)>,
    /// Encoded body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Headers in receive order.
    pub headers: Vec<(String, String)>,
    /// Body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, reason: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A `200 OK` response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, "OK", body)
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Posts one sync step and hands back whatever the server answered.
///
/// [`ReqwestTransport`] talks to a remote server, the server crate's
/// `LoopbackTransport` calls a `SyncServer` in process, and
/// [`MockTransport`] replays queued responses. A 4xx or 5xx answer is still
/// `Ok`; only failing to get an answer at all is an error.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Posts a request and returns the response.
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse>;
}

/// HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns a fatal transport error if the client cannot be built.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SyncError::transport_retryable(e.to_string())
    } else {
        SyncError::transport_fatal(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
        })
    }
}

/// A mock transport for testing: replays queued responses and records
/// every request it receives.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    responses: Mutex<VecDeque<SyncResult<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// Creates a connected mock with no queued responses.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response.
    pub fn push_response(&self, response: HttpResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        self.requests.lock().push(request);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("not connected"));
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transport_fatal("no mock response queued")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HttpRequest {
        HttpRequest {
            url: "http://localhost/sync".into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn mock_replays_in_order_and_records() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::ok("a"));
        transport.push_error(SyncError::transport_retryable("reset"));

        assert_eq!(transport.send(request()).await.unwrap().body, b"a");
        assert!(transport.send(request()).await.unwrap_err().is_retryable());
        assert!(!transport.send(request()).await.unwrap_err().is_retryable());
        assert_eq!(transport.call_count(), 3);
        assert_eq!(
            transport.requests()[0].header("content-type"),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn disconnected_mock_fails_retryably() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::ok("a"));
        transport.set_connected(false);

        let err = transport.send(request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn response_headers_are_case_insensitive() {
        let response = HttpResponse::new(503, "Service Unavailable", Vec::new())
            .with_header("Set-Cookie", "a=1");
        assert_eq!(response.header("set-cookie"), Some("a=1"));
        assert!(!response.is_success());
        assert!(HttpResponse::ok("").is_success());
    }
}

//! HTTP request handler: one sync step per call, with body hash, session
//! headers and cookie affinity.

use crate::config::HttpOptions;
use crate::error::{SyncError, SyncResult};
use crate::policy::SyncPolicy;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use parking_lot::Mutex;
use rowsync_core::{CoreError, SerializerFactory, JSON_SERIALIZER_KEY};
use rowsync_protocol::headers::{
    is_protocol_header, CONTENT_TYPE, CONTENT_TYPE_JSON, COOKIE, SET_COOKIE,
    SYNC_CONVERTER, SYNC_ERROR, SYNC_HASH, SYNC_SCOPE_NAME, SYNC_SERIALIZATION_FORMAT,
    SYNC_SESSION_ID, SYNC_STEP,
};
use rowsync_protocol::{compute_hash, ErrorEnvelope, HttpStep, SerializationFormat, SyncContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Posts sync steps to one service URI.
pub struct HttpRequestHandler {
    options: HttpOptions,
    transport: Arc<dyn HttpTransport>,
    policy: SyncPolicy,
    serializer: Arc<dyn SerializerFactory>,
    cookie: Mutex<Option<String>>,
    retries: AtomicU64,
}

impl HttpRequestHandler {
    /// Creates a handler. The retry policy comes from `options.retry`.
    pub fn new(
        options: HttpOptions,
        transport: Arc<dyn HttpTransport>,
        serializer: Arc<dyn SerializerFactory>,
    ) -> Self {
        let policy = SyncPolicy::new(options.retry.clone());
        Self {
            options,
            transport,
            policy,
            serializer,
            cookie: Mutex::new(None),
            retries: AtomicU64::new(0),
        }
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handler options.
    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    /// Session cookie captured from the server, if any.
    pub fn cookie(&self) -> Option<String> {
        self.cookie.lock().clone()
    }

    /// Number of retried sends since the handler was created.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Forgets the session cookie.
    pub fn clear_cookie(&self) {
        *self.cookie.lock() = None;
    }

    /// Sends one step and decodes the response body.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Cancelled`] if `token` is cancelled, before or during
    ///   the send
    /// - [`SyncError::Protocol`] when the server answered with an error
    ///   envelope
    /// - [`SyncError::Transport`] for other failures, after retries
    /// - [`SyncError::EmptyResponse`] when a success carries no body
    pub async fn process_request<Req, Res>(
        &self,
        context: &SyncContext,
        step: HttpStep,
        message: &Req,
        batch_size: usize,
        token: &CancellationToken,
    ) -> SyncResult<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let value = serde_json::to_value(message).map_err(CoreError::from)?;
        let body = self.serializer.encode(&value)?;
        let request = self.build_request(context, step, body, batch_size)?;

        tracing::debug!(%step, session = %context.session_id, bytes = request.body.len(), "sending sync step");

        let on_retry = |attempt: u32, error: &SyncError| {
            self.retries.fetch_add(1, Ordering::Relaxed);
            tracing::info!(%step, attempt, error = %error, "sync step retry");
        };
        let response = self
            .policy
            .execute(token, Some(&on_retry), |_| {
                let transport = Arc::clone(&self.transport);
                let request = request.clone();
                async move {
                    let response = transport.send(request).await?;
                    if response.is_success() {
                        Ok(response)
                    } else {
                        Err(decode_error(&response))
                    }
                }
            })
            .await?;

        // A server that reissues the session (after expiry or a restart)
        // sends a new cookie; the latest one wins.
        if let Some(cookie) = response.header(SET_COOKIE) {
            *self.cookie.lock() = Some(session_cookie(cookie));
        }

        if response.body.is_empty() {
            return Err(SyncError::EmptyResponse {
                status: response.status,
            });
        }

        tracing::debug!(%step, status = response.status, bytes = response.body.len(), "sync step answered");
        let value = self.serializer.decode(&response.body)?;
        Ok(serde_json::from_value(value).map_err(CoreError::from)?)
    }

    /// Builds the request for a step without sending it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidUri`] if the service URI does not parse.
    pub fn build_request(
        &self,
        context: &SyncContext,
        step: HttpStep,
        body: Vec<u8>,
        batch_size: usize,
    ) -> SyncResult<HttpRequest> {
        let url = self.build_url()?;
        let format = SerializationFormat::new(self.serializer.key(), batch_size);

        let mut headers = vec![
            (SYNC_SESSION_ID.to_string(), context.session_id.to_string()),
            (SYNC_SCOPE_NAME.to_string(), context.scope_name.clone()),
            (SYNC_STEP.to_string(), step.to_code().to_string()),
            (SYNC_SERIALIZATION_FORMAT.to_string(), format.to_header()?),
            (SYNC_HASH.to_string(), compute_hash(&body)),
        ];
        if let Some(converter) = &self.options.converter {
            headers.push((SYNC_CONVERTER.to_string(), converter.clone()));
        }
        for (name, value) in &self.options.custom_headers {
            if is_protocol_header(name) || headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                continue;
            }
            headers.push((name.clone(), value.clone()));
        }
        if self.serializer.key() == JSON_SERIALIZER_KEY {
            headers.push((CONTENT_TYPE.to_string(), CONTENT_TYPE_JSON.to_string()));
        }
        if let Some(cookie) = self.cookie() {
            headers.push((COOKIE.to_string(), cookie));
        }

        Ok(HttpRequest { url, headers, body })
    }

    fn build_url(&self) -> SyncResult<String> {
        let mut url = Url::parse(&self.options.base_uri).map_err(|e| SyncError::InvalidUri {
            uri: self.options.base_uri.clone(),
            message: e.to_string(),
        })?;
        if !self.options.scope_parameters.is_empty() {
            let mut query = url.query_pairs_mut();
            for p in &self.options.scope_parameters {
                query.append_pair(&p.name, &p.value);
            }
        }
        Ok(url.into())
    }
}

/// The `name=value` part of a `Set-Cookie` header.
fn session_cookie(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .unwrap_or(set_cookie)
        .trim()
        .to_string()
}

/// Turns a failed response into an error.
pub(crate) fn decode_error(response: &HttpResponse) -> SyncError {
    if response.header(SYNC_ERROR).is_some() && !response.body.is_empty() {
        if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(&response.body) {
            return SyncError::from_envelope(response.status, response.reason.clone(), envelope);
        }
    }
    let message = if response.body.is_empty() {
        response.reason.clone()
    } else {
        String::from_utf8_lossy(&response.body).into_owned()
    };
    SyncError::from_status(response.status, response.reason.clone(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::MockTransport;
    use rowsync_core::JsonSerializerFactory;
    use rowsync_protocol::{SyncSide, SyncStage};
    use serde::Deserialize;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    fn handler(options: HttpOptions) -> (HttpRequestHandler, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let options = options.with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );
        let handler = HttpRequestHandler::new(
            options,
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            Arc::new(JsonSerializerFactory),
        );
        (handler, transport)
    }

    fn context() -> SyncContext {
        SyncContext::new("default", Uuid::new_v4())
    }

    async fn ping(handler: &HttpRequestHandler) -> SyncResult<Ping> {
        handler
            .process_request(
                &context(),
                HttpStep::SendChanges,
                &Ping { n: 1 },
                500,
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn cancelled_request_never_reaches_the_transport() {
        let (handler, transport) = handler(HttpOptions::new("http://localhost/sync"));
        transport.push_response(HttpResponse::ok(r#"{"n":2}"#));
        let token = CancellationToken::new();
        token.cancel();

        let result: SyncResult<Ping> = handler
            .process_request(&context(), HttpStep::EnsureScopes, &Ping { n: 1 }, 0, &token)
            .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn request_carries_protocol_headers_and_escaped_parameters() {
        let options = HttpOptions::new("http://localhost/sync")
            .with_scope_parameter("region", "eu west&north")
            .with_header("Authorization", "Bearer t")
            .with_header("rowsync-sync-step", "99")
            .with_converter("upper");
        let (handler, transport) = handler(options);
        transport.push_response(HttpResponse::ok(r#"{"n":2}"#));

        let context = context();
        let reply: Ping = handler
            .process_request(&context, HttpStep::GetMoreChanges, &Ping { n: 7 }, 25, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, Ping { n: 2 });

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "http://localhost/sync?region=eu+west%26north");
        assert_eq!(sent.header(SYNC_STEP), Some("8"));
        assert_eq!(sent.header(SYNC_SCOPE_NAME), Some("default"));
        assert_eq!(sent.header(SYNC_SESSION_ID), Some(context.session_id.to_string().as_str()));
        assert_eq!(sent.header(SYNC_SERIALIZATION_FORMAT), Some(r#"{"f":"json","s":25}"#));
        assert_eq!(sent.header(SYNC_CONVERTER), Some("upper"));
        assert_eq!(sent.header("Authorization"), Some("Bearer t"));
        assert_eq!(sent.header(CONTENT_TYPE), Some(CONTENT_TYPE_JSON));
        assert_eq!(sent.header(SYNC_HASH).map(str::to_string), Some(compute_hash(&sent.body)));
        assert_eq!(
            sent.headers.iter().filter(|(n, _)| n.eq_ignore_ascii_case(SYNC_STEP)).count(),
            1
        );
    }

    #[tokio::test]
    async fn converter_header_is_absent_by_default() {
        let (handler, transport) = handler(HttpOptions::new("http://localhost/sync"));
        transport.push_response(HttpResponse::ok(r#"{"n":2}"#));
        ping(&handler).await.unwrap();
        assert!(transport.requests()[0].header(SYNC_CONVERTER).is_none());
    }

    #[tokio::test]
    async fn latest_session_cookie_is_replayed() {
        let (handler, transport) = handler(HttpOptions::new("http://localhost/sync"));
        transport.push_response(
            HttpResponse::ok(r#"{"n":2}"#).with_header(SET_COOKIE, "rowsync_session=abc; Path=/; HttpOnly"),
        );
        transport.push_response(HttpResponse::ok(r#"{"n":3}"#).with_header(SET_COOKIE, "rowsync_session=zzz"));
        transport.push_response(HttpResponse::ok(r#"{"n":4}"#));

        transport.push_response(HttpResponse::ok(r#"{"n":5}"#));

        ping(&handler).await.unwrap();
        ping(&handler).await.unwrap();
        ping(&handler).await.unwrap();
        ping(&handler).await.unwrap();

        let requests = transport.requests();
        assert!(requests[0].header(COOKIE).is_none());
        assert_eq!(requests[1].header(COOKIE), Some("rowsync_session=abc"));
        assert_eq!(requests[2].header(COOKIE), Some("rowsync_session=zzz"));
        assert_eq!(requests[3].header(COOKIE), Some("rowsync_session=zzz"));
    }

    #[tokio::test]
    async fn error_header_decodes_the_envelope() {
        let (handler, transport) = handler(HttpOptions::new("http://localhost/sync"));
        let envelope = ErrorEnvelope::server("HashMismatch", "hash does not match")
            .with_source("server.db", "main")
            .with_stage(SyncStage::ChangesApplying);
        transport.push_response(
            HttpResponse::new(400, "Bad Request", serde_json::to_vec(&envelope).unwrap())
                .with_header(SYNC_ERROR, "HashMismatch"),
        );

        match ping(&handler).await.unwrap_err() {
            SyncError::Protocol {
                message,
                status,
                reason,
                type_name,
                data_source,
                catalog,
                stage,
                side,
            } => {
                assert_eq!(message, "hash does not match");
                assert_eq!(status, 400);
                assert_eq!(reason, "Bad Request");
                assert_eq!(type_name, "HashMismatch");
                assert_eq!(data_source.as_deref(), Some("server.db"));
                assert_eq!(catalog.as_deref(), Some("main"));
                assert_eq!(stage, SyncStage::ChangesApplying);
                assert_eq!(side, SyncSide::ServerSide);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn failure_without_header_carries_the_raw_body() {
        let (handler, transport) = handler(HttpOptions::new("http://localhost/sync"));
        transport.push_response(HttpResponse::new(403, "Forbidden", "token expired"));

        match ping(&handler).await.unwrap_err() {
            SyncError::Transport {
                message,
                status,
                reason,
                retryable,
            } => {
                assert_eq!(message, "token expired");
                assert_eq!(status, Some(403));
                assert_eq!(reason.as_deref(), Some("Forbidden"));
                assert!(!retryable);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_failure_uses_the_reason_phrase_and_is_retried() {
        let (handler, transport) = handler(HttpOptions::new("http://localhost/sync"));
        for _ in 0..3 {
            transport.push_response(HttpResponse::new(503, "Service Unavailable", Vec::new()));
        }

        match ping(&handler).await.unwrap_err() {
            SyncError::Transport { message, status, .. } => {
                assert_eq!(message, "Service Unavailable");
                assert_eq!(status, Some(503));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let (handler, transport) = handler(HttpOptions::new("http://localhost/sync"));
        transport.push_error(SyncError::transport_retryable("connection reset"));
        transport.push_response(HttpResponse::ok(r#"{"n":5}"#));

        assert_eq!(ping(&handler).await.unwrap(), Ping { n: 5 });
        assert_eq!(transport.call_count(), 2);
        assert_eq!(handler.retries(), 1);
    }

    #[tokio::test]
    async fn success_without_content_is_an_empty_response() {
        let (handler, transport) = handler(HttpOptions::new("http://localhost/sync"));
        transport.push_response(HttpResponse::new(204, "No Content", Vec::new()));

        assert!(matches!(
            ping(&handler).await.unwrap_err(),
            SyncError::EmptyResponse { status: 204 }
        ));
    }

    #[test]
    fn invalid_base_uri_is_reported() {
        let (handler, _) = handler(HttpOptions::new("not a uri"));
        let err = handler
            .build_request(&context(), HttpStep::None, Vec::new(), 0)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidUri { .. }));
    }
}

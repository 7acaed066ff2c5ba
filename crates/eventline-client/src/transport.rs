//! # Transport
//!
//! The seam between the connector and the network. [`Transport::open`]
//! performs one streaming request and hands back the raw body as a stream
//! of byte chunks; status classification happens here so the connector only
//! sees [`StreamError`]s.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use eventline_core::StreamError;
use eventline_core::retry::parse_retry_after_header;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, RETRY_AFTER};
use tracing::debug;

/// Header carrying the resumption cursor.
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Longest error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Boxed stream of body chunks returned by [`Transport::open`].
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// One streaming request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportRequest {
    /// Endpoint URL.
    pub url: String,
    /// Caller-supplied headers.
    pub headers: Vec<(String, String)>,
    /// Most recently observed event id, sent as `Last-Event-ID`.
    pub last_event_id: Option<String>,
}

/// Opens long-lived event streams.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the body once a 2xx response arrives.
    ///
    /// Non-2xx responses are mapped with [`StreamError::from_status`]; a
    /// request that cannot be built (bad URL or header) is
    /// [`StreamError::InvalidRequest`].
    async fn open(&self, request: TransportRequest) -> Result<ByteStream, StreamError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn open(&self, request: TransportRequest) -> Result<ByteStream, StreamError> {
        let mut builder = self
            .client
            .get(&request.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref id) = request.last_event_id {
            builder = builder.header(LAST_EVENT_ID_HEADER, id.as_str());
        }

        let http_request = builder.build().map_err(|e| StreamError::InvalidRequest {
            message: e.to_string(),
        })?;
        let response = self
            .client
            .execute(http_request)
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_header);
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect()
            };
            return Err(StreamError::from_status(status.as_u16(), message, retry_after_ms));
        }

        debug!(url = %request.url, status = status.as_u16(), "event stream opened");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::transport(e.to_string())));
        Ok(Box::pin(body))
    }
}

fn classify_send_error(err: reqwest::Error) -> StreamError {
    if err.is_builder() {
        StreamError::InvalidRequest {
            message: err.to_string(),
        }
    } else {
        StreamError::transport(err.to_string())
    }
}

//! Byte-stream transports carrying the engine's HTTP API
//!
//! A transport performs one HTTP/1.1 exchange over whatever channel reaches
//! the engine socket: a local UNIX-domain socket, or a channel tunneled
//! through an SSH session. The HTTP framing itself lives in [`httpcodec`]
//! and is shared by every variant.

pub mod httpcodec;
pub mod local;
pub mod ssh;
pub mod strategy;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use httpcodec::{BodyLines, BodyReader};
pub use local::LocalSocketTransport;
pub use ssh::SshTunnelTransport;
pub use strategy::{ConnectionStrategy, TransportFactory};

/// One HTTP request bound for the engine socket.
///
/// Paths arrive already version-prefixed from the engine client; the
/// transport only frames and ships them.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: &'static str,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Streaming responses get the long per-resource deadline instead of
    /// the per-request one.
    pub streaming: bool,
}

impl Request {
    fn new(method: &'static str, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            streaming: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new("DELETE", path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Attach a JSON body.
    pub fn json_body(mut self, body: Bytes) -> Self {
        self.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        self.body = Some(body);
        self
    }

    /// Mark the response as long-lived (stats stream, followed logs).
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// The request target: path plus encoded query string.
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let mut encoded = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.query {
            encoded.append_pair(k, v);
        }
        format!("{}?{}", self.path, encoded.finish())
    }
}

/// Status, headers, and a lazily-read body.
pub struct Response {
    pub status: u16,
    headers: HashMap<String, String>,
    body: BodyReader,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl Response {
    pub(crate) fn new(status: u16, headers: HashMap<String, String>, body: BodyReader) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Drain the whole body into memory.
    pub async fn into_bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        body.read_to_end().await
    }

    /// Drain the whole body and decode it as (lossy) UTF-8.
    pub async fn into_text(self) -> Result<String> {
        let bytes = self.into_bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Iterate the body one logical line at a time.
    pub fn into_lines(self) -> BodyLines {
        BodyLines::new(self.body)
    }
}

/// A channel that can carry one HTTP exchange to the engine.
///
/// Implementations may open a fresh connection (or SSH channel) per request;
/// concurrent callers are supported either way. The token cancels the
/// connect, the write, and every subsequent body read; pending reads fail
/// with `Cancelled` within 200 ms of cancellation.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn request(&self, req: Request, cancel: CancellationToken) -> Result<Response>;
}

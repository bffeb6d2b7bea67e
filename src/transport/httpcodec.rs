//! Direct HTTP/1.1 codec over a raw byte stream
//!
//! The engine API is plain HTTP/1.1 over a stream socket, so the codec is
//! written against `AsyncRead + AsyncWrite` and shared between the local
//! UNIX-socket transport and the SSH-tunneled channel. Request
//! serialization, status/header parsing, and chunked-transfer decoding all
//! live here; no URL machinery is involved.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Request, Response};
use crate::error::{EngineError, Result};

/// Deadline for a complete non-streaming exchange.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for a streaming response (stats stream, followed logs).
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on the status line plus headers.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on a single framing line (chunk size, trailer).
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Upper bound on a fully drained body.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const READ_CHUNK: usize = 16 * 1024;

/// A byte stream usable under the codec.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Run one I/O future under the cancellation token and deadline.
async fn guarded<T, F>(cancel: &CancellationToken, deadline: Instant, context: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        res = tokio::time::timeout_at(deadline, fut) => match res {
            Err(_) => Err(EngineError::Timeout),
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(EngineError::from_io(e, context)),
        },
    }
}

/// Serialize the request head and body into wire bytes.
fn encode_request(req: &Request) -> Bytes {
    let mut head = String::with_capacity(256);
    head.push_str(req.method);
    head.push(' ');
    head.push_str(&req.target());
    head.push_str(" HTTP/1.1\r\n");
    head.push_str("Host: localhost\r\n");
    for (name, value) in &req.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    match &req.body {
        Some(body) => {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        None if req.method != "GET" => {
            head.push_str("Content-Length: 0\r\n");
        }
        None => {}
    }
    head.push_str("Connection: close\r\n\r\n");

    let mut wire = BytesMut::with_capacity(head.len() + req.body.as_ref().map_or(0, |b| b.len()));
    wire.extend_from_slice(head.as_bytes());
    if let Some(body) = &req.body {
        wire.extend_from_slice(body);
    }
    wire.freeze()
}

/// Perform one request/response exchange over `io`.
///
/// The connection is used for a single exchange; `Connection: close` is
/// always sent, so connection-close bodies terminate at EOF.
pub(crate) async fn exchange(
    mut io: Box<dyn ByteStream>,
    req: &Request,
    cancel: CancellationToken,
) -> Result<Response> {
    let head_deadline = Instant::now() + REQUEST_TIMEOUT;
    let body_deadline = Instant::now()
        + if req.streaming {
            STREAM_TIMEOUT
        } else {
            REQUEST_TIMEOUT
        };

    let wire = encode_request(req);
    guarded(&cancel, head_deadline, "write request", io.write_all(&wire)).await?;
    guarded(&cancel, head_deadline, "flush request", io.flush()).await?;

    // Read until the blank line terminating the headers.
    let mut raw = BytesMut::with_capacity(READ_CHUNK);
    let head_end = loop {
        if let Some(pos) = find_head_end(&raw) {
            break pos;
        }
        if raw.len() > MAX_HEAD_BYTES {
            return Err(EngineError::ProtocolError("response head too large".into()));
        }
        let n = guarded(&cancel, head_deadline, "read response head", io.read_buf(&mut raw)).await?;
        if n == 0 {
            return Err(EngineError::ProtocolError(
                "connection closed before response head".into(),
            ));
        }
    };

    let head = raw.split_to(head_end + 4);
    let (status, headers) = parse_head(&head)?;

    let mode = body_mode(req.method, status, &headers)?;
    let body = BodyReader {
        io,
        raw,
        mode,
        cancel,
        deadline: body_deadline,
    };
    Ok(Response::new(status, headers, body))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse the status line and header block.
fn parse_head(head: &[u8]) -> Result<(u16, HashMap<String, String>)> {
    let text = std::str::from_utf8(head)
        .map_err(|_| EngineError::ProtocolError("non-utf8 response head".into()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| EngineError::ProtocolError("empty response head".into()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(EngineError::ProtocolError(format!(
            "bad status line: {status_line}"
        )));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::ProtocolError(format!("bad status line: {status_line}")))?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(EngineError::ProtocolError(format!("bad header line: {line}")));
        };
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok((status, headers))
}

/// How the response body is delimited.
#[derive(Debug)]
enum BodyMode {
    /// Exactly `remaining` more bytes
    Length { remaining: u64 },
    /// Chunked transfer coding
    Chunked,
    /// Body runs until the peer closes the connection
    Eof,
    /// Fully consumed
    Done,
}

fn body_mode(method: &str, status: u16, headers: &HashMap<String, String>) -> Result<BodyMode> {
    if method == "HEAD" || status == 204 || status == 304 || (100..200).contains(&status) {
        return Ok(BodyMode::Done);
    }
    if let Some(te) = headers.get("transfer-encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return Ok(BodyMode::Chunked);
        }
    }
    if let Some(len) = headers.get("content-length") {
        let remaining: u64 = len
            .parse()
            .map_err(|_| EngineError::ProtocolError(format!("bad content-length: {len}")))?;
        return Ok(if remaining == 0 {
            BodyMode::Done
        } else {
            BodyMode::Length { remaining }
        });
    }
    Ok(BodyMode::Eof)
}

/// Lazily decodes a response body from the wire.
///
/// Dropping the reader drops the underlying channel, which is how consumers
/// abandon a streaming response without leaking the connection.
pub struct BodyReader {
    io: Box<dyn ByteStream>,
    /// Wire bytes read past the headers but not yet decoded
    raw: BytesMut,
    mode: BodyMode,
    cancel: CancellationToken,
    deadline: Instant,
}

impl BodyReader {
    /// A reader over in-memory bytes; used by scripted transports in tests.
    #[cfg(test)]
    pub(crate) fn from_bytes(data: Bytes, cancel: CancellationToken) -> Self {
        Self {
            io: Box::new(tokio::io::empty()),
            raw: BytesMut::from(&data[..]),
            mode: BodyMode::Eof,
            cancel,
            deadline: Instant::now() + STREAM_TIMEOUT,
        }
    }

    /// A reader that yields `data` and then blocks until cancelled; models
    /// a live streaming response in tests.
    #[cfg(test)]
    pub(crate) fn streaming_from_bytes(data: Bytes, cancel: CancellationToken) -> Self {
        struct Pending;
        impl AsyncRead for Pending {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Pending
            }
        }
        impl AsyncWrite for Pending {
            fn poll_write(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &[u8],
            ) -> std::task::Poll<std::io::Result<usize>> {
                std::task::Poll::Pending
            }
            fn poll_flush(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
            fn poll_shutdown(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
        }
        Self {
            io: Box::new(Pending),
            raw: BytesMut::from(&data[..]),
            mode: BodyMode::Eof,
            cancel,
            deadline: Instant::now() + STREAM_TIMEOUT,
        }
    }

    /// Pull more wire bytes; returns 0 at EOF.
    async fn fill_raw(&mut self) -> Result<usize> {
        guarded(
            &self.cancel,
            self.deadline,
            "read response body",
            self.io.read_buf(&mut self.raw),
        )
        .await
    }

    /// Read one CRLF-terminated framing line, without the terminator.
    async fn raw_line(&mut self) -> Result<Bytes> {
        loop {
            if let Some(pos) = self.raw.windows(2).position(|w| w == b"\r\n") {
                let line = self.raw.split_to(pos).freeze();
                let _ = self.raw.split_to(2);
                return Ok(line);
            }
            if self.raw.len() > MAX_LINE_BYTES {
                return Err(EngineError::ProtocolError("framing line too long".into()));
            }
            if self.fill_raw().await? == 0 {
                return Err(EngineError::ProtocolError(
                    "connection closed inside chunked framing".into(),
                ));
            }
        }
    }

    /// Read exactly `n` raw bytes.
    async fn raw_exact(&mut self, n: usize) -> Result<Bytes> {
        while self.raw.len() < n {
            if self.fill_raw().await? == 0 {
                return Err(EngineError::ProtocolError(
                    "connection closed inside chunk".into(),
                ));
            }
        }
        Ok(self.raw.split_to(n).freeze())
    }

    /// The next decoded piece of the body, or `None` once the body ends.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.mode {
            BodyMode::Done => Ok(None),
            BodyMode::Length { remaining } => {
                if self.raw.is_empty() && self.fill_raw().await? == 0 {
                    return Err(EngineError::ProtocolError(format!(
                        "body truncated with {remaining} bytes remaining"
                    )));
                }
                let take = (self.raw.len() as u64).min(remaining) as usize;
                let out = self.raw.split_to(take).freeze();
                let left = remaining - take as u64;
                self.mode = if left == 0 {
                    BodyMode::Done
                } else {
                    BodyMode::Length { remaining: left }
                };
                Ok(Some(out))
            }
            BodyMode::Eof => {
                if self.raw.is_empty() && self.fill_raw().await? == 0 {
                    self.mode = BodyMode::Done;
                    return Ok(None);
                }
                Ok(Some(self.raw.split().freeze()))
            }
            BodyMode::Chunked => {
                let line = self.raw_line().await?;
                let size = parse_chunk_size(&line)?;
                if size == 0 {
                    // consume trailers up to the blank line
                    loop {
                        let trailer = self.raw_line().await?;
                        if trailer.is_empty() {
                            break;
                        }
                    }
                    self.mode = BodyMode::Done;
                    return Ok(None);
                }
                let data = self.raw_exact(size).await?;
                let crlf = self.raw_exact(2).await?;
                if &crlf[..] != b"\r\n" {
                    return Err(EngineError::ProtocolError("missing chunk terminator".into()));
                }
                Ok(Some(data))
            }
        }
    }

    /// Drain the remaining body into one buffer.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
            if out.len() > MAX_BODY_BYTES {
                return Err(EngineError::ProtocolError("response body too large".into()));
            }
        }
        Ok(out.freeze())
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| EngineError::ProtocolError("non-utf8 chunk size".into()))?;
    // chunk extensions after ';' are permitted and ignored
    let hex = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(hex, 16)
        .map_err(|_| EngineError::ProtocolError(format!("bad chunk size: {text}")))
}

/// Iterates a body one `\n`-terminated line at a time.
///
/// Finite for plain responses; for streaming responses each call suspends
/// until the engine emits the next line or the request is cancelled.
pub struct BodyLines {
    body: BodyReader,
    buf: BytesMut,
    eof: bool,
}

impl BodyLines {
    pub(crate) fn new(body: BodyReader) -> Self {
        Self {
            body,
            buf: BytesMut::new(),
            eof: false,
        }
    }

    /// The next logical line with its terminator (and any trailing `\r`)
    /// stripped, or `None` once the body ends.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rest = self.buf.split();
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
            match self.body.next_chunk().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => self.eof = true,
            }
        }
    }
}

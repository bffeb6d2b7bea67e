//! Transport over a local UNIX-domain engine socket

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::net::UnixStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::httpcodec::{self, REQUEST_TIMEOUT};
use super::{Request, Response, Transport};
use crate::error::{EngineError, Result};

/// Talks to an engine socket on this machine, one connection per request.
#[derive(Debug)]
pub struct LocalSocketTransport {
    path: PathBuf,
}

impl LocalSocketTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl Transport for LocalSocketTransport {
    async fn request(&self, req: Request, cancel: CancellationToken) -> Result<Response> {
        let deadline = Instant::now() + REQUEST_TIMEOUT;
        let context = self.path.display().to_string();

        let connect = UnixStream::connect(&self.path);
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            res = tokio::time::timeout_at(deadline, connect) => match res {
                Err(_) => return Err(EngineError::Timeout),
                Ok(Ok(s)) => s,
                Ok(Err(e)) => return Err(EngineError::from_io(e, &context)),
            },
        };

        debug!(path = %context, method = req.method, target = %req.target(), "engine request");
        httpcodec::exchange(Box::new(stream), &req, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    /// Serve exactly one canned HTTP response on a socket in a tempdir.
    async fn canned_engine(response: &'static [u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 64 * 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response).await;
            }
        });
        (dir, path)
    }

    #[tokio::test]
    async fn test_request_over_unix_socket() {
        let (_dir, path) =
            canned_engine(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK").await;
        let transport = LocalSocketTransport::new(&path);

        let resp = transport
            .request(Request::get("/v1.43/_ping"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.into_text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_missing_socket_is_readable_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalSocketTransport::new(dir.path().join("nope.sock"));

        let err = transport
            .request(Request::get("/v1.43/_ping"), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            EngineError::ConnectionFailed(msg) => {
                assert!(msg.contains("nope.sock"));
                assert!(msg.contains("no such socket"));
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chunked_response_over_unix_socket() {
        let (_dir, path) = canned_engine(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n[{}]\r\n0\r\n\r\n",
        )
        .await;
        let transport = LocalSocketTransport::new(&path);

        let resp = transport
            .request(Request::get("/v1.43/containers/json"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.into_text().await.unwrap(), "[{}]");
    }
}

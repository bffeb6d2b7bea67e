//! Scripted transport for exercising the client and store without an engine

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::hosts::HostConfig;
use crate::transport::httpcodec::BodyReader;
use crate::transport::{Request, Response, Transport, TransportFactory};

/// Opt-in log output for test runs: `RUST_LOG=dockhand=debug cargo test`.
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
}

#[derive(Debug)]
enum Scripted {
    Reply {
        status: u16,
        body: Bytes,
        streaming: bool,
    },
    ConnectionFailure,
}

/// Replays queued responses per (method, path) and records every request.
///
/// When the queue for an endpoint is empty the last scripted entry repeats,
/// so steady-state refresh loops only need one script line per endpoint.
#[derive(Default, Debug)]
pub(crate) struct MockTransport {
    scripts: Mutex<HashMap<(String, String), VecDeque<Arc<Scripted>>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, method: &str, path: &str, entry: Scripted) {
        self.scripts
            .lock()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back(Arc::new(entry));
    }

    pub fn respond(&self, method: &str, path: &str, status: u16, body: &[u8]) {
        self.push(
            method,
            path,
            Scripted::Reply {
                status,
                body: Bytes::copy_from_slice(body),
                streaming: false,
            },
        );
    }

    /// A response whose body yields `body` and then stays open until the
    /// request is cancelled.
    pub fn respond_streaming(&self, method: &str, path: &str, status: u16, body: &[u8]) {
        self.push(
            method,
            path,
            Scripted::Reply {
                status,
                body: Bytes::copy_from_slice(body),
                streaming: true,
            },
        );
    }

    /// Script a transport-level connection failure.
    pub fn fail(&self, method: &str, path: &str) {
        self.push(method, path, Scripted::ConnectionFailure);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, method: &str, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn next_scripted(&self, method: &str, path: &str) -> Option<Arc<Scripted>> {
        let mut scripts = self.scripts.lock();
        let queue = scripts.get_mut(&(method.to_string(), path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// Hands every host the same scripted transport.
pub(crate) struct MockFactory {
    pub transport: Arc<MockTransport>,
}

impl TransportFactory for MockFactory {
    fn availability(&self, _host: &HostConfig) -> bool {
        true
    }

    fn build(&self, _host: &HostConfig) -> Result<Arc<dyn Transport>> {
        Ok(self.transport.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, req: Request, cancel: CancellationToken) -> Result<Response> {
        self.requests.lock().push(RecordedRequest {
            method: req.method.to_string(),
            path: req.path.clone(),
            query: req.query.clone(),
        });

        let scripted = self
            .next_scripted(req.method, &req.path)
            .ok_or_else(|| {
                EngineError::ConnectionFailed(format!(
                    "no scripted response for {} {}",
                    req.method, req.path
                ))
            })?;

        match scripted.as_ref() {
            Scripted::ConnectionFailure => {
                Err(EngineError::ConnectionFailed("scripted failure".into()))
            }
            Scripted::Reply {
                status,
                body,
                streaming,
            } => {
                let reader = if *streaming {
                    BodyReader::streaming_from_bytes(body.clone(), cancel)
                } else {
                    BodyReader::from_bytes(body.clone(), cancel)
                };
                Ok(Response::new(*status, HashMap::new(), reader))
            }
        }
    }
}

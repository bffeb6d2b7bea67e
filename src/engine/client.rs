//! Typed, engine-agnostic API client
//!
//! Builds requests against the pinned API version, decodes responses into
//! the domain model, and maps HTTP statuses into the error taxonomy. The
//! client never retries; retry policy belongs to the store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::logs::demux_log_stream;
use super::stats;
use super::wire::{ContainerDetail, ContainerSummary, ErrorBody, RawInfo, RawStats};
use crate::error::{EngineError, Result};
use crate::model::{Container, ContainerStats, EngineInfo};
use crate::transport::{BodyLines, Request, Response, Transport};

/// Pinned engine API version; v1.43 is current Docker and Podman 4+.
pub const API_VERSION: &str = "v1.43";

/// One client per active host, owning its transport for that host's
/// lifetime. Dropping or shutting down the client cancels every request
/// and stream issued through it.
pub struct EngineClient {
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl EngineClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel all in-flight requests and streams from this client.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn path(tail: &str) -> String {
        format!("/{API_VERSION}{tail}")
    }

    async fn send(&self, req: Request) -> Result<Response> {
        self.transport.request(req, self.cancel.child_token()).await
    }

    /// Drain the body and map a non-success status into the taxonomy.
    async fn expect_success(resp: Response, resource: &str) -> Result<bytes::Bytes> {
        let status = resp.status;
        if (200..300).contains(&status) {
            return resp.into_bytes().await;
        }
        Err(Self::status_error(status, resource, resp).await)
    }

    async fn status_error(status: u16, resource: &str, resp: Response) -> EngineError {
        let message = match resp.into_bytes().await {
            Ok(body) => serde_json::from_slice::<ErrorBody>(&body)
                .map(|e| e.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| String::from_utf8_lossy(&body).trim().to_string()),
            Err(_) => String::new(),
        };
        match status {
            401 => EngineError::Unauthorized,
            404 => EngineError::NotFound(if message.is_empty() {
                resource.to_string()
            } else {
                message
            }),
            409 => EngineError::Conflict(message),
            500..=599 => EngineError::ServerError(message),
            _ => EngineError::UnexpectedStatus { status, message },
        }
    }

    /// Liveness probe; anything but 200 is a connection failure.
    pub async fn ping(&self) -> Result<()> {
        let resp = self.send(Request::get(Self::path("/_ping"))).await?;
        if resp.status == 200 {
            Ok(())
        } else {
            Err(EngineError::ConnectionFailed(format!(
                "ping returned status {}",
                resp.status
            )))
        }
    }

    /// Engine identity and capacity.
    pub async fn info(&self) -> Result<EngineInfo> {
        let resp = self.send(Request::get(Self::path("/info"))).await?;
        let body = Self::expect_success(resp, "engine info").await?;
        let info: RawInfo = serde_json::from_slice(&body)?;
        Ok(info.into_info())
    }

    /// The current container list.
    pub async fn list_containers(&self, include_stopped: bool) -> Result<Vec<Container>> {
        let resp = self
            .send(Request::get(Self::path("/containers/json")).query("all", include_stopped))
            .await?;
        let body = Self::expect_success(resp, "container list").await?;
        let summaries: Vec<ContainerSummary> = serde_json::from_slice(&body)?;
        Ok(summaries.into_iter().map(|s| s.into_container()).collect())
    }

    /// The detailed record for one container.
    pub async fn inspect(&self, id: &str) -> Result<Container> {
        let resp = self
            .send(Request::get(Self::path(&format!("/containers/{id}/json"))))
            .await?;
        let body = Self::expect_success(resp, &format!("container {id}")).await?;
        let detail: ContainerDetail = serde_json::from_slice(&body)?;
        Ok(detail.into_container())
    }

    async fn fetch_stats_sample(&self, id: &str) -> Result<RawStats> {
        let resp = self
            .send(
                Request::get(Self::path(&format!("/containers/{id}/stats")))
                    .query("stream", false),
            )
            .await?;
        let body = Self::expect_success(resp, &format!("stats for {id}")).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// One stats sample with a real cpu delta.
    ///
    /// With `stream=false` the engine fills `precpu` from the previous
    /// tick, so a single read suffices. Engines that return an empty
    /// `precpu` (first sample after start) get a second read so the delta
    /// is never computed against zero.
    pub async fn stats_once(&self, id: &str) -> Result<ContainerStats> {
        let first = self.fetch_stats_sample(id).await?;
        if first.precpu_stats.system_cpu_usage.unwrap_or(0) > 0 {
            return Ok(stats::from_sample(id, &first, None));
        }
        debug!(container = id, "Empty precpu snapshot, sampling again");
        let second = self.fetch_stats_sample(id).await?;
        Ok(stats::from_sample(id, &second, Some(&first)))
    }

    /// Continuous stats; one sample per engine tick until cancelled or the
    /// stream is dropped.
    pub async fn stats_stream(&self, id: &str) -> Result<StatsStream> {
        let resp = self
            .send(
                Request::get(Self::path(&format!("/containers/{id}/stats")))
                    .query("stream", true)
                    .streaming(),
            )
            .await?;
        if !(200..300).contains(&resp.status) {
            let status = resp.status;
            return Err(Self::status_error(status, &format!("stats for {id}"), resp).await);
        }
        Ok(StatsStream {
            container_id: id.to_string(),
            lines: resp.into_lines(),
            previous: None,
        })
    }

    /// POST with 204/304 treated as success (304 = already in that state).
    async fn lifecycle_post(&self, req: Request, resource: &str) -> Result<()> {
        let resp = self.send(req).await?;
        match resp.status {
            204 | 304 => Ok(()),
            status => Err(Self::status_error(status, resource, resp).await),
        }
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.lifecycle_post(
            Request::post(Self::path(&format!("/containers/{id}/start"))),
            &format!("container {id}"),
        )
        .await
    }

    pub async fn stop(&self, id: &str, grace_seconds: Option<u32>) -> Result<()> {
        let mut req = Request::post(Self::path(&format!("/containers/{id}/stop")));
        if let Some(t) = grace_seconds {
            req = req.query("t", t);
        }
        self.lifecycle_post(req, &format!("container {id}")).await
    }

    pub async fn restart(&self, id: &str, grace_seconds: Option<u32>) -> Result<()> {
        let mut req = Request::post(Self::path(&format!("/containers/{id}/restart")));
        if let Some(t) = grace_seconds {
            req = req.query("t", t);
        }
        self.lifecycle_post(req, &format!("container {id}")).await
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        self.lifecycle_post(
            Request::post(Self::path(&format!("/containers/{id}/pause"))),
            &format!("container {id}"),
        )
        .await
    }

    pub async fn unpause(&self, id: &str) -> Result<()> {
        self.lifecycle_post(
            Request::post(Self::path(&format!("/containers/{id}/unpause"))),
            &format!("container {id}"),
        )
        .await
    }

    /// Remove a container; 204 is the only success status.
    pub async fn remove(&self, id: &str, force: bool, include_volumes: bool) -> Result<()> {
        let resp = self
            .send(
                Request::delete(Self::path(&format!("/containers/{id}")))
                    .query("force", force)
                    .query("v", include_volumes),
            )
            .await?;
        match resp.status {
            204 => Ok(()),
            status => Err(Self::status_error(status, &format!("container {id}"), resp).await),
        }
    }

    /// Fetch and demultiplex container logs.
    pub async fn logs(&self, id: &str, tail: Option<u32>, timestamps: bool) -> Result<String> {
        let mut req = Request::get(Self::path(&format!("/containers/{id}/logs")))
            .query("stdout", true)
            .query("stderr", true)
            .query("timestamps", timestamps);
        if let Some(tail) = tail {
            req = req.query("tail", tail);
        }
        let resp = self.send(req).await?;
        let body = Self::expect_success(resp, &format!("logs for {id}")).await?;
        Ok(demux_log_stream(&body))
    }
}

/// Cancellable lazy sequence of stats samples.
///
/// Each yielded value computes its cpu percentage against the immediately
/// previous raw sample from the same stream. Dropping the stream closes
/// the underlying channel.
pub struct StatsStream {
    container_id: String,
    lines: BodyLines,
    previous: Option<RawStats>,
}

impl StatsStream {
    /// The next sample; `None` when the engine ends the stream.
    pub async fn next(&mut self) -> Option<Result<ContainerStats>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let raw: RawStats = match serde_json::from_str(&line) {
                        Ok(raw) => raw,
                        Err(e) => return Some(Err(EngineError::ParseError(e.to_string()))),
                    };
                    let sample =
                        stats::from_sample(&self.container_id, &raw, self.previous.as_ref());
                    self.previous = Some(raw);
                    return Some(Ok(sample));
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

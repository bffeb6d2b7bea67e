//! The observable coordination point of the data plane
//!
//! All observable state lives inside one mailbox task: commands arrive on
//! an mpsc channel, I/O runs in worker tasks that post results back as
//! internal messages, and every mutation happens inside the loop. Observers
//! read value snapshots from a watch channel and listen for discrete events
//! on the broadcast bus, so they always see a consistent batch.

mod gate;
mod history;

pub use gate::{FailureGate, DEFAULT_FAILURE_THRESHOLD};
pub use history::{MetricsHistory, RateTracker, TimePoint};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RefreshInterval;
use crate::engine::{EngineClient, StatsStream};
use crate::error::{EngineError, Result};
use crate::events::{EventBus, StoreEvent};
use crate::hosts::{HostEvent, HostRegistry};
use crate::model::{AggregateSnapshot, Container, ContainerAction, ContainerStats, EngineInfo};
use crate::transport::TransportFactory;
use crate::hosts::HostConfig;

/// Points kept per aggregate series.
const HISTORY_CAPACITY: usize = 30;

/// Concurrent one-shot stats samples per refresh.
const STATS_CONCURRENCY: usize = 8;

/// Attempts for the container list, transient failures only.
const MAX_LIST_ATTEMPTS: u32 = 3;

const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Value copy of everything observers can see.
///
/// Field combinations are always mutually consistent: snapshots are
/// published once per mutation batch, never mid-update.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub containers: Vec<Container>,
    /// Latest one-shot sample per running container; keys are always a
    /// subset of the container ids
    pub stats: HashMap<String, ContainerStats>,
    pub aggregate: AggregateSnapshot,
    pub cpu_history: Vec<TimePoint>,
    pub memory_history: Vec<TimePoint>,
    pub net_rx_history: Vec<TimePoint>,
    pub disk_read_history: Vec<TimePoint>,
    pub engine_info: Option<EngineInfo>,
    /// Container ids with a lifecycle action currently running
    pub in_flight_actions: HashSet<String>,
    pub is_refreshing: bool,
    pub is_connected: bool,
    pub connection_error: Option<String>,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub active_host_id: Option<Uuid>,
    /// Completed refresh passes (success or failure); diagnostic counter
    pub refresh_epoch: u64,
}

impl StoreSnapshot {
    fn initial() -> Self {
        Self {
            containers: Vec::new(),
            stats: HashMap::new(),
            aggregate: AggregateSnapshot::empty(Utc::now()),
            cpu_history: Vec::new(),
            memory_history: Vec::new(),
            net_rx_history: Vec::new(),
            disk_read_history: Vec::new(),
            engine_info: None,
            in_flight_actions: HashSet::new(),
            is_refreshing: false,
            is_connected: false,
            connection_error: None,
            last_refresh_at: None,
            active_host_id: None,
            refresh_epoch: 0,
        }
    }
}

enum Command {
    Refresh {
        force: bool,
    },
    Act {
        action: ContainerAction,
        id: String,
    },
    SetHost {
        host: HostConfig,
    },
    SetAutoRefresh {
        interval: RefreshInterval,
    },
    Logs {
        id: String,
        tail: Option<u32>,
        timestamps: bool,
        reply: oneshot::Sender<Result<String>>,
    },
    StreamStats {
        id: String,
        reply: oneshot::Sender<Result<StatsStream>>,
    },
    Shutdown,
}

struct RefreshOutcome {
    containers: Vec<Container>,
    stats: HashMap<String, ContainerStats>,
}

enum Internal {
    RefreshDone {
        generation: u64,
        outcome: Result<RefreshOutcome>,
    },
    ActionDone {
        generation: u64,
        action: ContainerAction,
        id: String,
        result: Result<()>,
    },
    InfoDone {
        generation: u64,
        info: EngineInfo,
    },
}

/// Handle to the store task.
///
/// Cheap to clone; dropping every handle shuts the task down.
#[derive(Clone)]
pub struct Store {
    commands: mpsc::Sender<Command>,
    events: EventBus,
    snapshot_rx: watch::Receiver<StoreSnapshot>,
}

impl Store {
    /// Spawn the store task. No host is active until [`Store::set_host`]
    /// (or a bound registry) provides one.
    pub fn spawn(factory: Arc<dyn TransportFactory>) -> Store {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (internal_tx, internal_rx) = mpsc::channel(64);
        let (snapshot_tx, snapshot_rx) = watch::channel(StoreSnapshot::initial());
        let events = EventBus::new();

        let task = StoreTask {
            factory,
            internal_tx,
            events: events.clone(),
            snapshot_tx,
            client: None,
            host: None,
            generation: 0,
            containers: Vec::new(),
            stats: HashMap::new(),
            aggregate: AggregateSnapshot::empty(Utc::now()),
            cpu_history: MetricsHistory::new(HISTORY_CAPACITY),
            memory_history: MetricsHistory::new(HISTORY_CAPACITY),
            net_rx_history: MetricsHistory::new(HISTORY_CAPACITY),
            disk_read_history: MetricsHistory::new(HISTORY_CAPACITY),
            net_rx_tracker: RateTracker::new(),
            disk_read_tracker: RateTracker::new(),
            engine_info: None,
            in_flight: HashSet::new(),
            refreshing: false,
            queued_refresh: false,
            last_refresh: None,
            connection_error: None,
            gate: FailureGate::new(),
            interval: RefreshInterval::Manual,
            timer_dirty: false,
            refresh_epoch: 0,
        };
        tokio::spawn(task.run(command_rx, internal_rx));

        Store {
            commands: command_tx,
            events,
            snapshot_rx,
        }
    }

    /// Subscribe to discrete store events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A watch receiver over published snapshots.
    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshot_rx.clone()
    }

    async fn send(&self, command: Command) {
        let _ = self.commands.send(command).await;
    }

    /// Request a refresh pass. Non-forced requests are dropped while a
    /// refresh is already running; forced requests coalesce into one
    /// follow-up pass.
    pub async fn refresh(&self, force: bool) {
        self.send(Command::Refresh { force }).await;
    }

    /// Execute a lifecycle action. A second request for an id whose action
    /// is still in flight returns without issuing anything.
    pub async fn act(&self, action: ContainerAction, id: impl Into<String>) {
        self.send(Command::Act {
            action,
            id: id.into(),
        })
        .await;
    }

    /// Switch to a different host; clears all observable state and starts
    /// over. Setting the identical configuration again is a no-op.
    pub async fn set_host(&self, host: HostConfig) {
        self.send(Command::SetHost { host }).await;
    }

    pub async fn start_autorefresh(&self, interval: RefreshInterval) {
        self.send(Command::SetAutoRefresh { interval }).await;
    }

    pub async fn stop_autorefresh(&self) {
        self.send(Command::SetAutoRefresh {
            interval: RefreshInterval::Manual,
        })
        .await;
    }

    /// Fetch demultiplexed logs through the active client.
    pub async fn logs(&self, id: impl Into<String>, tail: Option<u32>, timestamps: bool) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Logs {
            id: id.into(),
            tail,
            timestamps,
            reply,
        })
        .await;
        rx.await.unwrap_or(Err(EngineError::Cancelled))
    }

    /// Open a streaming stats sequence bound to the active client; a host
    /// switch cancels it.
    pub async fn stream_stats(&self, id: impl Into<String>) -> Result<StatsStream> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StreamStats {
            id: id.into(),
            reply,
        })
        .await;
        rx.await.unwrap_or(Err(EngineError::Cancelled))
    }

    /// Cancel everything and stop the task.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown).await;
    }

    /// Follow a registry: apply its active host now and on every change.
    pub fn bind_registry(&self, registry: &HostRegistry) {
        let mut rx = registry.subscribe();
        let store = self.clone();
        let initial = registry.active();
        tokio::spawn(async move {
            if let Some(host) = initial {
                store.set_host(host).await;
            }
            loop {
                match rx.recv().await {
                    Ok(HostEvent::ActiveChanged(host)) => store.set_host(host).await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

struct StoreTask {
    factory: Arc<dyn TransportFactory>,
    internal_tx: mpsc::Sender<Internal>,
    events: EventBus,
    snapshot_tx: watch::Sender<StoreSnapshot>,

    client: Option<Arc<EngineClient>>,
    host: Option<HostConfig>,
    /// Bumped on every host switch; stale worker results are discarded
    generation: u64,

    containers: Vec<Container>,
    stats: HashMap<String, ContainerStats>,
    aggregate: AggregateSnapshot,
    cpu_history: MetricsHistory,
    memory_history: MetricsHistory,
    net_rx_history: MetricsHistory,
    disk_read_history: MetricsHistory,
    net_rx_tracker: RateTracker,
    disk_read_tracker: RateTracker,
    engine_info: Option<EngineInfo>,

    in_flight: HashSet<String>,
    refreshing: bool,
    queued_refresh: bool,
    last_refresh: Option<DateTime<Utc>>,
    connection_error: Option<String>,
    gate: FailureGate,

    interval: RefreshInterval,
    timer_dirty: bool,
    refresh_epoch: u64,
}

impl StoreTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::Receiver<Internal>,
    ) {
        let mut timer: Option<tokio::time::Interval> = None;
        loop {
            if self.timer_dirty {
                timer = self.interval.period().map(|period| {
                    let mut t =
                        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    t.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    t
                });
                self.timer_dirty = false;
            }

            let tick = async {
                match timer.as_mut() {
                    Some(t) => {
                        t.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                // commands first: an action queued behind another for the
                // same id must observe the in-flight marker before the
                // first action's completion clears it
                biased;
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd) {
                            break;
                        }
                    }
                    // every handle dropped
                    None => break,
                },
                msg = internal.recv() => {
                    if let Some(msg) = msg {
                        self.handle_internal(msg);
                    }
                },
                _ = tick => self.begin_refresh(false),
            }
        }
        if let Some(client) = &self.client {
            client.shutdown();
        }
    }

    /// Returns true on shutdown.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Refresh { force } => self.begin_refresh(force),
            Command::Act { action, id } => self.begin_action(action, id),
            Command::SetHost { host } => self.set_host(host),
            Command::SetAutoRefresh { interval } => {
                debug!(?interval, "Auto-refresh interval changed");
                self.interval = interval;
                self.timer_dirty = true;
            }
            Command::Logs {
                id,
                tail,
                timestamps,
                reply,
            } => match self.client.clone() {
                Some(client) => {
                    tokio::spawn(async move {
                        let _ = reply.send(client.logs(&id, tail, timestamps).await);
                    });
                }
                None => {
                    let _ = reply.send(Err(EngineError::InvalidConfiguration(
                        "no active host".into(),
                    )));
                }
            },
            Command::StreamStats { id, reply } => match self.client.clone() {
                Some(client) => {
                    tokio::spawn(async move {
                        let _ = reply.send(client.stats_stream(&id).await);
                    });
                }
                None => {
                    let _ = reply.send(Err(EngineError::InvalidConfiguration(
                        "no active host".into(),
                    )));
                }
            },
            Command::Shutdown => return true,
        }
        false
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::RefreshDone {
                generation,
                outcome,
            } => self.finish_refresh(generation, outcome),
            Internal::ActionDone {
                generation,
                action,
                id,
                result,
            } => self.finish_action(generation, action, id, result),
            Internal::InfoDone { generation, info } => {
                if generation == self.generation {
                    self.engine_info = Some(info);
                    self.publish_state();
                }
            }
        }
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    fn begin_refresh(&mut self, force: bool) {
        if self.refreshing {
            if force {
                // coalesce into one follow-up pass
                self.queued_refresh = true;
            }
            return;
        }
        let Some(client) = self.client.clone() else {
            return;
        };

        self.refreshing = true;
        self.publish_state();

        let generation = self.generation;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let outcome = run_refresh(&client).await;
            let _ = internal
                .send(Internal::RefreshDone {
                    generation,
                    outcome,
                })
                .await;
        });
    }

    fn finish_refresh(&mut self, generation: u64, outcome: Result<RefreshOutcome>) {
        if generation != self.generation {
            // raced a host switch; the result belongs to a dead client
            return;
        }
        self.refreshing = false;
        self.refresh_epoch += 1;

        match outcome {
            Ok(outcome) => {
                let present: HashSet<&str> =
                    outcome.containers.iter().map(|c| c.id.as_str()).collect();
                self.stats = outcome
                    .stats
                    .into_iter()
                    .filter(|(id, _)| present.contains(id.as_str()))
                    .collect();
                self.containers = outcome.containers;

                let now = self.refresh_instant();
                self.aggregate = AggregateSnapshot::compute(&self.containers, &self.stats, now);
                self.append_histories(now);
                self.gate.record_success();
                self.connection_error = None;
                self.last_refresh = Some(now);
                debug!(
                    containers = self.containers.len(),
                    sampled = self.stats.len(),
                    "Refresh complete"
                );
            }
            Err(e) if e.is_cancelled() => {
                debug!("Refresh cancelled");
            }
            Err(e) => {
                let had_prior_data = self.last_refresh.is_some();
                if self.gate.should_surface(had_prior_data) {
                    warn!("Refresh failed: {e}");
                    self.connection_error = Some(e.to_string());
                    self.events.publish(StoreEvent::ConnectionFailed {
                        host_id: self.host.as_ref().map(|h| h.id),
                        error: e.to_string(),
                    });
                } else {
                    debug!(
                        failures = self.gate.consecutive_failures(),
                        "Refresh failed, suppressed by failure gate: {e}"
                    );
                }
            }
        }

        self.publish_state();
        if std::mem::take(&mut self.queued_refresh) {
            self.begin_refresh(true);
        }
    }

    /// The refresh instant, nudged forward if the wall clock has not
    /// advanced since the previous pass.
    fn refresh_instant(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.last_refresh {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        }
    }

    fn append_histories(&mut self, now: DateTime<Utc>) {
        self.cpu_history.append_at(now, self.aggregate.cpu_percent);
        self.memory_history
            .append_at(now, self.aggregate.memory_percent());

        let total_rx: u64 = self.stats.values().map(|s| s.network_rx).sum();
        if let Some(rate) = self.net_rx_tracker.update(now, total_rx) {
            self.net_rx_history.append_at(now, rate);
        }
        let total_read: u64 = self.stats.values().map(|s| s.block_read).sum();
        if let Some(rate) = self.disk_read_tracker.update(now, total_read) {
            self.disk_read_history.append_at(now, rate);
        }
    }

    // ========================================================================
    // Actions
    // ========================================================================

    fn begin_action(&mut self, action: ContainerAction, id: String) {
        if self.in_flight.contains(&id) {
            debug!(container = %id, %action, "Action already in flight, ignoring");
            return;
        }
        let Some(client) = self.client.clone() else {
            self.events.publish(StoreEvent::ActionFailed {
                host_id: None,
                container_id: id,
                action,
                error: "no active host".to_string(),
            });
            return;
        };

        info!(container = %id, %action, "Executing container action");
        self.in_flight.insert(id.clone());
        self.publish_state();

        let generation = self.generation;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = perform_action(&client, action, &id).await;
            let _ = internal
                .send(Internal::ActionDone {
                    generation,
                    action,
                    id,
                    result,
                })
                .await;
        });
    }

    fn finish_action(
        &mut self,
        generation: u64,
        action: ContainerAction,
        id: String,
        result: Result<()>,
    ) {
        if generation != self.generation {
            return;
        }
        self.in_flight.remove(&id);

        match result {
            Ok(()) => debug!(container = %id, %action, "Action complete"),
            Err(e) if e.is_cancelled() => debug!(container = %id, %action, "Action cancelled"),
            Err(e) => {
                warn!(container = %id, %action, "Action failed: {e}");
                self.events.publish(StoreEvent::ActionFailed {
                    host_id: self.host.as_ref().map(|h| h.id),
                    container_id: id,
                    action,
                    error: e.to_string(),
                });
            }
        }

        self.publish_state();
        // reveal the engine's actual state
        self.begin_refresh(true);
    }

    // ========================================================================
    // Host switching
    // ========================================================================

    fn set_host(&mut self, host: HostConfig) {
        if self.host.as_ref() == Some(&host) && self.client.is_some() {
            debug!(host = %host.name, "Host unchanged, ignoring");
            return;
        }
        info!(host = %host.name, "Switching host");

        // cancel everything owned by the previous client
        if let Some(client) = self.client.take() {
            client.shutdown();
        }
        self.generation += 1;
        self.refreshing = false;
        self.queued_refresh = false;
        self.in_flight.clear();

        self.containers.clear();
        self.stats.clear();
        self.aggregate = AggregateSnapshot::empty(Utc::now());
        self.cpu_history.clear();
        self.memory_history.clear();
        self.net_rx_history.clear();
        self.disk_read_history.clear();
        self.net_rx_tracker.reset();
        self.disk_read_tracker.reset();
        self.engine_info = None;
        self.last_refresh = None;
        self.connection_error = None;
        self.gate.reset();
        self.timer_dirty = true;

        match self.factory.build(&host) {
            Ok(transport) => {
                self.client = Some(Arc::new(EngineClient::new(transport)));
            }
            Err(e) => {
                warn!(host = %host.name, "Cannot build transport: {e}");
                self.connection_error = Some(e.to_string());
                self.events.publish(StoreEvent::ConnectionFailed {
                    host_id: Some(host.id),
                    error: e.to_string(),
                });
            }
        }

        let host_id = host.id;
        self.host = Some(host);
        self.events.publish(StoreEvent::HostChanged(host_id));
        self.publish_state();

        if let Some(client) = self.client.clone() {
            // engine identity for the new host, refreshed out of band
            let generation = self.generation;
            let internal = self.internal_tx.clone();
            tokio::spawn(async move {
                if let Ok(info) = client.info().await {
                    let _ = internal.send(Internal::InfoDone { generation, info }).await;
                }
            });
            self.begin_refresh(true);
        }
    }

    // ========================================================================
    // Publication
    // ========================================================================

    fn publish_state(&self) {
        let snapshot = StoreSnapshot {
            containers: self.containers.clone(),
            stats: self.stats.clone(),
            aggregate: self.aggregate.clone(),
            cpu_history: self.cpu_history.values(),
            memory_history: self.memory_history.values(),
            net_rx_history: self.net_rx_history.values(),
            disk_read_history: self.disk_read_history.values(),
            engine_info: self.engine_info.clone(),
            in_flight_actions: self.in_flight.clone(),
            is_refreshing: self.refreshing,
            is_connected: self.last_refresh.is_some() && self.connection_error.is_none(),
            connection_error: self.connection_error.clone(),
            last_refresh_at: self.last_refresh,
            active_host_id: self.host.as_ref().map(|h| h.id),
            refresh_epoch: self.refresh_epoch,
        };
        self.snapshot_tx.send_replace(snapshot);
        self.events.publish(StoreEvent::StateChanged);
    }
}

/// One full refresh pass: list, then bounded-parallel one-shot stats for
/// every running container.
async fn run_refresh(client: &Arc<EngineClient>) -> Result<RefreshOutcome> {
    let containers = list_with_retry(client).await?;

    let fetches = containers
        .iter()
        .filter(|c| c.is_running())
        .map(|c| {
            let client = client.clone();
            let id = c.id.clone();
            async move {
                let result = client.stats_once(&id).await;
                (id, result)
            }
        })
        .collect::<Vec<_>>();

    let results: Vec<(String, Result<ContainerStats>)> = stream::iter(fetches)
        .buffer_unordered(STATS_CONCURRENCY)
        .collect()
        .await;

    let mut stats = HashMap::new();
    for (id, result) in results {
        match result {
            Ok(sample) => {
                stats.insert(id, sample);
            }
            // a container that raced away or an engine hiccup costs that
            // container its sample this tick, nothing more
            Err(e) => debug!(container = %id, "Stats sample failed: {e}"),
        }
    }

    Ok(RefreshOutcome { containers, stats })
}

/// Exponential backoff over the container list, transient errors only.
async fn list_with_retry(client: &EngineClient) -> Result<Vec<Container>> {
    let mut attempt: u32 = 0;
    loop {
        match client.list_containers(true).await {
            Ok(containers) => return Ok(containers),
            Err(e) if e.is_transient() && attempt + 1 < MAX_LIST_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(
                    "Container list failed (attempt {}/{}): {e}; retrying in {:?}",
                    attempt + 1,
                    MAX_LIST_ATTEMPTS,
                    delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_RETRY_DELAY.saturating_mul(2u32.saturating_pow(attempt));
    exp.min(MAX_RETRY_DELAY)
}

async fn perform_action(client: &EngineClient, action: ContainerAction, id: &str) -> Result<()> {
    match action {
        ContainerAction::Start => client.start(id).await,
        ContainerAction::Stop => client.stop(id, None).await,
        ContainerAction::Restart => client.restart(id, None).await,
        ContainerAction::Pause => client.pause(id).await,
        ContainerAction::Unpause => client.unpause(id).await,
        ContainerAction::Remove => client.remove(id, false, false).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::EngineKind;
    use crate::model::Health;
    use crate::testutil::{MockFactory, MockTransport};

    const LIST_TWO: &[u8] = br#"[
        {"Id": "a", "Names": ["/web"], "Image": "nginx:1", "State": "running", "Status": "Up"},
        {"Id": "b", "Names": ["/batch"], "Image": "busybox", "State": "exited", "Status": "Exited (0)"}
    ]"#;

    const LIST_ONE: &[u8] =
        br#"[{"Id": "a", "Names": ["/web"], "Image": "nginx:1", "State": "running", "Status": "Up"}]"#;

    const STATS_A: &[u8] = br#"{
        "cpu_stats": {"cpu_usage": {"total_usage": 500}, "system_cpu_usage": 1000, "online_cpus": 2},
        "precpu_stats": {"cpu_usage": {"total_usage": 400}, "system_cpu_usage": 900},
        "memory_stats": {"usage": 104857600, "limit": 1073741824}
    }"#;

    fn harness() -> (Arc<MockTransport>, Store, HostConfig) {
        crate::testutil::init_tracing();
        let transport = MockTransport::new();
        let store = Store::spawn(Arc::new(MockFactory {
            transport: transport.clone(),
        }));
        let host = HostConfig::local("test", EngineKind::Docker);
        (transport, store, host)
    }

    async fn wait_for_epoch(store: &Store, epoch: u64) -> StoreSnapshot {
        let mut rx = store.watch();
        let snap = tokio::time::timeout(
            Duration::from_secs(30),
            rx.wait_for(|s| s.refresh_epoch >= epoch),
        )
        .await
        .expect("store did not reach refresh epoch in time")
        .unwrap()
        .clone();
        snap
    }

    fn script_info(transport: &MockTransport) {
        transport.respond("GET", "/v1.43/info", 200, br#"{"ServerVersion": "27.0"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_two_containers() {
        let (transport, store, host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_TWO);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);

        store.set_host(host).await;
        let snap = wait_for_epoch(&store, 1).await;

        assert_eq!(snap.containers.len(), 2);
        assert_eq!(snap.stats.len(), 1);
        let a = snap.stats.get("a").expect("stats for a");
        assert_eq!(a.cpu_percent, 200.0);
        assert!((a.memory_percent() - 9.765625).abs() < 1e-6);

        assert_eq!(snap.aggregate.running, 1);
        assert_eq!(snap.aggregate.stopped, 1);
        assert_eq!(snap.aggregate.total, 2);
        assert_eq!(snap.aggregate.health, Health::Healthy);
        assert!(snap.is_connected);
        assert!(snap.connection_error.is_none());
        assert!(snap.last_refresh_at.is_some());

        // the exited container was never sampled
        assert_eq!(transport.request_count("GET", "/v1.43/containers/b/stats"), 0);
        // histories picked up the pass
        assert_eq!(snap.cpu_history.len(), 1);
        assert_eq!(snap.cpu_history[0].value, 200.0);
        assert_eq!(snap.memory_history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_gate_suppresses_then_surfaces() {
        let (transport, store, host) = harness();
        script_info(&transport);
        // one good pass, then failures until the final recovery body
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_TWO);
        for _ in 0..(2 * MAX_LIST_ATTEMPTS) {
            transport.fail("GET", "/v1.43/containers/json");
        }
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_ONE);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);

        store.set_host(host).await;
        let first = wait_for_epoch(&store, 1).await;
        assert!(first.is_connected);
        let baseline = first.last_refresh_at;

        // first failed pass: suppressed, stale data stays
        store.refresh(true).await;
        let second = wait_for_epoch(&store, 2).await;
        assert_eq!(second.containers.len(), 2);
        assert!(second.connection_error.is_none());
        assert!(second.is_connected);
        assert_eq!(second.last_refresh_at, baseline);

        // second consecutive failure: surfaced, data still stale
        store.refresh(true).await;
        let third = wait_for_epoch(&store, 3).await;
        assert!(third.connection_error.is_some());
        assert!(!third.is_connected);
        assert_eq!(third.containers.len(), 2);
        assert_eq!(third.stats.len(), 1);

        // recovery: error clears, b disappears along with its stats
        store.refresh(true).await;
        let fourth = wait_for_epoch(&store, 4).await;
        assert!(fourth.connection_error.is_none());
        assert!(fourth.is_connected);
        assert_eq!(fourth.containers.len(), 1);
        assert_eq!(fourth.stats.len(), 1);
        assert!(fourth.stats.contains_key("a"));
        assert!(fourth.last_refresh_at > baseline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_retry_on_transient_failure() {
        let (transport, store, host) = harness();
        script_info(&transport);
        // two transient failures, success on the third attempt of one pass
        transport.fail("GET", "/v1.43/containers/json");
        transport.fail("GET", "/v1.43/containers/json");
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_ONE);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);

        store.set_host(host).await;
        let snap = wait_for_epoch(&store, 1).await;

        assert!(snap.is_connected);
        assert_eq!(snap.containers.len(), 1);
        assert_eq!(transport.request_count("GET", "/v1.43/containers/json"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failed_event_carries_host() {
        let (transport, store, host) = harness();
        let host_id = host.id;
        script_info(&transport);
        for _ in 0..(2 * MAX_LIST_ATTEMPTS) {
            transport.fail("GET", "/v1.43/containers/json");
        }

        let mut events = store.subscribe();
        store.set_host(host).await;
        // fresh start: no prior data, the first failed pass surfaces
        wait_for_epoch(&store, 1).await;

        let failed = loop {
            match events.recv().await.unwrap() {
                StoreEvent::ConnectionFailed { host_id, error } => break (host_id, error),
                _ => continue,
            }
        };
        assert_eq!(failed.0, Some(host_id));
        assert!(!failed.1.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_actions_coalesce_per_id() {
        let (transport, store, host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_TWO);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);
        transport.respond("POST", "/v1.43/containers/a/stop", 204, b"");

        store.set_host(host).await;
        let baseline = wait_for_epoch(&store, 1).await;

        // both commands are queued before the first action task runs
        store.act(ContainerAction::Stop, "a").await;
        store.act(ContainerAction::Stop, "a").await;

        wait_for_epoch(&store, baseline.refresh_epoch + 1).await;
        assert_eq!(transport.request_count("POST", "/v1.43/containers/a/stop"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_on_distinct_ids_both_run() {
        let (transport, store, host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_TWO);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);
        transport.respond("POST", "/v1.43/containers/a/stop", 204, b"");
        transport.respond("POST", "/v1.43/containers/b/start", 204, b"");

        store.set_host(host).await;
        let baseline = wait_for_epoch(&store, 1).await;

        store.act(ContainerAction::Stop, "a").await;
        store.act(ContainerAction::Start, "b").await;

        wait_for_epoch(&store, baseline.refresh_epoch + 1).await;
        assert_eq!(transport.request_count("POST", "/v1.43/containers/a/stop"), 1);
        assert_eq!(transport.request_count("POST", "/v1.43/containers/b/start"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_failure_emits_event_not_connection_error() {
        let (transport, store, host) = harness();
        let host_id = host.id;
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_TWO);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);
        transport.respond(
            "POST",
            "/v1.43/containers/a/stop",
            409,
            br#"{"message": "removal in progress"}"#,
        );

        store.set_host(host).await;
        let baseline = wait_for_epoch(&store, 1).await;

        let mut events = store.subscribe();
        store.act(ContainerAction::Stop, "a").await;
        let snap = wait_for_epoch(&store, baseline.refresh_epoch + 1).await;

        let failed = loop {
            match events.recv().await.unwrap() {
                StoreEvent::ActionFailed {
                    host_id,
                    container_id,
                    action,
                    error,
                } => break (host_id, container_id, action, error),
                _ => continue,
            }
        };
        assert_eq!(failed.0, Some(host_id));
        assert_eq!(failed.1, "a");
        assert_eq!(failed.2, ContainerAction::Stop);
        assert!(failed.3.contains("removal in progress"));

        // connection state untouched by the action failure
        assert!(snap.connection_error.is_none());
        assert!(snap.is_connected);
        assert!(snap.in_flight_actions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_host_clears_state_and_is_idempotent() {
        let (transport, store, host) = harness();
        script_info(&transport);
        // two good passes for the first host, then the second host's
        // refresh fails every attempt
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_TWO);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_TWO);
        for _ in 0..MAX_LIST_ATTEMPTS {
            transport.fail("GET", "/v1.43/containers/json");
        }
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);

        let mut events = store.subscribe();
        store.set_host(host.clone()).await;
        wait_for_epoch(&store, 1).await;

        // identical config again: no-op, no second HostChanged, no refresh
        store.set_host(host.clone()).await;
        store.refresh(true).await;
        wait_for_epoch(&store, 2).await;

        let mut host_changes = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, StoreEvent::HostChanged(_)) {
                host_changes += 1;
            }
        }
        assert_eq!(host_changes, 1);

        // an actually different host clears all observable state; its
        // refresh fails on a fresh gate, so stale data cannot linger
        let other = HostConfig::local("other", EngineKind::Podman);
        store.set_host(other.clone()).await;
        let snap = wait_for_epoch(&store, 3).await;
        assert_eq!(snap.active_host_id, Some(other.id));
        assert!(snap.containers.is_empty());
        assert!(snap.stats.is_empty());
        assert!(snap.cpu_history.is_empty());
        assert!(snap.last_refresh_at.is_none());
        assert!(!snap.is_connected);
        assert!(snap.connection_error.is_some());
    }

    #[tokio::test]
    async fn test_host_switch_cancels_stats_stream() {
        let (transport, store, host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_ONE);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);
        transport.respond_streaming(
            "GET",
            "/v1.43/containers/a/stats",
            200,
            b"{\"cpu_stats\": {\"cpu_usage\": {\"total_usage\": 1}}}\n",
        );

        store.set_host(host).await;
        wait_for_epoch(&store, 1).await;

        // the one-shot script entry was consumed by the refresh; the
        // streaming entry now answers
        let mut stream = store.stream_stats("a").await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        let other = HostConfig::local("other", EngineKind::Podman);
        store.set_host(other).await;

        let started = std::time::Instant::now();
        match stream.next().await {
            Some(Err(EngineError::Cancelled)) => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_keys_subset_of_container_ids() {
        let (transport, store, host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_TWO);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);

        store.set_host(host).await;
        for epoch in 1..=3u64 {
            store.refresh(true).await;
            let snap = wait_for_epoch(&store, epoch).await;
            let ids: HashSet<&str> = snap.containers.iter().map(|c| c.id.as_str()).collect();
            for key in snap.stats.keys() {
                assert!(ids.contains(key.as_str()));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_error_swallowed_per_container() {
        let (transport, store, host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_TWO);
        transport.respond(
            "GET",
            "/v1.43/containers/a/stats",
            404,
            br#"{"message": "gone"}"#,
        );

        store.set_host(host).await;
        let snap = wait_for_epoch(&store, 1).await;

        // refresh succeeded even though the only running container lost
        // its sample
        assert!(snap.is_connected);
        assert_eq!(snap.containers.len(), 2);
        assert!(snap.stats.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autorefresh_ticks() {
        let (transport, store, host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_ONE);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);

        store.set_host(host).await;
        wait_for_epoch(&store, 1).await;

        store.start_autorefresh(RefreshInterval::FiveSeconds).await;
        // paused time: the interval fires as the clock auto-advances
        let snap = wait_for_epoch(&store, 3).await;
        assert!(snap.refresh_epoch >= 3);

        store.stop_autorefresh().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_logs_through_store() {
        let (transport, store, host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_ONE);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);
        let mut body = vec![1u8, 0, 0, 0, 0, 0, 0, 5];
        body.extend_from_slice(b"hello");
        transport.respond("GET", "/v1.43/containers/a/logs", 200, &body);

        store.set_host(host).await;
        wait_for_epoch(&store, 1).await;

        let logs = store.logs("a", Some(50), false).await.unwrap();
        assert_eq!(logs, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_logs_without_host() {
        let (_transport, store, _host) = harness();
        let err = store.logs("a", None, false).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_info_surfaced() {
        let (transport, store, host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_ONE);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);

        store.set_host(host).await;
        let mut rx = store.watch();
        let snap = tokio::time::timeout(
            Duration::from_secs(30),
            rx.wait_for(|s| s.engine_info.is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(snap.engine_info.unwrap().server_version, "27.0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_registry_follows_active_host() {
        use crate::config::{MemorySettings, Settings};

        let (transport, store, _host) = harness();
        script_info(&transport);
        transport.respond("GET", "/v1.43/containers/json", 200, LIST_ONE);
        transport.respond("GET", "/v1.43/containers/a/stats", 200, STATS_A);

        let registry = HostRegistry::load(Settings::new(Arc::new(MemorySettings::new())));
        let a = HostConfig::local("a", EngineKind::Docker);
        let b = HostConfig::local("b", EngineKind::Docker);
        registry.add(a.clone());
        registry.add(b.clone());

        store.bind_registry(&registry);
        let mut rx = store.watch();
        rx.wait_for(|s| s.active_host_id == Some(a.id)).await.unwrap();

        registry.set_active(b.id).unwrap();
        rx.wait_for(|s| s.active_host_id == Some(b.id)).await.unwrap();
    }
}

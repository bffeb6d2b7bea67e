//! Container records as observed from the engine

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Paused,
    Restarting,
    Exited,
    Created,
    Dead,
    Removing,
    /// A state string this build does not know; treated as stopped.
    Unknown,
}

impl ContainerState {
    /// Parse the engine's state string. Unrecognized values map to
    /// [`ContainerState::Unknown`] rather than failing the whole list.
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "exited" => ContainerState::Exited,
            "created" => ContainerState::Created,
            "dead" => ContainerState::Dead,
            "removing" => ContainerState::Removing,
            _ => ContainerState::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Exited => "exited",
            ContainerState::Created => "created",
            ContainerState::Dead => "dead",
            ContainerState::Removing => "removing",
            ContainerState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A published container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the container
    pub private_port: u16,
    /// Port on the host, if published
    pub public_port: Option<u16>,
    /// "tcp" or "udp"
    pub protocol: String,
    /// Host IP the port is bound to, if published
    pub ip: Option<String>,
}

/// One container as observed in the latest list response.
///
/// The id is stable for the container's lifetime; every other field may
/// change between refreshes, and the whole record is replaced wholesale on
/// each refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Engine-assigned hex id
    pub id: String,
    /// Primary name with the engine's leading `/` stripped
    pub name: String,
    /// Image reference the container was created from
    pub image: String,
    /// Command line the container runs
    pub command: String,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Lifecycle state
    pub state: ContainerState,
    /// Engine-provided human status line ("Up 3 hours", "Exited (0) ...")
    pub status: String,
    /// Published ports
    pub ports: Vec<PortMapping>,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Network mode from the host config ("bridge", "host", ...)
    pub network_mode: String,
}

impl Container {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// The familiar 12-character short id.
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(12);
        &self.id[..end]
    }
}

/// A lifecycle operation the store can execute against a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
    Remove,
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
            ContainerAction::Pause => "pause",
            ContainerAction::Unpause => "unpause",
            ContainerAction::Remove => "remove",
        };
        write!(f, "{}", s)
    }
}

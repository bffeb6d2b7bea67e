//! Engine JSON wire types and their mapping onto the domain model
//!
//! Field names follow the v1.43 API. Everything defaults so that a missing
//! optional field never fails an entire list response.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{Container, ContainerState, EngineInfo, PortMapping};

/// One element of `GET /containers/json`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Command", default)]
    pub command: String,
    /// Unix seconds
    #[serde(rename = "Created", default)]
    pub created: i64,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Ports", default)]
    pub ports: Vec<PortSummary>,
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
    #[serde(rename = "HostConfig", default)]
    pub host_config: HostConfigSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PortSummary {
    #[serde(rename = "IP")]
    pub ip: Option<String>,
    #[serde(rename = "PrivatePort")]
    pub private_port: u16,
    #[serde(rename = "PublicPort")]
    pub public_port: Option<u16>,
    #[serde(rename = "Type", default)]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct HostConfigSummary {
    #[serde(rename = "NetworkMode", default)]
    pub network_mode: String,
}

impl ContainerSummary {
    pub fn into_container(self) -> Container {
        let name = self
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| self.id.chars().take(12).collect());
        Container {
            id: self.id,
            name,
            image: self.image,
            command: self.command,
            created_at: DateTime::from_timestamp(self.created, 0).unwrap_or_else(Utc::now),
            state: ContainerState::parse(&self.state),
            status: self.status,
            ports: self
                .ports
                .into_iter()
                .map(|p| PortMapping {
                    private_port: p.private_port,
                    public_port: p.public_port,
                    protocol: p.protocol,
                    ip: p.ip,
                })
                .collect(),
            labels: self.labels,
            network_mode: self.host_config.network_mode,
        }
    }
}

/// `GET /containers/{id}/json`, reduced to what the monitor surfaces.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContainerDetail {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    /// RFC 3339
    #[serde(rename = "Created", default)]
    pub created: String,
    #[serde(rename = "State", default)]
    pub state: DetailState,
    #[serde(rename = "Config", default)]
    pub config: DetailConfig,
    #[serde(rename = "HostConfig", default)]
    pub host_config: HostConfigSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DetailState {
    #[serde(rename = "Status", default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DetailConfig {
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Cmd")]
    pub cmd: Option<Vec<String>>,
    #[serde(rename = "Labels", default)]
    pub labels: HashMap<String, String>,
}

impl ContainerDetail {
    pub fn into_container(self) -> Container {
        Container {
            name: self.name.trim_start_matches('/').to_string(),
            image: self.config.image,
            command: self.config.cmd.map(|c| c.join(" ")).unwrap_or_default(),
            created_at: self
                .created
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
            state: ContainerState::parse(&self.state.status),
            status: self.state.status,
            ports: Vec::new(),
            labels: self.config.labels,
            network_mode: self.host_config.network_mode,
            id: self.id,
        }
    }
}

/// One sample from `GET /containers/{id}/stats`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawStats {
    /// Sample instant, RFC 3339; zero value on some engines
    #[serde(default)]
    pub read: String,
    #[serde(default)]
    pub cpu_stats: RawCpu,
    #[serde(default)]
    pub precpu_stats: RawCpu,
    #[serde(default)]
    pub memory_stats: RawMemory,
    #[serde(default)]
    pub networks: Option<HashMap<String, RawNetwork>>,
    #[serde(default)]
    pub blkio_stats: RawBlkio,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawCpu {
    #[serde(default)]
    pub cpu_usage: RawCpuUsage,
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    #[serde(default)]
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawCpuUsage {
    #[serde(default)]
    pub total_usage: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawMemory {
    #[serde(default)]
    pub usage: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawNetwork {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawBlkio {
    #[serde(default)]
    pub io_service_bytes_recursive: Option<Vec<RawBlkioEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawBlkioEntry {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub value: u64,
}

/// `GET /info`, reduced to what the monitor surfaces.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawInfo {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "ServerVersion", default)]
    pub server_version: String,
    #[serde(rename = "OperatingSystem", default)]
    pub operating_system: String,
    #[serde(rename = "NCPU", default)]
    pub ncpu: u32,
    #[serde(rename = "MemTotal", default)]
    pub mem_total: u64,
    #[serde(rename = "Containers", default)]
    pub containers: u64,
    #[serde(rename = "ContainersRunning", default)]
    pub containers_running: u64,
}

impl RawInfo {
    pub fn into_info(self) -> EngineInfo {
        EngineInfo {
            name: self.name,
            server_version: self.server_version,
            operating_system: self.operating_system,
            ncpu: self.ncpu,
            mem_total: self.mem_total,
            containers: self.containers,
            containers_running: self.containers_running,
        }
    }
}

/// The engine's error body: `{"message": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

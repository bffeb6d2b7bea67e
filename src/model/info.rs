//! Engine identity and capacity summary

use serde::{Deserialize, Serialize};

/// The subset of `GET /info` the monitor surfaces (host header line in the
/// popup, capacity context for memory percentages).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    /// Daemon name, e.g. the hostname the engine reports
    pub name: String,
    /// Engine version string
    pub server_version: String,
    /// Operating system description
    pub operating_system: String,
    /// Online CPUs available to the engine
    pub ncpu: u32,
    /// Total memory available to the engine, in bytes
    pub mem_total: u64,
    /// Total containers known to the engine
    pub containers: u64,
    /// Containers currently running
    pub containers_running: u64,
}

//! Resource statistics and the derived aggregate snapshot

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Container, ContainerState};

/// One resource sample for a container.
///
/// Network and block-io counters are cumulative since container start;
/// rates are derived by the history layer, not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub container_id: String,
    /// Instant the engine took the sample
    pub read_at: DateTime<Utc>,
    /// 0..=N*100 where N is the number of online CPUs
    pub cpu_percent: f64,
    pub memory_used: u64,
    pub memory_limit: u64,
    /// Cumulative bytes received, summed over all interfaces
    pub network_rx: u64,
    /// Cumulative bytes transmitted, summed over all interfaces
    pub network_tx: u64,
    /// Cumulative block-device bytes read
    pub block_read: u64,
    /// Cumulative block-device bytes written
    pub block_write: u64,
}

impl ContainerStats {
    /// Memory usage as a percentage of the limit; 0 when no limit applies.
    pub fn memory_percent(&self) -> f64 {
        if self.memory_limit > 0 {
            self.memory_used as f64 / self.memory_limit as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Overall fleet health derived from the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Health::Healthy => "healthy",
            Health::Warning => "warning",
            Health::Critical => "critical",
            Health::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate cpu threshold above which health degrades to warning.
const CPU_WARNING_PERCENT: f64 = 90.0;

/// Memory used/limit ratio above which health degrades to warning.
const MEMORY_WARNING_RATIO: f64 = 0.95;

/// Summary over every currently known container, recomputed whenever the
/// container list or the stats map changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// Sum of cpu percent across running containers
    pub cpu_percent: f64,
    /// Sum of memory used across running containers
    pub memory_used: u64,
    /// Sum of memory limits across running containers
    pub memory_limit: u64,
    pub running: usize,
    pub paused: usize,
    pub restarting: usize,
    /// Exited, created, dead, removing, or unrecognized
    pub stopped: usize,
    pub total: usize,
    pub computed_at: DateTime<Utc>,
    pub health: Health,
}

impl AggregateSnapshot {
    /// The snapshot for an empty container list.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            cpu_percent: 0.0,
            memory_used: 0,
            memory_limit: 0,
            running: 0,
            paused: 0,
            restarting: 0,
            stopped: 0,
            total: 0,
            computed_at: now,
            health: Health::Unknown,
        }
    }

    /// Compute the aggregate as an exact function of the container list and
    /// the stats map.
    pub fn compute(
        containers: &[Container],
        stats: &HashMap<String, ContainerStats>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut agg = Self::empty(now);
        agg.total = containers.len();

        for container in containers {
            match container.state {
                ContainerState::Running => agg.running += 1,
                ContainerState::Paused => agg.paused += 1,
                ContainerState::Restarting => agg.restarting += 1,
                _ => agg.stopped += 1,
            }

            if container.is_running() {
                if let Some(s) = stats.get(&container.id) {
                    agg.cpu_percent += s.cpu_percent;
                    agg.memory_used += s.memory_used;
                    agg.memory_limit += s.memory_limit;
                }
            }
        }

        agg.health = Self::health_of(&agg);
        agg
    }

    fn health_of(agg: &AggregateSnapshot) -> Health {
        if agg.total == 0 {
            return Health::Unknown;
        }
        if agg.running == 0 {
            return Health::Critical;
        }
        let memory_ratio = if agg.memory_limit > 0 {
            agg.memory_used as f64 / agg.memory_limit as f64
        } else {
            0.0
        };
        if agg.cpu_percent > CPU_WARNING_PERCENT || memory_ratio > MEMORY_WARNING_RATIO {
            Health::Warning
        } else {
            Health::Healthy
        }
    }

    /// Aggregate memory usage as a percentage of the aggregate limit.
    pub fn memory_percent(&self) -> f64 {
        if self.memory_limit > 0 {
            self.memory_used as f64 / self.memory_limit as f64 * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, state: ContainerState) -> Container {
        Container {
            id: id.to_string(),
            name: id.to_string(),
            image: "busybox".to_string(),
            command: "sh".to_string(),
            created_at: Utc::now(),
            state,
            status: String::new(),
            ports: Vec::new(),
            labels: HashMap::new(),
            network_mode: "bridge".to_string(),
        }
    }

    fn stats(id: &str, cpu: f64, used: u64, limit: u64) -> ContainerStats {
        ContainerStats {
            container_id: id.to_string(),
            read_at: Utc::now(),
            cpu_percent: cpu,
            memory_used: used,
            memory_limit: limit,
            network_rx: 0,
            network_tx: 0,
            block_read: 0,
            block_write: 0,
        }
    }

    #[test]
    fn test_empty_aggregate_is_unknown() {
        let agg = AggregateSnapshot::compute(&[], &HashMap::new(), Utc::now());
        assert_eq!(agg.total, 0);
        assert_eq!(agg.running, 0);
        assert_eq!(agg.stopped, 0);
        assert_eq!(agg.cpu_percent, 0.0);
        assert_eq!(agg.memory_used, 0);
        assert_eq!(agg.memory_limit, 0);
        assert_eq!(agg.health, Health::Unknown);
    }

    #[test]
    fn test_all_stopped_is_critical() {
        let containers = vec![
            container("a", ContainerState::Exited),
            container("b", ContainerState::Created),
        ];
        let agg = AggregateSnapshot::compute(&containers, &HashMap::new(), Utc::now());
        assert_eq!(agg.total, 2);
        assert_eq!(agg.running, 0);
        assert_eq!(agg.stopped, 2);
        assert_eq!(agg.health, Health::Critical);
    }

    #[test]
    fn test_healthy_mix() {
        let containers = vec![
            container("a", ContainerState::Running),
            container("b", ContainerState::Exited),
        ];
        let mut map = HashMap::new();
        map.insert("a".to_string(), stats("a", 12.5, 100 << 20, 1 << 30));

        let agg = AggregateSnapshot::compute(&containers, &map, Utc::now());
        assert_eq!(agg.running, 1);
        assert_eq!(agg.stopped, 1);
        assert_eq!(agg.total, 2);
        assert_eq!(agg.cpu_percent, 12.5);
        assert_eq!(agg.memory_used, 100 << 20);
        assert_eq!(agg.health, Health::Healthy);
    }

    #[test]
    fn test_high_cpu_is_warning() {
        let containers = vec![container("a", ContainerState::Running)];
        let mut map = HashMap::new();
        map.insert("a".to_string(), stats("a", 150.0, 0, 0));

        let agg = AggregateSnapshot::compute(&containers, &map, Utc::now());
        assert_eq!(agg.health, Health::Warning);
    }

    #[test]
    fn test_memory_pressure_is_warning() {
        let containers = vec![container("a", ContainerState::Running)];
        let mut map = HashMap::new();
        map.insert("a".to_string(), stats("a", 5.0, 990, 1000));

        let agg = AggregateSnapshot::compute(&containers, &map, Utc::now());
        assert_eq!(agg.health, Health::Warning);
    }

    #[test]
    fn test_stats_without_container_are_ignored() {
        let containers = vec![container("a", ContainerState::Running)];
        let mut map = HashMap::new();
        map.insert("a".to_string(), stats("a", 10.0, 10, 100));
        map.insert("ghost".to_string(), stats("ghost", 99.0, 90, 100));

        let agg = AggregateSnapshot::compute(&containers, &map, Utc::now());
        assert_eq!(agg.cpu_percent, 10.0);
        assert_eq!(agg.memory_used, 10);
    }

    #[test]
    fn test_memory_percent_no_limit() {
        let s = stats("a", 0.0, 500, 0);
        assert_eq!(s.memory_percent(), 0.0);
    }
}

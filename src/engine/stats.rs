//! Stat derivation from raw engine samples

use chrono::{DateTime, Utc};

use super::wire::{RawCpu, RawStats};
use crate::model::ContainerStats;

/// CPU percentage between two raw samples.
///
/// `(cpu_delta / system_delta) * online_cpus * 100`, capped at the number
/// of online cores. A zero or missing system delta yields exactly 0 so a
/// quiet engine can never produce NaN or infinity.
pub(crate) fn cpu_percent(current: &RawCpu, previous: &RawCpu) -> f64 {
    let cpu_delta = current
        .cpu_usage
        .total_usage
        .saturating_sub(previous.cpu_usage.total_usage);
    let system_delta = current
        .system_cpu_usage
        .unwrap_or(0)
        .saturating_sub(previous.system_cpu_usage.unwrap_or(0));

    if system_delta == 0 {
        return 0.0;
    }

    let cpus = current
        .online_cpus
        .or(previous.online_cpus)
        .unwrap_or(1) as f64;
    let raw = cpu_delta as f64 / system_delta as f64 * cpus * 100.0;
    raw.min(cpus * 100.0)
}

/// Map one raw sample into a [`ContainerStats`].
///
/// `previous` supplies the cpu baseline for streamed samples; when absent
/// the sample's own `precpu` snapshot is used, which is what the engine
/// fills on one-shot requests.
pub(crate) fn from_sample(
    container_id: &str,
    sample: &RawStats,
    previous: Option<&RawStats>,
) -> ContainerStats {
    let baseline = previous.map(|p| &p.cpu_stats).unwrap_or(&sample.precpu_stats);

    let (network_rx, network_tx) = network_totals(sample);
    let (block_read, block_write) = blkio_totals(sample);

    ContainerStats {
        container_id: container_id.to_string(),
        read_at: parse_read_instant(&sample.read),
        cpu_percent: cpu_percent(&sample.cpu_stats, baseline),
        memory_used: sample.memory_stats.usage.unwrap_or(0),
        memory_limit: sample.memory_stats.limit.unwrap_or(0),
        network_rx,
        network_tx,
        block_read,
        block_write,
    }
}

fn parse_read_instant(read: &str) -> DateTime<Utc> {
    read.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now())
}

/// Sum rx/tx across every interface present.
fn network_totals(sample: &RawStats) -> (u64, u64) {
    let mut rx = 0u64;
    let mut tx = 0u64;
    if let Some(networks) = &sample.networks {
        for net in networks.values() {
            rx += net.rx_bytes;
            tx += net.tx_bytes;
        }
    }
    (rx, tx)
}

/// Sum read/write byte counters across every recorded device.
///
/// cgroups v1 capitalizes the op names, v2 does not.
fn blkio_totals(sample: &RawStats) -> (u64, u64) {
    let mut read = 0u64;
    let mut write = 0u64;
    if let Some(entries) = &sample.blkio_stats.io_service_bytes_recursive {
        for entry in entries {
            if entry.op.eq_ignore_ascii_case("read") {
                read += entry.value;
            } else if entry.op.eq_ignore_ascii_case("write") {
                write += entry.value;
            }
        }
    }
    (read, write)
}

//! Settings persistence seam and typed settings facade
//!
//! Persistence is an injected key→blob mapping (the desktop app backs it
//! with its preferences store). Mutations go through explicit `set`
//! operations that update memory and enqueue the write in one place; there
//! are no implicit writes on assignment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Keys the core persists under.
pub mod keys {
    pub const HOSTS: &str = "hosts";
    pub const ACTIVE_HOST_ID: &str = "active_host_id";
    pub const REFRESH_INTERVAL: &str = "refresh_interval";
    pub const SHOW_STOPPED: &str = "show_stopped";
    pub const SECTIONS: &str = "sections";
}

/// Injected persistence: stable keys to serialized blobs.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, value: Vec<u8>);
    fn remove(&self, key: &str);
}

/// In-memory settings store for tests and headless composition roots.
#[derive(Default)]
pub struct MemorySettings {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        self.entries.write().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// Auto-refresh cadence options offered by the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshInterval {
    FiveSeconds,
    TenSeconds,
    ThirtySeconds,
    SixtySeconds,
    FiveMinutes,
    /// Refresh only on user request
    Manual,
}

impl RefreshInterval {
    /// Timer period; `None` for manual mode.
    pub fn period(&self) -> Option<Duration> {
        match self {
            RefreshInterval::FiveSeconds => Some(Duration::from_secs(5)),
            RefreshInterval::TenSeconds => Some(Duration::from_secs(10)),
            RefreshInterval::ThirtySeconds => Some(Duration::from_secs(30)),
            RefreshInterval::SixtySeconds => Some(Duration::from_secs(60)),
            RefreshInterval::FiveMinutes => Some(Duration::from_secs(300)),
            RefreshInterval::Manual => None,
        }
    }

    pub fn all() -> [RefreshInterval; 6] {
        [
            RefreshInterval::FiveSeconds,
            RefreshInterval::TenSeconds,
            RefreshInterval::ThirtySeconds,
            RefreshInterval::SixtySeconds,
            RefreshInterval::FiveMinutes,
            RefreshInterval::Manual,
        ]
    }
}

impl Default for RefreshInterval {
    fn default() -> Self {
        RefreshInterval::ThirtySeconds
    }
}

/// Typed accessors over the raw blob store.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn SettingsStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_slice(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Discarding unreadable setting {}: {}", key, e);
                None
            }
        }
    }

    pub(crate) fn write_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(raw) => self.store.set(key, raw),
            Err(e) => warn!("Failed to serialize setting {}: {}", key, e),
        }
    }

    pub(crate) fn remove(&self, key: &str) {
        self.store.remove(key);
    }

    pub fn refresh_interval(&self) -> RefreshInterval {
        self.read_json(keys::REFRESH_INTERVAL).unwrap_or_default()
    }

    pub fn set_refresh_interval(&self, interval: RefreshInterval) {
        self.write_json(keys::REFRESH_INTERVAL, &interval);
    }

    pub fn show_stopped(&self) -> bool {
        self.read_json(keys::SHOW_STOPPED).unwrap_or(true)
    }

    pub fn set_show_stopped(&self, show: bool) {
        self.write_json(keys::SHOW_STOPPED, &show);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_periods() {
        assert_eq!(
            RefreshInterval::FiveSeconds.period(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            RefreshInterval::FiveMinutes.period(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(RefreshInterval::Manual.period(), None);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::new(Arc::new(MemorySettings::new()));
        assert_eq!(settings.refresh_interval(), RefreshInterval::ThirtySeconds);
        assert!(settings.show_stopped());
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = Settings::new(Arc::new(MemorySettings::new()));
        settings.set_refresh_interval(RefreshInterval::FiveSeconds);
        settings.set_show_stopped(false);

        assert_eq!(settings.refresh_interval(), RefreshInterval::FiveSeconds);
        assert!(!settings.show_stopped());
    }

    #[test]
    fn test_corrupt_setting_falls_back_to_default() {
        let store = Arc::new(MemorySettings::new());
        store.set(keys::REFRESH_INTERVAL, b"not json".to_vec());

        let settings = Settings::new(store);
        assert_eq!(settings.refresh_interval(), RefreshInterval::ThirtySeconds);
    }
}

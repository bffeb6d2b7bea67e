//! Persistent registry of engine hosts
//!
//! Owns the ordered host list, the active selection, and the section rules,
//! and persists all three through the injected settings interface. Change
//! events go out on a broadcast channel the store subscribes to.

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::{HostConfig, Section};
use crate::config::{keys, Settings};
use crate::error::{EngineError, Result};

/// Registry change notifications.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// The active host changed; carries the new configuration
    ActiveChanged(HostConfig),
    /// Hosts were added, removed, or updated
    HostsChanged,
    /// Section rules were replaced
    SectionsChanged,
}

struct RegistryState {
    hosts: Vec<HostConfig>,
    active_id: Option<Uuid>,
    sections: Vec<Section>,
}

/// The persistent host list with a single active selection.
pub struct HostRegistry {
    settings: Settings,
    state: RwLock<RegistryState>,
    events: broadcast::Sender<HostEvent>,
}

impl HostRegistry {
    /// Load the registry from persisted settings; missing or unreadable
    /// blobs start empty.
    pub fn load(settings: Settings) -> Self {
        let hosts: Vec<HostConfig> = settings.read_json(keys::HOSTS).unwrap_or_default();
        let mut active_id: Option<Uuid> = settings.read_json(keys::ACTIVE_HOST_ID);
        let sections: Vec<Section> = settings.read_json(keys::SECTIONS).unwrap_or_default();

        // A stale active id (host since removed) falls back to the first host.
        if let Some(id) = active_id {
            if !hosts.iter().any(|h| h.id == id) {
                active_id = hosts.first().map(|h| h.id);
            }
        } else {
            active_id = hosts.first().map(|h| h.id);
        }

        info!(hosts = hosts.len(), "Loaded host registry");
        let (events, _) = broadcast::channel(16);
        Self {
            settings,
            state: RwLock::new(RegistryState {
                hosts,
                active_id,
                sections,
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }

    fn persist_hosts(&self, state: &RegistryState) {
        self.settings.write_json(keys::HOSTS, &state.hosts);
        match state.active_id {
            Some(id) => self.settings.write_json(keys::ACTIVE_HOST_ID, &id),
            None => self.settings.remove(keys::ACTIVE_HOST_ID),
        }
    }

    pub fn list(&self) -> Vec<HostConfig> {
        self.state.read().hosts.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<HostConfig> {
        self.state.read().hosts.iter().find(|h| h.id == id).cloned()
    }

    /// The currently active host configuration.
    pub fn active(&self) -> Option<HostConfig> {
        let state = self.state.read();
        let id = state.active_id?;
        state.hosts.iter().find(|h| h.id == id).cloned()
    }

    /// Add a host; the first host added becomes active.
    pub fn add(&self, host: HostConfig) {
        let became_active;
        {
            let mut state = self.state.write();
            became_active = state.active_id.is_none();
            if became_active {
                state.active_id = Some(host.id);
            }
            state.hosts.push(host.clone());
            self.persist_hosts(&state);
        }
        debug!(host = %host.name, "Added host");
        self.publish(HostEvent::HostsChanged);
        if became_active {
            self.publish(HostEvent::ActiveChanged(host));
        }
    }

    /// Replace a host's configuration in place, keyed by id.
    pub fn update(&self, host: HostConfig) -> Result<()> {
        let is_active;
        {
            let mut state = self.state.write();
            let slot = state
                .hosts
                .iter_mut()
                .find(|h| h.id == host.id)
                .ok_or_else(|| EngineError::NotFound(format!("host {}", host.id)))?;
            *slot = host.clone();
            is_active = state.active_id == Some(host.id);
            self.persist_hosts(&state);
        }
        self.publish(HostEvent::HostsChanged);
        if is_active {
            // the live connection must pick up the edited configuration
            self.publish(HostEvent::ActiveChanged(host));
        }
        Ok(())
    }

    /// Remove a host. Removing the active host is rejected unless another
    /// remains, in which case the first remaining host is promoted.
    pub fn remove(&self, id: Uuid) -> Result<()> {
        let promoted;
        {
            let mut state = self.state.write();
            let idx = state
                .hosts
                .iter()
                .position(|h| h.id == id)
                .ok_or_else(|| EngineError::NotFound(format!("host {id}")))?;

            if state.active_id == Some(id) && state.hosts.len() == 1 {
                return Err(EngineError::InvalidConfiguration(
                    "cannot remove the only configured host".into(),
                ));
            }

            state.hosts.remove(idx);
            promoted = if state.active_id == Some(id) {
                let next = state.hosts.first().cloned();
                state.active_id = next.as_ref().map(|h| h.id);
                next
            } else {
                None
            };
            self.persist_hosts(&state);
        }
        self.publish(HostEvent::HostsChanged);
        if let Some(host) = promoted {
            info!(host = %host.name, "Promoted host after removal of active");
            self.publish(HostEvent::ActiveChanged(host));
        }
        Ok(())
    }

    /// Switch the active host. Setting the already-active id is a no-op.
    pub fn set_active(&self, id: Uuid) -> Result<()> {
        let host;
        {
            let mut state = self.state.write();
            host = state
                .hosts
                .iter()
                .find(|h| h.id == id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("host {id}")))?;
            if state.active_id == Some(id) {
                return Ok(());
            }
            state.active_id = Some(id);
            self.persist_hosts(&state);
        }
        info!(host = %host.name, "Active host changed");
        self.publish(HostEvent::ActiveChanged(host));
        Ok(())
    }

    pub fn sections(&self) -> Vec<Section> {
        self.state.read().sections.clone()
    }

    pub fn set_sections(&self, sections: Vec<Section>) {
        {
            let mut state = self.state.write();
            state.sections = sections;
            self.settings.write_json(keys::SECTIONS, &state.sections);
        }
        self.publish(HostEvent::SectionsChanged);
    }
}

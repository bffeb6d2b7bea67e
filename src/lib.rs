//! dockhand — container engine monitoring core
//!
//! The data plane behind a desktop-resident container monitor: an
//! engine-agnostic HTTP client spoken directly over local UNIX sockets or
//! SSH-tunneled remote sockets, a mailbox-confined store that keeps a live
//! container/metrics view with failure tolerance and bounded histories,
//! and a persistent registry of engine hosts. UI surfaces, keychain
//! storage, and preference storage are injected at the edges.

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod hosts;
pub mod model;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use config::{MemorySettings, RefreshInterval, Settings, SettingsStore};
pub use credentials::{CredentialStore, MemoryCredentials};
pub use engine::{EngineClient, StatsStream};
pub use error::{EngineError, Result};
pub use events::{EventBus, StoreEvent};
pub use hosts::{ConnectionKind, EngineKind, HostConfig, HostRegistry, Section, SectionRule};
pub use model::{AggregateSnapshot, Container, ContainerAction, ContainerStats, Health};
pub use store::{FailureGate, MetricsHistory, Store, StoreSnapshot};
pub use transport::{ConnectionStrategy, Transport, TransportFactory};

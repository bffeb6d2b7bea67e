//! Credential storage seam
//!
//! The core never talks to an OS keychain directly; the embedding
//! application injects an implementation of [`CredentialStore`] and the
//! transports fetch what they need by host id.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

/// Well-known credential keys.
pub mod keys {
    /// PEM/OpenSSH-encoded private key for SSH tunnels
    pub const SSH_PRIVATE_KEY: &str = "ssh_private_key";
    /// Optional passphrase protecting the private key
    pub const SSH_PASSPHRASE: &str = "ssh_passphrase";
    /// Client certificate for the TCP/TLS variant
    pub const TLS_CLIENT_CERT: &str = "tls_client_cert";
    /// Client key for the TCP/TLS variant
    pub const TLS_CLIENT_KEY: &str = "tls_client_key";
    /// CA bundle for the TCP/TLS variant
    pub const TLS_CA_CERT: &str = "tls_ca_cert";
}

/// Opaque per-host secret blobs.
///
/// Implementations must tolerate concurrent reads; writes are serialized by
/// the caller (settings UI), not by this interface.
pub trait CredentialStore: Send + Sync {
    fn get(&self, host_id: Uuid, key: &str) -> Option<Vec<u8>>;
    fn put(&self, host_id: Uuid, key: &str, value: Vec<u8>);
    /// Drop every secret stored for a host.
    fn delete(&self, host_id: Uuid);
}

/// In-memory credential store for tests and headless composition roots.
#[derive(Default)]
pub struct MemoryCredentials {
    entries: RwLock<HashMap<(Uuid, String), Vec<u8>>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentials {
    fn get(&self, host_id: Uuid, key: &str) -> Option<Vec<u8>> {
        self.entries.read().get(&(host_id, key.to_string())).cloned()
    }

    fn put(&self, host_id: Uuid, key: &str, value: Vec<u8>) {
        self.entries.write().insert((host_id, key.to_string()), value);
    }

    fn delete(&self, host_id: Uuid) {
        self.entries.write().retain(|(id, _), _| *id != host_id);
    }
}

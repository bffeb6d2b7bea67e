//! Transport selection per host configuration

use std::sync::Arc;

use tracing::debug;

use super::{LocalSocketTransport, SshTunnelTransport, Transport};
use crate::credentials::{keys as credential_keys, CredentialStore};
use crate::error::{EngineError, Result};
use crate::hosts::{ConnectionKind, HostConfig};

/// Anything that can turn a host configuration into a transport.
///
/// [`ConnectionStrategy`] is the production implementation; tests inject
/// scripted factories.
pub trait TransportFactory: Send + Sync {
    fn availability(&self, host: &HostConfig) -> bool;
    fn build(&self, host: &HostConfig) -> Result<Arc<dyn Transport>>;
}

/// Chooses and constructs the transport for a host.
///
/// Selection is deterministic by connection kind; there is no fallback
/// search across kinds, and construction never probes the engine.
pub struct ConnectionStrategy {
    credentials: Arc<dyn CredentialStore>,
}

impl ConnectionStrategy {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }

    /// Whether the host looks reachable without touching the engine.
    pub fn availability(&self, host: &HostConfig) -> bool {
        match host.kind {
            ConnectionKind::LocalSocket => {
                let path = host.local_socket_path();
                match std::fs::metadata(&path) {
                    Ok(meta) => {
                        use std::os::unix::fs::FileTypeExt;
                        meta.file_type().is_socket()
                    }
                    Err(_) => false,
                }
            }
            ConnectionKind::SshTunnel => {
                let has_host = host.hostname.as_deref().map_or(false, |h| !h.is_empty());
                let has_user = host.ssh_user.as_deref().map_or(false, |u| !u.is_empty());
                has_host
                    && has_user
                    && self
                        .credentials
                        .get(host.id, credential_keys::SSH_PRIVATE_KEY)
                        .is_some()
            }
            ConnectionKind::TcpTls => {
                let has_endpoint = host.hostname.as_deref().map_or(false, |h| !h.is_empty())
                    && host.tcp_port.is_some();
                has_endpoint
                    && self
                        .credentials
                        .get(host.id, credential_keys::TLS_CLIENT_CERT)
                        .is_some()
                    && self
                        .credentials
                        .get(host.id, credential_keys::TLS_CLIENT_KEY)
                        .is_some()
            }
        }
    }

    /// Construct the transport for a host.
    pub fn build(&self, host: &HostConfig) -> Result<Arc<dyn Transport>> {
        debug!(host = %host.name, kind = ?host.kind, "Building transport");
        match host.kind {
            ConnectionKind::LocalSocket => Ok(Arc::new(LocalSocketTransport::new(
                host.local_socket_path(),
            ))),
            ConnectionKind::SshTunnel => Ok(Arc::new(SshTunnelTransport::new(
                host,
                self.credentials.clone(),
            )?)),
            ConnectionKind::TcpTls => Err(EngineError::NotImplemented(
                "tcp-tls engine connections".into(),
            )),
        }
    }
}

impl TransportFactory for ConnectionStrategy {
    fn availability(&self, host: &HostConfig) -> bool {
        ConnectionStrategy::availability(self, host)
    }

    fn build(&self, host: &HostConfig) -> Result<Arc<dyn Transport>> {
        ConnectionStrategy::build(self, host)
    }
}

//! Transport tunneled through an SSH session
//!
//! Authenticates to the remote host with a private key fetched from the
//! credential store, then opens a `direct-streamlocal@openssh.com` channel
//! to the engine socket (or `direct-tcpip` when the engine listens on a
//! TCP port). One SSH session is kept per transport; each request gets its
//! own channel, which then behaves exactly like the local socket under the
//! shared HTTP codec.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh_keys::key;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::httpcodec::{self, REQUEST_TIMEOUT};
use super::{Request, Response, Transport};
use crate::credentials::{keys as credential_keys, CredentialStore};
use crate::error::{EngineError, Result};
use crate::hosts::HostConfig;

/// What the forwarded channel connects to on the remote side.
#[derive(Debug, Clone)]
enum TunnelTarget {
    /// Engine UNIX socket path on the remote host
    StreamLocal(String),
    /// Engine TCP port on the remote host
    Tcp(u16),
}

struct TunnelHandler;

#[async_trait]
impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Trust-on-first-use fingerprint persistence is reserved for the
        // host-key interface; until it lands the key is accepted.
        Ok(true)
    }
}

/// Reaches a remote engine socket through an authenticated SSH session.
pub struct SshTunnelTransport {
    host_id: uuid::Uuid,
    hostname: String,
    ssh_port: u16,
    ssh_user: String,
    target: TunnelTarget,
    credentials: Arc<dyn CredentialStore>,
    session: Mutex<Option<Arc<client::Handle<TunnelHandler>>>>,
}

impl std::fmt::Debug for SshTunnelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTunnelTransport")
            .field("host_id", &self.host_id)
            .field("hostname", &self.hostname)
            .field("ssh_port", &self.ssh_port)
            .field("ssh_user", &self.ssh_user)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl SshTunnelTransport {
    /// Prepare the transport from a host configuration. Does not connect.
    pub fn new(host: &HostConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let hostname = host
            .hostname
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                EngineError::InvalidConfiguration("ssh host requires a hostname".into())
            })?;
        let ssh_user = host
            .ssh_user
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                EngineError::InvalidConfiguration("ssh host requires a login user".into())
            })?;
        let target = match host.tcp_port {
            Some(port) => TunnelTarget::Tcp(port),
            None => TunnelTarget::StreamLocal(host.remote_socket()),
        };
        Ok(Self {
            host_id: host.id,
            hostname,
            ssh_port: host.ssh_port,
            ssh_user,
            target,
            credentials,
            session: Mutex::new(None),
        })
    }

    fn load_keypair(&self) -> Result<key::KeyPair> {
        let pem = self
            .credentials
            .get(self.host_id, credential_keys::SSH_PRIVATE_KEY)
            .ok_or_else(|| {
                EngineError::InvalidConfiguration(format!(
                    "no ssh private key stored for host {}",
                    self.hostname
                ))
            })?;
        let pem = String::from_utf8(pem).map_err(|_| {
            EngineError::InvalidConfiguration("stored ssh key is not valid utf-8".into())
        })?;
        let passphrase = self
            .credentials
            .get(self.host_id, credential_keys::SSH_PASSPHRASE)
            .and_then(|p| String::from_utf8(p).ok());

        russh_keys::decode_secret_key(&pem, passphrase.as_deref())
            .map_err(|e| EngineError::InvalidConfiguration(format!("unusable ssh key: {e}")))
    }

    async fn connect(&self) -> Result<Arc<client::Handle<TunnelHandler>>> {
        let config = Arc::new(client::Config::default());
        let addr = (self.hostname.as_str(), self.ssh_port);

        debug!(host = %self.hostname, port = self.ssh_port, "Opening SSH session");
        let mut handle = client::connect(config, addr, TunnelHandler)
            .await
            .map_err(|e| {
                EngineError::ConnectionFailed(format!(
                    "ssh connect to {}:{} failed: {e}",
                    self.hostname, self.ssh_port
                ))
            })?;

        let keypair = self.load_keypair()?;
        let authenticated = handle
            .authenticate_publickey(self.ssh_user.clone(), Arc::new(keypair))
            .await
            .map_err(|e| EngineError::ConnectionFailed(format!("ssh auth exchange failed: {e}")))?;
        if !authenticated {
            warn!(host = %self.hostname, user = %self.ssh_user, "SSH key rejected");
            return Err(EngineError::Unauthorized);
        }

        info!(host = %self.hostname, user = %self.ssh_user, "SSH session established");
        Ok(Arc::new(handle))
    }

    /// The cached session, reconnecting if it has been closed.
    async fn session(&self) -> Result<Arc<client::Handle<TunnelHandler>>> {
        let mut guard = self.session.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
            debug!(host = %self.hostname, "SSH session lost, reconnecting");
            *guard = None;
        }
        let handle = self.connect().await?;
        *guard = Some(handle.clone());
        Ok(handle)
    }

    async fn open_channel(
        &self,
        handle: &client::Handle<TunnelHandler>,
    ) -> Result<russh::Channel<client::Msg>> {
        let result = match &self.target {
            TunnelTarget::StreamLocal(path) => {
                handle.channel_open_direct_streamlocal(path.as_str()).await
            }
            TunnelTarget::Tcp(port) => {
                handle
                    .channel_open_direct_tcpip("127.0.0.1", *port as u32, "127.0.0.1", 0)
                    .await
            }
        };
        result.map_err(|e| {
            EngineError::ConnectionFailed(format!(
                "could not reach engine socket on {}: {e}",
                self.hostname
            ))
        })
    }
}

#[async_trait]
impl Transport for SshTunnelTransport {
    async fn request(&self, req: Request, cancel: CancellationToken) -> Result<Response> {
        let deadline = Instant::now() + REQUEST_TIMEOUT;

        let setup = async {
            let handle = self.session().await?;
            match self.open_channel(&handle).await {
                Ok(channel) => Ok(channel),
                Err(e) => {
                    // A dead session surfaces as a channel-open failure;
                    // drop the cache so the next request reconnects.
                    self.session.lock().await.take();
                    Err(e)
                }
            }
        };

        let channel = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            res = tokio::time::timeout_at(deadline, setup) => match res {
                Err(_) => return Err(EngineError::Timeout),
                Ok(ch) => ch?,
            },
        };

        debug!(host = %self.hostname, method = req.method, target = %req.target(), "engine request via ssh");
        httpcodec::exchange(Box::new(channel.into_stream()), &req, cancel).await
    }
}

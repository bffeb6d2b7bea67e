//! Host configuration records

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the engine socket is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionKind {
    /// UNIX-domain socket on this machine
    LocalSocket,
    /// Remote UNIX-domain socket forwarded through an SSH session
    SshTunnel,
    /// Remote TCP endpoint with mutual TLS; declared but not yet buildable
    TcpTls,
}

/// Which runtime the host runs; only affects default socket paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Docker,
    Podman,
}

impl EngineKind {
    /// Default local socket path for the runtime.
    pub fn default_socket_path(&self) -> PathBuf {
        match self {
            EngineKind::Docker => PathBuf::from("/var/run/docker.sock"),
            EngineKind::Podman => PathBuf::from("/run/podman/podman.sock"),
        }
    }

    /// Default socket path on a remote host reached over SSH.
    pub fn default_remote_socket_path(&self) -> String {
        match self {
            EngineKind::Docker => "/var/run/docker.sock".to_string(),
            EngineKind::Podman => "/run/podman/podman.sock".to_string(),
        }
    }
}

const DEFAULT_SSH_PORT: u16 = 22;

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// One configured engine host.
///
/// The id is assigned locally at creation and never changes; it is the key
/// under which credentials are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub id: Uuid,
    /// Display name shown in the host picker
    pub name: String,
    pub kind: ConnectionKind,
    #[serde(default = "EngineKind::docker_default")]
    pub engine: EngineKind,

    /// Local socket path; `None` uses the runtime default
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Remote hostname (ssh-tunnel, tcp-tls)
    #[serde(default)]
    pub hostname: Option<String>,
    /// SSH login user
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Engine socket path on the remote host; `None` uses the runtime default
    #[serde(default)]
    pub remote_socket_path: Option<String>,

    /// Engine TCP port (tcp-tls)
    #[serde(default)]
    pub tcp_port: Option<u16>,
}

impl EngineKind {
    fn docker_default() -> Self {
        EngineKind::Docker
    }
}

impl HostConfig {
    /// A local-socket host with runtime defaults.
    pub fn local(name: impl Into<String>, engine: EngineKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: ConnectionKind::LocalSocket,
            engine,
            socket_path: None,
            hostname: None,
            ssh_user: None,
            ssh_port: DEFAULT_SSH_PORT,
            remote_socket_path: None,
            tcp_port: None,
        }
    }

    /// An SSH-tunneled host.
    pub fn ssh(
        name: impl Into<String>,
        hostname: impl Into<String>,
        user: impl Into<String>,
        engine: EngineKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: ConnectionKind::SshTunnel,
            engine,
            socket_path: None,
            hostname: Some(hostname.into()),
            ssh_user: Some(user.into()),
            ssh_port: DEFAULT_SSH_PORT,
            remote_socket_path: None,
            tcp_port: None,
        }
    }

    /// The local socket path, falling back to the runtime default.
    pub fn local_socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| self.engine.default_socket_path())
    }

    /// The remote socket path, falling back to the runtime default.
    pub fn remote_socket(&self) -> String {
        self.remote_socket_path
            .clone()
            .unwrap_or_else(|| self.engine.default_remote_socket_path())
    }
}

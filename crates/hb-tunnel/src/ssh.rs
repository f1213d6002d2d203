//! SSH local port forwarding
//!
//! Binds an ephemeral port on the loopback interface and forwards every
//! accepted socket over a `direct-tcpip` channel to the database server, as
//! seen from the SSH host.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::Disconnect;
use russh_keys::key::PublicKey;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use hb_core::config::TunnelConfig;
use hb_core::traits::TunnelFactory;
use hb_protocol::settings::LOOPBACK_HOST;
use hb_protocol::{ConnectionSettings, SshAuthMethod, TunnelWorkerRef};

use crate::error::TunnelError;
use crate::worker::{Tunnel, TunnelConnector, TunnelWorker};

/// How often a listening tunnel checks whether the SSH session is still up
const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns tunnel workers backed by [`SshConnector`]
#[derive(Debug, Clone, Default)]
pub struct SshTunnelFactory {
    config: TunnelConfig,
}

impl SshTunnelFactory {
    /// Create a factory using the given tunnel configuration
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }
}

impl TunnelFactory for SshTunnelFactory {
    fn spawn(&self, settings: ConnectionSettings) -> TunnelWorkerRef {
        TunnelWorker::spawn(SshConnector::new(self.config.clone()), &settings)
    }
}

/// Opens SSH sessions and local listeners
pub struct SshConnector {
    config: TunnelConfig,
}

impl SshConnector {
    /// Create a new connector
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }

    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        settings: &ConnectionSettings,
    ) -> Result<(), TunnelError> {
        let ssh = &settings.ssh;
        tracing::debug!("Authenticating as user '{}'", ssh.user_name);

        let authenticated = match ssh.auth_method {
            SshAuthMethod::Password => session
                .authenticate_password(
                    ssh.user_name.as_str(),
                    ssh.effective_secret().unwrap_or_default(),
                )
                .await
                .map_err(|e| TunnelError::Ssh(format!("Authentication error: {}", e)))?,
            SshAuthMethod::PublicKey => {
                let path = ssh
                    .private_key_file
                    .as_ref()
                    .ok_or_else(|| TunnelError::KeyNotFound {
                        path: String::new(),
                        message: "no private key configured".to_string(),
                    })?;

                if !path.exists() {
                    return Err(TunnelError::KeyNotFound {
                        path: path.display().to_string(),
                        message: "File does not exist".to_string(),
                    });
                }

                let key = russh_keys::load_secret_key(path, ssh.effective_secret()).map_err(
                    |e| TunnelError::KeyNotFound {
                        path: path.display().to_string(),
                        message: format!("Failed to load key: {}", e),
                    },
                )?;

                session
                    .authenticate_publickey(ssh.user_name.as_str(), Arc::new(key))
                    .await
                    .map_err(|e| TunnelError::Ssh(format!("Authentication error: {}", e)))?
            }
        };

        if authenticated {
            Ok(())
        } else {
            Err(TunnelError::AuthRejected)
        }
    }
}

#[async_trait]
impl TunnelConnector for SshConnector {
    type Tunnel = SshTunnel;

    async fn establish(&mut self, settings: &ConnectionSettings) -> Result<SshTunnel, TunnelError> {
        let address = format!("{}:{}", settings.ssh.host, settings.ssh.port);
        tracing::debug!("Opening SSH session to {}", address);

        let listener = TcpListener::bind((LOOPBACK_HOST, 0)).await?;
        let local_port = listener.local_addr()?.port();

        let handler = ClientHandler::new(self.config.host_key.clone());
        let mut session = tokio::time::timeout(
            self.config.connect_timeout,
            client::connect(Arc::new(Config::default()), address.as_str(), handler),
        )
        .await
        .map_err(|_| TunnelError::Timeout(address.clone()))?
        .map_err(|e| {
            let err_str = e.to_string();
            if err_str.contains("server key") {
                return TunnelError::HostKeyRejected {
                    message: format!("Host key of {} was rejected", address),
                };
            }
            TunnelError::Ssh(format!("Failed to connect to {}: {}", address, e))
        })?;

        Self::authenticate(&mut session, settings).await?;

        tracing::info!(
            "SSH tunnel created: 127.0.0.1:{} -> {} via {}",
            local_port,
            settings.full_address(),
            address
        );

        Ok(SshTunnel {
            session: Arc::new(session),
            listener,
            local_port,
            remote_host: settings.server_host.clone(),
            remote_port: settings.server_port,
        })
    }
}

/// An authenticated SSH session with its local listener
pub struct SshTunnel {
    session: Arc<Handle<ClientHandler>>,
    listener: TcpListener,
    local_port: u16,
    remote_host: String,
    remote_port: u16,
}

#[async_trait]
impl Tunnel for SshTunnel {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn listen(&mut self, cancel: CancellationToken) -> Result<(), TunnelError> {
        let mut session_check = tokio::time::interval(SESSION_CHECK_INTERVAL);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (socket, peer) = accepted?;
                    tokio::spawn(forward(
                        Arc::clone(&self.session),
                        socket,
                        peer,
                        self.remote_host.clone(),
                        self.remote_port,
                        cancel.child_token(),
                    ));
                }
                _ = session_check.tick() => {
                    if self.session.is_closed() {
                        tracing::info!("SSH session behind port {} closed", self.local_port);
                        return Ok(());
                    }
                }
                _ = cancel.cancelled() => {
                    let _ = self
                        .session
                        .disconnect(Disconnect::ByApplication, "closing", "en")
                        .await;
                    return Ok(());
                }
            }
        }
    }
}

/// Copy one local socket through a `direct-tcpip` channel
async fn forward(
    session: Arc<Handle<ClientHandler>>,
    mut socket: TcpStream,
    peer: SocketAddr,
    remote_host: String,
    remote_port: u16,
    cancel: CancellationToken,
) {
    let channel = match session
        .channel_open_direct_tcpip(
            remote_host.as_str(),
            remote_port as u32,
            peer.ip().to_string(),
            peer.port() as u32,
        )
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            tracing::warn!(
                "Failed to open forwarding channel to {}:{}: {}",
                remote_host,
                remote_port,
                e
            );
            return;
        }
    };

    let mut stream = channel.into_stream();

    tokio::select! {
        result = tokio::io::copy_bidirectional(&mut socket, &mut stream) => match result {
            Ok((sent, received)) => {
                tracing::trace!("Forwarded {} bytes up, {} bytes down for {}", sent, received, peer);
            }
            Err(e) => {
                tracing::debug!("Forwarding for {} ended: {}", peer, e);
            }
        },
        _ = cancel.cancelled() => {}
    }
}

/// SSH client handler for tunnel sessions
struct ClientHandler {
    /// Expected host key fingerprint
    expected_host_key: Option<String>,
}

impl ClientHandler {
    fn new(expected_host_key: Option<String>) -> Self {
        Self { expected_host_key }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key: {}", fingerprint);

        match &self.expected_host_key {
            Some(expected) if *expected != fingerprint => {
                tracing::warn!(
                    "Host key differs from configured: expected {}, got {}",
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

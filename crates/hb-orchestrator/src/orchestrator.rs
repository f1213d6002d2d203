//! Orchestrator state machine
//!
//! The [`Orchestrator`] exclusively owns every server handle, shell session
//! and pending tunnel. Opening a tunnelled connection is a multi-step
//! exchange with a dedicated tunnel worker:
//!
//! ```text
//! open_connection ──► EstablishTunnelRequest ──► worker
//!                                                  │
//! handle_event ◄── EstablishTunnelResponse ◄───────┘
//!   └─ continue_open, then ListenTunnelRequest ──► worker
//!                                                  │
//! handle_event ◄── ListenTunnelResponse ◄──────────┘ (tunnel stopped)
//! ```
//!
//! Every step may fail or be cancelled; failures are published as
//! `ConnectionFailed` events and never leave a half-registered handle behind.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use hb_core::traits::{TransportFactory, TunnelFactory, UserNotifier};
use hb_core::{CredentialRequest, OrchestratorStatus};
use hb_protocol::{
    ConnectionSettings, ConnectionState, ConnectionType, CursorPosition, EstablishTunnelRequest,
    EstablishTunnelResponse, Event, FailureReason, Inbound, ListenTunnelRequest,
    ListenTunnelResponse, ScriptInfo, ServerHandleId, ShellId, TransportEvent, TunnelRequest,
    TunnelWorkerRef,
};

use crate::bus::EventBus;
use crate::credentials::{apply_credential, credential_requests};
use crate::notify::handle_log;
use crate::server::ServerHandle;
use crate::shell::{build_collection_query, ShellSession};

/// Where a pending tunnel is in its exchange with the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelPhase {
    /// Establish request sent, waiting for the local port
    Requested,
    /// Server opened through the tunnel, worker is forwarding
    Listening,
}

/// A tunnel worker serving one server handle
#[derive(Debug, Clone)]
pub struct PendingTunnel {
    pub worker: TunnelWorkerRef,
    pub phase: TunnelPhase,
    pub connection_type: ConnectionType,
}

/// Owner of all connections, shells and tunnels
pub struct Orchestrator {
    bus: EventBus,
    transports: Arc<dyn TransportFactory>,
    tunnels: Arc<dyn TunnelFactory>,
    notifier: Arc<dyn UserNotifier>,
    last_server_handle: ServerHandleId,
    last_shell: ShellId,
    servers: HashMap<ServerHandleId, ServerHandle>,
    shells: HashMap<ShellId, ShellSession>,
    pending: HashMap<ServerHandleId, PendingTunnel>,
}

impl Orchestrator {
    pub fn new(
        bus: EventBus,
        transports: Arc<dyn TransportFactory>,
        tunnels: Arc<dyn TunnelFactory>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        Self {
            bus,
            transports,
            tunnels,
            notifier,
            last_server_handle: ServerHandleId::new(0),
            last_shell: ShellId::new(0),
            servers: HashMap::new(),
            shells: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// The bus this orchestrator publishes on
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Open a connection described by `settings`.
    ///
    /// Prompts through `prompt` for every secret the connection needs; a
    /// `None` answer cancels the open with no state change and no event.
    /// Returns `true` when the request was accepted, which includes a
    /// tunnelled connection that is still being negotiated.
    pub fn open_connection<F>(
        &mut self,
        settings: &ConnectionSettings,
        connection_type: ConnectionType,
        mut prompt: F,
    ) -> bool
    where
        F: FnMut(&CredentialRequest) -> Option<String>,
    {
        let mut settings = settings.clone();

        for request in credential_requests(&settings, connection_type) {
            match prompt(&request) {
                Some(secret) => apply_credential(&mut settings, request.kind, secret),
                None => {
                    tracing::info!(
                        "Opening '{}' cancelled at the {} prompt",
                        settings.connection_name,
                        request.kind
                    );
                    return false;
                }
            }
        }

        self.open_prepared(settings, connection_type)
    }

    /// Open a connection whose secrets have already been collected
    pub fn open_prepared(
        &mut self,
        settings: ConnectionSettings,
        connection_type: ConnectionType,
    ) -> bool {
        if let Some(server) = self.open_server_internal(&settings, connection_type) {
            self.servers.insert(server.id(), server);
        }
        true
    }

    /// Allocate a handle id and start opening a server.
    ///
    /// Returns the handle when no tunnel is involved. Otherwise a tunnel
    /// worker is asked to establish the tunnel and `None` is returned; the
    /// handle appears once the worker answers.
    pub fn open_server_internal(
        &mut self,
        settings: &ConnectionSettings,
        connection_type: ConnectionType,
    ) -> Option<ServerHandle> {
        self.last_server_handle = self.last_server_handle.next();
        let handle = self.last_server_handle;

        if connection_type == ConnectionType::Primary {
            self.bus.publish(Event::Connecting {
                handle,
                connection_name: settings.connection_name.clone(),
            });
        }

        if !connection_type.may_tunnel() || !settings.uses_tunnel() {
            return Some(self.continue_open(handle, settings, connection_type, None));
        }

        let tunnel_settings = settings.clone();
        let worker = self.tunnels.spawn(tunnel_settings.clone());
        let request = EstablishTunnelRequest {
            requester: self.bus.requester(),
            handle,
            worker: worker.clone(),
            settings: tunnel_settings,
            connection_type,
        };

        if !EventBus::send(&worker.requests, TunnelRequest::Establish(request)) {
            self.fire_connection_failed(
                handle,
                connection_type,
                "SSH tunnel worker is not running".to_string(),
                FailureReason::SshConnection,
            );
            return None;
        }

        tracing::info!(
            "Creating SSH tunnel to {}:{}...",
            settings.ssh.host,
            settings.ssh.port
        );

        self.pending.insert(
            handle,
            PendingTunnel {
                worker,
                phase: TunnelPhase::Requested,
                connection_type,
            },
        );
        None
    }

    /// Build the server handle for `handle` and start connecting.
    ///
    /// With a `local_port`, Primary and Test connections to a single server
    /// are pointed at the local end of their tunnel. The caller's settings
    /// are never modified.
    pub fn continue_open(
        &self,
        handle: ServerHandleId,
        settings: &ConnectionSettings,
        connection_type: ConnectionType,
        local_port: Option<u16>,
    ) -> ServerHandle {
        let mut effective = settings.clone();
        if let Some(port) = local_port {
            if connection_type.may_prompt() && settings.uses_tunnel() {
                effective.redirect_to_tunnel(port);
            }
        }

        let mut server = ServerHandle::start(
            handle,
            effective,
            connection_type,
            self.transports.as_ref(),
            self.bus.requester(),
        );

        tracing::info!("Connecting to {}...", settings.display_address());
        server.try_connect();
        server
    }

    /// Close a server and release everything tied to it.
    ///
    /// Also cancels a tunnel still being negotiated for `handle` and closes
    /// a shell running on it. Returns `false` if nothing was owned under
    /// that id.
    pub fn close_server(&mut self, handle: ServerHandleId) -> bool {
        let cancelled = self.cancel_pending(handle);
        self.bus.unroute_source(handle);

        let Some(server) = self.servers.remove(&handle) else {
            return cancelled;
        };
        drop(server);
        self.bus.publish(Event::ServerClosed { handle });

        let orphaned: Vec<ShellId> = self
            .shells
            .values()
            .filter(|session| session.server() == handle)
            .map(|session| session.id())
            .collect();
        for shell in orphaned {
            self.shells.remove(&shell);
            self.bus.unroute_shell(shell);
            self.bus.publish(Event::ShellClosed { shell });
        }
        true
    }

    /// Open a shell running `find({})` on a collection
    pub fn open_collection_shell(
        &mut self,
        server: ServerHandleId,
        database: &str,
        collection: &str,
        save_path: Option<PathBuf>,
    ) -> Option<ShellId> {
        let mut script = ScriptInfo::new(build_collection_query(collection, "find({})"))
            .executed()
            .on_database(database)
            .titled(database)
            .at(CursorPosition::new(0, -2));
        if let Some(path) = save_path {
            script = script.saved_to(path);
        }

        self.open_shell_from(server, Some(database), script)
    }

    /// Open a shell on a server. The default database only changes when
    /// the script names one.
    pub fn open_server_shell(
        &mut self,
        server: ServerHandleId,
        script: ScriptInfo,
    ) -> Option<ShellId> {
        let database = (!script.database.is_empty()).then(|| script.database.clone());
        self.open_shell_from(server, database.as_deref(), script)
    }

    /// Open a shell on one database of a server
    pub fn open_database_shell(
        &mut self,
        server: ServerHandleId,
        database: &str,
        script: ScriptInfo,
    ) -> Option<ShellId> {
        let script = script.on_database(database);
        self.open_shell_from(server, Some(database), script)
    }

    fn open_shell_from(
        &mut self,
        origin: ServerHandleId,
        database: Option<&str>,
        script: ScriptInfo,
    ) -> Option<ShellId> {
        let settings = match self.servers.get_mut(&origin) {
            Some(server) => {
                if let Some(database) = database {
                    server.settings_mut().default_database = database.to_string();
                }
                server.settings().clone()
            }
            None => {
                tracing::debug!("{} is not open, dropping shell request", origin);
                return None;
            }
        };

        self.open_shell(origin, &settings, script)
    }

    /// Open a shell on its own Secondary connection cloned from `settings`.
    ///
    /// Nothing is created if `origin` is not owned, e.g. because its tunnel
    /// is still being negotiated.
    pub fn open_shell(
        &mut self,
        origin: ServerHandleId,
        settings: &ConnectionSettings,
        script: ScriptInfo,
    ) -> Option<ShellId> {
        let secondary = self.open_server_internal(settings, ConnectionType::Secondary)?;

        if !self.servers.contains_key(&origin) {
            tracing::debug!(
                "{} is not open, dropping {} opened for a shell",
                origin,
                secondary.id()
            );
            return None;
        }

        self.last_shell = self.last_shell.next();
        let id = self.last_shell;
        let server_id = secondary.id();

        let mut shell = ShellSession::new(id, server_id, script);
        self.servers.insert(server_id, secondary);
        self.bus.route_refresh(origin, id);
        self.bus.publish(Event::OpeningShell {
            shell: id,
            server: server_id,
            title: shell.title().to_string(),
        });

        if let Some(server) = self.servers.get_mut(&server_id) {
            shell.execute(server);
        }
        self.shells.insert(id, shell);

        tracing::info!("Opened {} on {}", id, server_id);
        Some(id)
    }

    /// Close a shell and its server. Shells not owned here are ignored.
    pub fn close_shell(&mut self, shell: ShellId) -> bool {
        let Some(session) = self.shells.remove(&shell) else {
            return false;
        };

        self.close_server(session.server());
        self.bus.unroute_shell(shell);
        self.bus.publish(Event::ShellClosed { shell });
        true
    }

    /// Cancel the tunnel worker serving `handle`.
    ///
    /// Responses the worker still sends for that id are ignored.
    pub fn cancel_pending(&mut self, handle: ServerHandleId) -> bool {
        match self.pending.remove(&handle) {
            Some(pending) => {
                tracing::info!("Cancelling SSH tunnel for {}", handle);
                pending.worker.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Publish a `ConnectionFailed` event
    pub fn fire_connection_failed(
        &self,
        handle: ServerHandleId,
        connection_type: ConnectionType,
        message: String,
        reason: FailureReason,
    ) {
        tracing::warn!("{} ({}) failed: {}", handle, connection_type, message);
        self.bus.publish(Event::ConnectionFailed {
            handle,
            connection_type,
            message,
            reason,
        });
    }

    /// React to a message from a worker
    pub fn handle_event(&mut self, message: Inbound) {
        match message {
            Inbound::EstablishTunnel(response) => self.on_tunnel_established(response),
            Inbound::ListenTunnel(response) => self.on_tunnel_stopped(response),
            Inbound::Transport(event) => self.on_transport_event(event),
            Inbound::Log(event) => handle_log(&event, self.notifier.as_ref()),
        }
    }

    fn on_tunnel_established(&mut self, response: EstablishTunnelResponse) {
        let handle = response.handle;
        let worker = match self.pending.get(&handle) {
            Some(pending) if pending.phase == TunnelPhase::Requested => pending.worker.clone(),
            _ => {
                tracing::debug!("Ignoring tunnel response for {}", handle);
                return;
            }
        };

        if let Some(error) = response.error {
            self.pending.remove(&handle);
            worker.cancel.cancel();
            self.fire_connection_failed(
                handle,
                response.connection_type,
                error,
                FailureReason::SshConnection,
            );
            return;
        }

        tracing::info!("SSH tunnel created successfully");

        let server = self.continue_open(
            handle,
            &response.settings,
            response.connection_type,
            Some(response.local_port),
        );
        self.servers.insert(handle, server);

        let request = ListenTunnelRequest {
            requester: self.bus.requester(),
            handle,
            connection_type: response.connection_type,
        };

        if EventBus::send(&worker.requests, TunnelRequest::Listen(request)) {
            if let Some(pending) = self.pending.get_mut(&handle) {
                pending.phase = TunnelPhase::Listening;
            }
        } else {
            self.pending.remove(&handle);
            self.fire_connection_failed(
                handle,
                response.connection_type,
                "SSH tunnel worker stopped".to_string(),
                FailureReason::SshChannel,
            );
        }
    }

    fn on_tunnel_stopped(&mut self, response: ListenTunnelResponse) {
        let handle = response.handle;
        if self.pending.remove(&handle).is_none() {
            tracing::debug!("Ignoring tunnel response for {}", handle);
            return;
        }

        match response.error {
            Some(error) => self.fire_connection_failed(
                handle,
                response.connection_type,
                error,
                FailureReason::SshChannel,
            ),
            None => tracing::error!("SSH tunnel closed."),
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged {
                handle,
                state,
                error,
            } => {
                let Some(server) = self.servers.get_mut(&handle) else {
                    tracing::debug!("Ignoring state change of released {}", handle);
                    return;
                };
                server.set_state(state);
                let connection_type = server.connection_type();

                self.bus.publish(Event::ServerStateChanged {
                    handle,
                    connection_type,
                    state,
                });

                if state == ConnectionState::Failed {
                    self.fire_connection_failed(
                        handle,
                        connection_type,
                        error.unwrap_or_else(|| "Connection failed".to_string()),
                        FailureReason::Other,
                    );
                }
            }
            TransportEvent::ReplicaSetRefreshed { handle } => {
                let forwarded = self.bus.forward_refresh(handle);
                tracing::debug!("Replica set of {} refreshed, {} shells notified", handle, forwarded);
            }
            TransportEvent::ScriptFinished { shell, error } => {
                let Some(session) = self.shells.get_mut(&shell) else {
                    tracing::debug!("Ignoring script result of closed {}", shell);
                    return;
                };
                session.finish(error.as_deref());
                self.bus.publish(Event::ScriptFinished { shell, error });
            }
        }
    }

    /// Release every shell, server and pending tunnel
    pub fn shutdown(&mut self) {
        let pending: Vec<ServerHandleId> = self.pending.keys().copied().collect();
        for handle in pending {
            self.cancel_pending(handle);
        }

        let shells: Vec<ShellId> = self.shells.keys().copied().collect();
        for shell in shells {
            self.close_shell(shell);
        }

        let servers: Vec<ServerHandleId> = self.servers.keys().copied().collect();
        for handle in servers {
            self.close_server(handle);
        }
    }

    pub fn server(&self, handle: ServerHandleId) -> Option<&ServerHandle> {
        self.servers.get(&handle)
    }

    pub fn server_mut(&mut self, handle: ServerHandleId) -> Option<&mut ServerHandle> {
        self.servers.get_mut(&handle)
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerHandle> {
        self.servers.values()
    }

    pub fn shell(&self, shell: ShellId) -> Option<&ShellSession> {
        self.shells.get(&shell)
    }

    pub fn shells(&self) -> impl Iterator<Item = &ShellSession> {
        self.shells.values()
    }

    pub fn pending_tunnel(&self, handle: ServerHandleId) -> Option<&PendingTunnel> {
        self.pending.get(&handle)
    }

    /// Snapshot of the owned collections
    pub fn status(&self) -> OrchestratorStatus {
        let last = self.last_server_handle;
        OrchestratorStatus {
            server_count: self.servers.len(),
            shell_count: self.shells.len(),
            pending_tunnels: self.pending.len(),
            last_handle: (last.as_u64() > 0).then_some(last),
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for pending in self.pending.values() {
            pending.worker.cancel.cancel();
        }
    }
}

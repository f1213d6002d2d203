//! Orchestrator service
//!
//! Runs the [`Orchestrator`] inside one tokio task. Callers talk to it
//! through cloneable [`OrchestratorHandle`]s; workers talk to it through
//! the event bus inbox. Credential prompts are awaited on their own task so
//! the service keeps handling events while the user types. Opens queue
//! behind an unanswered prompt, so handle ids follow request order.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use hb_core::config::HarborConfig;
use hb_core::traits::{CredentialPrompt, TransportFactory, TunnelFactory, UserNotifier};
use hb_core::error::{ConnectionError, ShellError};
use hb_core::{CredentialKind, CredentialRequest, HbError, OrchestratorStatus};
use hb_protocol::{
    ConnectionSettings, ConnectionType, Event, Inbound, ScriptInfo, ServerHandleId, ShellId,
};

use crate::bus::EventBus;
use crate::credentials::{apply_credential, credential_requests};
use crate::orchestrator::Orchestrator;

enum Command {
    OpenConnection {
        settings: ConnectionSettings,
        connection_type: ConnectionType,
        reply: oneshot::Sender<bool>,
    },
    CloseServer {
        handle: ServerHandleId,
        reply: oneshot::Sender<bool>,
    },
    CancelPending {
        handle: ServerHandleId,
        reply: oneshot::Sender<bool>,
    },
    OpenCollectionShell {
        server: ServerHandleId,
        database: String,
        collection: String,
        save_path: Option<PathBuf>,
        reply: oneshot::Sender<Option<ShellId>>,
    },
    OpenServerShell {
        server: ServerHandleId,
        script: ScriptInfo,
        reply: oneshot::Sender<Option<ShellId>>,
    },
    OpenDatabaseShell {
        server: ServerHandleId,
        database: String,
        script: ScriptInfo,
        reply: oneshot::Sender<Option<ShellId>>,
    },
    CloseShell {
        shell: ShellId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<OrchestratorStatus>,
    },
}

struct OpenRequest {
    settings: ConnectionSettings,
    connection_type: ConnectionType,
    reply: oneshot::Sender<bool>,
}

/// A prompted open coming back to the service. `answers` is `None` when
/// the user cancelled one of the prompts.
struct Resume {
    request: OpenRequest,
    answers: Option<Vec<(CredentialKind, String)>>,
}

/// Task owning the orchestrator
pub struct OrchestratorService {
    orchestrator: Orchestrator,
    prompt: Arc<dyn CredentialPrompt>,
    commands: mpsc::Receiver<Command>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    resumes: mpsc::UnboundedReceiver<Resume>,
    resume_tx: mpsc::UnboundedSender<Resume>,
    waiting: VecDeque<OpenRequest>,
    prompting: bool,
    shutdown: CancellationToken,
}

impl OrchestratorService {
    /// Create the service and its first handle
    pub fn new(
        config: &HarborConfig,
        transports: Arc<dyn TransportFactory>,
        tunnels: Arc<dyn TunnelFactory>,
        prompt: Arc<dyn CredentialPrompt>,
        notifier: Arc<dyn UserNotifier>,
        shutdown: CancellationToken,
    ) -> (Self, OrchestratorHandle) {
        let (bus, inbox) = EventBus::new(config.event_capacity);
        let (command_tx, commands) = mpsc::channel(config.command_capacity);
        let (resume_tx, resumes) = mpsc::unbounded_channel();

        let handle = OrchestratorHandle {
            commands: command_tx,
            events: bus.event_sender(),
        };

        let service = Self {
            orchestrator: Orchestrator::new(bus, transports, tunnels, notifier),
            prompt,
            commands,
            inbox,
            resumes,
            resume_tx,
            waiting: VecDeque::new(),
            prompting: false,
            shutdown,
        };
        (service, handle)
    }

    /// Serve commands and worker messages until shutdown or until every
    /// handle is dropped, then release all connections
    pub async fn run(mut self) {
        tracing::info!("Orchestrator service started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Orchestrator service shutting down...");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(resume) = self.resumes.recv() => self.resume(resume),
                Some(message) = self.inbox.recv() => self.orchestrator.handle_event(message),
            }
        }

        self.orchestrator.shutdown();
        tracing::info!("Orchestrator service stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::OpenConnection {
                settings,
                connection_type,
                reply,
            } => {
                self.waiting.push_back(OpenRequest {
                    settings,
                    connection_type,
                    reply,
                });
                self.start_waiting_opens();
            }
            Command::CloseServer { handle, reply } => {
                let _ = reply.send(self.orchestrator.close_server(handle));
            }
            Command::CancelPending { handle, reply } => {
                let _ = reply.send(self.orchestrator.cancel_pending(handle));
            }
            Command::OpenCollectionShell {
                server,
                database,
                collection,
                save_path,
                reply,
            } => {
                let shell = self.orchestrator.open_collection_shell(
                    server,
                    &database,
                    &collection,
                    save_path,
                );
                let _ = reply.send(shell);
            }
            Command::OpenServerShell {
                server,
                script,
                reply,
            } => {
                let _ = reply.send(self.orchestrator.open_server_shell(server, script));
            }
            Command::OpenDatabaseShell {
                server,
                database,
                script,
                reply,
            } => {
                let shell = self
                    .orchestrator
                    .open_database_shell(server, &database, script);
                let _ = reply.send(shell);
            }
            Command::CloseShell { shell, reply } => {
                let _ = reply.send(self.orchestrator.close_shell(shell));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.orchestrator.status());
            }
        }
    }

    /// Start queued opens in request order, stopping at the first one
    /// that has to prompt
    fn start_waiting_opens(&mut self) {
        while !self.prompting {
            let Some(request) = self.waiting.pop_front() else {
                return;
            };

            let prompts = credential_requests(&request.settings, request.connection_type);
            if prompts.is_empty() {
                let opened = self
                    .orchestrator
                    .open_prepared(request.settings, request.connection_type);
                let _ = request.reply.send(opened);
            } else {
                self.prompting = true;
                self.spawn_prompts(request, prompts);
            }
        }
    }

    fn spawn_prompts(&self, request: OpenRequest, prompts: Vec<CredentialRequest>) {
        let prompt = Arc::clone(&self.prompt);
        let resumes = self.resume_tx.clone();

        tokio::spawn(async move {
            let mut answers = Vec::with_capacity(prompts.len());
            for pending in &prompts {
                match prompt.prompt_secret(pending).await {
                    Some(secret) => answers.push((pending.kind, secret)),
                    None => {
                        tracing::info!(
                            "Opening '{}' cancelled at the {} prompt",
                            request.settings.connection_name,
                            pending.kind
                        );
                        let _ = resumes.send(Resume {
                            request,
                            answers: None,
                        });
                        return;
                    }
                }
            }

            // A failed send drops the reply, which the caller sees as a stopped service
            let _ = resumes.send(Resume {
                request,
                answers: Some(answers),
            });
        });
    }

    fn resume(&mut self, resume: Resume) {
        self.prompting = false;

        let OpenRequest {
            mut settings,
            connection_type,
            reply,
        } = resume.request;

        let opened = match resume.answers {
            Some(answers) => {
                for (kind, secret) in answers {
                    apply_credential(&mut settings, kind, secret);
                }
                self.orchestrator.open_prepared(settings, connection_type)
            }
            None => false,
        };
        let _ = reply.send(opened);

        self.start_waiting_opens();
    }
}

/// Cloneable client of a running [`OrchestratorService`]
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
}

impl OrchestratorHandle {
    /// Subscribe to published events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Open a connection, prompting for secrets if needed.
    ///
    /// `Ok(false)` means the user cancelled a prompt. `Ok(true)` means the
    /// request was accepted; the outcome arrives as events. Incomplete
    /// settings are rejected before anything is queued.
    pub async fn open_connection(
        &self,
        settings: &ConnectionSettings,
        connection_type: ConnectionType,
    ) -> Result<bool, HbError> {
        settings.validate()?;
        let settings = settings.clone();
        self.request(|reply| Command::OpenConnection {
            settings,
            connection_type,
            reply,
        })
        .await
    }

    /// Release a server, along with a shell running on it
    pub async fn close_server(&self, handle: ServerHandleId) -> Result<(), HbError> {
        if self
            .request(|reply| Command::CloseServer { handle, reply })
            .await?
        {
            Ok(())
        } else {
            Err(ConnectionError::ServerNotFound(handle).into())
        }
    }

    /// Cancel a tunnel that is still being negotiated or forwarding
    pub async fn cancel_pending(&self, handle: ServerHandleId) -> Result<(), HbError> {
        if self
            .request(|reply| Command::CancelPending { handle, reply })
            .await?
        {
            Ok(())
        } else {
            Err(ConnectionError::NotPending(handle).into())
        }
    }

    pub async fn open_collection_shell(
        &self,
        server: ServerHandleId,
        database: impl Into<String>,
        collection: impl Into<String>,
        save_path: Option<PathBuf>,
    ) -> Result<ShellId, HbError> {
        let database = database.into();
        let collection = collection.into();
        self.request(|reply| Command::OpenCollectionShell {
            server,
            database,
            collection,
            save_path,
            reply,
        })
        .await?
        .ok_or_else(|| ConnectionError::ServerNotFound(server).into())
    }

    pub async fn open_server_shell(
        &self,
        server: ServerHandleId,
        script: ScriptInfo,
    ) -> Result<ShellId, HbError> {
        self.request(|reply| Command::OpenServerShell {
            server,
            script,
            reply,
        })
        .await?
        .ok_or_else(|| ConnectionError::ServerNotFound(server).into())
    }

    pub async fn open_database_shell(
        &self,
        server: ServerHandleId,
        database: impl Into<String>,
        script: ScriptInfo,
    ) -> Result<ShellId, HbError> {
        let database = database.into();
        self.request(|reply| Command::OpenDatabaseShell {
            server,
            database,
            script,
            reply,
        })
        .await?
        .ok_or_else(|| ConnectionError::ServerNotFound(server).into())
    }

    /// Close a shell together with its secondary server
    pub async fn close_shell(&self, shell: ShellId) -> Result<(), HbError> {
        if self
            .request(|reply| Command::CloseShell { shell, reply })
            .await?
        {
            Ok(())
        } else {
            Err(ShellError::NotFound(shell).into())
        }
    }

    pub async fn status(&self) -> Result<OrchestratorStatus, HbError> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HbError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| HbError::ServiceStopped)?;
        response.await.map_err(|_| HbError::ServiceStopped)
    }
}

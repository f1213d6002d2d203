//! Harbor orchestrator
//!
//! Opens one connection profile, optionally through an SSH tunnel, and
//! prints every published event as a line of JSON until interrupted.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hb_core::config::{self, HarborConfig};
use hb_core::traits::CredentialPrompt;
use hb_core::error::ConfigError;
use hb_core::{CredentialRequest, HbError};
use hb_orchestrator::notify::StderrNotifier;
use hb_orchestrator::transport::TcpTransportFactory;
use hb_orchestrator::{OrchestratorHandle, OrchestratorService};
use hb_protocol::settings::DEFAULT_SERVER_PORT;
use hb_protocol::{ConnectionSettings, ConnectionState, ConnectionType, Event, ScriptInfo};
use hb_tunnel::SshTunnelFactory;

#[derive(Parser)]
#[command(name = "hb-orchestrator")]
#[command(about = "Harbor connection orchestrator")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connection profile to open
    #[arg(short = 'n', long)]
    connection: Option<String>,

    /// Server host for an ad-hoc connection (instead of a profile)
    #[arg(long)]
    host: Option<String>,

    /// Server port for an ad-hoc connection
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Only test that the connection can be established, then exit
    #[arg(long)]
    test: bool,

    /// Script to run in a shell once connected
    #[arg(short, long)]
    shell: Option<String>,

    /// Database the shell script runs against
    #[arg(short, long)]
    database: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Reads secrets from standard input
struct StdinPrompt;

#[async_trait]
impl CredentialPrompt for StdinPrompt {
    async fn prompt_secret(&self, request: &CredentialRequest) -> Option<String> {
        let title = request.title.clone();
        let text = request.text.clone();

        tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "== {} ==\n{}", title, text);
            let _ = stderr.flush();

            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            }
        })
        .await
        .ok()
        .flatten()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Harbor orchestrator starting...");

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                HarborConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            HarborConfig::default()
        }
    };
    config.validate().context("Invalid configuration")?;

    let settings = connection_settings(&args, &config)?;
    settings
        .validate()
        .with_context(|| format!("Invalid connection '{}'", settings.connection_name))?;

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let (service, handle) = OrchestratorService::new(
        &config,
        Arc::new(TcpTransportFactory::new(&config.transport)),
        Arc::new(SshTunnelFactory::new(config.tunnel.clone())),
        Arc::new(StdinPrompt),
        Arc::new(StderrNotifier),
        cancel.clone(),
    );
    let service_task = tokio::spawn(service.run());

    let connection_type = if args.test {
        ConnectionType::Test
    } else {
        ConnectionType::Primary
    };

    let mut events = handle.subscribe();
    if !handle.open_connection(&settings, connection_type).await? {
        tracing::info!("Connection cancelled");
        cancel.cancel();
        service_task.await?;
        return Ok(());
    }

    let mut outcome = Ok(());
    let mut shell_opened = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Skipped {} events", skipped);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                println!("{}", serde_json::to_string(&event)?);

                match handle_event(&handle, &args, connection_type, &event, &mut shell_opened).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    service_task.await?;

    tracing::info!("Harbor orchestrator shutdown complete");
    outcome
}

/// Settings from the selected profile or the ad-hoc host
fn connection_settings(args: &Args, config: &HarborConfig) -> Result<ConnectionSettings, HbError> {
    if let Some(name) = &args.connection {
        return Ok(config.connection(name)?.clone());
    }
    if let Some(host) = &args.host {
        return Ok(ConnectionSettings::new(host.clone(), host.clone(), args.port));
    }
    Err(ConfigError::Invalid("either --connection or --host is required".to_string()).into())
}

/// React to a published event. Returns `Ok(false)` when the binary is done.
async fn handle_event(
    handle: &OrchestratorHandle,
    args: &Args,
    connection_type: ConnectionType,
    event: &Event,
    shell_opened: &mut bool,
) -> Result<bool> {
    match event {
        Event::ServerStateChanged {
            handle: server,
            connection_type: kind,
            state: ConnectionState::Connected,
        } if *kind == connection_type => {
            if args.test {
                tracing::info!("Connection test succeeded");
                return Ok(false);
            }

            if let Some(script) = &args.shell {
                if !*shell_opened {
                    let mut info = ScriptInfo::new(script.clone()).executed().titled("shell");
                    if let Some(database) = &args.database {
                        info = info.on_database(database.clone()).titled(database.clone());
                    }
                    handle.open_server_shell(*server, info).await?;
                    *shell_opened = true;
                }
            }
            Ok(true)
        }

        Event::ConnectionFailed {
            connection_type: kind,
            message,
            ..
        } if *kind == connection_type => {
            bail!("Connection failed: {}", message)
        }

        _ => Ok(true),
    }
}

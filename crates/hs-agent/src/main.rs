//! hoststream agent daemon
//!
//! Registers this host with the coordinator, listens for session commands,
//! and streams launched programs to remote viewers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hs_agent::auth::{AccessCredential, AuthClient, TokenRefresher};
use hs_agent::capture::FfmpegCapture;
use hs_agent::host::{ensure_registered, Registration};
use hs_agent::input::{default_injector, InputDispatcher};
use hs_agent::programs::{ProcessLauncher, StaticCatalog};
use hs_agent::server::{self, AppState};
use hs_agent::session::{SessionOrchestrator, SessionParts};
use hs_agent::status::{CoordinatorStatusPublisher, StatusReporter};
use hs_agent::transport::WebRtcTransportFactory;
use hs_agent::Lifecycle;
use hs_core::config::{self, HostConfig};
use hs_core::{EventBus, StateStore, StatusSignal};

#[derive(Parser)]
#[command(name = "hs-agent")]
#[command(about = "hoststream agent - streams local programs to remote viewers")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Coordinator base URL (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// Control-plane listen address, e.g. 0.0.0.0:8080
    #[arg(short, long)]
    listen: Option<String>,

    /// Refresh token to bootstrap with when none is stored
    #[arg(long, env = "HOSTSTREAM_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("hoststream agent starting...");

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut config: HostConfig = if config_path.exists() {
        config::load_config(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
            HostConfig::default()
        })
    } else {
        tracing::info!("No config at {:?}, using defaults", config_path);
        HostConfig::default()
    };

    if let Some(server) = args.server {
        config.server_address = server;
    }
    if let Some(listen) = args.listen {
        config.listen_address = listen;
    }
    config.validate().context("Invalid configuration")?;

    // Binding is the first fatal step so a busy port fails fast
    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_address))?;
    let port = listener
        .local_addr()
        .map(|addr| addr.port())
        .or_else(|_| config.listen_port())
        .context("Failed to determine listen port")?;

    let store = StateStore::new(config.state_file());
    let mut state = store.load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable state file {:?}: {}", store.path(), e);
        Default::default()
    });

    let credential = match (args.refresh_token, state.credential.clone()) {
        (Some(token), Some(stored)) if stored.refresh_token == token => stored.into(),
        (Some(token), _) => AccessCredential::from_refresh_token(token),
        (None, Some(stored)) if !stored.refresh_token.is_empty() => stored.into(),
        _ => anyhow::bail!(
            "No refresh token available. Pass --refresh-token or set HOSTSTREAM_REFRESH_TOKEN."
        ),
    };

    let events = EventBus::new();
    let client = Arc::new(
        AuthClient::new(
            &config.server_address,
            credential,
            &config.auth,
            events.clone(),
        )
        .context("Failed to create coordinator client")?,
    );
    tracing::info!("Coordinator at {}", client.base_url());

    let registration = Registration::new(config.display_name(), config.advertise_ip.as_deref(), port);
    let identity = ensure_registered(&client, &registration, state.host.as_ref(), &events)
        .await
        .context("Failed to register host with coordinator")?;
    state.host = Some(identity.clone());
    state.credential = Some((&client.credential().await).into());
    if let Err(e) = store.save(&state) {
        tracing::warn!("Failed to save state: {}", e);
    }

    let transports =
        WebRtcTransportFactory::new(config.transport.clone()).context("Failed to set up WebRTC")?;

    let orchestrator = SessionOrchestrator::new(SessionParts {
        catalog: Arc::new(StaticCatalog::new(config.programs.clone())),
        launcher: Arc::new(ProcessLauncher),
        capture: Arc::new(FfmpegCapture::new(config.video.clone())),
        transports: Arc::new(transports),
        input: InputDispatcher::new(default_injector()),
        events: events.clone(),
        setup_timeout: config.transport.setup_timeout,
    });
    tracing::info!("{} program(s) available", orchestrator.programs().len());

    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
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

    let reporter = Arc::new(StatusReporter::new(
        Arc::new(CoordinatorStatusPublisher::new(client.clone(), identity.id.clone())),
        Arc::new(orchestrator.clone()),
        config.status.heartbeat_interval,
        &cancel,
        events.clone(),
    ));
    let reporter_task = reporter.start();
    reporter.update_status(StatusSignal::Available);

    let refresher = TokenRefresher::spawn(client.clone(), config.auth.refresh_check_interval, &cancel);

    let lifecycle = Lifecycle::new(reporter.clone(), store.clone(), state);
    let lifecycle_task = tokio::spawn(lifecycle.run(events.subscribe(), cancel.clone()));

    let mut server_task = tokio::spawn(server::serve(
        listener,
        AppState::new(orchestrator.clone()),
        cancel.clone(),
    ));

    tokio::select! {
        _ = cancel.cancelled() => {}
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("Control plane stopped"),
                Ok(Err(e)) => tracing::error!("Control plane failed: {}", e),
                Err(e) => tracing::error!("Control plane task failed: {}", e),
            }
            cancel.cancel();
        }
    }

    tracing::info!("Shutting down...");

    if let Some(info) = orchestrator.end_session().await {
        tracing::info!("Ended session {} on shutdown", info.id);
    }

    reporter.stop();
    if let Some(task) = reporter_task {
        let _ = task.await;
    }
    reporter.send_now(StatusSignal::Offline).await;

    refresher.shutdown().await;
    if !server_task.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(5), server_task).await;
    }

    match lifecycle_task.await {
        Ok(mut state) => {
            state.credential = Some((&client.credential().await).into());
            if let Err(e) = store.save(&state) {
                tracing::warn!("Failed to save state: {}", e);
            }
        }
        Err(e) => tracing::warn!("Event loop task failed: {}", e),
    }

    tracing::info!("hoststream agent stopped");
    Ok(())
}

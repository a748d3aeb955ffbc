//! Tandem server binary — the main entry point for the notification hub.
//!
//! Starts the axum listeners with structured logging, wires the hub, the
//! event bridge, and the peer-site links, and shuts down gracefully on
//! SIGTERM/SIGINT.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use tandem_federation::RemoteSites;
use tandem_hub::{Authentication, Authorization, Hub, UserDirectory};
use tandem_server::directory::Directory;
use tandem_server::{app, background, config, AppState, EVENT_BUS_CAPACITY};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TANDEM_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // One directory instance backs all three collaborator seams.
    let directory = Arc::new(Directory::from_config(&config));
    let auth: Arc<dyn Authentication> = directory.clone();
    let authz: Arc<dyn Authorization> = directory.clone();
    let users: Arc<dyn UserDirectory> = directory;

    let hub = Arc::new(Hub::new(
        auth,
        authz,
        users,
        config.broadcast.mask.clone(),
        config.broadcast.ownership_aware,
    ));
    let sites = Arc::new(RemoteSites::new(config.sites.clone()));
    let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

    let state = AppState { hub, sites, events };

    background::spawn_all(&state, config.backoff.policy());

    let app = app(state);

    // Serve every configured address; the original deployment exposed the
    // same engine on two ports.
    let mut servers = Vec::new();
    for addr in &config.server.listen {
        tracing::info!(%addr, "starting tandem server listener");
        let listener = TcpListener::bind(addr)
            .await
            .expect("failed to bind to address — is another process using this port?");
        let app = app.clone();
        servers.push(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .expect("server error");
        }));
    }

    for server in servers {
        let _ = server.await;
    }

    tracing::info!("tandem server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}

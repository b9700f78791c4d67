use std::sync::Arc;

use tokio::net::TcpListener;

use sockgate_server::auth::jwt::{load_or_generate_session_secret, JwtSessionStore};
use sockgate_server::config::{generate_config_template, Config};
use sockgate_server::routes;
use sockgate_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("sockgate_server=info,tower_http=info")
            })
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter()).init();
    }

    tracing::info!("sockgate server v{} starting", env!("CARGO_PKG_VERSION"));

    // Session tokens are issued by the login service sharing this key
    let secret = load_or_generate_session_secret(&config.data_dir)?;
    let sessions = Arc::new(JwtSessionStore::new(secret));

    let app_state = AppState::new(sessions, config.socket_settings());
    let app = routes::build_router(app_state.clone());

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(app_state))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM, after closing every registered connection
/// and clearing the registry.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    let closed = state.shutdown();
    tracing::info!(connections = closed, "Shutdown requested, connections closed");
}

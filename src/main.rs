//! starchart server binary.

use starchart::config::{Settings, StoreKind};
use starchart::routes::app;
use starchart::store::{ensure_database_exists, ensure_tables, MemoryBackend, PgBackend};
use starchart::AppState;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("starchart=info,tower_http=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let state = match settings.store {
        StoreKind::Postgres => {
            ensure_database_exists(&settings.database_url).await?;
            let backend = PgBackend::connect(&settings.database_url, settings.max_connections).await?;
            ensure_tables(backend.pool()).await?;
            AppState::new(backend)
        }
        StoreKind::Memory => AppState::new(MemoryBackend::new()),
    };

    let router = app(state, &settings);
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(store = ?settings.store, "starchart listening on http://{}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::warn!("received SIGTERM, shutting down"),
    }
}

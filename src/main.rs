use std::sync::Arc;

use dayflow::server::{RemoteStore, SyncRouteState, sync_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let db_path =
        std::env::var("DAYFLOW_DB_PATH").unwrap_or_else(|_| "./data/dayflow.db".to_string());
    let port: u16 = std::env::var("DAYFLOW_PORT")
        .unwrap_or_else(|_| "8787".to_string())
        .parse()
        .unwrap_or(8787);

    eprintln!("dayflow sync endpoint v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", db_path);
    eprintln!("   Push: POST http://0.0.0.0:{}/sync/push", port);
    eprintln!("   Pull: GET  http://0.0.0.0:{}/sync/pull", port);

    let store = Arc::new(
        RemoteStore::open(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );

    let app = sync_routes(SyncRouteState { store });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "Sync endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}

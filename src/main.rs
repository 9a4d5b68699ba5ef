use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use whois_gateway::{build_router, AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "whois_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config = Arc::new(Config::load()?);
    info!("Configuration loaded successfully");

    let state = AppState::new(config.clone());
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!("WHOIS gateway listening on {}", addr);
    info!("Health check: http://{}/health", addr);

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, gracefully shutting down...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    Ok(())
}

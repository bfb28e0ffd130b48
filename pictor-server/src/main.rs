// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Pictor — content-addressed image proxy CDN
//
//  Tiers:   in-process/Redis edge → filesystem/S3 store → origin fetch
//  Config:  YAML + environment (fatal validation at startup)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use pictor_core::PictorConfig;
use pictor_server::server;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pictor", version, about = "Pictor — content-addressed image proxy CDN")]
struct Cli {
    /// Path to configuration file (defaults to pictor.yaml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Config (fatal on invalid) ──
    let config = PictorConfig::load(cli.config.as_deref().and_then(|p| p.to_str()))?;

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Pictor starting");

    // ── State & router ──
    let addr = config.bind_addr();
    let backend = config.backend_name();
    let state = server::build_state(config).await?;
    let app = server::build_router(state);

    // ── Serve ──
    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
    info!(addr = %addr, storage = backend, "Pictor is ready — serving traffic");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Pictor stopped");
    Ok(())
}

/// SIGTERM (docker stop) + SIGINT (Ctrl+C).
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received, stopping...");
}

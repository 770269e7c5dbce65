use std::net::SocketAddr;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docusafe::{build_router, config::Config, services::sweep, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let app = build_router(state.clone())?;

    if config.expiry_sweep_secs > 0 {
        let store = state.store.clone();
        let every = Duration::from_secs(config.expiry_sweep_secs);
        tokio::spawn(sweep::run_expiry_sweep(store, every));
        tracing::info!(
            "✅ Background expiry sweep started (runs every {}s)",
            config.expiry_sweep_secs
        );
    } else {
        tracing::info!("ℹ️ Expiry sweep disabled; expired links burn on their next access");
    }

    let addr = config.bind_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ All systems operational");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

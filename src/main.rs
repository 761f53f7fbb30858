use std::sync::Arc;

use mediabridge::{
    config::Config,
    server::{create_router, AppState},
    sync::Reconciler,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediabridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let reconciler = Arc::new(Reconciler::new(config.clone()));

    // First pass before serving traffic; the media server may still be
    // coming up, so a failure here only delays convergence by one tick.
    if let Err(err) = reconciler.try_sync().await {
        tracing::warn!("initial sync failed: {}", err);
    }
    tokio::spawn(reconciler.run());

    tracing::info!("Starting mediabridge server on {}", config.listen);

    let app = create_router(AppState::new(config.clone()));

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

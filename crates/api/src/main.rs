use anyhow::Context;

use genflow_api::app::{self, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    genflow_observability::init();

    let config = AppConfig::from_env();
    let app = app::build_app(&config).context("failed to build services")?;

    let addr = std::env::var("GENFLOW_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

//! `hms-api-rest`: serves the REST router without the background alert refresh.
//!
//! Handy while working on handlers or the OpenAPI document. Production deployments run
//! `hms-run`, which also regenerates stock alerts on a timer.

use api_rest::{router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the HMS REST API server
///
/// # Environment Variables
/// - `HMS_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - everything read by [`AppState::from_env`]
///
/// # Errors
/// Fails on a bad tracing directive, invalid configuration, an unopenable database, or
/// when the listener cannot bind.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("hms_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("HMS_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let state = AppState::from_env()?;

    tracing::info!("-- Starting HMS REST API on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

use chrono::Utc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use hms_core::AlertService;

/// Default period between stock alert regenerations.
const DEFAULT_ALERT_INTERVAL_SECS: u64 = 3600;

/// Main entry point for the HMS application
///
/// Runs two tasks concurrently:
/// - the REST server on port 3000 (configurable via HMS_REST_ADDR)
/// - a stock alert refresher that rebuilds unresolved alerts at startup and then periodically
///
/// # Environment Variables
/// - `HMS_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `HMS_ALERT_INTERVAL_SECS`: seconds between alert regenerations (default: 3600)
/// - database and mobile-money settings, see `api_rest::AppState::from_env`
///
/// # Returns
/// * `Ok(())` - If the server shuts down cleanly
/// * `Err(anyhow::Error)` - If startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hms_run=info".parse()?)
                .add_directive("hms_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("HMS_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let alert_interval = alert_interval_from_env_value(std::env::var("HMS_ALERT_INTERVAL_SECS").ok())?;

    let state = AppState::from_env()?;
    let alerts = state.alerts.clone();

    tracing::info!("++ Starting HMS REST on {}", rest_addr);
    tracing::info!(
        "++ Regenerating stock alerts every {}s",
        alert_interval.as_secs()
    );

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    let rest_server = async move { axum::serve(listener, router(state)).await };

    tokio::select! {
        result = rest_server => result?,
        () = refresh_alerts(alerts, alert_interval) => {}
    }

    Ok(())
}

/// Rebuild unresolved alerts on every tick. The first tick fires immediately.
async fn refresh_alerts(alerts: AlertService, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match alerts.regenerate_alerts(Utc::now()) {
            Ok(raised) => tracing::info!(count = raised.len(), "stock alerts refreshed"),
            Err(e) => tracing::warn!(error = %e, "stock alert refresh failed"),
        }
    }
}

fn alert_interval_from_env_value(value: Option<String>) -> anyhow::Result<Duration> {
    let secs = match value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty()) {
        None => DEFAULT_ALERT_INTERVAL_SECS,
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| anyhow::anyhow!("HMS_ALERT_INTERVAL_SECS is not a number: {v}"))?,
    };
    anyhow::ensure!(secs > 0, "HMS_ALERT_INTERVAL_SECS must be positive");
    Ok(Duration::from_secs(secs))
}

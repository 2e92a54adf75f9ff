//! InfoReceiver Service — Binary Entrypoint
//! Boots the Axum HTTP server, the background intake worker, and the
//! monitoring loop.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use artslave_info_receiver::api::{self, AppState};
use artslave_info_receiver::config::InfoReceiverConfig;
use artslave_info_receiver::metrics::Metrics;
use artslave_info_receiver::monitor::Monitor;
use artslave_info_receiver::service::InfoReceiverService;
use artslave_info_receiver::store::Store;

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - INFO_RECEIVER_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("INFO_RECEIVER_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("artslave_info_receiver=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let config = InfoReceiverConfig::load().expect("failed to load configuration");

    let metrics = Metrics::init(config.queue.worker_interval_secs);

    let store = Arc::new(Store::new());
    let service = Arc::new(InfoReceiverService::new(config.clone(), Arc::clone(&store)));
    let monitor = Arc::new(Monitor::new(config.monitoring.clone(), Arc::clone(&store)));

    // background jobs: queue worker + metric collection
    Arc::clone(&service).spawn_worker();
    Arc::clone(&monitor).spawn();

    let state = AppState { service, monitor };
    let router = api::create_router(state).merge(metrics.router());

    Ok(router.into())
}

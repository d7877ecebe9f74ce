mod handlers;
mod monitor;
mod registry;
mod state;

use crate::state::{AppState, DEFAULT_JOB_RETENTION, DEFAULT_MAX_INSTANCES_PER_JOB};
use anyhow::Context;
use coordinator::CoordinatorConfig;
use std::{env, time::Duration};
use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_FRONTEND_ADDR: &str = "0.0.0.0:8030";
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 20;
const HEARTBEAT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const JOB_EVICTION_INTERVAL: Duration = Duration::from_secs(30);

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

fn heartbeat_timeout() -> Duration {
    Duration::from_secs(env_or(
        "BACKEND_HEARTBEAT_TIMEOUT_SECS",
        DEFAULT_HEARTBEAT_TIMEOUT_SECS,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frontend=debug,coordinator=debug,tower_http=info".into()),
        )
        .init();

    let coord_config = CoordinatorConfig::from_env();
    info!("configuración de coordinadores: {:?}", coord_config);
    let mut state = AppState::new(coord_config);
    state.max_instances_per_job =
        env_or("MAX_INSTANCES_PER_JOB", DEFAULT_MAX_INSTANCES_PER_JOB).max(1);
    let retention = Duration::from_secs(env_or(
        "JOB_RETENTION_SECS",
        DEFAULT_JOB_RETENTION.as_secs(),
    ));

    // router HTTP
    let app = handlers::build_router(state.clone());

    // monitor de heartbeats en segundo plano
    let registry = state.registry.clone();
    let timeout = heartbeat_timeout();
    tokio::spawn(async move {
        monitor::monitor_backends(registry, timeout, HEARTBEAT_SWEEP_INTERVAL).await;
    });

    // los jobs terminados se quedan `retention` para poder consultarlos
    tokio::spawn(monitor::evict_finished_jobs(
        state.clone(),
        retention,
        JOB_EVICTION_INTERVAL,
    ));

    let addr = env::var("FRONTEND_ADDR").unwrap_or_else(|_| DEFAULT_FRONTEND_ADDR.to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", addr))?;
    info!("frontend escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

use crate::registry::NodeRegistry;
use crate::state::AppState;
use chrono::Utc;
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::{debug, info};

/// Loop de heartbeats: marca muertos a los backends que dejaron de latir.
/// Los coordinadores se enteran a través de `NodeLivenessProvider`.
pub async fn monitor_backends(registry: Arc<NodeRegistry>, timeout: Duration, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let dead = registry.mark_stale_backends(SystemTime::now(), timeout);
        if !dead.is_empty() {
            info!("{} backend(s) marcados como muertos: {:?}", dead.len(), dead);
        }
    }
}

/// Limpieza periódica de jobs ya terminados.
pub async fn evict_finished_jobs(state: AppState, retention: Duration, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let evicted = state.evict_finished_jobs(Utc::now(), retention);
        if !evicted.is_empty() {
            debug!("{} job(s) terminados eliminados de memoria", evicted.len());
        }
    }
}

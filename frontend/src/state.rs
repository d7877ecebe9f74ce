use chrono::{DateTime, Utc};
use coordinator::{Coordinator, CoordinatorConfig, JobId};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::registry::NodeRegistry;

pub const DEFAULT_MAX_INSTANCES_PER_JOB: usize = 4_096;
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<Mutex<HashMap<JobId, Arc<Coordinator>>>>,
    pub registry: Arc<NodeRegistry>,
    pub coord_config: CoordinatorConfig,
    /// Tope de instancias que puede pedir un solo job
    pub max_instances_per_job: usize,
}

impl AppState {
    pub fn new(coord_config: CoordinatorConfig) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            registry: Arc::new(NodeRegistry::new()),
            coord_config,
            max_instances_per_job: DEFAULT_MAX_INSTANCES_PER_JOB,
        }
    }

    pub fn job(&self, id: &str) -> Option<Arc<Coordinator>> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(id).cloned()
    }

    pub fn insert_job(&self, coord: Arc<Coordinator>) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert(coord.job_id().to_string(), coord);
    }

    /// Saca los jobs que terminaron hace más de `retention`.
    /// Devuelve los ids eliminados.
    pub fn evict_finished_jobs(&self, now: DateTime<Utc>, retention: Duration) -> Vec<JobId> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());

        let expired: Vec<JobId> = jobs
            .iter()
            .filter(|(_, coord)| match coord.finished_at() {
                Some(at) => (now - at).to_std().unwrap_or(Duration::ZERO) >= retention,
                None => false,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            jobs.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator::{Collaborators, ExecutionDag, FragmentInstanceSpec, NodeAddress};
    use tokio::runtime::Handle;

    fn job(state: &AppState, id: &str) -> Arc<Coordinator> {
        let dag = ExecutionDag::build(vec![FragmentInstanceSpec {
            fragment_id: "f0".into(),
            host: NodeAddress::new("be0", 9060),
        }])
        .unwrap();
        let coord = Coordinator::new(
            id,
            "q",
            dag,
            CoordinatorConfig::default(),
            Collaborators {
                liveness: state.registry.clone(),
                dispatcher: state.registry.clone(),
                runtime: Handle::current(),
            },
        );
        state.insert_job(coord.clone());
        coord
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn solo_se_eliminan_jobs_terminados_y_vencidos() {
        let state = AppState::new(CoordinatorConfig::default());
        let done = job(&state, "terminado");
        job(&state, "en-curso");
        done.cancel("test");
        assert!(done.is_done());

        // dentro de la retención no se toca nada
        let evicted = state.evict_finished_jobs(Utc::now(), Duration::from_secs(3600));
        assert!(evicted.is_empty());
        assert!(state.job("terminado").is_some());

        let later = Utc::now() + chrono::Duration::seconds(10);
        let evicted = state.evict_finished_jobs(later, Duration::from_secs(5));
        assert_eq!(evicted, vec!["terminado".to_string()]);
        assert!(state.job("terminado").is_none());
        assert!(state.job("en-curso").is_some());
    }
}

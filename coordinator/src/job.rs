use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::load::AggregatedLoadMetadata;
use crate::status::ExecStatus;
use crate::unit::ExecutionUnit;

pub type JobId = String;

/// Petición de un job nuevo: lista de fragmentos y cuántas instancias de cada uno.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub fragments: Vec<FragmentRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentRequest {
    pub fragment_id: String,
    /// Instancias a desplegar de este fragmento
    pub parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

/// Vista serializable del estado de un job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub status: ExecStatus,
    pub done: bool,
    pub backend_healthy: bool,

    /// -------- Métricas del job --------
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_units: u32,
    pub finished_units: u32,
    pub failed_units: u32,
    pub cancelled_units: u32,

    pub executions: Vec<ExecutionUnit>,
    pub load: AggregatedLoadMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub done: bool,
    pub job: JobSnapshot,
}

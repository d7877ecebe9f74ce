use serde::{Deserialize, Serialize};

use crate::dispatch::CancelTarget;
use crate::instance::InstanceAssignment;

pub type BackendId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRegisterRequest {
    pub hostname: String,
    pub port: u16,
    pub max_concurrency: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRegisterResponse {
    pub backend_id: BackendId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHeartbeatRequest {
    pub backend_id: BackendId,
    #[serde(default)]
    pub cpu_percent: Option<f32>,
    #[serde(default)]
    pub mem_bytes: Option<u64>,
}

/// Respuesta al heartbeat: trae las órdenes de cancelación pendientes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHeartbeatResponse {
    pub ok: bool,
    #[serde(default)]
    pub cancel: Vec<CancelTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceAssignmentRequest {
    pub backend_id: BackendId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceAssignmentResponse {
    pub instance: Option<InstanceAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportExecStatusResponse {
    pub ok: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BackendMetrics {
    pub backend_id: BackendId,
    pub hostname: String,
    pub port: u16,
    pub alive: bool,
    pub max_concurrency: u32,
    pub last_heartbeat_secs_ago: u64,
    pub last_missing_heartbeat_time: Option<i64>,
    pub pending_instances: u32,
    pub instances_assigned: u64,
    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}

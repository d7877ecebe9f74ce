use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::unit::InstanceId;

/// Instancia asignada a un backend para que la ejecute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceAssignment {
    pub job_id: JobId,
    pub index_in_job: usize,
    pub instance_id: InstanceId,
    pub fragment_id: String,
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::job::JobId;
use crate::status::ExecStatus;
use crate::unit::InstanceId;

/// Nombres de contadores de carga que los backends suelen reportar.
pub const DPP_NORMAL_ALL: &str = "dpp.norm.ALL";
pub const DPP_ABNORMAL_ALL: &str = "dpp.abnorm.ALL";
pub const UNSELECTED_ROWS: &str = "unselected.rows";
pub const LOADED_BYTES: &str = "loaded.bytes";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletCommitInfo {
    pub tablet_id: i64,
    pub backend_id: i64,
}

impl TabletCommitInfo {
    pub fn new(tablet_id: i64, backend_id: i64) -> Self {
        Self {
            tablet_id,
            backend_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletFailInfo {
    #[serde(default)]
    pub tablet_id: Option<i64>,
    #[serde(default)]
    pub backend_id: Option<i64>,
}

/// Archivo confirmado por un sink externo (tablas de lago, export, etc.).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkCommitInfo {
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub is_overwrite: bool,
}

/// Mensaje entrante con el último estado conocido de una unidad de ejecución.
///
/// Se construye por cada mensaje de red y el coordinador lo consume; no se guarda.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Sólo para enrutar al coordinador correcto; el núcleo no lo mira.
    pub job_id: JobId,
    pub index_in_job: usize,
    pub done: bool,
    pub status: ExecStatus,

    /// Si viene, tiene que coincidir con la instancia actual de la unidad.
    #[serde(default)]
    pub instance_id: Option<InstanceId>,

    #[serde(default)]
    pub delta_urls: Vec<String>,
    #[serde(default)]
    pub tracking_url: Option<String>,
    #[serde(default)]
    pub export_files: Vec<String>,
    #[serde(default)]
    pub commit_infos: Vec<TabletCommitInfo>,
    #[serde(default)]
    pub fail_infos: Vec<TabletFailInfo>,
    #[serde(default)]
    pub rejected_record_path: Option<String>,
    #[serde(default)]
    pub sink_commit_infos: Vec<SinkCommitInfo>,
    /// Valores en decimal como texto, se suman al agregar.
    #[serde(default)]
    pub load_counters: HashMap<String, String>,
}

impl StatusReport {
    pub fn new(job_id: impl Into<JobId>, index_in_job: usize) -> Self {
        Self {
            job_id: job_id.into(),
            index_in_job,
            done: false,
            status: ExecStatus::ok(),
            instance_id: None,
            delta_urls: Vec::new(),
            tracking_url: None,
            export_files: Vec::new(),
            commit_infos: Vec::new(),
            fail_infos: Vec::new(),
            rejected_record_path: None,
            sink_commit_infos: Vec::new(),
            load_counters: HashMap::new(),
        }
    }

    pub fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    pub fn with_status(mut self, status: ExecStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<InstanceId>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_delta_urls(mut self, urls: Vec<String>) -> Self {
        self.delta_urls = urls;
        self
    }

    pub fn with_tracking_url(mut self, url: impl Into<String>) -> Self {
        self.tracking_url = Some(url.into());
        self
    }

    pub fn with_export_files(mut self, files: Vec<String>) -> Self {
        self.export_files = files;
        self
    }

    pub fn with_commit_infos(mut self, infos: Vec<TabletCommitInfo>) -> Self {
        self.commit_infos = infos;
        self
    }

    pub fn with_fail_infos(mut self, infos: Vec<TabletFailInfo>) -> Self {
        self.fail_infos = infos;
        self
    }

    pub fn with_rejected_record_path(mut self, path: impl Into<String>) -> Self {
        self.rejected_record_path = Some(path.into());
        self
    }

    pub fn with_sink_commit_infos(mut self, infos: Vec<SinkCommitInfo>) -> Self {
        self.sink_commit_infos = infos;
        self
    }

    pub fn with_load_counter(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.load_counters.insert(name.into(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporte_minimo_se_deserializa_con_defaults() {
        let json = r#"{
            "job_id": "j1",
            "index_in_job": 3,
            "done": true,
            "status": {"code": "OK"}
        }"#;
        let r: StatusReport = serde_json::from_str(json).unwrap();

        assert_eq!(r.index_in_job, 3);
        assert!(r.done);
        assert!(r.status.is_ok());
        assert!(r.instance_id.is_none());
        assert!(r.delta_urls.is_empty());
        assert!(r.load_counters.is_empty());
    }

    #[test]
    fn builder_llena_los_campos() {
        let r = StatusReport::new("j1", 0)
            .with_done(true)
            .with_tracking_url("http://track")
            .with_load_counter(LOADED_BYTES, 42);

        assert!(r.done);
        assert_eq!(r.tracking_url.as_deref(), Some("http://track"));
        assert_eq!(r.load_counters.get(LOADED_BYTES).map(String::as_str), Some("42"));
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::report::{SinkCommitInfo, StatusReport, TabletCommitInfo, TabletFailInfo};

/// Metadatos de carga acumulados durante la vida del job.
///
/// El coordinador llama a `merge` como mucho una vez por unidad (cuando pasa
/// a FINISHED), así que aquí no hay lógica de deduplicación salvo para las
/// rutas de registros rechazados, que son un conjunto.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedLoadMetadata {
    pub delta_urls: Vec<String>,
    pub tracking_url: Option<String>,
    pub export_files: Vec<String>,
    pub commit_infos: Vec<TabletCommitInfo>,
    pub fail_infos: Vec<TabletFailInfo>,
    pub rejected_record_paths: BTreeSet<String>,
    pub sink_commit_infos: Vec<SinkCommitInfo>,
    pub load_counters: BTreeMap<String, i64>,
}

impl AggregatedLoadMetadata {
    pub fn merge(&mut self, hostname: &str, report: &StatusReport) {
        self.delta_urls.extend(report.delta_urls.iter().cloned());

        // último en escribir gana
        if let Some(url) = &report.tracking_url {
            self.tracking_url = Some(url.clone());
        }

        self.export_files.extend(report.export_files.iter().cloned());
        self.commit_infos.extend(report.commit_infos.iter().cloned());
        self.fail_infos.extend(report.fail_infos.iter().cloned());
        self.sink_commit_infos
            .extend(report.sink_commit_infos.iter().cloned());

        if let Some(path) = &report.rejected_record_path {
            self.rejected_record_paths
                .insert(format!("{}:{}", hostname, path));
        }

        for (name, raw) in &report.load_counters {
            match raw.trim().parse::<i64>() {
                Ok(value) => {
                    let acc = self.load_counters.entry(name.clone()).or_insert(0);
                    *acc = acc.saturating_add(value);
                }
                Err(e) => {
                    warn!(
                        counter = %name,
                        value = %raw,
                        "contador de carga no numérico, se ignora: {}",
                        e
                    );
                }
            }
        }
    }

    pub fn rejected_record_paths(&self) -> Vec<String> {
        self.rejected_record_paths.iter().cloned().collect()
    }
}

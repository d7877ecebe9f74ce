use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::dag::ExecutionDag;
use crate::dispatch::{CancelDispatcher, CancelTarget, DispatchPool};
use crate::error::Result;
use crate::job::{JobId, JobSnapshot};
use crate::liveness::{self, NodeLivenessProvider};
use crate::load::AggregatedLoadMetadata;
use crate::report::{SinkCommitInfo, StatusReport, TabletCommitInfo, TabletFailInfo};
use crate::status::ExecStatus;
use crate::unit::{ExecutionUnit, NodeAddress, UnitState};
use crate::waiter::Monitor;

// Tope para timeouts que desbordan `Instant`.
const FOREVER: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Colaboradores externos que necesita un coordinador.
#[derive(Clone)]
pub struct Collaborators {
    pub liveness: Arc<dyn NodeLivenessProvider>,
    pub dispatcher: Arc<dyn CancelDispatcher>,
    /// Runtime donde corren el monitor de liveness y las cancelaciones remotas.
    pub runtime: Handle,
}

/// Estado del job; todo bajo un único candado.
struct JobState {
    dag: ExecutionDag,
    status: ExecStatus,
    /// Ya hubo un estado terminal (error o cancelación); no se sobreescribe.
    status_terminal: bool,
    done: bool,
    backend_healthy: bool,
    load: AggregatedLoadMetadata,
    started: bool,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    /// El primer estado terminal gana. Tampoco se toca si el job ya terminó.
    fn set_terminal_status(&mut self, status: ExecStatus) -> bool {
        if self.status_terminal || self.done {
            return false;
        }
        self.status = status;
        self.status_terminal = true;
        true
    }
}

/// Coordina la finalización de un job distribuido.
///
/// Recibe los reportes de estado de cada instancia, acumula los metadatos
/// de carga, decide cuándo el job está hecho y despierta a los hilos
/// bloqueados en `join`. También expone la cancelación y la detección de
/// backends caídos.
pub struct Coordinator {
    job_id: JobId,
    name: String,
    config: CoordinatorConfig,
    liveness: Arc<dyn NodeLivenessProvider>,
    dispatch: DispatchPool,
    state: Monitor<JobState>,
    monitor_started: AtomicBool,
}

impl Coordinator {
    pub fn new(
        job_id: impl Into<JobId>,
        name: impl Into<String>,
        dag: ExecutionDag,
        config: CoordinatorConfig,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let dispatch = DispatchPool::new(
            collaborators.runtime,
            collaborators.dispatcher,
            config.cancel_dispatch_parallelism,
        );

        Arc::new(Self {
            job_id: job_id.into(),
            name: name.into(),
            config,
            liveness: collaborators.liveness,
            dispatch,
            state: Monitor::new(JobState {
                dag,
                status: ExecStatus::ok(),
                status_terminal: false,
                done: false,
                backend_healthy: true,
                load: AggregatedLoadMetadata::default(),
                started: false,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
            }),
            monitor_started: AtomicBool::new(false),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marca las instancias como despachadas (RUNNING), guarda el estado de
    /// heartbeat de cada host y arranca el monitor de liveness.
    pub fn start_scheduling(self: &Arc<Self>) {
        let hosts: Vec<NodeAddress> = {
            let mut guard = self.state.lock();
            if guard.started {
                return;
            }
            guard.started = true;
            guard.started_at = Some(Utc::now());
            guard.dag.outstanding_hosts().into_iter().collect()
        };

        // fuera del candado: el proveedor tiene su propio lock
        let snapshots: HashMap<NodeAddress, Option<i64>> = hosts
            .into_iter()
            .map(|h| {
                let t = self.liveness.last_missing_heartbeat_time(&h);
                (h, t)
            })
            .collect();

        let running = {
            let mut guard = self.state.lock();
            let mut running = 0usize;
            for unit in guard.dag.executions_mut() {
                if unit.transition(UnitState::Running) {
                    unit.missing_heartbeat_snapshot =
                        snapshots.get(&unit.host).copied().flatten();
                    running += 1;
                }
            }
            running
        };

        info!(
            "job {} ({}) despachado: {} instancias en RUNNING",
            self.job_id, self.name, running
        );

        if !self.monitor_started.swap(true, Ordering::SeqCst) {
            liveness::spawn_liveness_monitor(
                self.dispatch.handle(),
                Arc::downgrade(self),
                self.config.liveness_check_interval,
            );
        }
    }

    /// Procesa un reporte de estado de una instancia.
    ///
    /// Nunca falla hacia el llamador: reportes de unidades desconocidas, de
    /// otra generación o repetidos para una unidad ya terminada se ignoran
    /// sin tocar nada.
    pub fn update_fragment_exec_status(&self, report: &StatusReport) {
        let mut cancels = Vec::new();

        {
            let mut guard = self.state.lock();
            let st = &mut *guard;

            let unit = match st.dag.execution_mut(report.index_in_job) {
                Ok(u) => u,
                Err(e) => {
                    debug!("job {}: reporte ignorado: {}", self.job_id, e);
                    return;
                }
            };

            if let Some(instance_id) = &report.instance_id {
                if instance_id != &unit.instance_id {
                    debug!(
                        "job {}: reporte de otra generación para la instancia {} (esperaba {}, llegó {})",
                        self.job_id, unit.index_in_job, unit.instance_id, instance_id
                    );
                    return;
                }
            }

            if unit.is_terminal() {
                debug!(
                    "job {}: reporte repetido para la instancia {} ya en {:?}",
                    self.job_id, unit.index_in_job, unit.state
                );
                return;
            }

            unit.touch_report();

            let failed = !report.status.is_ok();
            if failed {
                unit.transition(UnitState::Failed);
            } else if report.done {
                unit.transition(UnitState::Finished);
            } else {
                // progreso: sólo bookkeeping
                return;
            }
            let index_in_job = unit.index_in_job;
            let hostname = unit.host.hostname.clone();

            if failed {
                warn!(
                    "job {}: instancia {} en {} falló: {}",
                    self.job_id, index_in_job, hostname, report.status
                );
                let first = st.set_terminal_status(report.status.clone());
                if first && self.config.cancel_on_first_failure {
                    let reason = format!("instance {} failed: {}", index_in_job, report.status);
                    cancels = self.abort_outstanding(st, &reason);
                }
            } else {
                debug!(
                    "job {}: instancia {} en {} terminó",
                    self.job_id, index_in_job, hostname
                );
                st.load.merge(&hostname, report);
            }

            self.finish_if_complete(st);
        }

        self.dispatch.submit_all(cancels);
    }

    /// Cancela el job. Si ya estaba hecho no hace nada; si ya tenía un
    /// estado terminal lo conserva, pero igual aborta lo que siga corriendo.
    pub fn cancel(&self, reason: &str) {
        let cancels = {
            let mut guard = self.state.lock();
            let st = &mut *guard;

            if st.done {
                debug!("job {}: cancel ignorado, el job ya terminó", self.job_id);
                return;
            }

            if st.set_terminal_status(ExecStatus::cancelled(reason)) {
                info!("job {} cancelado: {}", self.job_id, reason);
            }

            let cancels = self.abort_outstanding(st, reason);
            self.finish_if_complete(st);
            cancels
        };

        self.dispatch.submit_all(cancels);
    }

    /// Revisa los hosts de las instancias pendientes. Si alguno está caído el
    /// job pasa a INTERNAL_ERROR y converge a hecho; a partir de entonces
    /// siempre devuelve `false`.
    pub fn check_backend_state(&self) -> bool {
        let outstanding: Vec<(NodeAddress, Option<i64>)> = {
            let guard = self.state.lock();
            if !guard.backend_healthy {
                return false;
            }
            if guard.done {
                return true;
            }
            let mut seen: HashMap<NodeAddress, Option<i64>> = HashMap::new();
            for unit in guard.dag.executions().iter().filter(|u| !u.is_terminal()) {
                let snap = unit.missing_heartbeat_snapshot;
                seen.entry(unit.host.clone())
                    .and_modify(|s| *s = (*s).max(snap))
                    .or_insert(snap);
            }
            let mut v: Vec<_> = seen.into_iter().collect();
            v.sort();
            v
        };

        let now_ms = Utc::now().timestamp_millis();
        let dead = outstanding.into_iter().find(|(host, snap)| {
            liveness::host_is_dead(
                self.liveness.as_ref(),
                host,
                *snap,
                self.config.liveness_grace_period,
                now_ms,
            )
        });

        let Some((dead_host, _)) = dead else {
            return true;
        };

        let cancels = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if !st.backend_healthy {
                return false;
            }
            if st.done {
                return true;
            }

            st.backend_healthy = false;
            let msg = format!("backend {} is down", dead_host.hostname);
            warn!("job {}: {}", self.job_id, msg);
            st.set_terminal_status(ExecStatus::internal_error(msg.clone()));

            for unit in st.dag.executions_mut() {
                if unit.host == dead_host {
                    unit.transition(UnitState::Failed);
                }
            }

            let cancels = self.abort_outstanding(st, &msg);
            self.finish_if_complete(st);
            cancels
        };

        self.dispatch.submit_all(cancels);
        false
    }

    /// Espera a que el job termine. Devuelve `true` si terminó antes de
    /// `timeout`. Con timeout cero mira una vez y vuelve.
    ///
    /// Espera en tramos de `join_poll_interval` y entre tramos revisa los
    /// backends, así un backend caído corta la espera.
    pub fn join(&self, timeout: Duration) -> bool {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FOREVER);

        loop {
            let chunk_deadline = deadline.min(Instant::now() + self.config.join_poll_interval);
            {
                let guard = self.state.lock();
                let (_guard, done) = self.state.wait_until(guard, chunk_deadline, |st| st.done);
                if done {
                    return true;
                }
            }

            if !self.check_backend_state() {
                return true;
            }

            if Instant::now() >= deadline {
                return false;
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    /// Momento en que el job quedó hecho.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().finished_at
    }

    pub fn exec_status(&self) -> ExecStatus {
        self.state.lock().status.clone()
    }

    pub fn all_indexes(&self) -> Vec<usize> {
        self.state.lock().dag.all_indexes()
    }

    pub fn execution(&self, index_in_job: usize) -> Result<ExecutionUnit> {
        self.state.lock().dag.execution(index_in_job).cloned()
    }

    pub fn unit_state(&self, index_in_job: usize) -> Result<UnitState> {
        self.state.lock().dag.execution(index_in_job).map(|u| u.state)
    }

    pub fn executions(&self) -> Vec<ExecutionUnit> {
        self.state.lock().dag.executions().to_vec()
    }

    pub fn load_metadata(&self) -> AggregatedLoadMetadata {
        self.state.lock().load.clone()
    }

    pub fn delta_urls(&self) -> Vec<String> {
        self.state.lock().load.delta_urls.clone()
    }

    pub fn tracking_url(&self) -> Option<String> {
        self.state.lock().load.tracking_url.clone()
    }

    pub fn export_files(&self) -> Vec<String> {
        self.state.lock().load.export_files.clone()
    }

    pub fn commit_infos(&self) -> Vec<TabletCommitInfo> {
        self.state.lock().load.commit_infos.clone()
    }

    pub fn fail_infos(&self) -> Vec<TabletFailInfo> {
        self.state.lock().load.fail_infos.clone()
    }

    pub fn rejected_record_paths(&self) -> Vec<String> {
        self.state.lock().load.rejected_record_paths()
    }

    pub fn sink_commit_infos(&self) -> Vec<SinkCommitInfo> {
        self.state.lock().load.sink_commit_infos.clone()
    }

    pub fn load_counters(&self) -> BTreeMap<String, i64> {
        self.state.lock().load.load_counters.clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let guard = self.state.lock();
        let count = |s: UnitState| {
            guard
                .dag
                .executions()
                .iter()
                .filter(|u| u.state == s)
                .count() as u32
        };

        JobSnapshot {
            id: self.job_id.clone(),
            name: self.name.clone(),
            status: guard.status.clone(),
            done: guard.done,
            backend_healthy: guard.backend_healthy,
            submitted_at: guard.submitted_at,
            started_at: guard.started_at,
            finished_at: guard.finished_at,
            total_units: guard.dag.len() as u32,
            finished_units: count(UnitState::Finished),
            failed_units: count(UnitState::Failed),
            cancelled_units: count(UnitState::Cancelled),
            executions: guard.dag.executions().to_vec(),
            load: guard.load.clone(),
        }
    }

    /// Pasa a CANCELLED todas las instancias sin terminar y devuelve las
    /// órdenes remotas a despachar (fuera del candado).
    fn abort_outstanding(&self, st: &mut JobState, reason: &str) -> Vec<CancelTarget> {
        let mut targets = Vec::new();
        for unit in st.dag.executions_mut() {
            if unit.transition(UnitState::Cancelled) {
                targets.push(CancelTarget {
                    job_id: self.job_id.clone(),
                    host: unit.host.clone(),
                    instance_id: unit.instance_id.clone(),
                    index_in_job: unit.index_in_job,
                    reason: reason.to_string(),
                });
            }
        }
        targets
    }

    fn finish_if_complete(&self, st: &mut JobState) {
        if st.done || !st.dag.all_terminal() {
            return;
        }
        st.done = true;
        st.finished_at = Some(Utc::now());
        info!("job {} terminado con estado {}", self.job_id, st.status);
        self.state.notify_all();
    }
}

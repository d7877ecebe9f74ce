use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use coordinator::{
    BackendHeartbeatRequest, BackendHeartbeatResponse, BackendMetrics, BackendRegisterRequest,
    BackendRegisterResponse, CancelRequest, Collaborators, Coordinator, ExecutionDag,
    FragmentInstanceSpec, InstanceAssignment, InstanceAssignmentRequest,
    InstanceAssignmentResponse, JobRequest, JobSnapshot, JoinResponse, ReportExecStatusResponse,
    StatusReport,
};
use serde::Deserialize;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(create_job))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/cancel", post(cancel_job))
        .route("/api/v1/jobs/:id/join", get(join_job))
        .route("/api/v1/report_exec_status", post(report_exec_status))
        .route("/api/v1/backends", get(list_backends))
        .route("/api/v1/backends/register", post(register_backend))
        .route("/api/v1/backends/heartbeat", post(backend_heartbeat))
        .route("/api/v1/instances/next", post(next_instance))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Crea un job: reparte las instancias entre los backends vivos y arranca su coordinador
async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobSnapshot>, StatusCode> {
    let total = req
        .fragments
        .iter()
        .try_fold(0usize, |acc, f| acc.checked_add(f.parallelism as usize));
    let total = match total {
        Some(0) => return Err(StatusCode::BAD_REQUEST),
        Some(t) if t <= state.max_instances_per_job => t,
        _ => {
            warn!(
                "job {} rechazado: pide más de {} instancias",
                req.name, state.max_instances_per_job
            );
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let placed = state.registry.place_round_robin(total);
    if placed.len() < total {
        warn!("job {} rechazado: no hay backends vivos", req.name);
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let mut specs = Vec::with_capacity(total);
    let mut slots = placed.iter();
    for frag in &req.fragments {
        for _ in 0..frag.parallelism {
            let Some((_, host)) = slots.next() else {
                return Err(StatusCode::SERVICE_UNAVAILABLE);
            };
            specs.push(FragmentInstanceSpec {
                fragment_id: frag.fragment_id.clone(),
                host: host.clone(),
            });
        }
    }

    let dag = ExecutionDag::build(specs).map_err(|e| {
        warn!("plan inválido para job {}: {}", req.name, e);
        StatusCode::BAD_REQUEST
    })?;

    let job_id = uuid::Uuid::new_v4().to_string();
    let coord = Coordinator::new(
        job_id.clone(),
        req.name,
        dag,
        state.coord_config.clone(),
        Collaborators {
            liveness: state.registry.clone(),
            dispatcher: state.registry.clone(),
            runtime: Handle::current(),
        },
    );

    state.insert_job(coord.clone());
    coord.start_scheduling();

    // index_in_job coincide con el orden de `placed`
    for (unit, (backend_id, _)) in coord.executions().into_iter().zip(placed.iter()) {
        let assignment = InstanceAssignment {
            job_id: job_id.clone(),
            index_in_job: unit.index_in_job,
            instance_id: unit.instance_id,
            fragment_id: unit.fragment_id,
        };
        if !state.registry.enqueue_assignment(backend_id, assignment) {
            warn!(
                "backend {} desapareció antes de recibir la instancia {} del job {}",
                backend_id, unit.index_in_job, job_id
            );
        }
    }

    info!(
        "job {} ({}) creado con {} instancias",
        job_id,
        coord.name(),
        total
    );
    Ok(Json(coord.snapshot()))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, StatusCode> {
    let coord = state.job(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(coord.snapshot()))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<JobSnapshot>, StatusCode> {
    let coord = state.job(&id).ok_or(StatusCode::NOT_FOUND)?;
    info!("cancel pedido para job {}: {}", id, req.reason);
    coord.cancel(&req.reason);
    Ok(Json(coord.snapshot()))
}

#[derive(Debug, Deserialize)]
struct JoinParams {
    #[serde(default)]
    timeout_ms: Option<u64>,
}

// join bloquea el hilo: va al pool de bloqueo de tokio
async fn join_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<JoinParams>,
) -> Result<Json<JoinResponse>, StatusCode> {
    let coord = state.job(&id).ok_or(StatusCode::NOT_FOUND)?;
    let timeout = Duration::from_millis(params.timeout_ms.unwrap_or(0));

    let waiter = coord.clone();
    let done = tokio::task::spawn_blocking(move || waiter.join(timeout))
        .await
        .map_err(|e| {
            warn!("join del job {} falló: {:?}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(JoinResponse {
        done,
        job: coord.snapshot(),
    }))
}

// Canal de entrada de reportes de estado de los backends
async fn report_exec_status(
    State(state): State<AppState>,
    Json(report): Json<StatusReport>,
) -> Result<Json<ReportExecStatusResponse>, StatusCode> {
    let Some(coord) = state.job(&report.job_id) else {
        warn!(
            "reporte para job desconocido {} (instancia {})",
            report.job_id, report.index_in_job
        );
        return Err(StatusCode::NOT_FOUND);
    };

    coord.update_fragment_exec_status(&report);
    Ok(Json(ReportExecStatusResponse { ok: true }))
}

async fn register_backend(
    State(state): State<AppState>,
    Json(req): Json<BackendRegisterRequest>,
) -> Json<BackendRegisterResponse> {
    let backend_id = state
        .registry
        .register(req.hostname, req.port, req.max_concurrency);
    Json(BackendRegisterResponse { backend_id })
}

async fn backend_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<BackendHeartbeatRequest>,
) -> Result<Json<BackendHeartbeatResponse>, StatusCode> {
    let cancel = state
        .registry
        .heartbeat(&req.backend_id, req.cpu_percent, req.mem_bytes)
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(BackendHeartbeatResponse { ok: true, cancel }))
}

async fn next_instance(
    State(state): State<AppState>,
    Json(req): Json<InstanceAssignmentRequest>,
) -> Json<InstanceAssignmentResponse> {
    let instance = state.registry.next_assignment(&req.backend_id);
    if let Some(ref a) = instance {
        info!(
            "asignando instancia {} (job={}, fragmento={}) al backend {}",
            a.index_in_job, a.job_id, a.fragment_id, req.backend_id
        );
    }
    Json(InstanceAssignmentResponse { instance })
}

async fn list_backends(State(state): State<AppState>) -> Json<Vec<BackendMetrics>> {
    Json(state.registry.metrics(SystemTime::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use coordinator::{CoordinatorConfig, FragmentRequest, StatusCode as ExecCode};
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use tower::ServiceExt;

    async fn call<T: DeserializeOwned>(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<impl Serialize>,
    ) -> (StatusCode, Option<T>) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        let req = match body {
            Some(b) => req.body(Body::from(serde_json::to_vec(&b).unwrap())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).ok())
    }

    fn register(hostname: &str) -> BackendRegisterRequest {
        BackendRegisterRequest {
            hostname: hostname.to_string(),
            port: 9060,
            max_concurrency: 2,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sin_backends_el_job_se_rechaza() {
        let app = build_router(AppState::new(CoordinatorConfig::default()));
        let req = JobRequest {
            name: "q".into(),
            fragments: vec![FragmentRequest {
                fragment_id: "f0".into(),
                parallelism: 2,
            }],
        };
        let (status, _) = call::<JobSnapshot>(&app, "POST", "/api/v1/jobs", Some(req)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn job_con_demasiadas_instancias_se_rechaza() {
        let mut state = AppState::new(CoordinatorConfig::default());
        state.max_instances_per_job = 8;
        let app = build_router(state.clone());
        call::<BackendRegisterResponse>(
            &app,
            "POST",
            "/api/v1/backends/register",
            Some(register("be0")),
        )
        .await;

        let req = JobRequest {
            name: "q".into(),
            fragments: vec![
                FragmentRequest {
                    fragment_id: "f0".into(),
                    parallelism: u32::MAX,
                },
                FragmentRequest {
                    fragment_id: "f1".into(),
                    parallelism: u32::MAX,
                },
            ],
        };
        let (status, _) = call::<JobSnapshot>(&app, "POST", "/api/v1/jobs", Some(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = JobRequest {
            name: "q".into(),
            fragments: vec![FragmentRequest {
                fragment_id: "f0".into(),
                parallelism: 9,
            }],
        };
        let (status, _) = call::<JobSnapshot>(&app, "POST", "/api/v1/jobs", Some(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.jobs.lock().unwrap().is_empty());

        let req = JobRequest {
            name: "q".into(),
            fragments: vec![FragmentRequest {
                fragment_id: "f0".into(),
                parallelism: 8,
            }],
        };
        let (status, _) = call::<JobSnapshot>(&app, "POST", "/api/v1/jobs", Some(req)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flujo_completo_submit_reporte_y_join() {
        let app = build_router(AppState::new(CoordinatorConfig::default()));

        let (_, be0) = call::<BackendRegisterResponse>(
            &app,
            "POST",
            "/api/v1/backends/register",
            Some(register("be0")),
        )
        .await;
        let be0 = be0.unwrap().backend_id;

        let req = JobRequest {
            name: "insert into t select 1".into(),
            fragments: vec![FragmentRequest {
                fragment_id: "f0".into(),
                parallelism: 2,
            }],
        };
        let (status, job) = call::<JobSnapshot>(&app, "POST", "/api/v1/jobs", Some(req)).await;
        assert_eq!(status, StatusCode::OK);
        let job = job.unwrap();
        assert_eq!(job.total_units, 2);
        assert!(!job.done);

        // el backend saca sus dos instancias y reporta
        for _ in 0..2 {
            let (_, next) = call::<InstanceAssignmentResponse>(
                &app,
                "POST",
                "/api/v1/instances/next",
                Some(InstanceAssignmentRequest {
                    backend_id: be0.clone(),
                }),
            )
            .await;
            let a = next.unwrap().instance.unwrap();
            let report = StatusReport::new(a.job_id.clone(), a.index_in_job)
                .with_done(true)
                .with_instance_id(a.instance_id)
                .with_delta_urls(vec![format!("d{}", a.index_in_job)]);
            let (status, _) = call::<ReportExecStatusResponse>(
                &app,
                "POST",
                "/api/v1/report_exec_status",
                Some(report),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, joined) = call::<JoinResponse>(
            &app,
            "GET",
            &format!("/api/v1/jobs/{}/join?timeout_ms=1000", job.id),
            None::<()>,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let joined = joined.unwrap();
        assert!(joined.done);
        assert_eq!(joined.job.status.code, ExecCode::Ok);
        assert_eq!(joined.job.load.delta_urls.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_llega_al_backend_en_el_heartbeat() {
        let state = AppState::new(CoordinatorConfig::default());
        let app = build_router(state.clone());

        let (_, be0) = call::<BackendRegisterResponse>(
            &app,
            "POST",
            "/api/v1/backends/register",
            Some(register("be0")),
        )
        .await;
        let be0 = be0.unwrap().backend_id;

        let req = JobRequest {
            name: "q".into(),
            fragments: vec![FragmentRequest {
                fragment_id: "f0".into(),
                parallelism: 1,
            }],
        };
        let (_, job) = call::<JobSnapshot>(&app, "POST", "/api/v1/jobs", Some(req)).await;
        let job = job.unwrap();

        // la instancia ya está en manos del backend
        let (_, next) = call::<InstanceAssignmentResponse>(
            &app,
            "POST",
            "/api/v1/instances/next",
            Some(InstanceAssignmentRequest {
                backend_id: be0.clone(),
            }),
        )
        .await;
        assert!(next.unwrap().instance.is_some());

        let (status, snap) = call::<JobSnapshot>(
            &app,
            "POST",
            &format!("/api/v1/jobs/{}/cancel", job.id),
            Some(CancelRequest {
                reason: "por test".into(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let snap = snap.unwrap();
        assert!(snap.done);
        assert!(snap.status.is_cancelled());

        let mut cancel = Vec::new();
        for _ in 0..100 {
            let (_, hb) = call::<BackendHeartbeatResponse>(
                &app,
                "POST",
                "/api/v1/backends/heartbeat",
                Some(BackendHeartbeatRequest {
                    backend_id: be0.clone(),
                    cpu_percent: None,
                    mem_bytes: None,
                }),
            )
            .await;
            cancel.extend(hb.unwrap().cancel);
            if !cancel.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cancel.len(), 1);
        assert_eq!(cancel[0].job_id, job.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reporte_de_job_desconocido_da_404() {
        let app = build_router(AppState::new(CoordinatorConfig::default()));
        let (status, _) = call::<ReportExecStatusResponse>(
            &app,
            "POST",
            "/api/v1/report_exec_status",
            Some(StatusReport::new("no-existe", 0).with_done(true)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

use anyhow::{Context, Result};
use coordinator::{
    BackendHeartbeatRequest, BackendHeartbeatResponse, BackendRegisterRequest,
    BackendRegisterResponse, CancelTarget, ExecStatus, InstanceAssignment,
    InstanceAssignmentRequest, InstanceAssignmentResponse, StatusReport, TabletCommitInfo,
    DPP_ABNORMAL_ALL, DPP_NORMAL_ALL, LOADED_BYTES,
};
use reqwest::Client;
use std::{
    collections::HashMap,
    env,
    sync::{Arc, Mutex},
    time::Duration,
};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const DEFAULT_BACKEND_CONCURRENCY: u32 = 2;
const DEFAULT_BACKEND_PORT: u16 = 9060;
const DEFAULT_FRAGMENT_RUN_MS: u64 = 2_000;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const REPORT_ATTEMPTS: u32 = 3;

/// Instancias en ejecución, para poder abortarlas cuando llega un cancel.
type Running = Arc<Mutex<HashMap<String, AbortHandle>>>;

#[derive(Clone)]
struct Ctx {
    client: Client,
    base_url: String,
    hostname: String,
    port: u16,
    run_time: Duration,
    /// Fragmento que se hace fallar a propósito (pruebas de error)
    fail_fragment: Option<String>,
    running: Running,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

/// Loop principal del backend.
/// - Se registra en el frontend.
/// - Hace heartbeats periódicos (y recibe ahí las cancelaciones).
/// - Pide instancias mientras tenga "slots" libres.
/// - Ejecuta cada instancia y reporta su estado.
pub async fn run() -> Result<()> {
    let base_url =
        env::var("FRONTEND_URL").unwrap_or_else(|_| "http://frontend:8030".to_string());
    let client = Client::new();

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let port: u16 = env_or("BACKEND_PORT", DEFAULT_BACKEND_PORT);
    let max_concurrency: u32 = env_or("BACKEND_CONCURRENCY", DEFAULT_BACKEND_CONCURRENCY).max(1);
    let run_time = Duration::from_millis(env_or("FRAGMENT_RUN_MS", DEFAULT_FRAGMENT_RUN_MS));

    let register_url = format!("{}/api/v1/backends/register", base_url);
    let res = client
        .post(&register_url)
        .json(&BackendRegisterRequest {
            hostname: hostname.clone(),
            port,
            max_concurrency,
        })
        .send()
        .await
        .with_context(|| format!("no se pudo registrar contra {}", base_url))?;
    let BackendRegisterResponse { backend_id } = res.error_for_status()?.json().await?;

    info!(
        "backend {} registrado como {}:{} con concurrency={} contra {}",
        backend_id, hostname, port, max_concurrency, base_url
    );

    let ctx = Ctx {
        client,
        base_url,
        hostname,
        port,
        run_time,
        fail_fragment: env::var("FAIL_FRAGMENT").ok().filter(|f| !f.is_empty()),
        running: Arc::new(Mutex::new(HashMap::new())),
    };

    tokio::spawn(heartbeat_loop(ctx.clone(), backend_id.clone()));

    let sem = Arc::new(Semaphore::new(max_concurrency as usize));

    loop {
        // --------- Control de concurrencia local ---------
        let permit = match sem.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        let next_url = format!("{}/api/v1/instances/next", ctx.base_url);
        let assignment = match ctx
            .client
            .post(&next_url)
            .json(&InstanceAssignmentRequest {
                backend_id: backend_id.clone(),
            })
            .send()
            .await
        {
            Ok(resp) => resp.json::<InstanceAssignmentResponse>().await.ok(),
            Err(e) => {
                warn!("error pidiendo instancia al frontend: {:?}", e);
                None
            }
        };

        let Some(instance) = assignment.and_then(|a| a.instance) else {
            drop(permit);
            sleep(Duration::from_secs(1)).await;
            continue;
        };

        info!(
            "tengo instancia {} del job {} (fragmento={})",
            instance.index_in_job, instance.job_id, instance.fragment_id
        );

        // Se toma el lock antes de lanzar la tarea: así la tarea no puede
        // sacarse del mapa antes de que la hayamos metido.
        let mut running = ctx.running.lock().unwrap_or_else(|e| e.into_inner());
        let instance_id = instance.instance_id.clone();
        let task_ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            execute_instance(&task_ctx, instance).await;
            drop(permit);
        });
        running.insert(instance_id, handle.abort_handle());
    }
}

async fn heartbeat_loop(ctx: Ctx, backend_id: String) {
    let mut sys = System::new_all();
    let hb_url = format!("{}/api/v1/backends/heartbeat", ctx.base_url);

    loop {
        sys.refresh_cpu();
        sys.refresh_memory();

        let req = BackendHeartbeatRequest {
            backend_id: backend_id.clone(),
            cpu_percent: Some(sys.global_cpu_info().cpu_usage()),
            mem_bytes: Some(sys.used_memory()),
        };

        match ctx.client.post(&hb_url).json(&req).send().await {
            Ok(resp) => match resp.json::<BackendHeartbeatResponse>().await {
                Ok(hb) => {
                    for target in hb.cancel {
                        cancel_instance(&ctx, target).await;
                    }
                }
                Err(e) => warn!("respuesta de heartbeat inválida: {:?}", e),
            },
            Err(e) => warn!("heartbeat falló: {:?}", e),
        }

        sleep(HEARTBEAT_INTERVAL).await;
    }
}

/// Aborta la instancia si sigue corriendo y confirma con un reporte CANCELLED.
async fn cancel_instance(ctx: &Ctx, target: CancelTarget) {
    let handle = {
        let mut running = ctx.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&target.instance_id)
    };

    match handle {
        Some(h) => {
            h.abort();
            info!(
                "instancia {} del job {} abortada: {}",
                target.index_in_job, target.job_id, target.reason
            );
        }
        None => debug!(
            "cancel para instancia {} que ya no corre aquí",
            target.instance_id
        ),
    }

    let report = StatusReport::new(target.job_id.clone(), target.index_in_job)
        .with_done(true)
        .with_instance_id(target.instance_id.clone())
        .with_status(ExecStatus::cancelled(target.reason.clone()));
    send_report(ctx, &report).await;
}

/// "Ejecuta" el fragmento: un reporte de progreso, el trabajo simulado y
/// el reporte final con los metadatos de carga.
async fn execute_instance(ctx: &Ctx, instance: InstanceAssignment) {
    let progress = StatusReport::new(instance.job_id.clone(), instance.index_in_job)
        .with_instance_id(instance.instance_id.clone());
    send_report(ctx, &progress).await;

    sleep(ctx.run_time).await;

    let report = finished_report(ctx, &instance);
    send_report(ctx, &report).await;

    let mut running = ctx.running.lock().unwrap_or_else(|e| e.into_inner());
    running.remove(&instance.instance_id);
    info!(
        "terminé instancia {} del job {}",
        instance.index_in_job, instance.job_id
    );
}

fn finished_report(ctx: &Ctx, instance: &InstanceAssignment) -> StatusReport {
    if ctx.fail_fragment.as_deref() == Some(instance.fragment_id.as_str()) {
        return StatusReport::new(instance.job_id.clone(), instance.index_in_job)
            .with_done(true)
            .with_instance_id(instance.instance_id.clone())
            .with_status(ExecStatus::internal_error(format!(
                "fragment {} failed on {}",
                instance.fragment_id, ctx.hostname
            )));
    }

    let rows = 1_000 + instance.index_in_job as i64;
    let tablet_id = 10_000 + instance.index_in_job as i64;

    StatusReport::new(instance.job_id.clone(), instance.index_in_job)
        .with_done(true)
        .with_instance_id(instance.instance_id.clone())
        .with_delta_urls(vec![format!(
            "http://{}:{}/api/_load_delta/{}",
            ctx.hostname, ctx.port, instance.instance_id
        )])
        .with_commit_infos(vec![TabletCommitInfo::new(tablet_id, ctx.port as i64)])
        .with_load_counter(DPP_NORMAL_ALL, rows)
        .with_load_counter(DPP_ABNORMAL_ALL, 0)
        .with_load_counter(LOADED_BYTES, rows * 64)
}

/// Envía un reporte con reintentos: el frontend tolera duplicados.
async fn send_report(ctx: &Ctx, report: &StatusReport) {
    let url = format!("{}/api/v1/report_exec_status", ctx.base_url);

    for attempt in 1..=REPORT_ATTEMPTS {
        match ctx.client.post(&url).json(report).send().await {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                warn!(
                    "el frontend no conoce el job {}, se descarta el reporte",
                    report.job_id
                );
                return;
            }
            Ok(resp) => warn!(
                "reporte de la instancia {} (job {}) devolvió {} (intento {})",
                report.index_in_job,
                report.job_id,
                resp.status(),
                attempt
            ),
            Err(e) => warn!(
                "error enviando reporte de la instancia {} (job {}): {:?} (intento {})",
                report.index_in_job, report.job_id, e, attempt
            ),
        }
        sleep(Duration::from_millis(200 * attempt as u64)).await;
    }
}

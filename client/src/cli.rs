use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coordinator::{
    BackendMetrics, CancelRequest, FragmentRequest, JobRequest, JobSnapshot, JoinResponse,
};
use reqwest::Client;
use std::env;

/// - En Docker: FRONTEND_URL=http://frontend:8030
/// - Local: default http://localhost:8030
fn frontend_base_url() -> String {
    env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:8030".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el frontend")]
struct Cli {
    /// Imprime la respuesta completa en JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía un job nuevo: `--fragment f0:3 --fragment f1:2`
    Submit {
        #[arg(value_name = "NOMBRE")]
        name: String,

        /// Fragmento y número de instancias, como ID:PARALELISMO
        #[arg(long = "fragment", value_name = "ID:N", value_parser = parse_fragment, required = true)]
        fragments: Vec<FragmentRequest>,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Espera a que el job termine (o a que venza el timeout)
    Join {
        #[arg(value_name = "JOB_ID")]
        id: String,

        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },
    /// Cancela un job en curso
    Cancel {
        #[arg(value_name = "JOB_ID")]
        id: String,

        #[arg(long, default_value = "cancelled by user")]
        reason: String,
    },
    /// Lista los backends registrados
    Backends,
}

fn parse_fragment(s: &str) -> Result<FragmentRequest> {
    let Some((id, n)) = s.split_once(':') else {
        bail!("formato esperado ID:PARALELISMO, llegó '{}'", s);
    };
    if id.is_empty() {
        bail!("el id de fragmento no puede ser vacío");
    }
    let parallelism: u32 = n
        .parse()
        .with_context(|| format!("paralelismo inválido '{}'", n))?;
    if parallelism == 0 {
        bail!("el paralelismo debe ser mayor que 0");
    }
    Ok(FragmentRequest {
        fragment_id: id.to_string(),
        parallelism,
    })
}

fn print_job(job: &JobSnapshot) {
    println!("Job:");
    println!("  id: {}", job.id);
    println!("  nombre: {}", job.name);
    println!("  estado: {}", job.status);
    println!("  terminado: {}", job.done);
    println!("  backends sanos: {}", job.backend_healthy);

    println!(
        "  instancias: total={}, terminadas={}, fallidas={}, canceladas={}",
        job.total_units, job.finished_units, job.failed_units, job.cancelled_units
    );

    let settled = job.finished_units + job.failed_units + job.cancelled_units;
    if job.total_units > 0 {
        let pct = (settled as f64 / job.total_units as f64) * 100.0;
        println!("  progreso: {:.1}%", pct);
    }

    println!("  submitted_at: {}", job.submitted_at);
    if let Some(ref started) = job.started_at {
        println!("  iniciado: {}", started);
    }
    if let Some(ref done) = job.finished_at {
        println!("  finalizado: {}", done);
    }

    for u in &job.executions {
        println!(
            "    [{}] fragmento={} host={} estado={:?} reportes={}",
            u.index_in_job, u.fragment_id, u.host, u.state, u.report_count
        );
    }

    let load = &job.load;
    if !load.load_counters.is_empty() {
        println!("  contadores de carga:");
        for (k, v) in &load.load_counters {
            println!("    {} = {}", k, v);
        }
    }
    if !load.delta_urls.is_empty() {
        println!("  delta urls: {}", load.delta_urls.len());
    }
    if !load.commit_infos.is_empty() {
        println!("  commit infos: {}", load.commit_infos.len());
    }
    if let Some(ref url) = load.tracking_url {
        println!("  tracking url: {}", url);
    }
    for path in load.rejected_record_paths() {
        println!("  registros rechazados: {}", path);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = frontend_base_url();

    match cli.command {
        Commands::Submit { name, fragments } => {
            let url = format!("{}/api/v1/jobs", base_url);
            let resp = client
                .post(&url)
                .json(&JobRequest { name, fragments })
                .send()
                .await?;

            if !resp.status().is_success() {
                println!("Error: el frontend rechazó el job (status {})", resp.status());
                return Ok(());
            }

            let job: JobSnapshot = resp.json().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                println!("Job creado:");
                println!("  id: {}", job.id);
                println!("  nombre: {}", job.name);
                println!("  instancias: {}", job.total_units);
            }
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let job: JobSnapshot = resp.json().await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&job)?);
                } else {
                    print_job(&job);
                }
            } else {
                println!("Error: job no encontrado (status {})", resp.status());
            }
        }

        Commands::Join { id, timeout_ms } => {
            let url = format!("{}/api/v1/jobs/{}/join", base_url, id);
            let resp = client
                .get(&url)
                .query(&[("timeout_ms", timeout_ms)])
                .send()
                .await?;
            if resp.status().is_success() {
                let join: JoinResponse = resp.json().await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&join)?);
                } else {
                    if join.done {
                        println!("Job {} terminado.", id);
                    } else {
                        println!("Timeout de {} ms: el job {} sigue en curso.", timeout_ms, id);
                    }
                    print_job(&join.job);
                }
            } else {
                println!("Error: job no encontrado (status {})", resp.status());
            }
        }

        Commands::Cancel { id, reason } => {
            let url = format!("{}/api/v1/jobs/{}/cancel", base_url, id);
            let resp = client
                .post(&url)
                .json(&CancelRequest { reason })
                .send()
                .await?;
            if resp.status().is_success() {
                let job: JobSnapshot = resp.json().await?;
                println!("Cancelación enviada. Estado actual: {}", job.status);
            } else {
                println!("Error: job no encontrado (status {})", resp.status());
            }
        }

        Commands::Backends => {
            let url = format!("{}/api/v1/backends", base_url);
            let resp = client.get(&url).send().await?;
            if resp.status().is_success() {
                let backends: Vec<BackendMetrics> = resp.json().await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&backends)?);
                } else if backends.is_empty() {
                    println!("No hay backends registrados.");
                } else {
                    for b in backends {
                        println!("Backend {}", b.backend_id);
                        println!("  host           : {}:{}", b.hostname, b.port);
                        println!("  alive          : {}", b.alive);
                        println!("  last_heartbeat : {} s ago", b.last_heartbeat_secs_ago);
                        if let Some(t) = b.last_missing_heartbeat_time {
                            println!("  heartbeat perdido en : {} ms", t);
                        }
                        println!("  concurrency    : max={}", b.max_concurrency);
                        println!(
                            "  instancias     : asignadas={}, pendientes={}",
                            b.instances_assigned, b.pending_instances
                        );
                        if let Some(cpu) = b.last_cpu_percent {
                            println!("  cpu_percent    : {:.1}%", cpu);
                        } else {
                            println!("  cpu_percent    : (sin datos)");
                        }
                        if let Some(mem) = b.last_mem_bytes {
                            println!("  mem_bytes      : {}", mem);
                        } else {
                            println!("  mem_bytes      : (sin datos)");
                        }
                        println!();
                    }
                }
            } else {
                println!(
                    "Error consultando /api/v1/backends (status {})",
                    resp.status()
                );
            }
        }
    }

    Ok(())
}

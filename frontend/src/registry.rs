use async_trait::async_trait;
use coordinator::{
    BackendId, BackendMetrics, CancelDispatcher, CancelTarget, InstanceAssignment, NodeAddress,
    NodeLivenessProvider,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BackendMeta {
    pub address: NodeAddress,
    pub last_heartbeat: SystemTime,
    pub alive: bool,
    /// Epoch ms de la última vez que se le dio por perdido.
    pub last_missing_heartbeat_time: Option<i64>,
    pub max_concurrency: u32,

    // instancias asignadas que el backend todavía no pidió
    pub pending: VecDeque<InstanceAssignment>,
    // órdenes de cancelación que viajan en la respuesta del heartbeat
    pub cancel_inbox: Vec<CancelTarget>,

    // Métricas
    pub instances_assigned: u64,
    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}

#[derive(Default)]
struct RegistryInner {
    backends: HashMap<BackendId, BackendMeta>,
    by_address: HashMap<NodeAddress, BackendId>,
    order: Vec<BackendId>,
    rr_cursor: usize,
}

/// Registro de backends del frontend.
///
/// Es a la vez el proveedor de liveness de los coordinadores y el buzón
/// por donde salen las cancelaciones remotas.
#[derive(Default)]
pub struct NodeRegistry {
    inner: Mutex<RegistryInner>,
}

fn epoch_ms(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registra un backend. Si la dirección ya estaba registrada se reutiliza
    /// el id (un backend que reinicia conserva su identidad).
    pub fn register(&self, hostname: String, port: u16, max_concurrency: u32) -> BackendId {
        let address = NodeAddress::new(hostname, port);
        let mut inner = self.lock();

        if let Some(id) = inner.by_address.get(&address).cloned() {
            if let Some(meta) = inner.backends.get_mut(&id) {
                meta.last_heartbeat = SystemTime::now();
                meta.alive = true;
                meta.max_concurrency = max_concurrency.max(1);
            }
            info!("backend {} re-registrado en {}", id, address);
            return id;
        }

        let id = uuid::Uuid::new_v4().to_string();
        inner.backends.insert(
            id.clone(),
            BackendMeta {
                address: address.clone(),
                last_heartbeat: SystemTime::now(),
                alive: true,
                last_missing_heartbeat_time: None,
                max_concurrency: max_concurrency.max(1),
                pending: VecDeque::new(),
                cancel_inbox: Vec::new(),
                instances_assigned: 0,
                last_cpu_percent: None,
                last_mem_bytes: None,
            },
        );
        inner.by_address.insert(address.clone(), id.clone());
        inner.order.push(id.clone());

        info!(
            "backend registrado: {} en {} (max_concurrency={})",
            id, address, max_concurrency
        );
        id
    }

    /// Heartbeat: revive al backend si estaba muerto y devuelve las
    /// cancelaciones pendientes. `None` si el backend no existe.
    pub fn heartbeat(
        &self,
        backend_id: &str,
        cpu_percent: Option<f32>,
        mem_bytes: Option<u64>,
    ) -> Option<Vec<CancelTarget>> {
        let mut inner = self.lock();
        let meta = inner.backends.get_mut(backend_id)?;

        meta.last_heartbeat = SystemTime::now();
        if !meta.alive {
            info!("backend {} ({}) vuelve a estar vivo", backend_id, meta.address);
            meta.alive = true;
        }
        meta.last_cpu_percent = cpu_percent;
        meta.last_mem_bytes = mem_bytes;

        Some(std::mem::take(&mut meta.cancel_inbox))
    }

    /// Marca como muertos los backends sin heartbeat desde hace más de `timeout`.
    pub fn mark_stale_backends(&self, now: SystemTime, timeout: Duration) -> Vec<BackendId> {
        let mut dead = Vec::new();
        let mut inner = self.lock();

        for (id, meta) in inner.backends.iter_mut() {
            if !meta.alive {
                continue;
            }
            match now.duration_since(meta.last_heartbeat) {
                Ok(elapsed) if elapsed > timeout => {
                    meta.alive = false;
                    meta.last_missing_heartbeat_time = Some(epoch_ms(now));
                    warn!(
                        "marcando backend {} ({}) como DEAD (sin heartbeat hace {:?})",
                        id, meta.address, elapsed
                    );
                    dead.push(id.clone());
                }
                // last_heartbeat en el futuro o todavía dentro del plazo
                _ => continue,
            }
        }
        dead
    }

    /// Reparte `count` instancias en round-robin sobre los backends vivos.
    /// Vacío si no hay ninguno.
    pub fn place_round_robin(&self, count: usize) -> Vec<(BackendId, NodeAddress)> {
        let mut inner = self.lock();
        let live: Vec<BackendId> = inner
            .order
            .iter()
            .filter(|id| inner.backends.get(*id).map(|m| m.alive).unwrap_or(false))
            .cloned()
            .collect();
        if live.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let id = live[inner.rr_cursor % live.len()].clone();
            inner.rr_cursor = inner.rr_cursor.wrapping_add(1);
            if let Some(meta) = inner.backends.get(&id) {
                out.push((id.clone(), meta.address.clone()));
            }
        }
        out
    }

    pub fn enqueue_assignment(&self, backend_id: &str, assignment: InstanceAssignment) -> bool {
        let mut inner = self.lock();
        match inner.backends.get_mut(backend_id) {
            Some(meta) => {
                meta.pending.push_back(assignment);
                true
            }
            None => false,
        }
    }

    pub fn next_assignment(&self, backend_id: &str) -> Option<InstanceAssignment> {
        let mut inner = self.lock();
        let meta = inner.backends.get_mut(backend_id)?;
        let next = meta.pending.pop_front();
        if next.is_some() {
            meta.instances_assigned += 1;
        }
        next
    }

    /// Deja la orden en el buzón del backend. Si la instancia todavía no se
    /// había entregado, basta con sacarla de la cola.
    pub fn enqueue_cancel(&self, target: CancelTarget) -> bool {
        let mut inner = self.lock();
        let Some(id) = inner.by_address.get(&target.host).cloned() else {
            return false;
        };
        let Some(meta) = inner.backends.get_mut(&id) else {
            return false;
        };

        let before = meta.pending.len();
        meta.pending
            .retain(|a| !(a.job_id == target.job_id && a.instance_id == target.instance_id));
        if meta.pending.len() < before {
            return true;
        }

        meta.cancel_inbox.push(target);
        true
    }

    pub fn metrics(&self, now: SystemTime) -> Vec<BackendMetrics> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.backends.get(id).map(|m| (id, m)))
            .map(|(id, meta)| BackendMetrics {
                backend_id: id.clone(),
                hostname: meta.address.hostname.clone(),
                port: meta.address.port,
                alive: meta.alive,
                max_concurrency: meta.max_concurrency,
                last_heartbeat_secs_ago: now
                    .duration_since(meta.last_heartbeat)
                    .unwrap_or_default()
                    .as_secs(),
                last_missing_heartbeat_time: meta.last_missing_heartbeat_time,
                pending_instances: meta.pending.len() as u32,
                instances_assigned: meta.instances_assigned,
                last_cpu_percent: meta.last_cpu_percent,
                last_mem_bytes: meta.last_mem_bytes,
            })
            .collect()
    }
}

impl NodeLivenessProvider for NodeRegistry {
    fn last_missing_heartbeat_time(&self, host: &NodeAddress) -> Option<i64> {
        let inner = self.lock();
        let id = inner.by_address.get(host)?;
        inner
            .backends
            .get(id)
            .and_then(|m| m.last_missing_heartbeat_time)
    }

    fn is_alive(&self, host: &NodeAddress) -> bool {
        let inner = self.lock();
        inner
            .by_address
            .get(host)
            .and_then(|id| inner.backends.get(id))
            .map(|m| m.alive)
            .unwrap_or(false)
    }
}

#[async_trait]
impl CancelDispatcher for NodeRegistry {
    async fn cancel_instance(&self, target: CancelTarget) -> anyhow::Result<()> {
        let host = target.host.clone();
        if self.enqueue_cancel(target) {
            Ok(())
        } else {
            anyhow::bail!("backend {} no registrado", host)
        }
    }
}

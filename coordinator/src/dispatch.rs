use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::job::JobId;
use crate::unit::{InstanceId, NodeAddress};

/// Orden de abortar una instancia remota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTarget {
    pub job_id: JobId,
    pub host: NodeAddress,
    pub instance_id: InstanceId,
    pub index_in_job: usize,
    pub reason: String,
}

/// Colaborador que hace llegar la orden de cancelación al backend.
/// El coordinador no espera la respuesta.
#[async_trait]
pub trait CancelDispatcher: Send + Sync {
    async fn cancel_instance(&self, target: CancelTarget) -> anyhow::Result<()>;
}

/// Pool acotado para las órdenes de cancelación.
///
/// `submit` nunca bloquea: encola una tarea en el runtime y como mucho
/// `parallelism` órdenes están en vuelo a la vez, así un backend lento o
/// caído no frena al coordinador.
#[derive(Clone)]
pub struct DispatchPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    dispatcher: Arc<dyn CancelDispatcher>,
}

impl DispatchPool {
    pub fn new(handle: Handle, dispatcher: Arc<dyn CancelDispatcher>, parallelism: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
            dispatcher,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn submit(&self, target: CancelTarget) {
        let permits = Arc::clone(&self.permits);
        let dispatcher = Arc::clone(&self.dispatcher);

        self.handle.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            let job_id = target.job_id.clone();
            let instance_id = target.instance_id.clone();
            let host = target.host.clone();

            match dispatcher.cancel_instance(target).await {
                Ok(()) => debug!(
                    "cancelación enviada: job={} instancia={} host={}",
                    job_id, instance_id, host
                ),
                Err(e) => warn!(
                    "no se pudo enviar la cancelación de la instancia {} (job={}) a {}: {:?}",
                    instance_id, job_id, host, e
                ),
            }
        });
    }

    pub fn submit_all(&self, targets: Vec<CancelTarget>) {
        for t in targets {
            self.submit(t);
        }
    }
}

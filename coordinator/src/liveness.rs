use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::coordinator::Coordinator;
use crate::unit::NodeAddress;

/// Colaborador de membresía de nodos (heartbeats).
pub trait NodeLivenessProvider: Send + Sync {
    /// Última vez (epoch ms) que el nodo perdió un heartbeat. `None` si el
    /// nodo no es conocido o nunca perdió uno.
    fn last_missing_heartbeat_time(&self, host: &NodeAddress) -> Option<i64>;

    fn is_alive(&self, host: &NodeAddress) -> bool;
}

/// Un host se da por muerto cuando tiene un heartbeat perdido, ya pasó el
/// periodo de gracia desde entonces y además:
/// - lo perdió después del despacho (aunque luego haya vuelto), o
/// - el proveedor todavía no lo da por vivo.
///
/// Un host que revive tras perder heartbeats perdió también las instancias
/// que tenía en curso, por eso basta con el avance del timestamp.
pub(crate) fn host_is_dead(
    provider: &dyn NodeLivenessProvider,
    host: &NodeAddress,
    snapshot: Option<i64>,
    grace: Duration,
    now_ms: i64,
) -> bool {
    let Some(missing) = provider.last_missing_heartbeat_time(host) else {
        return false;
    };
    if now_ms.saturating_sub(missing) < grace.as_millis() as i64 {
        return false;
    }
    let advanced = snapshot.map_or(true, |snap| missing > snap);
    advanced || !provider.is_alive(host)
}

/// Tarea en segundo plano que revisa los backends del job cada `interval`.
/// Termina cuando el job está hecho, cuando detecta un backend caído o
/// cuando el coordinador ya no existe.
pub(crate) fn spawn_liveness_monitor(
    handle: &Handle,
    coord: Weak<Coordinator>,
    interval: Duration,
) -> JoinHandle<()> {
    handle.spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let Some(coord) = coord.upgrade() else {
                break;
            };

            if coord.is_done() {
                debug!("job {} terminado, se detiene el monitor de liveness", coord.job_id());
                break;
            }

            if !coord.check_backend_state() {
                info!(
                    "monitor de liveness: backend caído en job {}, se detiene",
                    coord.job_id()
                );
                break;
            }
        }
    })
}

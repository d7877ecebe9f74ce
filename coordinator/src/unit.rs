use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type InstanceId = String;

/// Dirección de un nodo backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub hostname: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitState {
    Pending,
    Running,
    Finished,
    Cancelled,
    Failed,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Finished | UnitState::Cancelled | UnitState::Failed
        )
    }
}

/// Una instancia remota de un fragmento del plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub index_in_job: usize,
    pub fragment_id: String,
    pub host: NodeAddress,
    pub instance_id: InstanceId,
    pub state: UnitState,

    /// Valor de `last_missing_heartbeat_time` del host en el momento del despacho.
    #[serde(skip)]
    pub(crate) missing_heartbeat_snapshot: Option<i64>,

    pub last_report_at: Option<DateTime<Utc>>,
    pub report_count: u64,
}

impl ExecutionUnit {
    pub(crate) fn new(
        index_in_job: usize,
        fragment_id: String,
        host: NodeAddress,
        instance_id: InstanceId,
    ) -> Self {
        Self {
            index_in_job,
            fragment_id,
            host,
            instance_id,
            state: UnitState::Pending,
            missing_heartbeat_snapshot: None,
            last_report_at: None,
            report_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_finished(&self) -> bool {
        self.state == UnitState::Finished
    }

    /// Único punto de cambio de estado. Devuelve `false` si la transición no
    /// aplica: una vez terminal, la unidad no vuelve a cambiar.
    pub(crate) fn transition(&mut self, to: UnitState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        match (self.state, to) {
            (UnitState::Pending, UnitState::Running) => {}
            (_, UnitState::Pending) | (UnitState::Running, UnitState::Running) => return false,
            _ => {}
        }
        self.state = to;
        true
    }

    pub(crate) fn touch_report(&mut self) {
        self.last_report_at = Some(Utc::now());
        self.report_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> ExecutionUnit {
        ExecutionUnit::new(0, "f0".into(), NodeAddress::new("be1", 9060), "i0".into())
    }

    #[test]
    fn estado_terminal_no_se_puede_abandonar() {
        let mut u = unit();
        assert!(u.transition(UnitState::Running));
        assert!(u.transition(UnitState::Finished));

        assert!(!u.transition(UnitState::Failed));
        assert!(!u.transition(UnitState::Cancelled));
        assert!(!u.transition(UnitState::Running));
        assert_eq!(u.state, UnitState::Finished);
    }

    #[test]
    fn pending_puede_terminar_sin_pasar_por_running() {
        let mut u = unit();
        assert!(u.transition(UnitState::Cancelled));
        assert!(u.is_terminal());
        assert!(!u.is_finished());
    }

    #[test]
    fn no_se_vuelve_a_pending_ni_se_repite_running() {
        let mut u = unit();
        assert!(!u.transition(UnitState::Pending));
        assert!(u.transition(UnitState::Running));
        assert!(!u.transition(UnitState::Running));
        assert!(!u.transition(UnitState::Pending));
        assert_eq!(u.state, UnitState::Running);
    }

    #[test]
    fn node_address_se_muestra_como_host_puerto() {
        assert_eq!(NodeAddress::new("be1", 9060).to_string(), "be1:9060");
    }
}

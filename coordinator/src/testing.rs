//! Colaboradores falsos para los tests del coordinador.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;

use crate::config::CoordinatorConfig;
use crate::coordinator::{Collaborators, Coordinator};
use crate::dag::{ExecutionDag, FragmentInstanceSpec};
use crate::dispatch::{CancelDispatcher, CancelTarget};
use crate::liveness::NodeLivenessProvider;
use crate::unit::NodeAddress;

#[derive(Default)]
pub(crate) struct FakeLiveness {
    nodes: Mutex<HashMap<NodeAddress, (bool, Option<i64>)>>,
}

impl FakeLiveness {
    pub(crate) fn kill(&self, host: &NodeAddress, missing_at: i64) {
        self.nodes
            .lock()
            .unwrap()
            .insert(host.clone(), (false, Some(missing_at)));
    }

    /// Perdió un heartbeat en `missing_at` pero ya volvió a reportar.
    pub(crate) fn flap(&self, host: &NodeAddress, missing_at: i64) {
        self.nodes
            .lock()
            .unwrap()
            .insert(host.clone(), (true, Some(missing_at)));
    }
}

impl NodeLivenessProvider for FakeLiveness {
    fn last_missing_heartbeat_time(&self, host: &NodeAddress) -> Option<i64> {
        self.nodes.lock().unwrap().get(host).and_then(|(_, t)| *t)
    }

    fn is_alive(&self, host: &NodeAddress) -> bool {
        self.nodes
            .lock()
            .unwrap()
            .get(host)
            .map(|(alive, _)| *alive)
            .unwrap_or(true)
    }
}

#[derive(Default)]
pub(crate) struct RecordingDispatcher {
    pub(crate) sent: Mutex<Vec<CancelTarget>>,
}

impl RecordingDispatcher {
    pub(crate) fn sent(&self) -> Vec<CancelTarget> {
        self.sent.lock().unwrap().clone()
    }

    /// Espera (con límite) a que lleguen `n` órdenes.
    pub(crate) async fn wait_for(&self, n: usize) -> Vec<CancelTarget> {
        for _ in 0..200 {
            if self.sent.lock().unwrap().len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl CancelDispatcher for RecordingDispatcher {
    async fn cancel_instance(&self, target: CancelTarget) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(target);
        Ok(())
    }
}

pub(crate) struct Harness {
    pub(crate) coord: Arc<Coordinator>,
    pub(crate) liveness: Arc<FakeLiveness>,
    pub(crate) dispatcher: Arc<RecordingDispatcher>,
}

pub(crate) fn host(i: usize) -> NodeAddress {
    NodeAddress::new(format!("be{}", i), 9060)
}

/// `n` instancias repartidas en `hosts` backends, ya despachadas.
pub(crate) fn started_job(n: usize, hosts: usize, config: CoordinatorConfig) -> Harness {
    let specs = (0..n)
        .map(|i| FragmentInstanceSpec {
            fragment_id: format!("f{}", i % 2),
            host: host(i % hosts.max(1)),
        })
        .collect();
    let dag = ExecutionDag::build(specs).unwrap();

    let liveness = Arc::new(FakeLiveness::default());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let coord = Coordinator::new(
        "job-test",
        "insert into lineitem select * from lineitem",
        dag,
        config,
        Collaborators {
            liveness: liveness.clone(),
            dispatcher: dispatcher.clone(),
            runtime: Handle::current(),
        },
    );
    coord.start_scheduling();

    Harness {
        coord,
        liveness,
        dispatcher,
    }
}

pub(crate) fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        join_poll_interval: Duration::from_millis(50),
        liveness_check_interval: Duration::from_millis(20),
        ..CoordinatorConfig::default()
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{CoordError, Result};
use crate::unit::{ExecutionUnit, NodeAddress};

/// Una instancia a desplegar: qué fragmento y en qué backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentInstanceSpec {
    pub fragment_id: String,
    pub host: NodeAddress,
}

/// Conjunto fijo de unidades de ejecución de un job.
///
/// La membresía no cambia después de construirlo; sólo cambia el estado de
/// cada unidad. `index_in_job` es denso en `[0, N)` y coincide con la
/// posición en el vector, así que la búsqueda es O(1).
#[derive(Debug, Clone)]
pub struct ExecutionDag {
    units: Vec<ExecutionUnit>,
}

impl ExecutionDag {
    pub fn build(specs: Vec<FragmentInstanceSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(CoordError::InvalidPlan(
                "a job needs at least one fragment instance".to_string(),
            ));
        }

        let units = specs
            .into_iter()
            .enumerate()
            .map(|(index_in_job, spec)| {
                ExecutionUnit::new(
                    index_in_job,
                    spec.fragment_id,
                    spec.host,
                    uuid::Uuid::new_v4().to_string(),
                )
            })
            .collect();

        Ok(Self { units })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn execution(&self, index_in_job: usize) -> Result<&ExecutionUnit> {
        self.units.get(index_in_job).ok_or(CoordError::NotFound {
            index_in_job,
            len: self.units.len(),
        })
    }

    pub(crate) fn execution_mut(&mut self, index_in_job: usize) -> Result<&mut ExecutionUnit> {
        let len = self.units.len();
        self.units
            .get_mut(index_in_job)
            .ok_or(CoordError::NotFound { index_in_job, len })
    }

    /// Índices en orden de construcción.
    pub fn all_indexes(&self) -> Vec<usize> {
        (0..self.units.len()).collect()
    }

    pub fn executions(&self) -> &[ExecutionUnit] {
        &self.units
    }

    pub(crate) fn executions_mut(&mut self) -> impl Iterator<Item = &mut ExecutionUnit> {
        self.units.iter_mut()
    }

    pub fn all_terminal(&self) -> bool {
        self.units.iter().all(|u| u.is_terminal())
    }

    /// Hosts que todavía tienen alguna unidad sin terminar.
    pub fn outstanding_hosts(&self) -> BTreeSet<NodeAddress> {
        self.units
            .iter()
            .filter(|u| !u.is_terminal())
            .map(|u| u.host.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitState;

    fn specs(n: usize) -> Vec<FragmentInstanceSpec> {
        (0..n)
            .map(|i| FragmentInstanceSpec {
                fragment_id: format!("f{}", i / 2),
                host: NodeAddress::new(format!("be{}", i % 2), 9060),
            })
            .collect()
    }

    #[test]
    fn build_asigna_indices_densos_e_instancias_unicas() {
        let dag = ExecutionDag::build(specs(4)).unwrap();

        assert_eq!(dag.all_indexes(), vec![0, 1, 2, 3]);
        for (i, u) in dag.executions().iter().enumerate() {
            assert_eq!(u.index_in_job, i);
            assert_eq!(u.state, UnitState::Pending);
        }

        let ids: BTreeSet<_> = dag.executions().iter().map(|u| &u.instance_id).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn execution_fuera_de_rango_da_not_found() {
        let dag = ExecutionDag::build(specs(2)).unwrap();
        assert!(dag.execution(1).is_ok());
        match dag.execution(2) {
            Err(CoordError::NotFound { index_in_job, len }) => {
                assert_eq!(index_in_job, 2);
                assert_eq!(len, 2);
            }
            other => panic!("esperaba NotFound, obtuve {:?}", other.map(|u| u.index_in_job)),
        }
    }

    #[test]
    fn plan_vacio_es_invalido() {
        assert!(matches!(
            ExecutionDag::build(Vec::new()),
            Err(CoordError::InvalidPlan(_))
        ));
    }

    #[test]
    fn outstanding_hosts_ignora_unidades_terminadas() {
        let mut dag = ExecutionDag::build(specs(2)).unwrap();
        dag.execution_mut(0).unwrap().transition(UnitState::Finished);

        let hosts = dag.outstanding_hosts();
        assert_eq!(hosts.len(), 1);
        assert!(hosts.contains(&NodeAddress::new("be1", 9060)));
        assert!(!dag.all_terminal());
    }
}

use thiserror::Error;

/// Errores del coordinador.
///
/// Los reportes de estado nunca devuelven error al llamador: un reporte
/// desconocido o repetido se ignora. Estos errores quedan para las
/// consultas directas al DAG y para la construcción del plan.
#[derive(Debug, Error)]
pub enum CoordError {
    /// Índice fuera del rango construido del DAG.
    #[error("execution {index_in_job} not found (job has {len} executions)")]
    NotFound { index_in_job: usize, len: usize },

    /// Plan vacío o inconsistente al construir el DAG.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

pub type Result<T> = std::result::Result<T, CoordError>;

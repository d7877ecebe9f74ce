use std::env;
use std::time::Duration;

const DEFAULT_JOIN_POLL_MS: u64 = 5_000;
const DEFAULT_LIVENESS_CHECK_MS: u64 = 1_000;
const DEFAULT_LIVENESS_GRACE_MS: u64 = 0;
const DEFAULT_CANCEL_PARALLELISM: usize = 16;

/// Parámetros del coordinador de un job.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Tramo máximo de espera en `join` antes de volver a mirar los backends.
    pub join_poll_interval: Duration,
    /// Periodo del monitor de liveness en segundo plano.
    pub liveness_check_interval: Duration,
    /// Tiempo mínimo desde el último heartbeat perdido para dar un host por muerto.
    pub liveness_grace_period: Duration,
    /// Órdenes de cancelación remotas en vuelo a la vez.
    pub cancel_dispatch_parallelism: usize,
    /// Si el primer fallo reportado aborta también a las instancias hermanas.
    pub cancel_on_first_failure: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            join_poll_interval: Duration::from_millis(DEFAULT_JOIN_POLL_MS),
            liveness_check_interval: Duration::from_millis(DEFAULT_LIVENESS_CHECK_MS),
            liveness_grace_period: Duration::from_millis(DEFAULT_LIVENESS_GRACE_MS),
            cancel_dispatch_parallelism: DEFAULT_CANCEL_PARALLELISM,
            cancel_on_first_failure: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl CoordinatorConfig {
    /// Lee la configuración de variables de entorno; lo que falte o no se
    /// pueda parsear queda con el valor por defecto.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            join_poll_interval: env_parse::<u64>("COORD_JOIN_POLL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(d.join_poll_interval),
            liveness_check_interval: env_parse::<u64>("COORD_LIVENESS_CHECK_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(d.liveness_check_interval),
            liveness_grace_period: env_parse::<u64>("COORD_LIVENESS_GRACE_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.liveness_grace_period),
            cancel_dispatch_parallelism: env_parse::<usize>("COORD_CANCEL_PARALLELISM")
                .filter(|n| *n > 0)
                .unwrap_or(d.cancel_dispatch_parallelism),
            cancel_on_first_failure: env_parse::<bool>("COORD_CANCEL_ON_FIRST_FAILURE")
                .unwrap_or(d.cancel_on_first_failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // un solo test toca el entorno para no pisarse con otros en paralelo
    #[test]
    fn from_env_usa_defaults_y_descarta_valores_invalidos() {
        env::set_var("COORD_JOIN_POLL_MS", "250");
        env::set_var("COORD_LIVENESS_CHECK_MS", "0");
        env::set_var("COORD_CANCEL_PARALLELISM", "muchos");
        env::set_var("COORD_CANCEL_ON_FIRST_FAILURE", "true");

        let cfg = CoordinatorConfig::from_env();

        assert_eq!(cfg.join_poll_interval, Duration::from_millis(250));
        assert_eq!(
            cfg.liveness_check_interval,
            Duration::from_millis(DEFAULT_LIVENESS_CHECK_MS)
        );
        assert_eq!(cfg.cancel_dispatch_parallelism, DEFAULT_CANCEL_PARALLELISM);
        assert!(cfg.cancel_on_first_failure);

        env::remove_var("COORD_JOIN_POLL_MS");
        env::remove_var("COORD_LIVENESS_CHECK_MS");
        env::remove_var("COORD_CANCEL_PARALLELISM");
        env::remove_var("COORD_CANCEL_ON_FIRST_FAILURE");
    }
}

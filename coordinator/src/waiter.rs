use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Un `Mutex` con su `Condvar`: el mismo candado que protege el estado es
/// el que usan los que esperan.
pub struct Monitor<T> {
    state: Mutex<T>,
    cv: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            cv: Condvar::new(),
        }
    }

    /// Si otro hilo hizo panic con el candado tomado seguimos con el estado
    /// tal como quedó: todas las mutaciones son de un solo paso.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Despierta a todos los que esperan.
    pub fn notify_all(&self) {
        self.cv.notify_all();
    }

    /// Suspende hasta que `pred` se cumpla o pase `deadline`.
    /// Devuelve el guard y si el predicado se cumplió.
    pub fn wait_until<'a, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        deadline: Instant,
        mut pred: F,
    ) -> (MutexGuard<'a, T>, bool)
    where
        F: FnMut(&T) -> bool,
    {
        loop {
            if pred(&guard) {
                return (guard, true);
            }
            let now = Instant::now();
            if now >= deadline {
                return (guard, false);
            }
            let (g, _timeout) = self
                .cv
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_until_vence_si_nadie_avisa() {
        let m = Monitor::new(false);
        let start = Instant::now();
        let guard = m.lock();
        let (_g, ok) = m.wait_until(guard, start + Duration::from_millis(50), |v| *v);
        assert!(!ok);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn notify_all_despierta_a_todos() {
        let m = Arc::new(Monitor::new(false));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let m = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                let guard = m.lock();
                let deadline = Instant::now() + Duration::from_secs(5);
                let (_g, ok) = m.wait_until(guard, deadline, |v| *v);
                ok
            }));
        }

        thread::sleep(Duration::from_millis(20));
        *m.lock() = true;
        m.notify_all();

        for h in handles {
            assert!(h.join().unwrap());
        }
    }

    #[test]
    fn predicado_ya_cumplido_no_bloquea() {
        let m = Monitor::new(1u32);
        let guard = m.lock();
        let (_g, ok) = m.wait_until(guard, Instant::now(), |v| *v == 1);
        assert!(ok);
    }
}

//! `Worker`: bucle que sondea el store y despacha las tareas elegibles.
//!
//! Sondeo, no colas push: cada worker corre una ejecución a la vez, en su
//! propio hilo. Varios workers pueden compartir un mismo store; la exclusión
//! mutua de la reclamación vive en `TaskStore::pick_next`, no aquí.

use std::time::Duration as StdDuration;

use log::error;

use crate::dispatcher::Dispatcher;
use crate::store::TaskStore;

const DEFAULT_IDLE_INTERVAL: StdDuration = StdDuration::from_millis(25);

/// Bucle de sondeo y despacho para un subconjunto de nombres de tarea.
pub struct Worker<'a> {
    store: &'a dyn TaskStore,
    dispatcher: Dispatcher<'a>,
    allowed_names: Vec<String>,
    idle_interval: StdDuration,
}

impl<'a> Worker<'a> {
    pub fn new(store: &'a dyn TaskStore, dispatcher: Dispatcher<'a>, allowed_names: Vec<String>) -> Self {
        Self { store, dispatcher, allowed_names, idle_interval: DEFAULT_IDLE_INTERVAL }
    }

    pub fn with_idle_interval(mut self, interval: StdDuration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Un ciclo de sondeo-despacho. Devuelve `true` si había una tarea que
    /// despachar. Fallos del dispatcher que no son errores de handler (p.ej.
    /// un fallo del store a mitad de una transición) se registran y la
    /// tarea se deja en el estado parcial en que haya quedado.
    pub fn tick(&self) -> bool {
        match self.store.pick_next(&self.allowed_names) {
            Ok(Some(task)) => {
                if let Err(e) = self.dispatcher.dispatch(task) {
                    error!("worker: dispatch faulted: {e}");
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("worker: pick_next faulted: {e}");
                false
            }
        }
    }

    /// Corre el bucle indefinidamente, durmiendo `idle_interval` entre
    /// sondeos sin trabajo.
    pub fn run_forever(&self) -> ! {
        loop {
            if !self.tick() {
                std::thread::sleep(self.idle_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use crate::registry::Registry;
    use crate::store::InMemoryTaskStore;
    use serde_json::json;

    #[test]
    fn tick_dispatches_the_single_eligible_task() {
        let store = InMemoryTaskStore::new();
        let mut registry = Registry::new();
        registry.register("noop", |_task, _params| Ok(()));
        let task = store.create("noop", json!({})).unwrap();
        let dispatcher = Dispatcher::new(&store, &registry, DispatcherConfig::default());
        let worker = Worker::new(&store, dispatcher, vec!["noop".to_string()]);

        assert!(worker.tick());
        assert!(!worker.tick());

        let frames = store.frames(task.id, None).unwrap();
        assert_eq!(frames.last().unwrap().payload, crate::frame::FramePayload::Status(crate::frame::Status::TaskCompleted));
    }
}

//! `Dispatcher`: ejecuta una tarea reclamada y conduce la máquina de
//! reintentos.

use chrono::Duration;
use log::{debug, warn};

use crate::errors::{BackendError, HandlerError};
use crate::registry::Registry;
use crate::store::TaskStore;
use crate::task::{Task, TaskHandle};

/// Parámetros de la máquina de reintentos.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Número máximo de intentos (frames RUN_ACTIVE) antes de rendirse.
    pub run_limit: u32,
    /// Demora aplicada a cada reintento.
    pub run_reschedule_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { run_limit: 4, run_reschedule_delay: Duration::zero() }
    }
}

/// Ejecuta una tarea ya reclamada (ver `TaskStore::pick_next`) contra el
/// registro de handlers, traduciendo el resultado del handler en
/// transiciones de estado.
pub struct Dispatcher<'a> {
    store: &'a dyn TaskStore,
    registry: &'a Registry,
    config: DispatcherConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(store: &'a dyn TaskStore, registry: &'a Registry, config: DispatcherConfig) -> Self {
        Self { store, registry, config }
    }

    /// Ejecuta exactamente la secuencia descrita por la máquina de estados:
    /// busca el handler primero (un nombre desconocido nunca llega a
    /// registrar RUN_ACTIVE), luego ACTIVE, invocación del handler, y
    /// terminal o reintento según el resultado.
    pub fn dispatch(&self, task: Task) -> Result<(), BackendError> {
        let handle = TaskHandle::new(self.store, task);
        debug!("dispatch:start {}", handle.task);

        let handler = match self.registry.get(handle.name()) {
            Some(handler) => handler,
            None => return self.handle_failure(&handle, HandlerError::UnknownTask(format!("{}", handle.task))),
        };

        handle.run()?;
        match handler(&handle, handle.parameters()) {
            Ok(()) => {
                handle.task_complete()?;
                debug!("dispatch:complete {}", handle.task);
                Ok(())
            }
            Err(e) => self.handle_failure(&handle, e),
        }
    }

    fn handle_failure(&self, handle: &TaskHandle<'_>, e: HandlerError) -> Result<(), BackendError> {
        handle.log_error(e.to_string())?;
        let runs = handle.runs()? as u32;
        if runs >= self.config.run_limit {
            handle.log_error(format!("Failed {runs} runs, exceeded run limit of {}", self.config.run_limit))?;
            handle.run_fail()?;
            handle.task_fail()?;
            warn!("dispatch:failed {} after {runs} runs", handle.task);
        } else {
            handle.log_error(format!("Failed {runs} runs, rescheduling"))?;
            handle.run_fail()?;
            handle.run_scheduled(self.config.run_reschedule_delay)?;
            debug!("dispatch:rescheduled {}", handle.task);
        }
        Ok(())
    }
}

//! `TaskStore`: interfaz de persistencia y su implementación en memoria.
//!
//! El store es el único recurso compartido del motor. Es "append-only": los
//! frames no se actualizan ni se borran una vez escritos. Esto permite
//! reconstruir el estado de una tarea completa releyendo su log.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::errors::BackendError;
use crate::frame::{Frame, FramePayload, FrameType};
use crate::task::Task;

/// Contrato de persistencia del motor.
///
/// Implementaciones deben garantizar, como mínimo:
/// - los ids de frame son estrictamente crecientes por tarea,
/// - `pick_next` nunca entrega la misma tarea a dos llamadas concurrentes,
/// - un frame STATUS no puede añadirse después de un STATUS terminal
///   (`ProtocolViolation`).
pub trait TaskStore: Send + Sync {
    /// Crea una tarea nueva, agendada de inmediato (`scheduled_at = now()`).
    /// Rechaza un `parameters` que contenga una clave de primer nivel
    /// llamada `task`.
    fn create(&self, name: &str, parameters: Value) -> Result<Task, BackendError>;

    /// Añade un frame al log de `task_id`, asignándole un id nuevo.
    fn append(&self, task_id: i64, payload: FramePayload) -> Result<Frame, BackendError>;

    /// Todos los frames de `task_id`, en orden de id, opcionalmente filtrados
    /// por tipo.
    fn frames(&self, task_id: i64, frame_type: Option<FrameType>) -> Result<Vec<Frame>, BackendError>;

    /// Frames de `task_id` con id estrictamente mayor a `since_id`, en orden.
    /// Es la primitiva sobre la que se construye el tail-follow (ver
    /// `crate::follower::Follower`), para no tener que releer el log
    /// completo en cada sondeo.
    fn frames_since(&self, task_id: i64, since_id: i64) -> Result<Vec<Frame>, BackendError>;

    /// Fija `scheduled_at = now() + delay`.
    fn schedule(&self, task_id: i64, delay: Duration) -> Result<(), BackendError>;

    /// Fija `scheduled_at = null` (tarea reclamada / en ejecución).
    fn unschedule(&self, task_id: i64) -> Result<(), BackendError>;

    /// Reclama atómicamente la tarea elegible (agendada, sin STATUS
    /// terminal, nombre en `allowed_names`) con el `scheduled_at` más
    /// antiguo. `None` si no hay ninguna elegible. Dos llamadas concurrentes
    /// nunca deben devolver la misma tarea.
    fn pick_next(&self, allowed_names: &[String]) -> Result<Option<Task>, BackendError>;

    /// Snapshot puntual de una tarea por id.
    fn get(&self, task_id: i64) -> Result<Task, BackendError>;
}

struct TaskRecord {
    name: String,
    parameters: Value,
    scheduled_at: Option<DateTime<Utc>>,
    frames: Vec<Frame>,
}

impl TaskRecord {
    fn has_terminal_status(&self) -> bool {
        self.frames
            .iter()
            .any(|f| matches!(&f.payload, FramePayload::Status(s) if s.is_task_terminal()))
    }
}

struct Inner {
    next_task_id: i64,
    next_frame_id: i64,
    tasks: HashMap<i64, TaskRecord>,
}

/// Implementación en memoria de `TaskStore`.
///
/// Volátil (se pierde al finalizar el proceso) y pensada para tests y para
/// correr el motor sin una base de datos. La exclusión mutua de `pick_next`
/// se obtiene con el mismo mutex que guarda el resto del estado: todo el
/// scan-and-claim ocurre bajo un único lock.
pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { next_task_id: 1, next_frame_id: 1, tasks: HashMap::new() }),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn reserved_task_key(parameters: &Value) -> bool {
    matches!(parameters, Value::Object(map) if map.contains_key("task"))
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, name: &str, parameters: Value) -> Result<Task, BackendError> {
        if reserved_task_key(&parameters) {
            return Err(BackendError::ProtocolViolation(
                "parameters must not contain a reserved top-level \"task\" key".to_string(),
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_task_id;
        inner.next_task_id += 1;
        let scheduled_at = Some(Utc::now());
        inner.tasks.insert(
            id,
            TaskRecord { name: name.to_string(), parameters: parameters.clone(), scheduled_at, frames: Vec::new() },
        );
        Ok(Task { id, name: name.to_string(), parameters, scheduled_at })
    }

    fn append(&self, task_id: i64, payload: FramePayload) -> Result<Frame, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        {
            let record = inner.tasks.get(&task_id).ok_or(BackendError::NotFound(task_id))?;
            if matches!(payload, FramePayload::Status(_)) && record.has_terminal_status() {
                return Err(BackendError::ProtocolViolation(format!(
                    "task {task_id} already has a terminal status frame"
                )));
            }
        }
        let frame_id = inner.next_frame_id;
        inner.next_frame_id += 1;
        let frame = Frame { id: frame_id, task_id, payload, time: Utc::now() };
        let record = inner.tasks.get_mut(&task_id).ok_or(BackendError::NotFound(task_id))?;
        record.frames.push(frame.clone());
        Ok(frame)
    }

    fn frames(&self, task_id: i64, frame_type: Option<FrameType>) -> Result<Vec<Frame>, BackendError> {
        let inner = self.inner.lock().unwrap();
        let record = inner.tasks.get(&task_id).ok_or(BackendError::NotFound(task_id))?;
        Ok(record
            .frames
            .iter()
            .filter(|f| frame_type.map_or(true, |t| f.frame_type() == t))
            .cloned()
            .collect())
    }

    fn frames_since(&self, task_id: i64, since_id: i64) -> Result<Vec<Frame>, BackendError> {
        let inner = self.inner.lock().unwrap();
        let record = inner.tasks.get(&task_id).ok_or(BackendError::NotFound(task_id))?;
        Ok(record.frames.iter().filter(|f| f.id > since_id).cloned().collect())
    }

    fn schedule(&self, task_id: i64, delay: Duration) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.tasks.get_mut(&task_id).ok_or(BackendError::NotFound(task_id))?;
        record.scheduled_at = Some(Utc::now() + delay);
        Ok(())
    }

    fn unschedule(&self, task_id: i64) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.tasks.get_mut(&task_id).ok_or(BackendError::NotFound(task_id))?;
        record.scheduled_at = None;
        Ok(())
    }

    fn pick_next(&self, allowed_names: &[String]) -> Result<Option<Task>, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let candidate = inner
            .tasks
            .iter()
            .filter(|(_, r)| {
                r.scheduled_at.map_or(false, |t| t <= now)
                    && allowed_names.iter().any(|n| n == &r.name)
                    && !r.has_terminal_status()
            })
            .min_by_key(|(id, r)| (r.scheduled_at.unwrap(), **id))
            .map(|(id, _)| *id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let record = inner.tasks.get_mut(&id).expect("candidate id came from this map");
        record.scheduled_at = None;
        Ok(Some(Task { id, name: record.name.clone(), parameters: record.parameters.clone(), scheduled_at: None }))
    }

    fn get(&self, task_id: i64) -> Result<Task, BackendError> {
        let inner = self.inner.lock().unwrap();
        let record = inner.tasks.get(&task_id).ok_or(BackendError::NotFound(task_id))?;
        Ok(Task {
            id: task_id,
            name: record.name.clone(),
            parameters: record.parameters.clone(),
            scheduled_at: record.scheduled_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_rejects_reserved_task_key() {
        let store = InMemoryTaskStore::new();
        let err = store.create("greet", json!({"task": 1})).unwrap_err();
        assert!(matches!(err, BackendError::ProtocolViolation(_)));
    }

    #[test]
    fn append_after_terminal_status_is_rejected() {
        let store = InMemoryTaskStore::new();
        let task = store.create("greet", json!({})).unwrap();
        store.append(task.id, FramePayload::Status(crate::frame::Status::TaskCompleted)).unwrap();
        let err = store.append(task.id, FramePayload::Status(crate::frame::Status::TaskFailed)).unwrap_err();
        assert!(matches!(err, BackendError::ProtocolViolation(_)));
    }

    #[test]
    fn pick_next_is_ordered_and_single_claim() {
        let store = InMemoryTaskStore::new();
        let a = store.create("A", json!({})).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let _b = store.create("B", json!({})).unwrap();
        let names = vec!["A".to_string(), "B".to_string()];
        let picked = store.pick_next(&names).unwrap().unwrap();
        assert_eq!(picked.id, a.id);
        // a is no longer eligible (scheduled_at cleared), so next pick is b.
        let picked2 = store.pick_next(&names).unwrap().unwrap();
        assert_ne!(picked2.id, a.id);
    }

    #[test]
    fn frames_since_only_returns_newer_frames() {
        let store = InMemoryTaskStore::new();
        let task = store.create("greet", json!({})).unwrap();
        let f1 = store.append(task.id, FramePayload::LogInfo("one".into())).unwrap();
        let _f2 = store.append(task.id, FramePayload::LogInfo("two".into())).unwrap();
        let since = store.frames_since(task.id, f1.id).unwrap();
        assert_eq!(since.len(), 1);
    }
}

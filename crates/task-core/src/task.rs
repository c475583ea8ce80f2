//! `Task`, el valor detached de identidad, y `TaskHandle`, la vista prestada
//! que el dispatcher entrega a los handlers durante una ejecución.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::errors::BackendError;
use crate::frame::{Frame, FramePayload, FrameType, Status};
use crate::store::TaskStore;

/// Snapshot inmutable de una tarea. `id`, `name` y `parameters` no cambian
/// tras la creación; sólo `scheduled_at` se actualiza, y únicamente a través
/// del store.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub parameters: Value,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task(id={}, name={})", self.id, self.name)
    }
}

/// Vista prestada de una tarea durante una ejecución: un `&dyn TaskStore`
/// más el `Task` que se está corriendo.
///
/// Esto no es propiedad compartida — el handle sólo vive mientras dura el
/// `dispatch` que lo construyó. Las operaciones de emisión (`data`,
/// `progression`, `log_info`, `log_error`, `runs`) son de libre uso por
/// handlers; las operaciones de la máquina de estados son `pub(crate)`
/// deliberadamente, de forma que el código de un handler no puede invocarlas
/// ni por error: sólo el dispatcher, que vive en este mismo crate, puede
/// conducir las transiciones.
pub struct TaskHandle<'a> {
    store: &'a dyn TaskStore,
    pub task: Task,
}

impl<'a> TaskHandle<'a> {
    pub fn new(store: &'a dyn TaskStore, task: Task) -> Self {
        Self { store, task }
    }

    pub fn id(&self) -> i64 {
        self.task.id
    }

    pub fn name(&self) -> &str {
        &self.task.name
    }

    pub fn parameters(&self) -> &Value {
        &self.task.parameters
    }

    /// Emite un frame DATA con el valor dado.
    pub fn data(&self, value: Value) -> Result<Frame, BackendError> {
        self.store.append(self.task.id, FramePayload::Data(value))
    }

    /// Emite un frame PROGRESSION con el valor dado.
    pub fn progression(&self, value: Value) -> Result<Frame, BackendError> {
        self.store.append(self.task.id, FramePayload::Progression(value))
    }

    /// Emite un frame LOG_INFO.
    pub fn log_info(&self, message: impl Into<String>) -> Result<Frame, BackendError> {
        self.store.append(self.task.id, FramePayload::LogInfo(message.into()))
    }

    /// Emite un frame LOG_ERROR.
    pub fn log_error(&self, message: impl Into<String>) -> Result<Frame, BackendError> {
        self.store.append(self.task.id, FramePayload::LogError(message.into()))
    }

    /// Cuenta de frames RUN_ACTIVE observados hasta ahora para esta tarea.
    pub fn runs(&self) -> Result<usize, BackendError> {
        let frames = self.store.frames(self.task.id, Some(FrameType::Status))?;
        Ok(frames
            .iter()
            .filter(|f| matches!(f.payload, FramePayload::Status(Status::RunActive)))
            .count())
    }

    /// Transición SCHEDULED → ACTIVE: desagenda y emite RUN_ACTIVE.
    pub(crate) fn run(&self) -> Result<(), BackendError> {
        self.store.unschedule(self.task.id)?;
        self.store.append(self.task.id, FramePayload::Status(Status::RunActive))?;
        Ok(())
    }

    /// Registra el fracaso de la ejecución en curso.
    pub(crate) fn run_fail(&self) -> Result<(), BackendError> {
        self.store.append(self.task.id, FramePayload::Status(Status::RunFailed))?;
        Ok(())
    }

    /// Reagenda tras un fracaso recuperable: agenda con el delay dado y
    /// emite RUN_SCHEDULED. Se llama siempre después de `run_fail`.
    pub(crate) fn run_scheduled(&self, delay: Duration) -> Result<(), BackendError> {
        self.store.schedule(self.task.id, delay)?;
        self.store.append(self.task.id, FramePayload::Status(Status::RunScheduled))?;
        Ok(())
    }

    /// Cierra la tarea con éxito. Terminal.
    pub(crate) fn task_complete(&self) -> Result<(), BackendError> {
        self.store.append(self.task.id, FramePayload::Status(Status::TaskCompleted))?;
        Ok(())
    }

    /// Cierra la tarea con fracaso definitivo. Terminal.
    pub(crate) fn task_fail(&self) -> Result<(), BackendError> {
        self.store.append(self.task.id, FramePayload::Status(Status::TaskFailed))?;
        Ok(())
    }
}

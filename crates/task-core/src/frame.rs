//! Tipos de frame y la máquina de estados `Status` que viaja dentro de ellos.
//!
//! Rol en el motor:
//! - Cada ejecución de una tarea emite frames a un `TaskStore` append-only.
//! - El estado de una tarea se reconstruye leyendo sus frames STATUS en orden;
//!   no existe una columna de estado mutable separada.
//! - `FramePayload` define el contrato observable y estable del motor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Los cinco estados que puede ocupar un frame STATUS.
///
/// Los tres primeros describen un intento de ejecución (run); los dos
/// últimos son terminales para la tarea completa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    RunScheduled,
    RunActive,
    RunFailed,
    TaskCompleted,
    TaskFailed,
}

impl Status {
    /// Nombre canónico SCREAMING_SNAKE_CASE, el que se persiste y el que
    /// aparece en los escenarios de prueba.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::RunScheduled => "RUN_SCHEDULED",
            Status::RunActive => "RUN_ACTIVE",
            Status::RunFailed => "RUN_FAILED",
            Status::TaskCompleted => "TASK_COMPLETED",
            Status::TaskFailed => "TASK_FAILED",
        }
    }

    /// Verdadero para los dos únicos estados que cierran la tarea: ninguna
    /// otra transición STATUS puede seguir a uno de estos.
    pub fn is_task_terminal(&self) -> bool {
        matches!(self, Status::TaskCompleted | Status::TaskFailed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error devuelto al parsear un nombre de estado desconocido (usado por
/// backends que persisten el estado como texto).
#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUN_SCHEDULED" => Ok(Status::RunScheduled),
            "RUN_ACTIVE" => Ok(Status::RunActive),
            "RUN_FAILED" => Ok(Status::RunFailed),
            "TASK_COMPLETED" => Ok(Status::TaskCompleted),
            "TASK_FAILED" => Ok(Status::TaskFailed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Discriminante de tipo de frame, independiente del payload que transporta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    Data,
    Progression,
    Status,
    LogInfo,
    LogError,
}

/// El payload tipado de un frame. La variante determina el `FrameType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FramePayload {
    Data(Value),
    Progression(Value),
    Status(Status),
    LogInfo(String),
    LogError(String),
}

impl FramePayload {
    pub fn frame_type(&self) -> FrameType {
        match self {
            FramePayload::Data(_) => FrameType::Data,
            FramePayload::Progression(_) => FrameType::Progression,
            FramePayload::Status(_) => FrameType::Status,
            FramePayload::LogInfo(_) => FrameType::LogInfo,
            FramePayload::LogError(_) => FrameType::LogError,
        }
    }
}

/// Un evento append-only en el log de una tarea.
///
/// La igualdad de `Frame` está definida únicamente por su payload (tipo +
/// dato); `id`, `task_id` y `time` son incidentales para efectos de
/// comparación en pruebas que verifican secuencias esperadas de frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: i64,
    pub task_id: i64,
    pub payload: FramePayload,
    pub time: chrono::DateTime<chrono::Utc>,
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        self.payload.frame_type()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

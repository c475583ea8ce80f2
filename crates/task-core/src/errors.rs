//! Errores del core (dispatch y backend).

use thiserror::Error;

/// Error devuelto por código de handler durante la ejecución de una tarea.
///
/// Recuperado localmente por la máquina de reintentos (`Dispatcher`): nunca
/// se propaga fuera de `dispatch`, siempre termina como un frame LOG_ERROR
/// más una transición de STATUS.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),
    #[error("no handler registered for {0}")]
    UnknownTask(String),
}

impl HandlerError {
    pub fn msg(s: impl Into<String>) -> Self {
        Self::Message(s.into())
    }
}

/// Error de una operación de `TaskStore`.
#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("task not found: {0}")]
    NotFound(i64),
    #[error("transient backend error: {0}")]
    Transient(String),
    #[error("backend error: {0}")]
    Other(String),
}

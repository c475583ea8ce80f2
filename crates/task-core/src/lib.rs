//! task-core: motor determinista de tareas en segundo plano.
//!
//! Propósito:
//! - Definir los contratos neutrales al backend (sin dependencia de una base
//!   de datos concreta) para el ciclo de vida de una tarea, su log de
//!   eventos append-only, y el despacho hacia handlers registrados.
//! - Generar una secuencia de frames (event sourcing) a partir de la cual se
//!   reconstruye el estado de cada tarea sin una columna de estado mutable
//!   separada.
//!
//! Componentes principales:
//! - `frame`: `Frame`, `FramePayload`, `Status` — la taxonomía tipada de
//!   eventos y la máquina de estados que viaja en los frames STATUS.
//! - `task`: `Task` (snapshot detached) y `TaskHandle` (vista prestada que el
//!   dispatcher entrega a los handlers).
//! - `store`: el trait `TaskStore` y su implementación en memoria.
//! - `registry`: `Registry`, el binding nombre → handler.
//! - `dispatcher`: `Dispatcher`, que conduce la máquina de reintentos.
//! - `worker`: `Worker`, el bucle de sondeo y despacho.
//! - `follower`: `Follower`, el stream de frames con semántica tail-follow.
//! - `errors`: las taxonomías de error del dominio.

pub mod dispatcher;
pub mod errors;
pub mod follower;
pub mod frame;
pub mod registry;
pub mod store;
pub mod task;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use errors::{BackendError, HandlerError};
pub use follower::Follower;
pub use frame::{Frame, FramePayload, FrameType, Status};
pub use registry::{HandlerFn, Registry};
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{Task, TaskHandle};
pub use worker::Worker;

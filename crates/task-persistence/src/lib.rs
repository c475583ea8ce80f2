//! task-persistence
//!
//! Backend Postgres (Diesel) para `task_core::TaskStore`: dos tablas
//! (`tasks`, `frames`), codificación JSON uniforme de payloads, y la
//! reclamación atómica de `pick_next` vía `FOR UPDATE SKIP LOCKED`.
//!
//! Módulos:
//! - `pg`: `PgTaskStore` y las utilidades de pool/conexión.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde `.env`.
//! - `schema`: tablas Diesel declaradas a mano.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgPool, PgTaskStore, PoolProvider};

//! Implementación Postgres (Diesel) de `task_core::TaskStore`.
//!
//! Objetivo:
//! - Persistencia durable con paridad de contrato respecto al backend en
//!   memoria de `task-core`.
//! - `frames` es append-only: nunca se actualiza ni se borra una fila.
//! - `pick_next` reclama atómicamente una tarea elegible sin que dos
//!   workers concurrentes puedan recibir la misma, usando
//!   `FOR UPDATE SKIP LOCKED` dentro de la misma sentencia `UPDATE`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::sql_types::{Array, BigInt, Jsonb, Nullable, Text, Timestamptz};
use log::{debug, warn};
use serde_json::Value;

use task_core::{BackendError, Frame, FramePayload, FrameType, Status, Task, TaskStore};

use crate::error::{to_backend_error, PersistenceError};
use crate::migrations::run_pending_migrations;
use crate::schema::{frames, tasks};

/// Alias del pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones: permite inyectar un pool real o, en
/// pruebas, una implementación alternativa sin acoplarse a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

/// Implementación de `ConnectionProvider` respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

#[derive(Queryable, Debug)]
struct TaskRow {
    id: i64,
    name: String,
    parameters: Value,
    scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
struct NewTaskRow<'a> {
    name: &'a str,
    parameters: &'a Value,
    scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Queryable, Debug)]
struct FrameRow {
    id: i64,
    task_id: i64,
    frame_type: String,
    data: Value,
    time: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = frames)]
struct NewFrameRow<'a> {
    task_id: i64,
    frame_type: &'a str,
    data: &'a Value,
    time: DateTime<Utc>,
}

/// Fila devuelta por la sentencia de reclamación atómica (ver `pick_next`).
#[derive(QueryableByName, Debug)]
struct ClaimedTaskRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Jsonb)]
    parameters: Value,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    scheduled_at: Option<DateTime<Utc>>,
}

fn task_row_to_task(row: TaskRow) -> Task {
    Task { id: row.id, name: row.name, parameters: row.parameters, scheduled_at: row.scheduled_at }
}

fn claimed_row_to_task(row: ClaimedTaskRow) -> Task {
    Task { id: row.id, name: row.name, parameters: row.parameters, scheduled_at: row.scheduled_at }
}

fn frame_type_column(t: FrameType) -> &'static str {
    match t {
        FrameType::Data => "data",
        FrameType::Progression => "progression",
        FrameType::Status => "status",
        FrameType::LogInfo => "log_info",
        FrameType::LogError => "log_error",
    }
}

fn encode_payload(payload: &FramePayload) -> Value {
    match payload {
        FramePayload::Data(v) | FramePayload::Progression(v) => v.clone(),
        FramePayload::Status(s) => Value::String(s.as_str().to_string()),
        FramePayload::LogInfo(s) | FramePayload::LogError(s) => Value::String(s.clone()),
    }
}

fn decode_frame_row(row: FrameRow) -> Result<Frame, PersistenceError> {
    let payload = match row.frame_type.as_str() {
        "data" => FramePayload::Data(row.data),
        "progression" => FramePayload::Progression(row.data),
        "status" => {
            let raw = row.data.as_str().ok_or_else(|| PersistenceError::Unknown("status payload is not a string".into()))?;
            let status: Status = raw.parse().map_err(|e: task_core::frame::ParseStatusError| PersistenceError::Unknown(e.to_string()))?;
            FramePayload::Status(status)
        }
        "log_info" => FramePayload::LogInfo(row.data.as_str().unwrap_or_default().to_string()),
        "log_error" => FramePayload::LogError(row.data.as_str().unwrap_or_default().to_string()),
        other => return Err(PersistenceError::Unknown(format!("unrecognized frame_type: {other}"))),
    };
    Ok(Frame { id: row.id, task_id: row.task_id, payload, time: row.time })
}

fn reserved_task_key(parameters: &Value) -> bool {
    matches!(parameters, Value::Object(map) if map.contains_key("task"))
}

const TERMINAL_STATUSES: [&str; 2] = ["TASK_COMPLETED", "TASK_FAILED"];

fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
                || m.contains("could not serialize access due to concurrent update")
                || m.contains("terminating connection due to administrator command")
                || m.contains("connection closed")
                || m.contains("connection refused")
                || m.contains("timeout")
        }
        _ => false,
    }
}

/// Reintento simple con backoff exponencial pequeño (hasta 3 intentos).
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Result<T, PersistenceError>,
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * (attempts + 1) as u64;
                warn!("retryable error (attempt {}): {e} -> sleeping {delay_ms}ms", attempts + 1);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Implementación Postgres de `TaskStore`.
pub struct PgTaskStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgTaskStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> TaskStore for PgTaskStore<P> {
    fn create(&self, name: &str, parameters: Value) -> Result<Task, BackendError> {
        if reserved_task_key(&parameters) {
            return Err(BackendError::ProtocolViolation(
                "parameters must not contain a reserved top-level \"task\" key".to_string(),
            ));
        }
        debug!("create:start name={name}");
        let row: TaskRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(tasks::table)
                .values(NewTaskRow { name, parameters: &parameters, scheduled_at: Some(Utc::now()) })
                .returning((tasks::id, tasks::name, tasks::parameters, tasks::scheduled_at))
                .get_result(&mut conn)
                .map_err(PersistenceError::from)
        })
        .map_err(to_backend_error)?;
        debug!("create:done id={}", row.id);
        Ok(task_row_to_task(row))
    }

    fn append(&self, task_id: i64, payload: FramePayload) -> Result<Frame, BackendError> {
        debug!("append:start task_id={task_id}");
        let frame_type = frame_type_column(payload.frame_type());
        let data = encode_payload(&payload);
        let is_status = matches!(payload, FramePayload::Status(_));
        // Captured once, before any retry attempt: a frame's `time` is the
        // instant of construction, not of eventual persistence.
        let now = Utc::now();

        let row: FrameRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx_conn| {
                if is_status {
                    let has_terminal: bool = diesel::select(diesel::dsl::exists(
                        frames::table.filter(frames::task_id.eq(task_id)).filter(frames::frame_type.eq("status")).filter(
                            frames::data
                                .eq(Value::String("TASK_COMPLETED".to_string()))
                                .or(frames::data.eq(Value::String("TASK_FAILED".to_string()))),
                        ),
                    ))
                    .get_result(tx_conn)?;
                    if has_terminal {
                        return Err(diesel::result::Error::RollbackTransaction);
                    }
                }
                diesel::insert_into(frames::table)
                    .values(NewFrameRow { task_id, frame_type, data: &data, time: now })
                    .returning((frames::id, frames::task_id, frames::frame_type, frames::data, frames::time))
                    .get_result(tx_conn)
            })
            .map_err(|e| match e {
                diesel::result::Error::RollbackTransaction => {
                    PersistenceError::ProtocolViolation(format!("task {task_id} already has a terminal status frame"))
                }
                other => PersistenceError::from(other),
            })
        })
        .map_err(to_backend_error)?;
        let frame = decode_frame_row(row).map_err(to_backend_error)?;
        debug!("append:done task_id={task_id} frame_id={}", frame.id);
        Ok(frame)
    }

    fn frames(&self, task_id: i64, frame_type: Option<FrameType>) -> Result<Vec<Frame>, BackendError> {
        debug!("frames:start task_id={task_id}");
        let rows: Vec<FrameRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            let mut query = frames::table.filter(frames::task_id.eq(task_id)).into_boxed();
            if let Some(t) = frame_type {
                query = query.filter(frames::frame_type.eq(frame_type_column(t)));
            }
            query.order(frames::id.asc()).load(&mut conn).map_err(PersistenceError::from)
        })
        .map_err(to_backend_error)?;
        rows.into_iter().map(|r| decode_frame_row(r).map_err(to_backend_error)).collect()
    }

    fn frames_since(&self, task_id: i64, since_id: i64) -> Result<Vec<Frame>, BackendError> {
        debug!("frames_since:start task_id={task_id} since_id={since_id}");
        let rows: Vec<FrameRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            frames::table
                .filter(frames::task_id.eq(task_id))
                .filter(frames::id.gt(since_id))
                .order(frames::id.asc())
                .load(&mut conn)
                .map_err(PersistenceError::from)
        })
        .map_err(to_backend_error)?;
        rows.into_iter().map(|r| decode_frame_row(r).map_err(to_backend_error)).collect()
    }

    fn schedule(&self, task_id: i64, delay: ChronoDuration) -> Result<(), BackendError> {
        debug!("schedule:start task_id={task_id}");
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                .set(tasks::scheduled_at.eq(Utc::now() + delay))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })
        .map_err(to_backend_error)?;
        Ok(())
    }

    fn unschedule(&self, task_id: i64) -> Result<(), BackendError> {
        debug!("unschedule:start task_id={task_id}");
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                .set(tasks::scheduled_at.eq(None::<DateTime<Utc>>))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })
        .map_err(to_backend_error)?;
        Ok(())
    }

    fn pick_next(&self, allowed_names: &[String]) -> Result<Option<Task>, BackendError> {
        debug!("pick_next:start allowed={allowed_names:?}");
        let sql = format!(
            "UPDATE tasks SET scheduled_at = NULL WHERE id = ( \
                SELECT t.id FROM tasks t \
                WHERE t.scheduled_at IS NOT NULL AND t.scheduled_at <= now() \
                  AND t.name = ANY($1) \
                  AND NOT EXISTS ( \
                      SELECT 1 FROM frames f \
                      WHERE f.task_id = t.id AND f.frame_type = 'status' \
                        AND f.data IN ('\"{}\"'::jsonb, '\"{}\"'::jsonb) \
                  ) \
                ORDER BY t.scheduled_at ASC \
                FOR UPDATE SKIP LOCKED \
                LIMIT 1 \
            ) RETURNING id, name, parameters, scheduled_at",
            TERMINAL_STATUSES[0], TERMINAL_STATUSES[1]
        );
        let result: Option<ClaimedTaskRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::sql_query(&sql)
                .bind::<Array<Text>, _>(allowed_names)
                .get_result(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })
        .map_err(to_backend_error)?;
        Ok(result.map(claimed_row_to_task))
    }

    fn get(&self, task_id: i64) -> Result<Task, BackendError> {
        debug!("get:start task_id={task_id}");
        let row: TaskRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            tasks::table.filter(tasks::id.eq(task_id)).first(&mut conn).map_err(PersistenceError::from)
        })
        .map_err(|e| match e {
            PersistenceError::NotFound => BackendError::NotFound(task_id),
            other => to_backend_error(other),
        })?;
        Ok(task_row_to_task(row))
    }
}

/// Construye un pool Postgres r2d2 y corre las migraciones pendientes.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .min_idle(Some(final_min))
        .max_size(validated_max)
        .build(manager)
        .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee `DbConfig` y construye un pool ya
/// migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_match_the_canonical_status_encoding() {
        assert_eq!(TERMINAL_STATUSES[0], Status::TaskCompleted.as_str());
        assert_eq!(TERMINAL_STATUSES[1], Status::TaskFailed.as_str());
    }
}

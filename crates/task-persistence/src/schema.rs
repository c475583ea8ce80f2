//! Esquema Diesel (escrito a mano; reemplazable con `diesel print-schema`).
//!
//! Tablas:
//! - `tasks`: identidad, parámetros y agenda de cada tarea.
//! - `frames`: log append-only de eventos por `task_id`, con `id` global
//!   (BIGSERIAL) como PK, igual que el `seq` del log de eventos al que este
//!   esquema está emparentado.

diesel::table! {
    tasks (id) {
        id -> BigInt,
        name -> Text,
        parameters -> Jsonb,
        scheduled_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    frames (id) {
        id -> BigInt,
        task_id -> BigInt,
        frame_type -> Text,
        data -> Jsonb,
        time -> Timestamptz,
    }
}

diesel::joinable!(frames -> tasks (task_id));
diesel::allow_tables_to_appear_in_same_query!(tasks, frames,);

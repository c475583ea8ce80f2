mod test_support;

use serde_json::json;
use task_core::{BackendError, FramePayload, FrameType, Status, TaskStore};
use task_persistence::pg::{PgTaskStore, PoolProvider};

#[test]
fn happy_path_round_trips_through_postgres() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("skip happy_path_round_trips_through_postgres (no DATABASE_URL)");
        return;
    }
    let Some(pool) = test_support::TEST_POOL.clone() else {
        eprintln!("skip happy_path_round_trips_through_postgres (pool unavailable)");
        return;
    };
    let store = PgTaskStore::new(PoolProvider { pool });

    let task = store.create("hello", json!({"name": "world"})).unwrap();
    assert!(task.scheduled_at.is_some());

    store.unschedule(task.id).unwrap();
    store.append(task.id, FramePayload::Status(Status::RunActive)).unwrap();
    store.append(task.id, FramePayload::Data(json!({"greeting": "world"}))).unwrap();
    store.append(task.id, FramePayload::Status(Status::TaskCompleted)).unwrap();

    let frames = store.frames(task.id, None).unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2].payload, FramePayload::Status(Status::TaskCompleted));

    let err = store.append(task.id, FramePayload::Status(Status::TaskFailed)).unwrap_err();
    assert!(matches!(err, BackendError::ProtocolViolation(_)));
}

#[test]
fn pick_next_claims_exactly_one_task_under_concurrency() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("skip pick_next_claims_exactly_one_task_under_concurrency (no DATABASE_URL)");
        return;
    }
    let Some(pool) = test_support::TEST_POOL.clone() else {
        eprintln!("skip pick_next_claims_exactly_one_task_under_concurrency (pool unavailable)");
        return;
    };
    let store = std::sync::Arc::new(PgTaskStore::new(PoolProvider { pool }));
    let task = store.create("only", json!({})).unwrap();
    let names = vec!["only".to_string()];

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let names = names.clone();
            std::thread::spawn(move || store.pick_next(&names).unwrap())
        })
        .collect();
    let claims: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).filter_map(|t| t).collect();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].id, task.id);
}

#[test]
fn frames_since_matches_the_in_memory_contract() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("skip frames_since_matches_the_in_memory_contract (no DATABASE_URL)");
        return;
    }
    let Some(pool) = test_support::TEST_POOL.clone() else {
        eprintln!("skip frames_since_matches_the_in_memory_contract (pool unavailable)");
        return;
    };
    let store = PgTaskStore::new(PoolProvider { pool });
    let task = store.create("greet", json!({})).unwrap();
    let f1 = store.append(task.id, FramePayload::LogInfo("one".into())).unwrap();
    let _f2 = store.append(task.id, FramePayload::LogInfo("two".into())).unwrap();
    let since = store.frames_since(task.id, f1.id).unwrap();
    assert_eq!(since.len(), 1);
    assert_eq!(since[0].frame_type(), FrameType::LogInfo);
}

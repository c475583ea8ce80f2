use serde_json::json;
use task_core::{Dispatcher, DispatcherConfig, Follower, FramePayload, InMemoryTaskStore, Registry, Status, TaskStore};

#[test]
fn run_limit_one_fails_immediately_without_a_reschedule() {
    let store = InMemoryTaskStore::new();
    let mut registry = Registry::new();
    registry.register("always_fails", |_task, _params| Err(task_core::HandlerError::msg("nope")));
    let task = store.create("always_fails", json!({})).unwrap();
    let config = DispatcherConfig { run_limit: 1, run_reschedule_delay: chrono::Duration::zero() };
    let dispatcher = Dispatcher::new(&store, &registry, config);
    dispatcher.dispatch(task.clone()).unwrap();

    let frames = store.frames(task.id, Some(task_core::FrameType::Status)).unwrap();
    let statuses: Vec<Status> = frames
        .into_iter()
        .map(|f| match f.payload {
            FramePayload::Status(s) => s,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(statuses, vec![Status::RunActive, Status::RunFailed, Status::TaskFailed]);
}

#[test]
fn follower_closes_on_the_terminal_frame_and_observers_see_the_same_sequence() {
    let store = InMemoryTaskStore::new();
    let mut registry = Registry::new();
    registry.register("hello", |task, params| {
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("world");
        task.data(json!({ "greeting": name })).unwrap();
        Ok(())
    });
    let task = store.create("hello", json!({"name": "crate"})).unwrap();
    let dispatcher = Dispatcher::new(&store, &registry, DispatcherConfig::default());
    dispatcher.dispatch(task.clone()).unwrap();

    let a: Vec<_> = Follower::new(&store, task.id)
        .with_poll_interval(std::time::Duration::from_millis(1))
        .take_while(|r| r.is_ok())
        .map(|r| r.unwrap().payload)
        .collect();
    let b: Vec<_> = Follower::new(&store, task.id)
        .with_poll_interval(std::time::Duration::from_millis(1))
        .take_while(|r| r.is_ok())
        .map(|r| r.unwrap().payload)
        .collect();
    assert_eq!(a, b);
    assert_eq!(a.last(), Some(&FramePayload::Status(Status::TaskCompleted)));
}

#[test]
fn eligibility_excludes_tasks_with_a_future_schedule() {
    let store = InMemoryTaskStore::new();
    let task = store.create("later", json!({})).unwrap();
    store.schedule(task.id, chrono::Duration::hours(1)).unwrap();
    let names = vec!["later".to_string()];
    assert!(store.pick_next(&names).unwrap().is_none());
}

//! `Follower`: stream de frames con semántica tail-follow.
//!
//! Un iterador finito, no reiniciable, que bloquea sondeando hasta que haya
//! un frame nuevo, y se cierra al producir el primer frame STATUS terminal
//! de la tarea.

use std::time::Duration as StdDuration;

use crate::errors::BackendError;
use crate::frame::{Frame, FramePayload};
use crate::store::TaskStore;

const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_millis(50);

/// Suscripción de lectura al log de una tarea.
pub struct Follower<'a> {
    store: &'a dyn TaskStore,
    task_id: i64,
    last_id: i64,
    poll_interval: StdDuration,
    done: bool,
}

impl<'a> Follower<'a> {
    /// Sigue `task_id` desde el principio del log.
    pub fn new(store: &'a dyn TaskStore, task_id: i64) -> Self {
        Self { store, task_id, last_id: -1, poll_interval: DEFAULT_POLL_INTERVAL, done: false }
    }

    /// Reanuda desde `since_id` (exclusivo): sólo se yieldean frames con
    /// id > `since_id`.
    pub fn resume_from(mut self, since_id: i64) -> Self {
        self.last_id = since_id;
        self
    }

    pub fn with_poll_interval(mut self, interval: StdDuration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl<'a> Iterator for Follower<'a> {
    type Item = Result<Frame, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.store.frames_since(self.task_id, self.last_id) {
                Ok(frames) => {
                    if let Some(frame) = frames.into_iter().next() {
                        self.last_id = frame.id;
                        if let FramePayload::Status(s) = &frame.payload {
                            if s.is_task_terminal() {
                                self.done = true;
                            }
                        }
                        return Some(Ok(frame));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::registry::Registry;
    use crate::store::InMemoryTaskStore;
    use serde_json::json;

    #[test]
    fn follow_resumes_from_a_given_frame_id() {
        let store = InMemoryTaskStore::new();
        let mut registry = Registry::new();
        registry.register("hello", |task, _params| {
            task.data(json!("first")).unwrap();
            task.data(json!("second")).unwrap();
            Ok(())
        });
        let task = store.create("hello", json!({})).unwrap();
        let dispatcher = Dispatcher::new(&store, &registry, DispatcherConfig::default());
        dispatcher.dispatch(task.clone()).unwrap();

        let all_frames = store.frames(task.id, None).unwrap();
        let resume_id = all_frames[1].id; // after RUN_ACTIVE, before "first"

        let follower = Follower::new(&store, task.id).resume_from(resume_id).with_poll_interval(StdDuration::from_millis(1));
        let collected: Vec<Frame> = follower.take_while(|r| r.is_ok()).map(|r| r.unwrap()).collect();

        assert_eq!(collected.len(), all_frames.len() - 2);
        assert_eq!(collected.last().unwrap().payload, crate::frame::FramePayload::Status(crate::frame::Status::TaskCompleted));
    }
}

use crate::protocol::TickInfo;
use chrono::{DateTime, Utc};

/// Replay state of the batch currently being dispatched. Replaced wholesale by the worker before
/// each batch and only ever read by workflow code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    pub task_queue: String,
    /// Logical time supplied by the orchestrator. Never wall clock time.
    pub tick_time: DateTime<Utc>,
    pub is_replaying: bool,
    pub run_id: String,
}

impl From<&TickInfo> for Environment {
    fn from(t: &TickInfo) -> Self {
        Self {
            task_queue: t.task_queue.clone(),
            tick_time: t.tick_time,
            is_replaying: t.replay,
            run_id: t.rid.clone(),
        }
    }
}

//! Task Registry
//!
//! Maps task identifiers to the cancellation token of the one stream that
//! currently owns each identifier.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` around a `HashMap`; every operation does O(1)
//!   work under the lock and never performs I/O
//! - Registering an identifier that is already live cancels the previous
//!   owner first (last writer wins)
//! - Each registration gets a generation number; release only removes the
//!   slot when the generation still matches, so a superseded stream that
//!   finishes late cannot evict its successor

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Caller-supplied identifier of one conversational turn
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

/// Rejected task identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task id must not be empty")]
pub struct InvalidTaskId;

impl TaskId {
    /// Create a task id; blank identifiers are rejected
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidTaskId> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(InvalidTaskId);
        }
        Ok(Self(id))
    }

    /// Fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = InvalidTaskId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// One registered stream: its identifier, generation and token
#[derive(Clone, Debug)]
pub struct StreamTask {
    id: TaskId,
    generation: u64,
    token: CancellationToken,
}

impl StreamTask {
    /// Task identifier
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Registration generation
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancellation token owned by this registration
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether this registration has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Result of [`TaskRegistry::register`]
#[derive(Debug)]
pub struct Registration {
    /// The new registration
    pub task: StreamTask,
    /// Whether a live stream with the same id was cancelled to make room
    pub superseded: bool,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryInner {
    tasks: HashMap<TaskId, Slot>,
    next_generation: u64,
}

/// Registry of live stream tasks, at most one per identifier
#[derive(Debug, Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl TaskRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream under `id`, cancelling any current owner
    pub fn register(&self, id: TaskId) -> Registration {
        let token = CancellationToken::new();
        let mut inner = self.inner.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;

        let previous = inner.tasks.insert(
            id.clone(),
            Slot {
                generation,
                token: token.clone(),
            },
        );
        drop(inner);

        let superseded = match previous {
            Some(slot) => {
                slot.token.cancel();
                true
            }
            None => false,
        };

        Registration {
            task: StreamTask {
                id,
                generation,
                token,
            },
            superseded,
        }
    }

    /// Cancel and forget the stream registered under `id`
    ///
    /// Unknown or already finished identifiers are a no-op. Returns whether
    /// a live stream was cancelled.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let removed = self.inner.lock().tasks.remove(id);
        match removed {
            Some(slot) => {
                slot.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live stream and clear the registry
    ///
    /// Returns the number of streams cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Slot> = {
            let mut inner = self.inner.lock();
            inner.tasks.drain().map(|(_, slot)| slot).collect()
        };
        for slot in &drained {
            slot.token.cancel();
        }
        drained.len()
    }

    /// Remove `task` if it still owns its identifier
    ///
    /// Returns whether the slot was removed.
    pub fn release(&self, task: &StreamTask) -> bool {
        let mut inner = self.inner.lock();
        let owned = inner
            .tasks
            .get(&task.id)
            .is_some_and(|slot| slot.generation == task.generation);
        if owned {
            inner.tasks.remove(&task.id);
        }
        owned
    }

    /// Identifiers of all live streams, sorted
    #[must_use]
    pub fn active_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.inner.lock().tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a stream is live under `id`
    #[must_use]
    pub fn is_active(&self, id: &TaskId) -> bool {
        self.inner.lock().tasks.contains_key(id)
    }

    /// Number of live streams
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Whether no stream is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases a registration when dropped
///
/// Held by the stream state so that completion, failure, cancellation and
/// the consumer dropping the stream all deregister the same way.
pub(crate) struct TaskGuard {
    registry: Arc<TaskRegistry>,
    task: StreamTask,
}

impl TaskGuard {
    pub(crate) fn new(registry: Arc<TaskRegistry>, task: StreamTask) -> Self {
        Self { registry, task }
    }

    pub(crate) fn task(&self) -> &StreamTask {
        &self.task
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.registry.release(&self.task) {
            tracing::debug!(task_id = %self.task.id, "Task deregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(id: &str) -> TaskId {
        TaskId::new(id).unwrap()
    }

    #[test]
    fn test_task_id_rejects_blank() {
        assert_eq!(TaskId::new(""), Err(InvalidTaskId));
        assert_eq!(TaskId::new("  "), Err(InvalidTaskId));
        assert_eq!("t1".parse::<TaskId>().unwrap().as_str(), "t1");
        assert_ne!(TaskId::generate(), TaskId::generate());
    }

    #[test]
    fn test_register_supersedes_previous() {
        let registry = TaskRegistry::new();
        let first = registry.register(tid("t1"));
        assert!(!first.superseded);

        let second = registry.register(tid("t1"));
        assert!(second.superseded);
        assert!(first.task.is_cancelled());
        assert!(!second.task.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_release_keeps_successor() {
        let registry = TaskRegistry::new();
        let first = registry.register(tid("t1")).task;
        let second = registry.register(tid("t1")).task;

        assert!(!registry.release(&first));
        assert!(registry.is_active(&tid("t1")));

        assert!(registry.release(&second));
        assert!(!registry.is_active(&tid("t1")));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = TaskRegistry::new();
        let t1 = registry.register(tid("t1")).task;
        let t2 = registry.register(tid("t2")).task;

        assert!(!registry.cancel(&tid("unknown")));
        assert!(registry.cancel(&tid("t1")));
        assert!(!registry.cancel(&tid("t1")));

        assert!(t1.is_cancelled());
        assert!(!t2.is_cancelled());
        assert_eq!(registry.active_tasks(), vec![tid("t2")]);
    }

    #[test]
    fn test_cancel_all() {
        let registry = TaskRegistry::new();
        let tasks: Vec<StreamTask> = ["a", "b", "c"]
            .into_iter()
            .map(|id| registry.register(tid(id)).task)
            .collect();

        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());
        assert!(tasks.iter().all(StreamTask::is_cancelled));
        assert_eq!(registry.cancel_all(), 0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = Arc::new(TaskRegistry::new());
        let task = registry.register(tid("t1")).task;
        let guard = TaskGuard::new(Arc::clone(&registry), task);
        assert_eq!(guard.task().id(), &tid("t1"));
        assert!(registry.is_active(&tid("t1")));

        drop(guard);
        assert!(!registry.is_active(&tid("t1")));
    }

    #[test]
    fn test_generations_increase() {
        let registry = TaskRegistry::new();
        let a = registry.register(tid("a")).task;
        let b = registry.register(tid("b")).task;
        assert!(b.generation() > a.generation());
    }
}

//! Per-object task queue.
//!
//! Tasks sharing a [`TaskKey`] run one at a time in arrival order; tasks for
//! different keys run concurrently. Slots are created on first use and
//! dropped once no task holds or waits on them.

use parking_lot::Mutex;
use shelf_core::Identity;
use shelf_state::InstanceId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// What a queued task is serialized on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// Every handle for the object shares the queue.
    Identity(Identity),
    /// Only the one reference is serialized.
    Instance(InstanceId),
}

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Default)]
pub struct TaskQueue {
    slots: Mutex<HashMap<TaskKey, Slot>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once every earlier task on `key` has finished.
    ///
    /// Dropping the returned future, while waiting or while running, gives
    /// up the turn and releases the slot.
    pub async fn run<F, T>(&self, key: TaskKey, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let lease = Lease {
            slot: self.slot(&key),
            queue: self,
            key,
        };
        let _turn = lease.slot.lock().await;
        task.await
    }

    /// Number of keys with a running or waiting task.
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }

    fn slot(&self, key: &TaskKey) -> Slot {
        self.slots.lock().entry(key.clone()).or_default().clone()
    }
}

/// One task's hold on a slot.
struct Lease<'a> {
    queue: &'a TaskQueue,
    key: TaskKey,
    slot: Slot,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut slots = self.queue.slots.lock();
        // The map and this lease are the only holders left.
        let idle = slots
            .get(&self.key)
            .is_some_and(|s| Arc::ptr_eq(s, &self.slot) && Arc::strong_count(s) == 2);
        if idle {
            slots.remove(&self.key);
        }
    }
}

/*
 * Copyright 2025 The Metronome Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::{collections::HashMap, sync::Arc};

use log::debug;
use parking_lot::Mutex;

use metronome_tasks::{Error, Task, TaskState, Uuid};

/// The task-metadata store: the sole strong-reference owner of
/// submitted tasks.
///
/// Identifiers that have left the live map are answered from a
/// terminal-state cache, so late lookups can still distinguish a task
/// that completed from one that was cancelled or never existed.
///
/// Implementations must not call back into the scheduler while holding
/// their own lock.
pub trait TaskStore: Send + Sync {
    /// Take ownership of a task; subsequent [`TaskStore::get`] calls
    /// return it until it is expired or finalized.
    fn add(&self, task: Arc<Task>);

    /// Look up a live task. Identifiers only present in the terminal
    /// cache report `Completed`, `Failure`, or `Cancelled`; unknown
    /// identifiers report `NotFound`.
    fn get(&self, id: &Uuid) -> Result<Arc<Task>, Error>;

    /// Drop the live entry and cache the identifier as CANCELLED,
    /// regardless of the state the task had reached.
    fn expire(&self, id: &Uuid);

    /// Retire a terminal task into the cache. Expired tasks divert to
    /// [`TaskStore::expire`].
    fn finalize(&self, task: &Arc<Task>);

    /// Idempotent.
    fn shutdown(&self, wait: bool);
}

#[derive(Default)]
struct StoreInner {
    live: HashMap<Uuid, Arc<Task>>,
    cache: HashMap<Uuid, TaskState>,
}

#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<StoreInner>,
}

impl MemoryTaskStore {
    pub fn new() -> MemoryTaskStore {
        MemoryTaskStore::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn add(&self, task: Arc<Task>) {
        debug!("store add: {}", task.id());
        self.inner.lock().live.insert(task.id(), task);
    }

    fn get(&self, id: &Uuid) -> Result<Arc<Task>, Error> {
        if !id.is_valid() {
            return Err(Error::InvalidArgument);
        }

        let inner = self.inner.lock();
        if let Some(task) = inner.live.get(id) {
            return Ok(task.clone());
        }
        match inner.cache.get(id) {
            Some(TaskState::Success) => Err(Error::Completed),
            Some(TaskState::Failed) => Err(Error::Failure),
            Some(TaskState::Cancelled) => Err(Error::Cancelled),
            Some(state) => unreachable!("non-terminal state {} in the cache", state),
            None => Err(Error::NotFound),
        }
    }

    fn expire(&self, id: &Uuid) {
        debug!("store expire: {}", id);
        let mut inner = self.inner.lock();
        inner.cache.insert(*id, TaskState::Cancelled);
        inner.live.remove(id);
    }

    fn finalize(&self, task: &Arc<Task>) {
        if task.is_expired() {
            self.expire(&task.id());
            return;
        }

        let state = task.state();
        debug_assert!(state.is_terminal());
        debug!("store finalize: {} ({})", task.id(), state);

        let mut inner = self.inner.lock();
        inner.cache.insert(task.id(), state);
        inner.live.remove(&task.id());
    }

    fn shutdown(&self, _wait: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_live_tasks() {
        let store = MemoryTaskStore::new();
        let task = Task::create(|| {});

        store.add(task.clone());
        let found = store.get(&task.id()).expect("live task");
        assert_eq!(found.id(), task.id());
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = MemoryTaskStore::new();
        assert_eq!(store.get(&Uuid::random()), Err(Error::NotFound));
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let store = MemoryTaskStore::new();
        assert_eq!(store.get(&Uuid::default()), Err(Error::InvalidArgument));
    }

    #[test]
    fn finalize_caches_the_terminal_state() {
        let store = MemoryTaskStore::new();

        let done = Task::create(|| {});
        done.set_state(TaskState::Success);
        store.add(done.clone());
        store.finalize(&done);
        assert_eq!(store.get(&done.id()), Err(Error::Completed));

        let failed = Task::create(|| {});
        failed.fail();
        store.add(failed.clone());
        store.finalize(&failed);
        assert_eq!(store.get(&failed.id()), Err(Error::Failure));
    }

    #[test]
    fn expire_always_caches_cancelled() {
        let store = MemoryTaskStore::new();
        let task = Task::create(|| {});
        task.set_state(TaskState::Success);

        store.add(task.clone());
        store.expire(&task.id());
        assert_eq!(store.get(&task.id()), Err(Error::Cancelled));
    }

    #[test]
    fn finalize_diverts_expired_tasks() {
        use std::time::{Duration, Instant};

        let store = MemoryTaskStore::new();
        let task = Task::builder()
            .before(Instant::now() - Duration::from_millis(10))
            .build(|| {});
        task.set_state(TaskState::Success);

        store.add(task.clone());
        store.finalize(&task);
        assert_eq!(store.get(&task.id()), Err(Error::Cancelled));
    }

    #[test]
    fn double_shutdown_is_a_noop() {
        let store = MemoryTaskStore::new();
        store.shutdown(true);
        store.shutdown(true);
    }
}

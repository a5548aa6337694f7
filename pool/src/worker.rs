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

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::PoolTask;

struct WorkerState {
    queue: VecDeque<Box<dyn PoolTask>>,
    waiting: bool,
    shutdown: bool,
    shutdown_complete: bool,
}

struct Shared {
    state: Mutex<WorkerState>,
    cond: Condvar,
}

/// One worker of the pool: a FIFO queue, a condition variable, and the
/// thread that drains it. The lock is never held across a task run.
pub(crate) struct Worker {
    index: usize,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn spawn(index: usize) -> Arc<Worker> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState {
                queue: VecDeque::new(),
                waiting: false,
                shutdown: false,
                shutdown_complete: false,
            }),
            cond: Condvar::new(),
        });

        let thread = {
            let shared = shared.clone();
            thread::spawn(move || {
                debug!("worker {} started", index);
                while Worker::run_once(&shared) {}
                debug!("worker {} stopped", index);
            })
        };

        Arc::new(Worker {
            index,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn run_once(shared: &Shared) -> bool {
        let mut state = shared.state.lock();

        if state.shutdown {
            state.shutdown_complete = true;
            shared.cond.notify_all();
            return false;
        }

        if state.queue.is_empty() {
            // The waiting flag doubles as the readiness signal the pool
            // blocks on before its first dispatch.
            state.waiting = true;
            shared.cond.notify_all();
            shared.cond.wait(&mut state);
            state.waiting = false;
        }

        let task = match state.queue.pop_front() {
            Some(task) => task,
            None => return true,
        };
        drop(state);

        let id = task.id();
        if panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
            error!("task '{}' panicked on its worker", id);
        }
        true
    }

    pub(crate) fn enqueue(&self, task: Box<dyn PoolTask>) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            debug!(
                "worker {} dropping task '{}' enqueued after shutdown",
                self.index,
                task.id()
            );
            return;
        }
        debug!("worker {} accepted task '{}'", self.index, task.id());
        state.queue.push_back(task);
        if state.waiting {
            self.shared.cond.notify_one();
        }
    }

    /// Block until the worker thread has parked on its queue at least
    /// once, so the pool never races its own start-up.
    pub(crate) fn wait_ready(&self) {
        let mut state = self.shared.state.lock();
        while !state.waiting && !state.shutdown {
            self.shared.cond.wait(&mut state);
        }
    }

    pub(crate) fn shutdown(&self, wait: bool) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;

            let dropped = state.queue.len();
            state.queue.clear();
            if dropped > 0 {
                debug!("worker {} dropped {} queued tasks at shutdown", self.index, dropped);
            }
        }
        self.shared.cond.notify_all();

        if !wait {
            return;
        }

        {
            let mut state = self.shared.state.lock();
            while !state.shutdown_complete {
                self.shared.cond.wait(&mut state);
            }
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

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

//! Sharded thread-pool executor.
//!
//! Work is dispatched to a fixed set of workers by task identity:
//! `shard = id.hash64() % concurrency`. The assignment is stable, so a
//! retried task always lands on the worker that ran it before, and
//! per-worker FIFO order is preserved. There is no ordering guarantee
//! across shards.

use std::sync::Arc;

use log::{debug, info};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use metronome_tasks::{Error, Uuid};

mod worker;
use worker::Worker;

/// A unit of work the pool knows how to run. The scheduler's task
/// runner is the interesting implementation; tests provide their own.
pub trait PoolTask: Send {
    fn id(&self) -> Uuid;
    fn run(&self);
}

/// The executor seam the scheduler drives. Implementations must accept
/// enqueues from any thread.
pub trait Executor: Send + Sync {
    fn enqueue(&self, task: Box<dyn PoolTask>);

    /// Best-effort cancellation of a queued task. The thread pool does
    /// not support cancelling once a worker has picked the task up, and
    /// reports success without doing anything.
    fn cancel(&self, id: &Uuid) -> Result<(), Error>;

    /// Idempotent. With `wait` set, blocks until every worker observed
    /// the shutdown and its thread joined.
    fn shutdown(&self, wait: bool);
}

struct PoolInner {
    workers: Vec<Arc<Worker>>,
    shutdown: bool,
}

pub struct ThreadPoolExecutor {
    concurrency: usize,
    ready: OnceCell<()>,
    inner: Mutex<PoolInner>,
}

impl ThreadPoolExecutor {
    pub fn new(concurrency: usize) -> ThreadPoolExecutor {
        assert!(concurrency > 0, "executor needs at least one worker");

        let workers = (0..concurrency).map(Worker::spawn).collect();
        ThreadPoolExecutor {
            concurrency,
            ready: OnceCell::new(),
            inner: Mutex::new(PoolInner {
                workers,
                shutdown: false,
            }),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    // The first dispatch blocks until every worker has parked on its
    // queue once; after that the latch is free.
    fn ensure_ready(&self) {
        self.ready.get_or_init(|| {
            let workers = self.inner.lock().workers.clone();
            for worker in &workers {
                worker.wait_ready();
            }
        });
    }
}

impl Default for ThreadPoolExecutor {
    fn default() -> ThreadPoolExecutor {
        ThreadPoolExecutor::new(num_cpus::get())
    }
}

impl Executor for ThreadPoolExecutor {
    fn enqueue(&self, task: Box<dyn PoolTask>) {
        self.ensure_ready();

        let inner = self.inner.lock();
        if inner.shutdown {
            info!("task '{}' enqueued after shutdown, dropping", task.id());
            return;
        }

        let shard = (task.id().hash64() % self.concurrency as u64) as usize;
        debug!("task '{}' enqueued on worker {}", task.id(), shard);
        inner.workers[shard].enqueue(task);
    }

    fn cancel(&self, id: &Uuid) -> Result<(), Error> {
        debug!("cancel requested for task '{}'", id);
        Ok(())
    }

    fn shutdown(&self, wait: bool) {
        let workers = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                debug!("executor shutdown requested twice");
                return;
            }
            inner.shutdown = true;
            std::mem::take(&mut inner.workers)
        };

        debug!("shutting down {} workers (wait={})", workers.len(), wait);
        for worker in &workers {
            worker.shutdown(wait);
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

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
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use metronome_pool::{Executor, ThreadPoolExecutor};
use metronome_tasks::{Task, TaskState, Uuid};

use crate::reporter::ScheduleReporter;
use crate::runner::TaskRunner;
use crate::store::{MemoryTaskStore, TaskStore};

/// How long a pending task may wait on a dependency that was never
/// submitted before it is failed.
const DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(30);

struct Inner {
    /// FIFO submission queue, drained one entry per supervisor pass.
    queue: VecDeque<Uuid>,
    /// Known to the scheduler, not yet dispatched.
    pending: BTreeSet<Uuid>,
    /// Dispatched to the executor, not yet terminal.
    active: BTreeSet<Uuid>,
    /// Earliest-start deadlines for premature tasks; the smallest entry
    /// is the supervisor's next wakeup.
    premature: BTreeMap<Uuid, Instant>,
    /// When a task was first observed blocked on an unqueued
    /// dependency.
    timeouts: HashMap<Uuid, Instant>,
    executor: Option<Arc<dyn Executor>>,
    store: Option<Arc<dyn TaskStore>>,
    reporter: Option<Arc<dyn ScheduleReporter>>,
    waiting: bool,
    notify: bool,
    shutdown: bool,
    shutdown_complete: bool,
    thread: Option<JoinHandle<()>>,
}

// The collaborators are only taken out of their slots by shutdown,
// which every supervisor entry point checks first under the same lock.
fn store_of(inner: &Inner) -> Arc<dyn TaskStore> {
    inner.store.clone().expect("store lives until shutdown")
}

fn executor_of(inner: &Inner) -> Arc<dyn Executor> {
    inner.executor.clone().expect("executor lives until shutdown")
}

fn report(inner: &Inner, id: &Uuid, state: TaskState) {
    if let Some(reporter) = &inner.reporter {
        reporter.task_transition(id, state);
    }
}

fn is_timed_out(inner: &Inner, id: &Uuid) -> bool {
    match inner.timeouts.get(id) {
        Some(first) => first.elapsed() > DEPENDENCY_TIMEOUT,
        None => false,
    }
}

fn prune_premature(inner: &mut Inner) {
    let now = Instant::now();
    inner.premature.retain(|_, deadline| now < *deadline);
}

#[derive(Default)]
pub struct SchedulerBuilder {
    concurrency: Option<usize>,
    executor: Option<Arc<dyn Executor>>,
    store: Option<Arc<dyn TaskStore>>,
    reporter: Option<Arc<dyn ScheduleReporter>>,
}

impl SchedulerBuilder {
    /// Worker count for the default executor. Ignored when an executor
    /// is supplied explicitly.
    pub fn concurrency(mut self, concurrency: usize) -> SchedulerBuilder {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> SchedulerBuilder {
        self.executor = Some(executor);
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> SchedulerBuilder {
        self.store = Some(store);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ScheduleReporter>) -> SchedulerBuilder {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> Arc<Scheduler> {
        let SchedulerBuilder {
            concurrency,
            executor,
            store,
            reporter,
        } = self;

        let executor = executor.unwrap_or_else(|| {
            let concurrency = concurrency.unwrap_or_else(num_cpus::get);
            Arc::new(ThreadPoolExecutor::new(concurrency))
        });
        let store = store.unwrap_or_else(|| Arc::new(MemoryTaskStore::new()));

        Arc::new_cyclic(|weak| Scheduler {
            weak: weak.clone(),
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                pending: BTreeSet::new(),
                active: BTreeSet::new(),
                premature: BTreeMap::new(),
                timeouts: HashMap::new(),
                executor: Some(executor),
                store: Some(store),
                reporter,
                waiting: false,
                notify: false,
                shutdown: false,
                shutdown_complete: false,
                thread: None,
            }),
            cond: Condvar::new(),
        })
    }
}

/// The supervisor: turns submissions into executor work while honoring
/// dependencies, temporal windows, and retries.
///
/// One mutex guards all bookkeeping; it is held for the whole of a
/// supervisor pass and never while a task body runs.
pub struct Scheduler {
    // Handed to runners so they can notify back without keeping the
    // scheduler alive.
    weak: Weak<Scheduler>,
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// A scheduler with default executor and store. Call
    /// [`Scheduler::start`] to spawn the supervisor thread.
    pub fn new() -> Arc<Scheduler> {
        Scheduler::builder().build()
    }

    /// Spawn the supervisor thread.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            warn!("scheduler started after shutdown");
            return;
        }
        debug_assert!(inner.thread.is_none());

        let me = self.weak.upgrade().expect("scheduler is alive");
        inner.thread = Some(thread::spawn(move || {
            debug!("scheduler supervisor started");
            while me.run_once() {}
            debug!("scheduler supervisor stopped");
        }));
    }

    /// Submit a task, or a composite and all of its children, for
    /// execution. Invalid tasks are rejected with a log and no state
    /// change; the store takes ownership of everything accepted.
    pub fn enqueue(&self, task: &Arc<Task>) {
        if !task.is_valid() {
            warn!("invalid task '{}' enqueued to scheduler", task);
            return;
        }
        if task.kind().is_composite() && !task.has_children() {
            warn!("composite '{}' posted with no children", task.id());
        }

        let mut inner = self.inner.lock();
        if inner.shutdown {
            warn!("task '{}' enqueued after scheduler shutdown, dropping", task.id());
            return;
        }
        let store = store_of(&inner);
        self.enqueue_locked(&mut inner, &store, task);
        self.notify_locked(&mut inner);
    }

    // Children are registered before their composite so that every
    // dependency the composite's evaluation walks is already known to
    // the store. Recursion covers nested composites.
    fn enqueue_locked(&self, inner: &mut Inner, store: &Arc<dyn TaskStore>, task: &Arc<Task>) {
        if task.kind().is_composite() {
            for child in task.children() {
                self.enqueue_locked(inner, store, &child);
            }
        }
        debug!("enqueue: {}", task.id());
        inner.queue.push_back(task.id());
        store.add(task.clone());
    }

    /// Wake the supervisor.
    pub fn notify(&self) {
        let mut inner = self.inner.lock();
        self.notify_locked(&mut inner);
    }

    fn notify_locked(&self, inner: &mut Inner) {
        inner.notify = true;
        if inner.waiting {
            self.cond.notify_all();
        }
    }

    /// State-transition notification from a runner. Moves the id
    /// between the pending and active sets as dictated by the
    /// transition table and applies the state to the task.
    pub(crate) fn notify_task(&self, task: &Arc<Task>, state: TaskState) {
        let mut inner = self.inner.lock();
        let id = task.id();

        // A worker can finish a task while shutdown is in flight; the
        // bookkeeping is gone, but waiters still get their transition.
        if inner.shutdown {
            match state {
                TaskState::Failed => task.fail(),
                state => task.set_state(state),
            }
            return;
        }

        match state {
            TaskState::Active => {
                debug_assert!(!inner.pending.contains(&id));
                inner.active.insert(id);
                info!("task '{}' moving to ACTIVE state", id);
                task.set_state(TaskState::Active);
            }
            TaskState::Success => {
                inner.active.remove(&id);
                info!("task '{}' moving to SUCCESS state", id);
                task.set_state(TaskState::Success);
                // The id just left the active set, so the supervisor's
                // sweep will never see this task again; retire it into
                // the store's terminal cache here.
                store_of(&inner).finalize(task);
            }
            TaskState::Failed => {
                inner.active.remove(&id);
                info!("task '{}' moving to FAILED state", id);
                task.fail();
                store_of(&inner).finalize(task);
            }
            TaskState::Pending => {
                // A retry: the supervisor picks the task up again once
                // its new window opens.
                inner.active.remove(&id);
                inner.pending.insert(id);
                info!("task '{}' moving back to PENDING state", id);
                task.set_state(TaskState::Pending);
            }
            state => unreachable!("unhandled task state notification: {}", state),
        }

        report(&inner, &id, state);
        self.notify_locked(&mut inner);
    }

    /// One supervisor pass. Returns false only after shutdown; the
    /// supervisor thread is `while run_once() {}`.
    pub fn run_once(&self) -> bool {
        let mut inner = self.inner.lock();

        if inner.shutdown {
            debug_assert!(inner.queue.is_empty());
            debug_assert!(inner.active.is_empty());
            debug_assert!(inner.pending.is_empty());
            inner.shutdown_complete = true;
            self.cond.notify_all();
            return false;
        }

        // Drain new arrivals before doing any other work.
        if !inner.queue.is_empty() {
            self.process_pending_queue(&mut inner);
            return true;
        }

        self.process_active_tasks(&mut inner);
        if self.process_pending_tasks(&mut inner) {
            // A failure propagated this pass; go around again so
            // downstream tasks observe it instead of sleeping.
            return true;
        }

        debug_assert!(!inner.waiting);
        inner.waiting = true;
        if !inner.notify {
            let deadline = inner.premature.values().min().copied();
            match deadline {
                Some(deadline) if deadline <= Instant::now() => {}
                Some(deadline) => {
                    let _ = self.cond.wait_until(&mut inner, deadline);
                }
                None => self.cond.wait(&mut inner),
            }
        }
        inner.notify = false;
        inner.waiting = false;
        prune_premature(&mut inner);
        true
    }

    fn process_pending_queue(&self, inner: &mut Inner) {
        let id = match inner.queue.pop_front() {
            Some(id) => id,
            None => return,
        };
        let store = store_of(inner);

        let task = match store.get(&id) {
            Ok(task) => task,
            Err(err) => {
                info!("unknown queued task: {} ({})", id, err);
                return;
            }
        };

        if task.is_expired() {
            self.handle_expired_task(inner, &task);
            return;
        }
        if task.is_premature() {
            if let Some(after) = task.after() {
                inner.premature.insert(id, after);
            }
        }
        inner.pending.insert(id);
        task.set_state(TaskState::Pending);
    }

    // Rebuild the active set: cancel expired tasks, keep the rest.
    // Runner notifications finalize ordinary completions directly; the
    // completion branch here only catches tasks that reached a terminal
    // state some other way (an external `fail` while dispatched).
    fn process_active_tasks(&self, inner: &mut Inner) {
        if inner.active.is_empty() {
            return;
        }
        let store = store_of(inner);

        let ids: Vec<Uuid> = inner.active.iter().copied().collect();
        let mut retained = BTreeSet::new();
        for id in ids {
            let task = match store.get(&id) {
                Ok(task) => task,
                Err(err) => {
                    info!("unknown active task: {} ({})", id, err);
                    continue;
                }
            };

            if task.is_complete() {
                info!("completed task: {}", id);
                store.finalize(&task);
                report(inner, &id, task.state());
                continue;
            }
            if task.is_expired() {
                self.handle_expired_task(inner, &task);
                continue;
            }
            retained.insert(id);
        }
        inner.active = retained;
    }

    // Classify every pending task and dispatch the ready ones. Returns
    // true when a failure propagated through a dependency edge this
    // pass, which biases the caller away from sleeping.
    fn process_pending_tasks(&self, inner: &mut Inner) -> bool {
        if inner.pending.is_empty() {
            return false;
        }
        let store = store_of(inner);

        let ids: Vec<Uuid> = inner.pending.iter().copied().collect();
        let mut retained = BTreeSet::new();
        let mut failed = false;

        for id in ids {
            let task = match store.get(&id) {
                Ok(task) => task,
                Err(err) => {
                    info!("unknown pending task: {} ({})", id, err);
                    continue;
                }
            };

            if task.is_expired() {
                self.handle_expired_task(inner, &task);
                continue;
            }
            if task.is_premature() {
                // Retried tasks come back with a fresh window; make
                // sure the wakeup deadline covers it.
                if let Some(after) = task.after() {
                    inner.premature.entry(id).or_insert(after);
                }
                retained.insert(id);
                continue;
            }
            if !task.has_dependencies() {
                self.handle_task(inner, task);
                continue;
            }

            let mut ready = true;
            let mut task_failed = false;
            for dep in task.dependencies() {
                let dep_state = dep.state();
                if dep_state == TaskState::Success {
                    continue;
                }
                if dep.is_premature() {
                    ready = false;
                } else if dep_state == TaskState::Failed {
                    ready = false;
                    warn!("failing task '{}' due to failed dependency '{}'", id, dep.id());
                    task.fail();
                    task_failed = true;
                } else if dep.is_expired() {
                    ready = false;
                    warn!("failing task '{}' due to expired dependency '{}'", id, dep.id());
                    task.fail();
                    task_failed = true;
                } else if dep_state == TaskState::New {
                    ready = false;
                    if is_timed_out(inner, &id) {
                        warn!("failing task '{}' due to a timed out dependency '{}'", id, dep.id());
                        task.fail();
                        task_failed = true;
                    } else {
                        inner.timeouts.entry(id).or_insert_with(Instant::now);
                        info!("task '{}' is waiting on an unqueued dependency '{}'", id, dep.id());
                    }
                } else if inner.pending.contains(&dep.id()) || inner.active.contains(&dep.id()) {
                    ready = false;
                }
                if !ready {
                    break;
                }
            }

            if task_failed {
                failed = true;
                report(inner, &id, TaskState::Failed);
                continue;
            }
            if ready {
                self.handle_task(inner, task);
                continue;
            }
            if !task.is_complete() {
                retained.insert(id);
            }
        }

        inner.pending = retained;
        failed
    }

    // Dispatch: the task leaves pending (by not being retained), joins
    // active, and goes to the executor wrapped in a runner that holds
    // the scheduler weakly.
    fn handle_task(&self, inner: &mut Inner, task: Arc<Task>) {
        let id = task.id();
        debug_assert!(!inner.active.contains(&id));
        inner.active.insert(id);
        inner.timeouts.remove(&id);

        debug!("enqueuing task '{}' with the executor", id);
        let runner = TaskRunner::new(task, self.weak.clone());
        executor_of(inner).enqueue(Box::new(runner));
    }

    fn handle_expired_task(&self, inner: &mut Inner, task: &Arc<Task>) {
        let id = task.id();
        if task.is_active() {
            warn!("task '{}' expired while running", id);
        } else {
            warn!("task '{}' expired while in queue", id);
        }

        // The body of an already-running task is not interrupted; its
        // eventual result notification lands on a terminal state and is
        // ignored.
        task.set_state(TaskState::Cancelled);

        prune_premature(inner);
        inner.premature.remove(&id);
        store_of(inner).expire(&id);
        report(inner, &id, TaskState::Cancelled);
    }

    /// Stop the scheduler: the executor, store, and reporter are shut
    /// down in that order. With `wait` set, blocks until the supervisor
    /// acknowledged the shutdown and every owned thread joined. A
    /// second call is a no-op.
    pub fn shutdown(&self, wait: bool) {
        let (executor, store, reporter, thread) = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                debug!("scheduler shutdown requested twice");
                return;
            }
            info!("scheduler shutdown (wait={})", wait);
            inner.shutdown = true;

            inner.queue.clear();
            inner.pending.clear();
            inner.active.clear();
            inner.premature.clear();
            inner.timeouts.clear();

            let taken = (
                inner.executor.take(),
                inner.store.take(),
                inner.reporter.take(),
                inner.thread.take(),
            );
            self.notify_locked(&mut inner);
            taken
        };

        if let Some(executor) = &executor {
            executor.shutdown(wait);
        }
        if let Some(store) = &store {
            store.shutdown(wait);
        }
        if let Some(reporter) = &reporter {
            reporter.shutdown(wait);
        }

        if !wait {
            return;
        }

        if thread.is_some() {
            let mut inner = self.inner.lock();
            while !inner.shutdown_complete {
                self.cond.wait(&mut inner);
            }
        }
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

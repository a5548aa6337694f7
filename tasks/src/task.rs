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
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    New,
    Pending,
    Active,
    Success,
    Failed,
    Cancelled,
    /// Declared for future use; the scheduler never enters it.
    Suspended,
}

impl TaskState {
    /// Terminal states are absorbing: once entered, `set_state` and
    /// `fail` are no-ops.
    pub fn is_terminal(self) -> bool {
        match self {
            TaskState::Success | TaskState::Failed | TaskState::Cancelled => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskState::New => "NEW",
            TaskState::Pending => "PENDING",
            TaskState::Active => "ACTIVE",
            TaskState::Success => "SUCCESS",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
            TaskState::Suspended => "SUSPENDED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    Success,
    Failure,
    Retry,
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskResult::Success => "TaskResult::SUCCESS",
            TaskResult::Failure => "TaskResult::FAILURE",
            TaskResult::Retry => "TaskResult::RETRY",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Leaf,
    Chain,
    Group,
}

impl TaskKind {
    pub fn is_composite(self) -> bool {
        match self {
            TaskKind::Chain | TaskKind::Group => true,
            TaskKind::Leaf => false,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskKind::Leaf => "Task",
            TaskKind::Chain => "Chain",
            TaskKind::Group => "Group",
        })
    }
}

/// The uniform callable every task body is adapted into.
pub type TaskBody = Box<dyn FnMut(&Task) -> TaskResult + Send>;

/// Return values a body is allowed to produce: `()` always reports
/// SUCCESS, `bool` maps onto SUCCESS/FAILURE, and [`TaskResult`] passes
/// through untouched.
pub trait BodyOutcome {
    fn into_outcome(self) -> TaskResult;
}

impl BodyOutcome for () {
    fn into_outcome(self) -> TaskResult {
        TaskResult::Success
    }
}

impl BodyOutcome for bool {
    fn into_outcome(self) -> TaskResult {
        if self {
            TaskResult::Success
        } else {
            TaskResult::Failure
        }
    }
}

impl BodyOutcome for TaskResult {
    fn into_outcome(self) -> TaskResult {
        self
    }
}

/// Adapts the convenience callable shapes into a [`TaskBody`]. The
/// marker parameter keeps the blanket impls for the two arities from
/// overlapping; callers never name it.
pub trait IntoTaskBody<Marker> {
    fn into_body(self) -> TaskBody;
}

impl<F, R> IntoTaskBody<fn() -> R> for F
where
    F: FnMut() -> R + Send + 'static,
    R: BodyOutcome,
{
    fn into_body(mut self) -> TaskBody {
        Box::new(move |_| self().into_outcome())
    }
}

impl<F, R> IntoTaskBody<fn(&Task) -> R> for F
where
    F: FnMut(&Task) -> R + Send + 'static,
    R: BodyOutcome,
{
    fn into_body(mut self) -> TaskBody {
        Box::new(move |task| self(task).into_outcome())
    }
}

fn noop_body() -> TaskBody {
    Box::new(|_| TaskResult::Success)
}

#[derive(Default)]
pub struct TaskBuilder {
    after: Option<Instant>,
    before: Option<Instant>,
    retry_interval: Option<Duration>,
}

impl TaskBuilder {
    /// The task is premature, and will not be dispatched, until the
    /// given point in time.
    pub fn after(mut self, point: Instant) -> TaskBuilder {
        self.after = Some(point);
        self
    }

    /// The task expires, and will be cancelled instead of run, once the
    /// given point in time has passed.
    pub fn before(mut self, point: Instant) -> TaskBuilder {
        self.before = Some(point);
        self
    }

    /// Makes the task retryable. A body returning RETRY pushes the
    /// task's earliest-start bound forward by this interval.
    pub fn retry_interval(mut self, interval: Duration) -> TaskBuilder {
        self.retry_interval = Some(interval);
        self
    }

    pub fn build<M>(self, body: impl IntoTaskBody<M>) -> Arc<Task> {
        Task::with_parts(TaskKind::Leaf, self, body.into_body())
    }

    pub fn chain(self) -> Arc<Task> {
        Task::with_parts(TaskKind::Chain, self, noop_body())
    }

    pub fn group(self) -> Arc<Task> {
        Task::with_parts(TaskKind::Group, self, noop_body())
    }
}

pub(crate) struct Meta {
    pub(crate) state: TaskState,
    pub(crate) valid: bool,
    pub(crate) after: Option<Instant>,
    pub(crate) before: Option<Instant>,
    pub(crate) dependencies: Vec<Arc<Task>>,
    pub(crate) children: Vec<Arc<Task>>,
}

/// The atomic unit of work.
///
/// A task carries its identity, state, temporal bounds, dependency
/// list, and a user-supplied body. Composite tasks (chains and groups)
/// additionally carry an ordered child list; see the composite methods
/// for how children are linked.
///
/// All mutable state lives behind the task's own mutex; the condition
/// variable is used only by [`Task::wait`] and friends.
pub struct Task {
    id: Uuid,
    kind: TaskKind,
    created_on: Instant,
    retry_interval: Option<Duration>,
    body: Mutex<TaskBody>,
    pub(crate) meta: Mutex<Meta>,
    cond: Condvar,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl Task {
    fn with_parts(kind: TaskKind, builder: TaskBuilder, body: TaskBody) -> Arc<Task> {
        Arc::new(Task {
            id: Uuid::random(),
            kind,
            created_on: Instant::now(),
            retry_interval: builder.retry_interval,
            body: Mutex::new(body),
            meta: Mutex::new(Meta {
                state: TaskState::New,
                valid: true,
                after: builder.after,
                before: builder.before,
                dependencies: Vec::new(),
                children: Vec::new(),
            }),
            cond: Condvar::new(),
        })
    }

    pub fn builder() -> TaskBuilder {
        TaskBuilder::default()
    }

    /// Create a simple task with no time boundaries.
    pub fn create<M>(body: impl IntoTaskBody<M>) -> Arc<Task> {
        Task::builder().build(body)
    }

    /// Create an empty chain; children execute in the order they are
    /// added.
    pub fn chain() -> Arc<Task> {
        Task::builder().chain()
    }

    /// Create an empty group; children execute independently.
    pub fn group() -> Arc<Task> {
        Task::builder().group()
    }

    pub fn chain_of<I>(children: I) -> Arc<Task>
    where
        I: IntoIterator<Item = Arc<Task>>,
    {
        let chain = Task::chain();
        for child in children {
            chain.add_child(&child);
        }
        chain
    }

    pub fn group_of<I>(children: I) -> Arc<Task>
    where
        I: IntoIterator<Item = Arc<Task>>,
    {
        let group = Task::group();
        for child in children {
            group.add_child(&child);
        }
        group
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn created_on(&self) -> Instant {
        self.created_on
    }

    /// The point before which the task is premature, if any.
    pub fn after(&self) -> Option<Instant> {
        self.meta.lock().after
    }

    /// The point past which the task is expired, if any.
    pub fn before(&self) -> Option<Instant> {
        self.meta.lock().before
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        self.retry_interval
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_interval.is_some()
    }

    pub fn state(&self) -> TaskState {
        self.meta.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == TaskState::Active
    }

    /// Whether the task has reached a terminal state. Says nothing
    /// about success or failure.
    pub fn is_complete(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_expired(&self) -> bool {
        match self.meta.lock().before {
            Some(before) => Instant::now() > before,
            None => false,
        }
    }

    pub fn is_premature(&self) -> bool {
        match self.meta.lock().after {
            Some(after) => Instant::now() < after,
            None => false,
        }
    }

    /// A task may gain dependencies or composite children only while it
    /// has neither started running nor completed.
    pub fn is_modifiable(&self) -> bool {
        let meta = self.meta.lock();
        !meta.state.is_terminal() && meta.state != TaskState::Active
    }

    pub fn has_dependencies(&self) -> bool {
        !self.meta.lock().dependencies.is_empty()
    }

    /// Snapshot of the direct dependency list.
    pub fn dependencies(&self) -> Vec<Arc<Task>> {
        self.meta.lock().dependencies.clone()
    }

    /// A task is valid iff its own flag is set and every transitive
    /// dependency is valid. The flag is sticky; see
    /// [`Task::depends`] for how it gets cleared.
    pub fn is_valid(&self) -> bool {
        let (valid, dependencies) = {
            let meta = self.meta.lock();
            (meta.valid, meta.dependencies.clone())
        };
        if !valid {
            return false;
        }
        dependencies.iter().all(|dep| dep.is_valid())
    }

    /// Link `other` as a prerequisite of this task.
    ///
    /// No-op when this task is terminal, active, or already invalid,
    /// and when `other` is already transitively required. If `other`
    /// transitively requires this task the link would close a cycle:
    /// the validity flag is cleared instead and no link is formed.
    pub fn depends(&self, other: &Arc<Task>) {
        if other.id == self.id {
            return;
        }
        {
            let meta = self.meta.lock();
            if meta.state.is_terminal() || meta.state == TaskState::Active || !meta.valid {
                return;
            }
        }
        if self.requires(&other.id) {
            return;
        }
        if other.requires(&self.id) {
            warn!(
                "task '{}' would close a dependency cycle through '{}'",
                self.id, other.id
            );
            self.set_valid(false);
            return;
        }
        self.meta.lock().dependencies.push(other.clone());
    }

    /// Transitive reachability query: does `id` appear anywhere in the
    /// dependency closure?
    pub fn requires(&self, id: &Uuid) -> bool {
        self.requires_from(&self.id, &self.id, id)
    }

    // Children matching the walk's origin or the immediate parent are
    // skipped so the walk terminates on graphs constructed through
    // invalidated intermediates.
    fn requires_from(&self, start: &Uuid, parent: &Uuid, id: &Uuid) -> bool {
        for dep in self.dependencies() {
            if dep.id == *start || dep.id == *parent {
                continue;
            }
            if dep.id == *id {
                return true;
            }
            if dep.requires_from(parent, &self.id, id) {
                return true;
            }
        }
        false
    }

    /// Guarded state transition: a no-op once the task is terminal.
    /// Waiters are woken after the task mutex is released.
    pub fn set_state(&self, state: TaskState) {
        {
            let mut meta = self.meta.lock();
            if meta.state.is_terminal() {
                return;
            }
            meta.state = state;
        }
        self.cond.notify_all();
    }

    /// Move the task to FAILED. Terminal and idempotent.
    pub fn fail(&self) {
        self.set_state(TaskState::Failed);
    }

    // The validity flag only ever transitions true to false, and only
    // while the task is neither active nor complete.
    pub(crate) fn set_valid(&self, status: bool) {
        let mut meta = self.meta.lock();
        debug_assert!(!meta.state.is_terminal());
        debug_assert!(meta.state != TaskState::Active);
        if !meta.valid {
            return;
        }
        meta.valid = status;
    }

    /// Push the earliest-start bound forward; used by the retry path.
    pub fn set_after_time(&self, point: Instant) {
        self.meta.lock().after = Some(point);
    }

    /// Block until the task reaches a terminal state.
    pub fn wait(&self) {
        let mut meta = self.meta.lock();
        while !meta.state.is_terminal() {
            self.cond.wait(&mut meta);
        }
    }

    /// Block until the task's state changes from its current value, or
    /// return immediately if it is already terminal.
    pub fn wait_for_transition(&self) {
        let mut meta = self.meta.lock();
        if meta.state.is_terminal() {
            return;
        }
        let entered = meta.state;
        while meta.state == entered {
            self.cond.wait(&mut meta);
        }
    }

    /// Invoke the user-supplied body. Only the executor's runner calls
    /// this; the scheduler observes the returned result through the
    /// runner's notifications.
    pub fn run_body(&self) -> TaskResult {
        let mut body = self.body.lock();
        (*body)(self)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {} ({})>", self.kind, self.id, self.state())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

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
    sync::{Arc, Weak},
    time::Instant,
};

use log::{info, warn};

use metronome_pool::PoolTask;
use metronome_tasks::{Task, TaskResult, TaskState, Uuid};

use crate::scheduler::Scheduler;

/// Adapter between a task and the worker that runs it: invokes the body
/// and turns its result into scheduler notifications.
///
/// The runner holds the scheduler weakly; when the scheduler is already
/// gone the state transitions are applied to the task directly so
/// waiters still observe completion.
pub(crate) struct TaskRunner {
    task: Arc<Task>,
    scheduler: Weak<Scheduler>,
}

impl TaskRunner {
    pub(crate) fn new(task: Arc<Task>, scheduler: Weak<Scheduler>) -> TaskRunner {
        TaskRunner { task, scheduler }
    }

    fn notify(&self, state: TaskState) {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.notify_task(&self.task, state),
            None if state == TaskState::Failed => self.task.fail(),
            None => self.task.set_state(state),
        }
    }
}

impl PoolTask for TaskRunner {
    fn id(&self) -> Uuid {
        self.task.id()
    }

    fn run(&self) {
        self.notify(TaskState::Active);

        let start = Instant::now();
        let result = self.task.run_body();
        let elapsed = start.elapsed();

        match result {
            TaskResult::Success => {
                info!(
                    "task '{}' successfully executed in {}ms",
                    self.task.id(),
                    elapsed.as_millis()
                );
                self.notify(TaskState::Success);
            }
            TaskResult::Failure => {
                warn!(
                    "task '{}' failed to execute after {}ms",
                    self.task.id(),
                    elapsed.as_millis()
                );
                self.notify(TaskState::Failed);
            }
            TaskResult::Retry => {
                let interval = self
                    .task
                    .retry_interval()
                    .expect("RETRY from a task without a retry interval");
                info!(
                    "task '{}' retrying after running for {}ms, next attempt in {}ms",
                    self.task.id(),
                    elapsed.as_millis(),
                    interval.as_millis()
                );
                self.task.set_after_time(Instant::now() + interval);
                self.notify(TaskState::Pending);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn detached_runner_applies_states_directly() {
        let task = Task::create(|| TaskResult::Success);
        let runner = TaskRunner::new(task.clone(), Weak::new());

        runner.run();
        assert_eq!(task.state(), TaskState::Success);
    }

    #[test]
    fn detached_runner_fails_the_task_on_failure() {
        let task = Task::create(|| TaskResult::Failure);
        let runner = TaskRunner::new(task.clone(), Weak::new());

        runner.run();
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn retry_pushes_the_after_bound_and_re_pends() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let task = Task::builder()
            .retry_interval(Duration::from_secs(60))
            .build(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                TaskResult::Retry
            });
        let runner = TaskRunner::new(task.clone(), Weak::new());

        runner.run();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Pending);
        assert!(task.is_premature());
    }

    #[test]
    fn zero_interval_retry_is_immediately_eligible() {
        let task = Task::builder()
            .retry_interval(Duration::from_secs(0))
            .build(|| TaskResult::Retry);
        let runner = TaskRunner::new(task.clone(), Weak::new());

        runner.run();
        assert_eq!(task.state(), TaskState::Pending);
        assert!(!task.is_premature());
    }
}

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

//! An in-process task scheduler.
//!
//! Callers submit tasks, optionally with dependencies, temporal windows
//! (run after / expire before), retry intervals, and composite
//! structure (chains run children in order, groups fan them out). A
//! single supervisor thread classifies submissions and dispatches ready
//! tasks onto a worker pool sharded by task identity.
//!
//! ```no_run
//! use metronome::{Scheduler, Task, TaskResult, TaskState};
//!
//! let scheduler = Scheduler::builder().concurrency(2).build();
//! scheduler.start();
//!
//! let fetch = Task::create(|| TaskResult::Success);
//! let publish = Task::create(|| TaskResult::Success);
//! publish.depends(&fetch);
//!
//! scheduler.enqueue(&publish);
//! scheduler.enqueue(&fetch);
//!
//! publish.wait();
//! assert_eq!(publish.state(), TaskState::Success);
//! scheduler.shutdown(true);
//! ```

mod reporter;
mod runner;
mod scheduler;
mod store;

pub use metronome_pool::{Executor, PoolTask, ThreadPoolExecutor};
pub use metronome_tasks::{
    BodyOutcome, Error, IntoTaskBody, Task, TaskBody, TaskBuilder, TaskKind, TaskResult,
    TaskState, Uuid,
};

pub use crate::reporter::{ConsoleReporter, ScheduleReporter};
pub use crate::scheduler::{Scheduler, SchedulerBuilder};
pub use crate::store::{MemoryTaskStore, TaskStore};

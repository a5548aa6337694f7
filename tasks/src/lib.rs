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

//! Task primitives for the metronome scheduler.
//!
//! This crate holds everything a task is made of: identifiers, the
//! state machine, temporal bounds, the dependency graph, and the
//! chain/group composites. It has no opinion about how tasks get
//! executed; the executor and the supervisor live in their own crates.

mod composite;
mod error;
mod task;
mod uuid;


pub use error::Error;
pub use task::{
    BodyOutcome, IntoTaskBody, Task, TaskBody, TaskBuilder, TaskKind, TaskResult, TaskState,
};
pub use uuid::Uuid;

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

use thiserror::Error;

/// Error taxonomy shared by the scheduler and its collaborators.
///
/// Success is expressed as the `Ok` arm of `Result`; the `Cancelled`
/// and `Completed` variants are served from the store's terminal-state
/// cache for identifiers that are no longer tracked live.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("operation failed")]
    Failure,
    #[error("no such task")]
    NotFound,
    #[error("task was cancelled")]
    Cancelled,
    #[error("task already completed")]
    Completed,
    #[error("invalid argument")]
    InvalidArgument,
}

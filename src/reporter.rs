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

use parking_lot::Mutex;

use metronome_tasks::{TaskState, Uuid};

/// Optional observer of scheduler events. All callbacks have empty
/// defaults; implement what you care about.
pub trait ScheduleReporter: Send + Sync {
    /// A task moved to a new state. Called for dispatches, completions,
    /// retries, failures, and cancellations.
    fn task_transition(&self, id: &Uuid, state: TaskState) {
        let _ = (id, state);
    }

    fn shutdown(&self, wait: bool) {
        let _ = wait;
    }
}

#[derive(Default)]
struct Progress {
    started: usize,
    finished: usize,
}

/// Renders `[finished/started]` progress lines to the terminal,
/// rewriting the current line when stdout is a real TTY.
pub struct ConsoleReporter {
    console: console::Term,
    progress: Mutex<Progress>,
}

impl ConsoleReporter {
    pub fn new() -> ConsoleReporter {
        ConsoleReporter {
            console: console::Term::stdout(),
            progress: Mutex::new(Progress::default()),
        }
    }

    fn print_status(&self, id: &Uuid, state: TaskState) {
        let line = {
            let progress = self.progress.lock();
            format!("[{}/{}] {} {}", progress.finished, progress.started, id, state)
        };
        if self.console.is_term() {
            let _ = self.console.clear_line();
            let _ = self.console.write_str(&line);
        } else {
            let _ = self.console.write_line(&line);
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> ConsoleReporter {
        ConsoleReporter::new()
    }
}

impl ScheduleReporter for ConsoleReporter {
    fn task_transition(&self, id: &Uuid, state: TaskState) {
        {
            let mut progress = self.progress.lock();
            match state {
                TaskState::Active => progress.started += 1,
                s if s.is_terminal() => progress.finished += 1,
                _ => {}
            }
        }
        self.print_status(id, state);
    }

    fn shutdown(&self, _wait: bool) {
        if self.console.is_term() {
            let _ = self.console.write_line("");
        }
    }
}

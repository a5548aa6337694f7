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

//! Composite task membership.
//!
//! A chain links every inserted child to the previous head so children
//! run strictly in insertion order; a group leaves its children
//! independent. Both kinds depend on every child, which is the whole
//! completion story: the composite's own body is a no-op and becomes
//! ready exactly when the last child has succeeded.

use std::sync::Arc;

use log::warn;

use crate::task::{Task, TaskKind};
use crate::uuid::Uuid;

impl Task {
    /// Add a child to a composite task.
    ///
    /// Skipped, with a log, on non-composite tasks. Skipped silently
    /// once the composite is active or complete. An invalid child
    /// invalidates the composite.
    pub fn add_child(&self, child: &Arc<Task>) {
        if !self.kind().is_composite() {
            warn!("task '{}' is not a composite, ignoring child '{}'", self.id(), child.id());
            return;
        }
        if !self.is_modifiable() {
            return;
        }

        if self.kind() == TaskKind::Chain {
            let head = self.meta.lock().children.first().cloned();
            if let Some(head) = head {
                child.depends(&head);
            }
        }

        self.depends(child);
        self.meta.lock().children.insert(0, child.clone());
        if !child.is_valid() {
            self.set_valid(false);
        }
    }

    pub fn has_children(&self) -> bool {
        !self.meta.lock().children.is_empty()
    }

    /// Membership check. Implies nothing about ordering, only that the
    /// composite requires the child.
    pub fn is_child(&self, id: &Uuid) -> bool {
        self.meta.lock().children.iter().any(|c| c.id() == *id)
    }

    /// Snapshot of the child list, most recently added first.
    pub fn children(&self) -> Vec<Arc<Task>> {
        self.meta.lock().children.clone()
    }
}

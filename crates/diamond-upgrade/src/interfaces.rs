// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bookkeeping of the diamond's supported-interface registry across an upgrade.

use crate::{contracts::format_bytes4, selectors::InterfaceId};

/// Interface IDs to mark supported or unsupported as part of the cut's initializer call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceChanges {
    pub to_add: Vec<InterfaceId>,
    pub to_remove: Vec<InterfaceId>,
}

impl InterfaceChanges {
    pub fn schedule_add(&mut self, id: InterfaceId) {
        if !self.to_add.contains(&id) {
            self.to_add.push(id);
        }
    }

    pub fn schedule_remove(&mut self, id: InterfaceId) {
        if !self.to_remove.contains(&id) {
            self.to_remove.push(id);
        }
    }

    /// Drop removals of IDs that stay claimed after the upgrade.
    ///
    /// An ID is kept when it is being added in the same cut or when `claimed` reports that a
    /// facet remaining registered after the upgrade still carries it, so shared IDs only go
    /// away with their last facet.
    pub fn settle(mut self, claimed: impl Fn(&InterfaceId) -> bool) -> Self {
        let to_add = &self.to_add;
        self.to_remove.retain(|id| {
            let keep = !to_add.contains(id) && !claimed(id);
            if !keep {
                tracing::debug!("Interface {} stays supported", format_bytes4(id));
            }
            keep
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

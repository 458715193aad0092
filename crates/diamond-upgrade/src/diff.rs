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

//! Selector diffing between a facet's registered selectors and its replacement.

use std::fmt;

use alloy::primitives::Address;

use crate::selectors::{FacetSelectors, InterfaceId, Selector, SelectorSet};

/// Selector actions required to move one facet from its registered state to its target state.
///
/// `to_add`, `to_replace` and `to_remove` are pairwise disjoint, and none of them intersects
/// `skipped`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FacetDiff {
    /// Selectors new to this facet, registered against the new facet address.
    pub to_add: SelectorSet,
    /// Selectors served before and after, redirected to the new facet address.
    pub to_replace: SelectorSet,
    /// Selectors the old facet served that the new facet does not.
    pub to_remove: SelectorSet,
    /// Selectors left untouched on request of the operator or the collision policy.
    pub skipped: SelectorSet,
}

impl FacetDiff {
    /// True if the facet's selector set changes beyond a plain redirect.
    pub fn changes_selectors(&self) -> bool {
        !self.to_add.is_empty() || !self.to_remove.is_empty()
    }

    /// True if no cut entry results from this diff.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_replace.is_empty() && self.to_remove.is_empty()
    }

    /// Selectors the new facet serves once the cut is applied.
    pub fn registered(&self) -> SelectorSet {
        let mut registered = self.to_replace.clone();
        registered.extend(self.to_add.iter().copied());
        registered
    }

    /// Turn a pending add into a replace, e.g. when another facet of the same plan vacates it.
    pub(crate) fn promote_to_replace(&mut self, selector: Selector) {
        if self.to_add.remove(&selector) {
            self.to_replace.insert(selector);
        }
    }

    /// Drop `selector` from every action and record it as skipped.
    pub(crate) fn skip(&mut self, selector: Selector) {
        self.to_add.remove(&selector);
        self.to_replace.remove(&selector);
        self.to_remove.remove(&selector);
        self.skipped.insert(selector);
    }
}

/// Compute the diff for a facet upgrade.
///
/// `old` is the facet's currently registered set (empty for a new facet), `new` the selectors of
/// the replacement (initializers already excluded) and `skip` the operator's exclusion list.
pub fn diff_selectors(old: &SelectorSet, new: &SelectorSet, skip: &SelectorSet) -> FacetDiff {
    let to_replace = old.intersection(new);
    let to_remove = old.difference(&to_replace);
    let to_add = new.difference(&to_replace);

    let mut skipped = old.intersection(skip);
    skipped.extend(new.intersection(skip));

    FacetDiff {
        to_add: to_add.difference(skip),
        to_replace: to_replace.difference(skip),
        to_remove: to_remove.difference(skip),
        skipped,
    }
}

/// Compute the diff for removing a facet entirely: every registered selector not skipped is
/// removed.
pub fn removal_diff(old: &SelectorSet, skip: &SelectorSet) -> FacetDiff {
    diff_selectors(old, &SelectorSet::new(), skip)
}

/// What happens to one facet in an upgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FacetChange {
    /// The facet is deployed (anew or again) and cut in at `new_address`.
    Upgrade { new_address: Address },
    /// The facet is removed from the diamond.
    Remove,
}

/// The planned change of one facet, including its diff and interface bookkeeping inputs.
#[derive(Clone, Debug)]
pub struct FacetPlan {
    pub name: String,
    pub change: FacetChange,
    /// Address of the currently registered version, if any.
    pub old_address: Option<Address>,
    pub old_interface_id: Option<InterfaceId>,
    pub new_interface_id: Option<InterfaceId>,
    pub diff: FacetDiff,
    /// Selector metadata of the new facet, used for logging and collision prompts.
    pub selectors: FacetSelectors,
}

impl FacetPlan {
    /// Address cut entries of this facet point at. Removals use the zero address.
    pub fn target_address(&self) -> Address {
        match self.change {
            FacetChange::Upgrade { new_address } => new_address,
            FacetChange::Remove => Address::ZERO,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self.change, FacetChange::Remove)
    }

    /// Interface ID retired by this change, if any.
    ///
    /// An interface is retired when the facet's selectors change beyond a plain redirect and
    /// the new facet does not expose the same ID, or when the facet is removed.
    pub fn retired_interface(&self) -> Option<InterfaceId> {
        let old = self.old_interface_id?;
        match self.change {
            FacetChange::Remove => Some(old),
            FacetChange::Upgrade { .. } => {
                (self.diff.changes_selectors() && self.new_interface_id != Some(old)).then_some(old)
            }
        }
    }
}

impl fmt::Display for FacetPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.is_removal() { "remove" } else { "upgrade" };
        writeln!(f, "{} ({verb})", self.name)?;
        for (label, set) in [
            ("add", &self.diff.to_add),
            ("replace", &self.diff.to_replace),
            ("remove", &self.diff.to_remove),
            ("skip", &self.diff.skipped),
        ] {
            if set.is_empty() {
                continue;
            }
            writeln!(f, "  {label}:")?;
            for selector in set {
                writeln!(f, "    {}", self.selectors.describe(selector))?;
            }
        }
        Ok(())
    }
}

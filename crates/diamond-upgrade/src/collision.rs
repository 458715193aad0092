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

//! Resolution of selectors that a facet would add but that another facet already serves.

use std::{collections::BTreeMap, fmt};

use alloy::primitives::Address;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    contracts::format_bytes4,
    diff::FacetPlan,
    selectors::Selector,
};

/// How to settle a collision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Redirect the selector to the candidate facet, overwriting the existing registration.
    Replace,
    /// Leave the existing registration untouched and drop the selector from the candidate.
    Skip,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Replace => f.write_str("replace"),
            Resolution::Skip => f.write_str("skip"),
        }
    }
}

/// A selector the candidate facet would add while an unrelated facet already serves it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collision {
    pub selector: Selector,
    /// Signature of the selector in the candidate facet's ABI.
    pub signature: Option<String>,
    /// Facet currently serving the selector.
    pub existing_facet: Address,
    /// Registry name of the existing facet, when it is recorded.
    pub existing_name: Option<String>,
    /// Name of the facet that would add the selector.
    pub candidate: String,
}

impl Collision {
    fn existing_label(&self) -> String {
        match &self.existing_name {
            Some(name) => format!("{name} ({})", self.existing_facet),
            None => self.existing_facet.to_string(),
        }
    }
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "selector {}", format_bytes4(&self.selector))?;
        if let Some(signature) = &self.signature {
            write!(f, " ({signature})")?;
        }
        write!(f, " of {} is already served by {}", self.candidate, self.existing_label())
    }
}

#[derive(Error, Debug)]
pub enum CollisionError {
    #[error("unresolved collision: {collision}: {reason}")]
    Unresolved { collision: Collision, reason: String },

    #[error("selector {} is claimed by both {first} and {second}", format_bytes4(.selector))]
    DuplicateClaim { selector: Selector, first: String, second: String },

    #[error("selector {} appears in more than one cut entry", format_bytes4(.0))]
    Overlap(Selector),
}

/// Decides collisions without blocking on terminal input.
pub trait CollisionPolicy: Send + Sync {
    /// Decide what to do with `collision`. An error aborts the upgrade before submission.
    fn resolve(&self, collision: &Collision) -> anyhow::Result<Resolution>;
}

impl<P: CollisionPolicy + ?Sized> CollisionPolicy for Box<P> {
    fn resolve(&self, collision: &Collision) -> anyhow::Result<Resolution> {
        (**self).resolve(collision)
    }
}

impl<P: CollisionPolicy + ?Sized> CollisionPolicy for &P {
    fn resolve(&self, collision: &Collision) -> anyhow::Result<Resolution> {
        (**self).resolve(collision)
    }
}

/// Refuses every collision. This is the default: neither option is chosen silently.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailOnCollision;

impl CollisionPolicy for FailOnCollision {
    fn resolve(&self, _collision: &Collision) -> anyhow::Result<Resolution> {
        Err(anyhow!("no collision policy configured"))
    }
}

/// Applies the same resolution to every collision.
#[derive(Clone, Copy, Debug)]
pub struct ResolveAll(pub Resolution);

impl CollisionPolicy for ResolveAll {
    fn resolve(&self, _collision: &Collision) -> anyhow::Result<Resolution> {
        Ok(self.0)
    }
}

/// Resolutions decided ahead of time per selector, deferring anything else to `fallback`.
#[derive(Clone, Debug)]
pub struct PreResolved<P = FailOnCollision> {
    decisions: BTreeMap<Selector, Resolution>,
    fallback: P,
}

impl PreResolved<FailOnCollision> {
    pub fn new(decisions: BTreeMap<Selector, Resolution>) -> Self {
        Self { decisions, fallback: FailOnCollision }
    }
}

impl<P> PreResolved<P> {
    pub fn with_fallback<Q>(self, fallback: Q) -> PreResolved<Q> {
        PreResolved { decisions: self.decisions, fallback }
    }
}

impl<P: CollisionPolicy> CollisionPolicy for PreResolved<P> {
    fn resolve(&self, collision: &Collision) -> anyhow::Result<Resolution> {
        match self.decisions.get(&collision.selector) {
            Some(resolution) => Ok(*resolution),
            None => self.fallback.resolve(collision),
        }
    }
}

/// A selector that moves from one facet of the plan to another in the same cut.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handoff {
    pub selector: Selector,
    pub from: String,
    pub to: String,
}

/// Everything decided while resolving collisions, for the upgrade report.
#[derive(Clone, Debug, Default)]
pub struct CollisionReport {
    pub handoffs: Vec<Handoff>,
    pub resolved: Vec<(Collision, Resolution)>,
}

/// Settle every selector in the plans' `to_add` sets that is already registered on chain.
///
/// `owners` holds the live owner of each candidate selector (absent or zero when unregistered)
/// and `names` maps facet addresses to registry names.
///
/// A selector vacated in the same cut by another facet of the plan (one that removes it, or a
/// facet being removed outright) is not a collision: it is handed off by turning the add into
/// a replace and dropping the removal, so no selector is both removed and added in one cut.
/// Anything else is put to `policy`.
pub fn resolve_collisions(
    plans: &mut [FacetPlan],
    owners: &BTreeMap<Selector, Address>,
    names: impl Fn(Address) -> Option<String>,
    policy: &dyn CollisionPolicy,
) -> Result<CollisionReport, CollisionError> {
    let mut report = CollisionReport::default();
    let mut unregistered_claims: BTreeMap<Selector, usize> = BTreeMap::new();

    for i in 0..plans.len() {
        for selector in plans[i].diff.to_add.to_vec() {
            let owner = owners.get(&selector).copied().unwrap_or(Address::ZERO);

            if owner.is_zero() {
                if let Some(&first) = unregistered_claims.get(&selector) {
                    return Err(CollisionError::DuplicateClaim {
                        selector,
                        first: plans[first].name.clone(),
                        second: plans[i].name.clone(),
                    });
                }
                unregistered_claims.insert(selector, i);
                continue;
            }

            if plans[i].old_address == Some(owner) {
                // The registry record is stale: the selector already points at this facet.
                tracing::debug!(
                    "{} already serves {}; replacing instead of adding",
                    plans[i].name,
                    format_bytes4(&selector)
                );
                plans[i].diff.promote_to_replace(selector);
                continue;
            }

            let vacating = plans.iter().position(|plan| {
                plan.old_address == Some(owner) && plan.diff.to_remove.contains(&selector)
            });
            if let Some(j) = vacating {
                plans[j].diff.to_remove.remove(&selector);
                plans[i].diff.promote_to_replace(selector);
                tracing::info!(
                    "Selector {} moves from {} to {}",
                    plans[i].selectors.describe(&selector),
                    plans[j].name,
                    plans[i].name
                );
                report.handoffs.push(Handoff {
                    selector,
                    from: plans[j].name.clone(),
                    to: plans[i].name.clone(),
                });
                continue;
            }

            let collision = Collision {
                selector,
                signature: plans[i].selectors.signature(&selector).map(str::to_string),
                existing_facet: owner,
                existing_name: names(owner),
                candidate: plans[i].name.clone(),
            };
            let resolution = match policy.resolve(&collision) {
                Ok(resolution) => resolution,
                Err(err) => {
                    return Err(CollisionError::Unresolved { collision, reason: format!("{err:#}") })
                }
            };
            tracing::info!("Collision: {collision}; resolved with {resolution}");

            match resolution {
                Resolution::Replace => {
                    plans[i].diff.promote_to_replace(selector);
                    // A facet of the plan that would keep serving the selector gives it up.
                    for (j, plan) in plans.iter_mut().enumerate() {
                        if j != i
                            && plan.old_address == Some(owner)
                            && plan.diff.to_replace.remove(&selector)
                        {
                            tracing::info!(
                                "{} no longer serves {}",
                                plan.name,
                                format_bytes4(&selector)
                            );
                        }
                    }
                }
                Resolution::Skip => plans[i].diff.skip(selector),
            }
            report.resolved.push((collision, resolution));
        }
    }

    Ok(report)
}

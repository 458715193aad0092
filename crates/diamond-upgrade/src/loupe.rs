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

//! Reads of the live dispatch table through the diamond loupe.

use std::{collections::BTreeMap, fmt};

use alloy::primitives::Address;
use anyhow::Result;
use futures_util::future::try_join_all;

use crate::{
    chain::{DiamondChain, ReadPolicy},
    contracts::format_bytes4,
    registry::ContractsFile,
    selectors::{Selector, SelectorSet},
};

/// Selectors currently registered to `facet`. A facet that is not deployed yet has none.
pub async fn snapshot_selectors(
    chain: &dyn DiamondChain,
    reads: &ReadPolicy,
    facet: Option<Address>,
) -> Result<SelectorSet> {
    let Some(address) = facet else {
        return Ok(SelectorSet::new());
    };
    let selectors = reads
        .read(&format!("selectors of {address}"), || chain.facet_function_selectors(address))
        .await?;
    tracing::debug!("{address} serves {} selectors", selectors.len());
    Ok(selectors.into())
}

/// Snapshot several unrelated facets concurrently. Each facet gets its own read.
pub async fn snapshot_facets(
    chain: &dyn DiamondChain,
    reads: &ReadPolicy,
    facets: &[(String, Option<Address>)],
) -> Result<BTreeMap<String, SelectorSet>> {
    let snapshots = try_join_all(facets.iter().map(|(name, address)| async move {
        let selectors = snapshot_selectors(chain, reads, *address).await?;
        Ok::<_, anyhow::Error>((name.clone(), selectors))
    }))
    .await?;
    Ok(snapshots.into_iter().collect())
}

/// Current owner of each selector, read one at a time right before the cut is assembled.
/// Unregistered selectors map to the zero address.
pub async fn selector_owners(
    chain: &dyn DiamondChain,
    reads: &ReadPolicy,
    selectors: impl IntoIterator<Item = Selector>,
) -> Result<BTreeMap<Selector, Address>> {
    let mut owners = BTreeMap::new();
    for selector in selectors {
        if owners.contains_key(&selector) {
            continue;
        }
        let owner = reads
            .read(&format!("owner of {}", format_bytes4(&selector)), || chain.facet_address(selector))
            .await?;
        tracing::trace!("{} -> {owner}", format_bytes4(&selector));
        owners.insert(selector, owner);
    }
    Ok(owners)
}

/// Every facet registered on the diamond with its selectors.
pub async fn live_facets(
    chain: &dyn DiamondChain,
    reads: &ReadPolicy,
) -> Result<Vec<(Address, SelectorSet)>> {
    let facets = reads.read("facets", || chain.facets()).await?;
    Ok(facets.into_iter().map(|(address, selectors)| (address, selectors.into())).collect())
}

/// Differences between the contracts file and the live dispatch table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Drift {
    /// Facets registered on chain that the contracts file does not record.
    pub unrecorded: Vec<(Address, SelectorSet)>,
    /// Recorded facets that serve no selector on chain.
    pub missing: Vec<(String, Address)>,
    /// Recorded facets whose selectors differ from the chain: `(name, recorded, live)`.
    pub mismatched: Vec<(String, SelectorSet, SelectorSet)>,
}

impl Drift {
    pub fn is_empty(&self) -> bool {
        self.unrecorded.is_empty() && self.missing.is_empty() && self.mismatched.is_empty()
    }
}

/// Compare the recorded facets of `registry` with `live`.
pub fn drift(registry: &ContractsFile, live: &[(Address, SelectorSet)]) -> Drift {
    let mut drift = Drift::default();
    let live_by_address: BTreeMap<Address, &SelectorSet> =
        live.iter().map(|(address, selectors)| (*address, selectors)).collect();

    for record in registry.facets() {
        let recorded = record.selectors.clone().unwrap_or_default();
        match live_by_address.get(&record.address) {
            None => drift.missing.push((record.name.clone(), record.address)),
            Some(on_chain) => {
                let same = recorded.len() == on_chain.len() && recorded.difference(on_chain).is_empty();
                if !same {
                    drift.mismatched.push((record.name.clone(), recorded, (*on_chain).clone()));
                }
            }
        }
    }
    for (address, selectors) in live {
        if registry.name_of(*address).is_none() {
            drift.unrecorded.push((*address, selectors.clone()));
        }
    }
    drift
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "contracts file matches the diamond");
        }
        for (address, selectors) in &self.unrecorded {
            writeln!(f, "unrecorded facet {address} serving {selectors:?}")?;
        }
        for (name, address) in &self.missing {
            writeln!(f, "{name} ({address}) is recorded but serves nothing on chain")?;
        }
        for (name, recorded, live) in &self.mismatched {
            writeln!(f, "{name}: recorded {recorded:?}, on chain {live:?}")?;
        }
        Ok(())
    }
}

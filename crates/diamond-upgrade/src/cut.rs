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

//! Assembly of the single diamond cut transaction.

use std::{collections::BTreeSet, fmt};

use alloy::{
    primitives::{Address, Bytes},
    sol_types::SolCall,
};
use anyhow::Result;

use crate::{
    collision::CollisionError,
    contracts::{format_bytes4, version_to_bytes32, IDiamondCut, IProtocolInitializationHandler},
    diff::FacetPlan,
    interfaces::InterfaceChanges,
    selectors::Selector,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CutAction {
    Add,
    Replace,
    Remove,
}

impl fmt::Display for CutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutAction::Add => f.write_str("Add"),
            CutAction::Replace => f.write_str("Replace"),
            CutAction::Remove => f.write_str("Remove"),
        }
    }
}

/// One `FacetCut` of the batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CutEntry {
    /// Target facet; the zero address for removals.
    pub facet_address: Address,
    pub action: CutAction,
    pub selectors: Vec<Selector>,
}

impl From<&CutEntry> for IDiamondCut::FacetCut {
    fn from(entry: &CutEntry) -> Self {
        IDiamondCut::FacetCut {
            facetAddress: entry.facet_address,
            action: entry.action.into(),
            functionSelectors: entry.selectors.clone(),
        }
    }
}

/// Arguments of the initializer facet's `initialize` call executed at the end of the cut.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitializerCall {
    pub version: String,
    /// Facets whose initializers are delegate-called, paired with `calldata`.
    pub addresses: Vec<Address>,
    pub calldata: Vec<Bytes>,
    pub initialization_data: Bytes,
    pub interfaces: InterfaceChanges,
}

impl InitializerCall {
    /// ABI-encode the call. Upgrades always pass `_isUpgrade = true`.
    pub fn encode(&self) -> Result<Bytes> {
        anyhow::ensure!(
            self.addresses.len() == self.calldata.len(),
            "{} initializer addresses but {} calldata entries",
            self.addresses.len(),
            self.calldata.len()
        );
        let call = IProtocolInitializationHandler::initializeCall {
            _version: version_to_bytes32(&self.version)?,
            _addresses: self.addresses.clone(),
            _calldata: self.calldata.clone(),
            _isUpgrade: true,
            _initializationData: self.initialization_data.clone(),
            _interfacesToRemove: self.interfaces.to_remove.clone(),
            _interfacesToAdd: self.interfaces.to_add.clone(),
        };
        Ok(call.abi_encode().into())
    }
}

/// The complete cut: every facet change plus the initializer call, applied in one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CutBatch {
    pub entries: Vec<CutEntry>,
    pub init_address: Address,
    pub init_calldata: Bytes,
}

impl CutBatch {
    /// Build the batch from resolved facet plans.
    ///
    /// Entries follow plan order, and within a facet the order Add, Replace, Remove. Empty
    /// actions produce no entry. Fails if a selector ends up in more than one entry.
    pub fn build(
        plans: &[FacetPlan],
        init_address: Address,
        init_calldata: Bytes,
    ) -> Result<Self, CollisionError> {
        let mut entries = Vec::new();
        for plan in plans {
            let target = plan.target_address();
            for (action, set, address) in [
                (CutAction::Add, &plan.diff.to_add, target),
                (CutAction::Replace, &plan.diff.to_replace, target),
                (CutAction::Remove, &plan.diff.to_remove, Address::ZERO),
            ] {
                if set.is_empty() {
                    continue;
                }
                entries.push(CutEntry { facet_address: address, action, selectors: set.to_vec() });
            }
        }

        let mut seen = BTreeSet::new();
        for selector in entries.iter().flat_map(|entry| entry.selectors.iter()) {
            if !seen.insert(*selector) {
                return Err(CollisionError::Overlap(*selector));
            }
        }

        Ok(Self { entries, init_address, init_calldata })
    }

    pub fn facet_cuts(&self) -> Vec<IDiamondCut::FacetCut> {
        self.entries.iter().map(Into::into).collect()
    }

    /// Calldata of the `diamondCut` transaction.
    pub fn calldata(&self) -> Bytes {
        IDiamondCut::diamondCutCall {
            _diamondCut: self.facet_cuts(),
            _init: self.init_address,
            _calldata: self.init_calldata.clone(),
        }
        .abi_encode()
        .into()
    }

    pub fn selector_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.selectors.len()).sum()
    }
}

impl fmt::Display for CutBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let selectors: Vec<String> = entry.selectors.iter().map(format_bytes4).collect();
            writeln!(f, "{} {} [{}]", entry.action, entry.facet_address, selectors.join(", "))?;
        }
        write!(f, "init {} ({} bytes of calldata)", self.init_address, self.init_calldata.len())
    }
}

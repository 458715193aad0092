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

//! An in-memory diamond with the dispatch rules of the reference diamond-cut implementation.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use alloy::{
    primitives::{address, keccak256, Address, Bytes, B256},
    sol_types::SolCall,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use diamond_upgrade::{
    chain::{CutReceipt, DiamondChain},
    contracts::{format_bytes4, version_from_bytes32, IDiamondCut, IProtocolInitializationHandler},
    selectors::{InterfaceId, Selector},
};

/// Address of the diamond proxy in tests.
pub const DIAMOND_ADDRESS: Address = address!("0xd1a40d0000000000000000000000000000000001");
/// Account signing deployments and cuts in tests.
pub const SIGNER_ADDRESS: Address = address!("0x5193e40000000000000000000000000000000001");

const FIRST_DEPLOYMENT: u64 = 0xfacE_0000;

/// A cut accepted by the mock.
#[derive(Clone, Debug)]
pub struct RecordedCut {
    pub tx_hash: B256,
    pub cuts: Vec<IDiamondCut::FacetCut>,
    pub init: Address,
    pub calldata: Bytes,
}

#[derive(Default)]
struct MockState {
    /// Registered facets in registration order with their selectors.
    facets: Vec<(Address, Vec<Selector>)>,
    interfaces: BTreeSet<InterfaceId>,
    roles: BTreeSet<(Address, B256, Address)>,
    version: Option<String>,
    deployments: u64,
    transactions: u64,
    failed_reads: u32,
    fail_next_cut: Option<String>,
    revert_next_cut: bool,
    revert_reason: Option<String>,
    fail_next_deploy: bool,
    cuts: Vec<RecordedCut>,
    receipts: BTreeMap<B256, CutReceipt>,
}

impl MockState {
    fn owner(&self, selector: &Selector) -> Option<Address> {
        self.facets
            .iter()
            .find(|(_, selectors)| selectors.contains(selector))
            .map(|(address, _)| *address)
    }

    fn detach(&mut self, selector: &Selector) {
        for (_, selectors) in self.facets.iter_mut() {
            selectors.retain(|s| s != selector);
        }
    }

    fn attach(&mut self, facet: Address, selector: Selector) {
        match self.facets.iter_mut().find(|(address, _)| *address == facet) {
            Some((_, selectors)) => selectors.push(selector),
            None => self.facets.push((facet, vec![selector])),
        }
    }

    fn read(&mut self) -> Result<()> {
        if self.failed_reads > 0 {
            self.failed_reads -= 1;
            bail!("connection reset by peer");
        }
        Ok(())
    }

    /// Apply a cut to a copy of the state; only a cut that fully succeeds is kept.
    fn apply_cut(
        &self,
        cuts: &[IDiamondCut::FacetCut],
        init: Address,
        calldata: &Bytes,
    ) -> Result<(Vec<(Address, Vec<Selector>)>, BTreeSet<InterfaceId>, Option<String>)> {
        let mut next = MockState {
            facets: self.facets.clone(),
            interfaces: self.interfaces.clone(),
            version: self.version.clone(),
            ..Default::default()
        };

        for cut in cuts {
            let facet = cut.facetAddress;
            for selector in &cut.functionSelectors {
                let owner = next.owner(selector);
                match cut.action {
                    IDiamondCut::FacetCutAction::Add => {
                        if facet.is_zero() {
                            bail!("CannotAddSelectorsToZeroAddress");
                        }
                        if owner.is_some() {
                            bail!("CannotAddFunctionToDiamondThatAlreadyExists({})", format_bytes4(selector));
                        }
                        next.attach(facet, *selector);
                    }
                    IDiamondCut::FacetCutAction::Replace => {
                        if facet.is_zero() {
                            bail!("CannotReplaceFunctionsFromFacetWithZeroAddress");
                        }
                        match owner {
                            None => bail!("CannotReplaceFunctionThatDoesNotExists({})", format_bytes4(selector)),
                            Some(old) if old == facet => bail!(
                                "CannotReplaceFunctionWithTheSameFunctionFromTheSameFacet({})",
                                format_bytes4(selector)
                            ),
                            Some(_) => {
                                next.detach(selector);
                                next.attach(facet, *selector);
                            }
                        }
                    }
                    IDiamondCut::FacetCutAction::Remove => {
                        if !facet.is_zero() {
                            bail!("RemoveFacetAddressMustBeZeroAddress({facet})");
                        }
                        if owner.is_none() {
                            bail!("CannotRemoveFunctionThatDoesNotExist({})", format_bytes4(selector));
                        }
                        next.detach(selector);
                    }
                    _ => bail!("IncorrectFacetCutAction"),
                }
            }
        }
        next.facets.retain(|(_, selectors)| !selectors.is_empty());

        if !init.is_zero() {
            let call = IProtocolInitializationHandler::initializeCall::abi_decode(calldata)
                .map_err(|err| anyhow!("InitializationFunctionReverted: {err}"))?;
            if call._addresses.len() != call._calldata.len() {
                bail!("AddressesAndCalldataLengthMismatch");
            }
            let version = version_from_bytes32(call._version);
            if version.is_empty() {
                bail!("VersionMustBeSet");
            }
            if next.version.as_deref() == Some(version.as_str()) {
                bail!("AlreadyInitialized({})", call._version);
            }
            for id in &call._interfacesToRemove {
                next.interfaces.remove(id);
            }
            next.interfaces.extend(call._interfacesToAdd.iter().copied());
            next.version = Some(version);
        }

        Ok((next.facets, next.interfaces, next.version))
    }
}

/// In-memory [DiamondChain] enforcing the diamond-cut rules: adds need an unregistered
/// selector, replaces need a different current facet and removes use the zero address.
///
/// The initializer call of a cut is decoded to track the protocol version and the supported
/// interfaces. Failures can be injected for reads, deployments and cuts.
pub struct MockDiamond {
    address: Address,
    signer: Address,
    state: Mutex<MockState>,
}

impl Default for MockDiamond {
    fn default() -> Self {
        Self::new(DIAMOND_ADDRESS, SIGNER_ADDRESS)
    }
}

impl MockDiamond {
    pub fn new(address: Address, signer: Address) -> Self {
        Self { address, signer, state: Mutex::new(MockState::default()) }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `selectors` to `facet` directly, bypassing the cut rules.
    pub fn register_facet(&self, facet: Address, selectors: impl IntoIterator<Item = Selector>) {
        let mut state = self.state();
        for selector in selectors {
            state.detach(&selector);
            state.attach(facet, selector);
        }
    }

    pub fn grant_role(&self, access_controller: Address, role: B256, account: Address) {
        self.state().roles.insert((access_controller, role, account));
    }

    pub fn set_interface_supported(&self, interface_id: InterfaceId) {
        self.state().interfaces.insert(interface_id);
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.state().version = Some(version.into());
    }

    /// Make the next `count` reads fail.
    pub fn fail_reads(&self, count: u32) {
        self.state().failed_reads = count;
    }

    /// Reject the next cut transaction before it is mined.
    pub fn fail_next_cut(&self, reason: impl Into<String>) {
        self.state().fail_next_cut = Some(reason.into());
    }

    /// Mine the next cut transaction as reverted, replaying to `reason` when one is given.
    pub fn revert_next_cut(&self, reason: Option<&str>) {
        let mut state = self.state();
        state.revert_next_cut = true;
        state.revert_reason = reason.map(str::to_string);
    }

    pub fn fail_next_deploy(&self) {
        self.state().fail_next_deploy = true;
    }

    pub fn owner_of(&self, selector: Selector) -> Option<Address> {
        self.state().owner(&selector)
    }

    pub fn selectors_of(&self, facet: Address) -> Vec<Selector> {
        self.state()
            .facets
            .iter()
            .find(|(address, _)| *address == facet)
            .map(|(_, selectors)| selectors.clone())
            .unwrap_or_default()
    }

    pub fn supports(&self, interface_id: InterfaceId) -> bool {
        self.state().interfaces.contains(&interface_id)
    }

    pub fn version(&self) -> Option<String> {
        self.state().version.clone()
    }

    pub fn deployment_count(&self) -> u64 {
        self.state().deployments
    }

    pub fn recorded_cuts(&self) -> Vec<RecordedCut> {
        self.state().cuts.clone()
    }
}

#[async_trait]
impl DiamondChain for MockDiamond {
    fn diamond(&self) -> Address {
        self.address
    }

    async fn signer_address(&self) -> Result<Address> {
        Ok(self.signer)
    }

    async fn facet_function_selectors(&self, facet: Address) -> Result<Vec<Selector>> {
        self.state().read()?;
        Ok(self.selectors_of(facet))
    }

    async fn facet_address(&self, selector: Selector) -> Result<Address> {
        let mut state = self.state();
        state.read()?;
        Ok(state.owner(&selector).unwrap_or(Address::ZERO))
    }

    async fn facets(&self) -> Result<Vec<(Address, Vec<Selector>)>> {
        let mut state = self.state();
        state.read()?;
        Ok(state.facets.clone())
    }

    async fn supports_interface(&self, interface_id: InterfaceId) -> Result<bool> {
        let mut state = self.state();
        state.read()?;
        Ok(state.interfaces.contains(&interface_id))
    }

    async fn has_role(&self, access_controller: Address, role: B256, account: Address) -> Result<bool> {
        let mut state = self.state();
        state.read()?;
        Ok(state.roles.contains(&(access_controller, role, account)))
    }

    async fn deploy(&self, bytecode: Bytes) -> Result<Address> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_deploy) {
            bail!("deployment transaction reverted");
        }
        if bytecode.is_empty() {
            bail!("empty bytecode");
        }
        state.deployments += 1;
        let address = Address::left_padding_from(&(FIRST_DEPLOYMENT + state.deployments).to_be_bytes());
        tracing::trace!("Mock deployed contract at {address}");
        Ok(address)
    }

    async fn send_cut(
        &self,
        cuts: Vec<IDiamondCut::FacetCut>,
        init: Address,
        calldata: Bytes,
    ) -> Result<B256> {
        let mut state = self.state();
        if let Some(reason) = state.fail_next_cut.take() {
            bail!("diamondCut rejected: {reason}");
        }
        let (facets, interfaces, version) = state
            .apply_cut(&cuts, init, &calldata)
            .map_err(|err| anyhow!("diamondCut rejected: {err}"))?;

        state.transactions += 1;
        let tx_hash = keccak256(format!("cut-{}", state.transactions));
        let success = !std::mem::take(&mut state.revert_next_cut);
        let revert_reason = if success { None } else { state.revert_reason.take() };
        if success {
            state.facets = facets;
            state.interfaces = interfaces;
            state.version = version;
            state.cuts.push(RecordedCut { tx_hash, cuts, init, calldata });
        }
        let block_number = Some(100 + state.transactions);
        state
            .receipts
            .insert(tx_hash, CutReceipt { tx_hash, block_number, success, revert_reason });
        Ok(tx_hash)
    }

    async fn wait_for_cut(&self, tx_hash: B256, _timeout: Option<Duration>) -> Result<CutReceipt> {
        self.state()
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| anyhow!("transaction {tx_hash} not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diamond_upgrade::selectors::selector_of;

    fn cut(facet: Address, action: IDiamondCut::FacetCutAction, selectors: &[Selector]) -> IDiamondCut::FacetCut {
        IDiamondCut::FacetCut { facetAddress: facet, action, functionSelectors: selectors.to_vec() }
    }

    #[tokio::test]
    async fn test_cut_rules_are_enforced_atomically() {
        let mock = MockDiamond::default();
        let old = Address::repeat_byte(1);
        let new = Address::repeat_byte(2);
        let (a, b) = (selector_of("a()"), selector_of("b()"));
        mock.register_facet(old, [a]);

        // The second entry fails, so the first must not be applied either.
        let err = mock
            .send_cut(
                vec![
                    cut(new, IDiamondCut::FacetCutAction::Add, &[b]),
                    cut(new, IDiamondCut::FacetCutAction::Add, &[a]),
                ],
                Address::ZERO,
                Bytes::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CannotAddFunctionToDiamondThatAlreadyExists"));
        assert_eq!(mock.owner_of(b), None);

        let tx = mock
            .send_cut(
                vec![
                    cut(new, IDiamondCut::FacetCutAction::Replace, &[a]),
                    cut(new, IDiamondCut::FacetCutAction::Add, &[b]),
                ],
                Address::ZERO,
                Bytes::new(),
            )
            .await
            .unwrap();
        assert!(mock.wait_for_cut(tx, None).await.unwrap().success);
        assert_eq!(mock.selectors_of(new), vec![a, b]);
        assert!(mock.selectors_of(old).is_empty());

        assert!(mock
            .send_cut(vec![cut(new, IDiamondCut::FacetCutAction::Remove, &[a])], Address::ZERO, Bytes::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_injected_read_failures() {
        let mock = MockDiamond::default();
        mock.fail_reads(1);
        assert!(mock.facets().await.is_err());
        assert!(mock.facets().await.unwrap().is_empty());
    }
}

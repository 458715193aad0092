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

//! Extraction of dispatchable function selectors from compiled facet interfaces.

use std::{collections::BTreeMap, fmt, str::FromStr};

use alloy::{
    json_abi::JsonAbi,
    primitives::{keccak256, FixedBytes},
};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::contracts::format_bytes4;

pub use alloy::primitives::Selector;

/// ERC-165 interface identifier: the XOR of the selectors making up an interface.
pub type InterfaceId = FixedBytes<4>;

/// Signature of the argument-less initializer every upgradeable facet may expose.
pub const ZERO_ARG_INITIALIZER: &str = "initialize()";

/// Compute the selector of a canonical function signature, e.g. `transfer(address,uint256)`.
pub fn selector_of(signature: &str) -> Selector {
    Selector::from_slice(&keccak256(signature.as_bytes())[..4])
}

/// Parse a selector given either as 4 hex-encoded bytes (`0xa9059cbb`) or as a canonical
/// function signature (`transfer(address,uint256)`).
pub fn parse_selector(value: &str) -> anyhow::Result<Selector> {
    let value = value.trim();
    if value.contains('(') {
        if !value.ends_with(')') {
            bail!("malformed function signature: {value}");
        }
        return Ok(selector_of(value));
    }
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.len() != 8 {
        bail!("selector {value} must be exactly 4 bytes");
    }
    Selector::from_str(digits).with_context(|| format!("invalid selector: {value}"))
}

/// XOR a set of selectors into an ERC-165 interface identifier.
pub fn xor_selectors<'a>(selectors: impl IntoIterator<Item = &'a Selector>) -> InterfaceId {
    selectors.into_iter().fold(InterfaceId::ZERO, |acc, selector| acc ^ *selector)
}

/// Interface ID of `abi`, excluding every function that also appears in one of `inherited`.
///
/// Compiled artifacts list inherited functions alongside the interface's own, while
/// `type(I).interfaceId` only covers the functions declared on `I` itself.
pub fn interface_id(abi: &JsonAbi, inherited: &[&JsonAbi]) -> InterfaceId {
    let excluded: Vec<Selector> =
        inherited.iter().flat_map(|base| base.functions().map(|f| f.selector())).collect();
    let own: SelectorSet = abi.functions().map(|f| f.selector()).collect();
    xor_selectors(own.iter().filter(|selector| !excluded.contains(selector)))
}

/// An ordered set of selectors.
///
/// Iteration follows insertion order, which keeps cut entries and calldata stable across runs
/// with identical inputs. Set operations preserve the order of the left operand. Equality
/// ignores order.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorSet(Vec<Selector>);

impl SelectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a selector, returning false if it was already present.
    pub fn insert(&mut self, selector: Selector) -> bool {
        if self.contains(&selector) {
            return false;
        }
        self.0.push(selector);
        true
    }

    /// Remove a selector, returning whether it was present.
    pub fn remove(&mut self, selector: &Selector) -> bool {
        let len = self.0.len();
        self.0.retain(|s| s != selector);
        self.0.len() != len
    }

    pub fn contains(&self, selector: &Selector) -> bool {
        self.0.contains(selector)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selector> + '_ {
        self.0.iter()
    }

    /// Selectors of `self` that are also in `other`.
    pub fn intersection(&self, other: &SelectorSet) -> SelectorSet {
        self.iter().filter(|s| other.contains(s)).copied().collect()
    }

    /// Selectors of `self` that are not in `other`.
    pub fn difference(&self, other: &SelectorSet) -> SelectorSet {
        self.iter().filter(|s| !other.contains(s)).copied().collect()
    }

    pub fn is_disjoint(&self, other: &SelectorSet) -> bool {
        !self.iter().any(|s| other.contains(s))
    }

    pub fn to_vec(&self) -> Vec<Selector> {
        self.0.clone()
    }
}

impl PartialEq for SelectorSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|s| other.contains(s))
    }
}

impl Eq for SelectorSet {}

impl FromIterator<Selector> for SelectorSet {
    fn from_iter<I: IntoIterator<Item = Selector>>(iter: I) -> Self {
        let mut set = SelectorSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<Selector> for SelectorSet {
    fn extend<I: IntoIterator<Item = Selector>>(&mut self, iter: I) {
        for selector in iter {
            self.insert(selector);
        }
    }
}

impl IntoIterator for SelectorSet {
    type Item = Selector;
    type IntoIter = std::vec::IntoIter<Selector>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a SelectorSet {
    type Item = &'a Selector;
    type IntoIter = std::slice::Iter<'a, Selector>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<Selector>> for SelectorSet {
    fn from(selectors: Vec<Selector>) -> Self {
        selectors.into_iter().collect()
    }
}

impl fmt::Debug for SelectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter().map(format_bytes4)).finish()
    }
}

/// The dispatchable selectors of one compiled facet, with their human-readable signatures.
#[derive(Clone, Debug, Default)]
pub struct FacetSelectors {
    pub selectors: SelectorSet,
    signatures: BTreeMap<Selector, String>,
    /// Signature of the facet-specific initializer that was excluded, if any.
    pub initializer: Option<String>,
}

impl FacetSelectors {
    /// Extract the selectors of all external functions in `abi`.
    ///
    /// The argument-less `initialize()` is always excluded, as is `init_signature` when given.
    /// A missing expected initializer is not an error: a warning is logged and nothing is
    /// subtracted for it.
    pub fn from_abi(abi: &JsonAbi, init_signature: Option<&str>) -> Self {
        let mut selectors = SelectorSet::new();
        let mut signatures = BTreeMap::new();
        for function in abi.functions() {
            let selector = function.selector();
            selectors.insert(selector);
            signatures.insert(selector, function.signature());
        }

        let zero_arg = selector_of(ZERO_ARG_INITIALIZER);
        if !selectors.remove(&zero_arg) {
            tracing::trace!("ABI has no {ZERO_ARG_INITIALIZER}; nothing to exclude");
        }

        let mut initializer = None;
        if let Some(signature) = init_signature {
            if selectors.remove(&selector_of(signature)) {
                initializer = Some(signature.to_string());
            } else {
                tracing::warn!(
                    "Initializer {signature} not found in ABI; treating facet as having no initializer to exclude"
                );
            }
        }

        Self { selectors, signatures, initializer }
    }

    /// Human-readable signature of `selector`, if it belongs to this facet's ABI.
    pub fn signature(&self, selector: &Selector) -> Option<&str> {
        self.signatures.get(selector).map(String::as_str)
    }

    /// Iterate over `(selector, signature)` pairs in selector order.
    pub fn entries(&self) -> impl Iterator<Item = (&Selector, &str)> + '_ {
        self.selectors
            .iter()
            .map(|selector| (selector, self.signature(selector).unwrap_or("<unknown>")))
    }

    /// Describe a selector for logs, e.g. `0xa9059cbb (transfer(address,uint256))`.
    pub fn describe(&self, selector: &Selector) -> String {
        match self.signature(selector) {
            Some(signature) => format!("{} ({signature})", format_bytes4(selector)),
            None => format_bytes4(selector),
        }
    }
}

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

//! The persisted record of deployed contracts for one chain, network and environment.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use alloy::primitives::Address;
use anyhow::{Context, Result};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use serde::{Deserialize, Serialize};

use crate::{
    collision::{CollisionReport, Resolution},
    contracts::format_bytes4,
    diff::{FacetChange, FacetPlan},
    selectors::{InterfaceId, Selector, SelectorSet},
};

/// One deployed contract. Facets carry their registered selectors; other contracts do not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    pub name: String,
    pub address: Address,
    /// Constructor arguments, as deployed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_id: Option<InterfaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<SelectorSet>,
}

impl ContractRecord {
    pub fn facet(
        name: impl Into<String>,
        address: Address,
        interface_id: Option<InterfaceId>,
        selectors: SelectorSet,
    ) -> Self {
        Self { name: name.into(), address, args: vec![], interface_id, selectors: Some(selectors) }
    }

    pub fn is_facet(&self) -> bool {
        self.selectors.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractsFile {
    pub chain_id: u64,
    pub network: String,
    pub env: String,
    pub protocol_version: String,
    #[serde(default)]
    pub contracts: Vec<ContractRecord>,
}

/// Location of the contracts file for a deployment: `{dir}/{chain_id}-{network}-{env}.json`.
pub fn contracts_file_path(dir: impl AsRef<Path>, chain_id: u64, network: &str, env: &str) -> PathBuf {
    dir.as_ref().join(format!("{chain_id}-{network}-{env}.json"))
}

impl ContractsFile {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read contracts file: {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to decode contracts file: {}", path.display()))
    }

    /// Write the file atomically: either the new contents land completely or the previous
    /// file stays in place.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut data = serde_json::to_vec_pretty(self).context("Failed to serialize contracts file")?;
        data.push(b'\n');

        AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(&data))
            .with_context(|| format!("Failed to write contracts file {}", path.display()))?;

        tracing::debug!("Saved contracts file: {}", path.display());
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&ContractRecord> {
        self.contracts.iter().find(|record| record.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&ContractRecord> {
        self.find(name).with_context(|| {
            format!("{name} is not recorded in the contracts file for {}-{}", self.network, self.env)
        })
    }

    /// Name of the contract recorded at `address`.
    pub fn name_of(&self, address: Address) -> Option<&str> {
        self.contracts
            .iter()
            .find(|record| record.address == address)
            .map(|record| record.name.as_str())
    }

    pub fn facets(&self) -> impl Iterator<Item = &ContractRecord> + '_ {
        self.contracts.iter().filter(|record| record.is_facet())
    }

    /// Insert `record`, superseding any record of the same name. Returns the superseded record.
    pub fn upsert(&mut self, record: ContractRecord) -> Option<ContractRecord> {
        let previous = self.remove(&record.name);
        self.contracts.push(record);
        previous
    }

    pub fn remove(&mut self, name: &str) -> Option<ContractRecord> {
        let index = self.contracts.iter().position(|record| record.name == name)?;
        Some(self.contracts.remove(index))
    }

    /// True if a recorded facet carries `interface_id`.
    pub fn interface_claimed(&self, interface_id: &InterfaceId) -> bool {
        self.facets().any(|record| record.interface_id.as_ref() == Some(interface_id))
    }

    /// Apply a confirmed upgrade: supersede the record of every upgraded facet, drop removed
    /// facets, take selectors won by a `replace` collision off their previous facet and record
    /// the new protocol version.
    pub fn record_upgrade(&mut self, version: &str, plans: &[FacetPlan], collisions: &CollisionReport) {
        for plan in plans {
            match plan.change {
                FacetChange::Upgrade { new_address } => {
                    let registered = plan.diff.registered();
                    if registered.is_empty() {
                        tracing::warn!(
                            "{} was not cut in (no selectors registered); keeping its previous record",
                            plan.name
                        );
                        continue;
                    }
                    let record = ContractRecord::facet(
                        plan.name.clone(),
                        new_address,
                        plan.new_interface_id,
                        registered,
                    );
                    if let Some(previous) = self.upsert(record) {
                        tracing::debug!("Superseded {} at {}", previous.name, previous.address);
                    }
                }
                FacetChange::Remove => {
                    if self.remove(&plan.name).is_some() {
                        tracing::debug!("Dropped record of removed facet {}", plan.name);
                    }
                }
            }
        }
        for (collision, resolution) in &collisions.resolved {
            if *resolution == Resolution::Replace {
                self.release_selector(collision.existing_facet, collision.selector);
            }
        }
        self.protocol_version = version.to_string();
    }

    /// Drop `selector` from the facet recorded at `owner`. A facet left serving nothing is no
    /// longer reachable through the diamond and its record goes too.
    fn release_selector(&mut self, owner: Address, selector: Selector) {
        let Some(index) =
            self.contracts.iter().position(|record| record.is_facet() && record.address == owner)
        else {
            return;
        };
        let record = &mut self.contracts[index];
        let Some(selectors) = record.selectors.as_mut() else { return };
        if selectors.remove(&selector) {
            tracing::debug!("{} no longer serves {}", record.name, format_bytes4(&selector));
        }
        if selectors.is_empty() {
            tracing::warn!("{} serves no selectors after the upgrade; dropping its record", record.name);
            self.contracts.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        collision::Collision,
        diff::{diff_selectors, removal_diff},
        selectors::{FacetSelectors, Selector},
    };

    fn sel(value: u16) -> Selector {
        let [hi, lo] = value.to_be_bytes();
        Selector::from([0, 0, hi, lo])
    }

    fn set(values: &[u16]) -> SelectorSet {
        values.iter().map(|v| sel(*v)).collect()
    }

    fn contracts_file() -> ContractsFile {
        ContractsFile {
            chain_id: 31337,
            network: "localhost".into(),
            env: "test".into(),
            protocol_version: "2.3.0".into(),
            contracts: vec![
                ContractRecord {
                    name: "AccessController".into(),
                    address: Address::repeat_byte(0x01),
                    args: vec![serde_json::json!("0x0000000000000000000000000000000000000001")],
                    interface_id: None,
                    selectors: None,
                },
                ContractRecord::facet(
                    "OfferHandlerFacet",
                    Address::repeat_byte(0x0a),
                    Some(InterfaceId::from([0xaa, 0, 0, 0])),
                    set(&[0xaaaa, 0xbbbb]),
                ),
                ContractRecord::facet("PauseHandlerFacet", Address::repeat_byte(0x0b), None, set(&[0x1111])),
            ],
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = contracts_file_path(dir.path(), 31337, "localhost", "test");
        assert!(path.ends_with("31337-localhost-test.json"));

        let file = contracts_file();
        file.save(&path).unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"protocolVersion\": \"2.3.0\""));
        assert!(json.contains("\"0x0000aaaa\""));

        assert_eq!(ContractsFile::load(&path).await.unwrap(), file);
        assert!(ContractsFile::load(dir.path().join("missing.json")).await.is_err());
    }

    #[test]
    fn test_record_upgrade_supersedes_and_removes() {
        let mut file = contracts_file();
        let new_address = Address::repeat_byte(0x1a);
        let plans = vec![
            FacetPlan {
                name: "OfferHandlerFacet".into(),
                change: FacetChange::Upgrade { new_address },
                old_address: Some(Address::repeat_byte(0x0a)),
                old_interface_id: Some(InterfaceId::from([0xaa, 0, 0, 0])),
                new_interface_id: Some(InterfaceId::from([0xab, 0, 0, 0])),
                diff: diff_selectors(&set(&[0xaaaa, 0xbbbb]), &set(&[0xbbbb, 0xcccc]), &SelectorSet::new()),
                selectors: FacetSelectors::default(),
            },
            FacetPlan {
                name: "PauseHandlerFacet".into(),
                change: FacetChange::Remove,
                old_address: Some(Address::repeat_byte(0x0b)),
                old_interface_id: None,
                new_interface_id: None,
                diff: removal_diff(&set(&[0x1111]), &SelectorSet::new()),
                selectors: FacetSelectors::default(),
            },
        ];

        file.record_upgrade("2.4.0", &plans, &CollisionReport::default());

        assert_eq!(file.protocol_version, "2.4.0");
        assert!(file.find("PauseHandlerFacet").is_none());
        let offer = file.require("OfferHandlerFacet").unwrap();
        assert_eq!(offer.address, new_address);
        assert_eq!(offer.selectors, Some(set(&[0xbbbb, 0xcccc])));
        assert_eq!(file.name_of(new_address), Some("OfferHandlerFacet"));
        assert!(file.interface_claimed(&InterfaceId::from([0xab, 0, 0, 0])));
        assert!(!file.interface_claimed(&InterfaceId::from([0xaa, 0, 0, 0])));
        assert_eq!(file.facets().count(), 1);
        assert!(file.find("AccessController").is_some());
    }

    #[test]
    #[traced_test]
    fn test_record_upgrade_releases_replaced_selectors() {
        let mut file = contracts_file();
        let collision = |selector, existing_facet| Collision {
            selector,
            signature: None,
            existing_facet,
            existing_name: None,
            candidate: "FundsHandlerFacet".into(),
        };
        let collisions = CollisionReport {
            handoffs: vec![],
            resolved: vec![
                (collision(sel(0xaaaa), Address::repeat_byte(0x0a)), Resolution::Replace),
                (collision(sel(0xbbbb), Address::repeat_byte(0x0a)), Resolution::Skip),
                (collision(sel(0x1111), Address::repeat_byte(0x0b)), Resolution::Replace),
            ],
        };

        file.record_upgrade("2.4.0", &[], &collisions);

        let offer = file.require("OfferHandlerFacet").unwrap();
        assert_eq!(offer.selectors, Some(set(&[0xbbbb])));
        assert!(file.find("PauseHandlerFacet").is_none());
        assert!(logs_contain("PauseHandlerFacet serves no selectors after the upgrade"));
    }
}

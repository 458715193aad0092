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

//! The operator-supplied upgrade plan.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use alloy::primitives::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    collision::Resolution,
    selectors::{parse_selector, Selector, SelectorSet},
};

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("failed to read upgrade plan {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("failed to parse upgrade plan {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("upgrade plan has no version")]
    MissingVersion,

    #[error("version {0:?} is longer than 31 bytes")]
    VersionTooLong(String),

    #[error("upgrade plan neither upgrades nor removes any facet")]
    Empty,

    #[error("{0} is listed in both addOrUpgrade and remove")]
    AddAndRemove(String),

    #[error("{facet} is listed more than once in {list}")]
    Duplicate { facet: String, list: &'static str },

    #[error("{section} has an entry for {facet}, which the plan does not upgrade")]
    UnknownFacet { facet: String, section: &'static str },

    #[error("the initializer facet {0} cannot be removed")]
    RemovesInitializer(String),

    #[error("invalid selector {value:?} in {section}: {reason}")]
    BadSelector { value: String, section: String, reason: String },
}

/// Initializer arguments of one facet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FacetInit {
    /// Arguments in declaration order. Strings, numbers, booleans and arrays thereof.
    #[serde(default)]
    pub init: Vec<serde_json::Value>,
    /// Canonical signature of the initializer, when the facet has more than one overload.
    #[serde(default)]
    pub signature: Option<String>,
}

/// Artifacts from which a facet's ERC-165 interface ID is derived.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceSource {
    pub artifact: String,
    #[serde(default)]
    pub inherits: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpgradePlan {
    /// Target protocol version.
    pub version: String,
    #[serde(default)]
    pub add_or_upgrade: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
    #[serde(default)]
    pub skip_selectors: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub facets_to_init: BTreeMap<String, FacetInit>,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceSource>,
    /// Collisions decided ahead of time, keyed by selector.
    #[serde(default)]
    pub collisions: BTreeMap<String, Resolution>,
    #[serde(default)]
    pub initialization_data: Bytes,
}

impl UpgradePlan {
    /// Load a plan from a `.json`, `.yaml` or `.yml` file. The plan is not validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let data = std::fs::read_to_string(path)
            .map_err(|source| PlanError::Read { path: display.clone(), source })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            serde_yaml::from_str(&data).map_err(|err| err.to_string())
        } else {
            serde_json::from_str(&data).map_err(|err| err.to_string())
        };
        parsed.map_err(|reason| PlanError::Parse { path: display, reason })
    }

    /// Check the plan for structural errors. `initializer` is the name of the initializer
    /// facet, which may be upgraded but never removed.
    pub fn validate(&self, initializer: &str) -> Result<(), PlanError> {
        if self.version.trim().is_empty() {
            return Err(PlanError::MissingVersion);
        }
        if self.version.len() > 31 {
            return Err(PlanError::VersionTooLong(self.version.clone()));
        }
        if self.add_or_upgrade.is_empty() && self.remove.is_empty() {
            return Err(PlanError::Empty);
        }

        let upgrades = unique(&self.add_or_upgrade, "addOrUpgrade")?;
        let removals = unique(&self.remove, "remove")?;
        if let Some(facet) = upgrades.intersection(&removals).next() {
            return Err(PlanError::AddAndRemove(facet.to_string()));
        }
        if removals.contains(initializer) {
            return Err(PlanError::RemovesInitializer(initializer.to_string()));
        }

        for facet in self.skip_selectors.keys() {
            if !upgrades.contains(facet.as_str()) && !removals.contains(facet.as_str()) {
                return Err(PlanError::UnknownFacet { facet: facet.clone(), section: "skipSelectors" });
            }
            self.skip_set(facet)?;
        }
        for (section, facets) in [
            ("facetsToInit", self.facets_to_init.keys().collect::<Vec<_>>()),
            ("interfaces", self.interfaces.keys().collect()),
        ] {
            if let Some(facet) = facets.into_iter().find(|f| !upgrades.contains(f.as_str())) {
                return Err(PlanError::UnknownFacet { facet: facet.clone(), section });
            }
        }
        self.collision_decisions()?;
        Ok(())
    }

    /// Selectors the operator excluded for `facet`.
    pub fn skip_set(&self, facet: &str) -> Result<SelectorSet, PlanError> {
        let Some(values) = self.skip_selectors.get(facet) else {
            return Ok(SelectorSet::new());
        };
        values
            .iter()
            .map(|value| {
                parse_selector(value).map_err(|err| PlanError::BadSelector {
                    value: value.clone(),
                    section: format!("skipSelectors.{facet}"),
                    reason: format!("{err:#}"),
                })
            })
            .collect()
    }

    /// Pre-resolved collisions keyed by parsed selector.
    pub fn collision_decisions(&self) -> Result<BTreeMap<Selector, Resolution>, PlanError> {
        self.collisions
            .iter()
            .map(|(value, resolution)| {
                let selector = parse_selector(value).map_err(|err| PlanError::BadSelector {
                    value: value.clone(),
                    section: "collisions".into(),
                    reason: format!("{err:#}"),
                })?;
                Ok((selector, *resolution))
            })
            .collect()
    }

    /// Position of `facet` in `addOrUpgrade`.
    pub fn upgrade_index(&self, facet: &str) -> Option<usize> {
        self.add_or_upgrade.iter().position(|name| name == facet)
    }
}

fn unique<'a>(names: &'a [String], list: &'static str) -> Result<BTreeSet<&'a str>, PlanError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(PlanError::Duplicate { facet: name.clone(), list });
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIALIZER: &str = "ProtocolInitializationHandlerFacet";

    fn plan() -> UpgradePlan {
        UpgradePlan {
            version: "2.4.0".into(),
            add_or_upgrade: vec!["OfferHandlerFacet".into(), "ExchangeHandlerFacet".into()],
            remove: vec!["LegacyFacet".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_load_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("upgrade.yaml");
        std::fs::write(
            &yaml,
            r#"
version: "2.4.0"
addOrUpgrade: [OfferHandlerFacet]
remove: [LegacyFacet]
skipSelectors:
  OfferHandlerFacet: ["0xaabbccdd", "pause()"]
facetsToInit:
  OfferHandlerFacet:
    init: [42, "0x0000000000000000000000000000000000000001"]
collisions:
  "0x11223344": skip
initializationData: "0xdead"
"#,
        )
        .unwrap();
        let plan = UpgradePlan::load(&yaml).unwrap();
        plan.validate(INITIALIZER).unwrap();
        assert_eq!(plan.facets_to_init["OfferHandlerFacet"].init.len(), 2);
        assert_eq!(plan.skip_set("OfferHandlerFacet").unwrap().len(), 2);
        assert_eq!(
            plan.collision_decisions().unwrap(),
            BTreeMap::from([(Selector::from([0x11, 0x22, 0x33, 0x44]), Resolution::Skip)])
        );
        assert_eq!(plan.initialization_data.as_ref(), &[0xde, 0xad]);

        let json = dir.path().join("upgrade.json");
        std::fs::write(&json, r#"{"version": "2.4.0", "addOrUpgrade": ["A"], "bogus": 1}"#).unwrap();
        assert!(matches!(UpgradePlan::load(&json), Err(PlanError::Parse { .. })));
    }

    #[test]
    fn test_validation_errors() {
        assert!(plan().validate(INITIALIZER).is_ok());

        let mut p = plan();
        p.version = "".into();
        assert!(matches!(p.validate(INITIALIZER), Err(PlanError::MissingVersion)));

        let mut p = plan();
        p.version = "v".repeat(32);
        assert!(matches!(p.validate(INITIALIZER), Err(PlanError::VersionTooLong(_))));

        let mut p = plan();
        p.remove.push("OfferHandlerFacet".into());
        assert!(matches!(p.validate(INITIALIZER), Err(PlanError::AddAndRemove(f)) if f == "OfferHandlerFacet"));

        let mut p = plan();
        p.add_or_upgrade.push("ExchangeHandlerFacet".into());
        assert!(matches!(p.validate(INITIALIZER), Err(PlanError::Duplicate { list: "addOrUpgrade", .. })));

        let mut p = plan();
        p.remove.push(INITIALIZER.into());
        assert!(matches!(p.validate(INITIALIZER), Err(PlanError::RemovesInitializer(_))));

        let mut p = plan();
        p.facets_to_init.insert("LegacyFacet".into(), FacetInit::default());
        assert!(matches!(
            p.validate(INITIALIZER),
            Err(PlanError::UnknownFacet { section: "facetsToInit", .. })
        ));

        // Skips may target a facet being removed, but must parse.
        let mut p = plan();
        p.skip_selectors.insert("LegacyFacet".into(), vec!["0x1234".into()]);
        assert!(matches!(p.validate(INITIALIZER), Err(PlanError::BadSelector { .. })));
        p.skip_selectors.insert("LegacyFacet".into(), vec!["0x12345678".into()]);
        assert!(p.validate(INITIALIZER).is_ok());

        let p = UpgradePlan { version: "2.4.0".into(), ..Default::default() };
        assert!(matches!(p.validate(INITIALIZER), Err(PlanError::Empty)));
    }
}

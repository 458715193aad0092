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

use std::{fmt::Write, path::Path};

use anyhow::Context;
use clap::Args;
use diamond_upgrade::{
    artifacts::Artifact,
    contracts::format_bytes4,
    selectors::{interface_id, FacetSelectors},
};

use crate::config::GlobalConfig;

/// Command to print the selector table of a compiled facet.
#[non_exhaustive]
#[derive(Args, Clone, Debug)]
pub struct Selectors {
    /// Contract name of the facet, or the path of its artifact JSON.
    pub artifact: String,

    /// Signature of the facet's initializer, e.g. `initialize(uint256)`. It is left out of the
    /// table, as it is during an upgrade.
    #[clap(long)]
    pub init_signature: Option<String>,
}

impl Selectors {
    /// Run the [Selectors] command.
    pub fn run(&self, global_config: &GlobalConfig) -> anyhow::Result<()> {
        let path = Path::new(&self.artifact);
        let artifact = if path.extension().is_some_and(|ext| ext == "json") {
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .with_context(|| format!("invalid artifact path {}", path.display()))?;
            Artifact::from_file(name, path)?
        } else {
            global_config.deployment.artifacts().load(&self.artifact)?
        };

        print!("{}", selector_table(&artifact, self.init_signature.as_deref()));
        Ok(())
    }
}

/// One line per dispatchable selector, then the excluded initializer and the interface ID.
pub fn selector_table(artifact: &Artifact, init_signature: Option<&str>) -> String {
    let facet = FacetSelectors::from_abi(&artifact.abi, init_signature);
    let mut table = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(table, "{} ({} selectors)", artifact.name, facet.selectors.len());
    for (selector, signature) in facet.entries() {
        let _ = writeln!(table, "{}  {signature}", format_bytes4(selector));
    }
    if let Some(initializer) = &facet.initializer {
        let _ = writeln!(table, "excluded initializer: {initializer}");
    }
    let _ = writeln!(table, "interface ID: {}", format_bytes4(&interface_id(&artifact.abi, &[])));
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTIFACT: &str = r#"{
        "abi": [
            {"type": "function", "name": "transfer", "inputs": [{"name": "to", "type": "address"}, {"name": "amount", "type": "uint256"}], "outputs": [{"name": "", "type": "bool"}], "stateMutability": "nonpayable"},
            {"type": "function", "name": "initialize", "inputs": [{"name": "limit", "type": "uint256"}], "outputs": [], "stateMutability": "nonpayable"}
        ],
        "bytecode": {"object": "0x6080604052"}
    }"#;

    #[test]
    fn test_selector_table() {
        let artifact = Artifact::from_json("TokenFacet", ARTIFACT).unwrap();

        let table = selector_table(&artifact, Some("initialize(uint256)"));
        assert!(table.starts_with("TokenFacet (1 selectors)\n"));
        assert!(table.contains("0xa9059cbb  transfer(address,uint256)\n"));
        assert!(table.contains("excluded initializer: initialize(uint256)\n"));

        let table = selector_table(&artifact, None);
        assert!(table.starts_with("TokenFacet (2 selectors)\n"));
        assert!(!table.contains("excluded initializer"));
    }
}

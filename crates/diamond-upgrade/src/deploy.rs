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

//! Preparation and deployment of the facets an upgrade cuts in.

use alloy::{
    dyn_abi::{DynSolValue, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi},
    primitives::{Address, Bytes},
};
use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::{
    artifacts::{Artifact, ArtifactStore},
    chain::DiamondChain,
    plan::{FacetInit, UpgradePlan},
    selectors::{interface_id, selector_of, FacetSelectors, InterfaceId},
};

/// A facet whose artifact is loaded and whose initializer call is encoded, ready to deploy.
#[derive(Clone, Debug)]
pub struct PreparedFacet {
    pub name: String,
    pub artifact: Artifact,
    pub selectors: FacetSelectors,
    pub init_calldata: Option<Bytes>,
    pub interface_id: Option<InterfaceId>,
}

/// A facet deployed for the upgrade.
#[derive(Clone, Debug)]
pub struct DeployedFacet {
    pub name: String,
    pub address: Address,
    pub selectors: FacetSelectors,
    /// Encoded initializer call, run by the initializer facet after the cut.
    pub init_calldata: Option<Bytes>,
    pub interface_id: Option<InterfaceId>,
}

impl PreparedFacet {
    /// Stand-in for the deployed facet at the zero address, used when nothing is deployed.
    pub fn placeholder(&self) -> DeployedFacet {
        self.deployed_at(Address::ZERO)
    }

    fn deployed_at(&self, address: Address) -> DeployedFacet {
        DeployedFacet {
            name: self.name.clone(),
            address,
            selectors: self.selectors.clone(),
            init_calldata: self.init_calldata.clone(),
            interface_id: self.interface_id,
        }
    }
}

/// Load and check every `addOrUpgrade` facet of `plan` without touching the chain.
pub fn prepare_facets(store: &ArtifactStore, plan: &UpgradePlan) -> Result<Vec<PreparedFacet>> {
    plan.add_or_upgrade.iter().map(|name| prepare_facet(store, plan, name)).collect()
}

pub fn prepare_facet(store: &ArtifactStore, plan: &UpgradePlan, name: &str) -> Result<PreparedFacet> {
    let artifact = store.load(name)?;
    artifact.require_bytecode()?;

    let (selectors, init_calldata) = match plan.facets_to_init.get(name) {
        Some(init) => {
            let function = select_initializer(&artifact.abi, init, name)?;
            let calldata = encode_initializer(function, &init.init)
                .with_context(|| format!("invalid initializer arguments for {name}"))?;
            let signature = function.signature();
            (FacetSelectors::from_abi(&artifact.abi, Some(&signature)), Some(calldata))
        }
        None => (FacetSelectors::from_abi(&artifact.abi, None), None),
    };

    let interface_id = match plan.interfaces.get(name) {
        Some(source) => {
            let abi = store.load(&source.artifact)?.abi;
            let inherited = source
                .inherits
                .iter()
                .map(|base| store.load(base).map(|artifact| artifact.abi))
                .collect::<Result<Vec<JsonAbi>>>()?;
            let inherited: Vec<&JsonAbi> = inherited.iter().collect();
            Some(interface_id(&abi, &inherited))
        }
        None => None,
    };

    tracing::debug!(
        "Prepared {name}: {} selectors, initializer {:?}",
        selectors.selectors.len(),
        selectors.initializer
    );
    Ok(PreparedFacet { name: name.to_string(), artifact, selectors, init_calldata, interface_id })
}

/// Deploy each prepared facet, in order, waiting for each contract address.
pub async fn deploy_facets(
    chain: &dyn DiamondChain,
    prepared: &[PreparedFacet],
) -> Result<Vec<DeployedFacet>> {
    let mut deployed = Vec::with_capacity(prepared.len());
    for facet in prepared {
        let bytecode = facet.artifact.require_bytecode()?.clone();
        let address = chain
            .deploy(bytecode)
            .await
            .with_context(|| format!("failed to deploy {}", facet.name))?;
        tracing::info!("Deployed {} at {address}", facet.name);
        deployed.push(facet.deployed_at(address));
    }
    Ok(deployed)
}

/// Pick the initializer to call: the one named by `signature`, or else the single
/// `initialize` overload taking as many arguments as were supplied.
fn select_initializer<'a>(abi: &'a JsonAbi, init: &FacetInit, facet: &str) -> Result<&'a Function> {
    if let Some(signature) = &init.signature {
        let selector = selector_of(signature);
        return abi
            .functions()
            .find(|function| function.selector() == selector)
            .with_context(|| format!("{facet} has no function {signature}"));
    }

    let overloads: Vec<&Function> = abi
        .function("initialize")
        .map(|functions| functions.iter().filter(|f| f.inputs.len() == init.init.len()).collect())
        .unwrap_or_default();
    match overloads.as_slice() {
        [function] => Ok(*function),
        [] => bail!("{facet} has no initialize function taking {} arguments", init.init.len()),
        _ => bail!("{facet} has several initialize overloads taking {} arguments; set `signature`", init.init.len()),
    }
}

/// ABI-encode a call of `function` from JSON arguments.
pub fn encode_initializer(function: &Function, args: &[Value]) -> Result<Bytes> {
    if function.inputs.len() != args.len() {
        bail!(
            "{} takes {} arguments, {} given",
            function.signature(),
            function.inputs.len(),
            args.len()
        );
    }
    let values = function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty = param.resolve()?;
            let literal = solidity_literal(arg)?;
            ty.coerce_str(&literal)
                .with_context(|| format!("argument {} = {literal} is not a valid {}", param.name, ty.sol_type_name()))
        })
        .collect::<Result<Vec<DynSolValue>>>()?;
    Ok(function.abi_encode_input(&values)?.into())
}

fn solidity_literal(value: &Value) -> Result<String> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => {
            let items = items.iter().map(solidity_literal).collect::<Result<Vec<_>>>()?;
            format!("[{}]", items.join(", "))
        }
        Value::Null | Value::Object(_) => bail!("unsupported initializer argument: {value}"),
    })
}

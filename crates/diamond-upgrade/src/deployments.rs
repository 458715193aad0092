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

use std::path::PathBuf;

use alloy_chains::NamedChain;
use anyhow::{Context, Result};
use clap::Args;
use derive_builder::Builder;

use crate::{artifacts::ArtifactStore, registry::contracts_file_path};

/// Network used when the chain ID has no well-known name, e.g. a local anvil node.
pub const LOCAL_NETWORK: &str = "localhost";

/// Where a protocol deployment lives and where its files are kept.
#[derive(Clone, Debug, Builder, Args)]
pub struct Deployment {
    /// EIP-155 chain ID of the network. Read from the RPC endpoint when omitted.
    #[clap(long, env)]
    #[builder(setter(into, strip_option), default)]
    pub chain_id: Option<u64>,

    /// Network name used in the contracts file name. Derived from the chain ID when omitted.
    #[clap(long, env)]
    #[builder(setter(into, strip_option), default)]
    pub network: Option<String>,

    /// Deployment environment, e.g. test, staging or prod.
    #[clap(long = "env", env = "DEPLOY_ENV", default_value = "test")]
    #[builder(setter(into), default = "\"test\".to_string()")]
    pub environment: String,

    /// Directory holding the contracts files.
    #[clap(long, env, default_value = "addresses")]
    #[builder(setter(into), default = "PathBuf::from(\"addresses\")")]
    pub addresses_dir: PathBuf,

    /// Forge output directory with the compiled artifacts.
    #[clap(long, env, default_value = "out")]
    #[builder(setter(into), default = "PathBuf::from(\"out\")")]
    pub artifacts_dir: PathBuf,
}

impl Deployment {
    /// Create a new [DeploymentBuilder].
    pub fn builder() -> DeploymentBuilder {
        Default::default()
    }

    /// Network name for `chain_id`: the configured one, or the chain's well-known name.
    pub fn network_name(&self, chain_id: u64) -> String {
        if let Some(network) = &self.network {
            return network.clone();
        }
        match NamedChain::try_from(chain_id) {
            Ok(NamedChain::AnvilHardhat) | Err(_) => LOCAL_NETWORK.to_string(),
            Ok(chain) => chain.to_string(),
        }
    }

    /// Path of the contracts file for this deployment on `chain_id`.
    pub fn contracts_file(&self, chain_id: u64) -> PathBuf {
        contracts_file_path(
            &self.addresses_dir,
            chain_id,
            &self.network_name(chain_id),
            &self.environment,
        )
    }

    /// Chain ID, checked against the one reported by the node when both are known.
    pub fn resolve_chain_id(&self, reported: u64) -> Result<u64> {
        match self.chain_id {
            Some(configured) if configured != reported => Err(anyhow::anyhow!(
                "configured chain ID {configured} does not match the RPC endpoint's {reported}"
            ))
            .context("wrong RPC endpoint"),
            _ => Ok(reported),
        }
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(&self.artifacts_dir)
    }
}

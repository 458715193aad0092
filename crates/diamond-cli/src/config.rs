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

//! Common configuration options for commands in the diamond CLI.

use std::{num::ParseIntError, path::PathBuf, time::Duration};

use alloy::{
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use anyhow::{Context, Result};
use clap::Args;
use diamond_upgrade::{deployments::Deployment, ContractsFile, RpcDiamond};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Common configuration options for all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalConfig {
    /// URL of the Ethereum RPC endpoint
    #[clap(short, long, env = "RPC_URL", global = true)]
    pub rpc_url: Option<Url>,

    /// Private key of the wallet holding the upgrader role (without 0x prefix)
    #[clap(long, env = "PRIVATE_KEY", global = true, hide_env_values = true)]
    pub private_key: Option<PrivateKeySigner>,

    /// Ethereum transaction timeout in seconds.
    #[clap(long, env = "TX_TIMEOUT", global = true, value_parser = |arg: &str| -> Result<Duration, ParseIntError> {Ok(Duration::from_secs(arg.parse()?))})]
    pub tx_timeout: Option<Duration>,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long, env = "LOG_LEVEL", global = true, default_value = "info")]
    pub log_level: LevelFilter,

    /// Whether to log in JSON format.
    #[clap(long, env = "LOG_JSON", global = true, default_value_t = false)]
    pub log_json: bool,

    /// Deployment whose contracts file and artifacts to use.
    #[clap(flatten, next_help_heading = "Deployment")]
    pub deployment: Deployment,
}

impl GlobalConfig {
    /// Access [Self::rpc_url] or return an error that can be shown to the user.
    pub fn require_rpc_url(&self) -> Result<Url> {
        self.rpc_url
            .clone()
            .context("Blockchain RPC URL not provided; please set --rpc-url or the RPC_URL env var")
    }

    /// Access [Self::private_key] or return an error that can be shown to the user.
    pub fn require_private_key(&self) -> Result<PrivateKeySigner> {
        self.private_key.clone().context(
            "Private key not provided; please set --private-key or the PRIVATE_KEY env var",
        )
    }

    /// Chain ID reported by the RPC endpoint, checked against `--chain-id` when given.
    pub async fn chain_id(&self) -> Result<u64> {
        let rpc_url = self.require_rpc_url()?;
        let provider = ProviderBuilder::new().connect_http(rpc_url.clone());
        let reported = provider
            .get_chain_id()
            .await
            .with_context(|| format!("failed to query chain ID from {rpc_url}"))?;
        self.deployment.resolve_chain_id(reported)
    }

    /// Locate and load the contracts file of the configured deployment.
    pub async fn contracts_file(&self) -> Result<(PathBuf, ContractsFile)> {
        let chain_id = self.chain_id().await?;
        let path = self.deployment.contracts_file(chain_id);
        tracing::debug!("Using contracts file {}", path.display());
        let registry = ContractsFile::load(&path).await?;
        Ok((path, registry))
    }

    /// Connect to the diamond at `diamond`, signing with [Self::private_key] when set.
    ///
    /// Read-only commands work without a private key.
    pub fn connect(&self, diamond: Address) -> Result<RpcDiamond<DynProvider>> {
        Ok(RpcDiamond::connect(self.require_rpc_url()?, self.private_key.clone(), diamond))
    }
}

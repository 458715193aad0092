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

use alloy::primitives::Address;
use anyhow::bail;
use clap::Args;
use diamond_upgrade::{
    chain::ReadPolicy,
    loupe::{drift, live_facets},
    upgrade::DEFAULT_DIAMOND_NAME,
};

use crate::config::GlobalConfig;

/// Command to compare the live diamond with the contracts file.
#[non_exhaustive]
#[derive(Args, Clone, Debug)]
pub struct Inspect {
    /// Address of the diamond. Read from the contracts file when omitted.
    #[clap(long)]
    pub diamond: Option<Address>,

    /// Contracts file name of the diamond proxy.
    #[clap(long, default_value = DEFAULT_DIAMOND_NAME)]
    pub diamond_name: String,

    /// Exit with an error if the contracts file and the diamond disagree.
    #[clap(long)]
    pub strict: bool,
}

impl Inspect {
    /// Run the [Inspect] command.
    pub async fn run(&self, global_config: &GlobalConfig) -> anyhow::Result<()> {
        let (path, registry) = global_config.contracts_file().await?;
        let diamond = match self.diamond {
            Some(address) => address,
            None => registry.require(&self.diamond_name)?.address,
        };
        let chain = global_config.connect(diamond)?;

        let live = live_facets(&chain, &ReadPolicy::default()).await?;
        tracing::info!("{diamond} has {} facets registered", live.len());

        let drift = drift(&registry, &live);
        println!("{} (version {})", path.display(), registry.protocol_version);
        println!("{drift}");
        if self.strict && !drift.is_empty() {
            bail!("contracts file {} does not match the diamond at {diamond}", path.display());
        }
        Ok(())
    }
}

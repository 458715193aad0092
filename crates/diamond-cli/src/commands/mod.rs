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

//! Commands of the diamond CLI.

mod inspect;
mod selectors;
mod upgrade_facets;

pub use inspect::Inspect;
pub use selectors::{selector_table, Selectors};
pub use upgrade_facets::{OnCollision, UpgradeFacets};

use clap::Subcommand;

use crate::config::GlobalConfig;

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Deploy the facets of an upgrade plan and cut them into the diamond.
    UpgradeFacets(UpgradeFacets),
    /// Print the dispatchable selectors and interface ID of a compiled facet.
    Selectors(Selectors),
    /// Compare the facets registered on the diamond with the contracts file.
    Inspect(Inspect),
}

impl Command {
    /// Run the command.
    pub async fn run(&self, global_config: &GlobalConfig) -> anyhow::Result<()> {
        match self {
            Self::UpgradeFacets(cmd) => cmd.run(global_config).await,
            Self::Selectors(cmd) => cmd.run(global_config),
            Self::Inspect(cmd) => cmd.run(global_config).await,
        }
    }
}

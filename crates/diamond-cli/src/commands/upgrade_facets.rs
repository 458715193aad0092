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

use alloy::primitives::Address;
use anyhow::Context;
use clap::{Args, ValueEnum};
use diamond_upgrade::{
    upgrade::{DEFAULT_ACCESS_CONTROLLER, DEFAULT_DIAMOND_NAME, DEFAULT_INITIALIZER_FACET},
    CollisionPolicy, PreResolved, Resolution, ResolveAll, UpgradeConfig, UpgradeErrorKind,
    UpgradePlan, Upgrader,
};

use crate::{config::GlobalConfig, prompt::PromptPolicy};

/// How to settle a selector that an unrelated facet already serves.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnCollision {
    /// Abort the upgrade.
    Fail,
    /// Ask at the terminal.
    Prompt,
    /// Point the selector at the new facet.
    Replace,
    /// Leave the selector where it is.
    Skip,
}

/// Command to run a facet upgrade.
#[non_exhaustive]
#[derive(Args, Clone, Debug)]
pub struct UpgradeFacets {
    /// Upgrade plan, as JSON or YAML.
    #[clap(long)]
    pub plan: PathBuf,

    /// Plan the cut and print it without deploying or submitting anything.
    #[clap(long)]
    pub dry_run: bool,

    /// How to settle collisions the plan's `collisions` section does not cover.
    #[clap(long, value_enum, default_value_t = OnCollision::Fail)]
    pub on_collision: OnCollision,

    /// Address of the diamond. Read from the contracts file when omitted.
    #[clap(long)]
    pub diamond: Option<Address>,

    /// Retries of a failed chain read before giving up.
    #[clap(long, default_value_t = 3)]
    pub read_retries: u32,

    #[clap(long, default_value = DEFAULT_INITIALIZER_FACET)]
    pub initializer_facet: String,

    #[clap(long, default_value = DEFAULT_DIAMOND_NAME)]
    pub diamond_name: String,

    #[clap(long, default_value = DEFAULT_ACCESS_CONTROLLER)]
    pub access_controller: String,
}

impl UpgradeFacets {
    /// Run the [UpgradeFacets] command.
    pub async fn run(&self, global_config: &GlobalConfig) -> anyhow::Result<()> {
        let plan = UpgradePlan::load(&self.plan)?;
        plan.validate(&self.initializer_facet)
            .with_context(|| format!("invalid upgrade plan {}", self.plan.display()))?;
        if !self.dry_run {
            global_config.require_private_key()?;
        }
        let (path, registry) = global_config.contracts_file().await?;
        let diamond = match self.diamond {
            Some(address) => address,
            None => registry.require(&self.diamond_name)?.address,
        };
        tracing::info!(
            "Upgrading {diamond} from {} to {} ({} facets, {} removals)",
            registry.protocol_version,
            plan.version,
            plan.add_or_upgrade.len(),
            plan.remove.len()
        );

        let chain = global_config.connect(diamond)?;
        let upgrader = Upgrader::new(chain, self.policy(&plan)?, self.config(global_config)?);
        let artifacts = global_config.deployment.artifacts();

        match upgrader.run(&path, &plan, &artifacts).await {
            Ok(report) => {
                println!("{report}");
                Ok(())
            }
            Err(err) => {
                if matches!(err.kind, UpgradeErrorKind::Persistence(_)) {
                    tracing::error!(
                        "Reconcile {} with the diamond; `diamond inspect` lists the differences",
                        path.display()
                    );
                }
                Err(err.into())
            }
        }
    }

    fn config(&self, global_config: &GlobalConfig) -> anyhow::Result<UpgradeConfig> {
        let mut builder = UpgradeConfig::builder();
        builder
            .read_retries(self.read_retries)
            .initializer_facet(self.initializer_facet.clone())
            .diamond_name(self.diamond_name.clone())
            .access_controller(self.access_controller.clone())
            .dry_run(self.dry_run);
        if let Some(timeout) = global_config.tx_timeout {
            builder.confirmation_timeout(timeout);
        }
        builder.build().context("invalid upgrade configuration")
    }

    /// Decisions from the plan come first; `--on-collision` settles everything else.
    fn policy(&self, plan: &UpgradePlan) -> anyhow::Result<Box<dyn CollisionPolicy>> {
        let pre_resolved = PreResolved::new(plan.collision_decisions()?);
        Ok(match self.on_collision {
            OnCollision::Fail => Box::new(pre_resolved),
            OnCollision::Prompt => Box::new(pre_resolved.with_fallback(PromptPolicy::terminal())),
            OnCollision::Replace => {
                Box::new(pre_resolved.with_fallback(ResolveAll(Resolution::Replace)))
            }
            OnCollision::Skip => Box::new(pre_resolved.with_fallback(ResolveAll(Resolution::Skip))),
        })
    }
}

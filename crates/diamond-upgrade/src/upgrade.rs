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

//! The facet upgrade orchestrator.
//!
//! One run moves through [UpgradeStage]s in order: the plan is checked and its facets are
//! prepared, new facets are deployed, the live selectors of every affected facet are read and
//! diffed, collisions are settled, and the whole change is submitted as a single diamond cut.
//! The contracts file is written only once the cut is confirmed.

use std::{collections::BTreeMap, fmt, path::Path, time::Duration};

use alloy::primitives::{Address, Bytes};
use anyhow::anyhow;
use derive_builder::Builder;

use crate::{
    access::ensure_upgrader,
    artifacts::ArtifactStore,
    chain::{CutReceipt, DiamondChain, ReadPolicy},
    collision::{resolve_collisions, CollisionPolicy, CollisionReport},
    contracts::format_bytes4,
    cut::{CutBatch, InitializerCall},
    deploy::{deploy_facets, prepare_facets, DeployedFacet},
    diff::{diff_selectors, removal_diff, FacetChange, FacetPlan},
    error::{UpgradeError, UpgradeErrorKind, UpgradeStage},
    interfaces::InterfaceChanges,
    loupe::{selector_owners, snapshot_facets},
    plan::UpgradePlan,
    registry::ContractsFile,
};

/// Default name of the facet whose `initialize` runs at the end of every cut.
pub const DEFAULT_INITIALIZER_FACET: &str = "ProtocolInitializationHandlerFacet";
/// Default contracts file name of the diamond proxy.
pub const DEFAULT_DIAMOND_NAME: &str = "ProtocolDiamond";
/// Default contracts file name of the access controller holding the upgrader role.
pub const DEFAULT_ACCESS_CONTROLLER: &str = "AccessController";

#[derive(Clone, Debug, Builder)]
pub struct UpgradeConfig {
    /// Retries of a failed chain read before the run aborts.
    #[builder(default = "3")]
    pub read_retries: u32,

    #[builder(default = "Duration::from_millis(500)")]
    pub read_retry_delay: Duration,

    /// How long to wait for the cut to be mined. Waits indefinitely when unset.
    #[builder(setter(into, strip_option), default)]
    pub confirmation_timeout: Option<Duration>,

    #[builder(setter(into), default = "DEFAULT_INITIALIZER_FACET.to_string()")]
    pub initializer_facet: String,

    #[builder(setter(into), default = "DEFAULT_DIAMOND_NAME.to_string()")]
    pub diamond_name: String,

    #[builder(setter(into), default = "DEFAULT_ACCESS_CONTROLLER.to_string()")]
    pub access_controller: String,

    /// Stop once collisions are resolved, without deploying or submitting anything.
    #[builder(default)]
    pub dry_run: bool,
}

impl UpgradeConfig {
    pub fn builder() -> UpgradeConfigBuilder {
        Default::default()
    }

    pub fn reads(&self) -> ReadPolicy {
        ReadPolicy { retries: self.read_retries, delay: self.read_retry_delay }
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            read_retries: 3,
            read_retry_delay: Duration::from_millis(500),
            confirmation_timeout: None,
            initializer_facet: DEFAULT_INITIALIZER_FACET.to_string(),
            diamond_name: DEFAULT_DIAMOND_NAME.to_string(),
            access_controller: DEFAULT_ACCESS_CONTROLLER.to_string(),
            dry_run: false,
        }
    }
}

/// Everything decided for one upgrade, up to and including the assembled cut.
#[derive(Clone, Debug)]
pub struct CutPlan {
    pub version: String,
    /// Upgraded facets in `addOrUpgrade` order, then removed facets in `remove` order.
    pub facets: Vec<FacetPlan>,
    pub interfaces: InterfaceChanges,
    pub collisions: CollisionReport,
    pub initializer: InitializerCall,
    pub batch: CutBatch,
    /// Recoverable problems, such as removals of facets that are not recorded.
    pub warnings: Vec<String>,
}

/// A confirmed cut.
#[derive(Clone, Debug)]
pub struct AppliedUpgrade {
    pub cut: CutPlan,
    pub receipt: CutReceipt,
}

/// Outcome of [Upgrader::run].
#[derive(Clone, Debug)]
pub struct UpgradeReport {
    pub dry_run: bool,
    /// Last stage completed.
    pub stage: UpgradeStage,
    pub deployed: Vec<(String, Address)>,
    pub cut: CutPlan,
    pub receipt: Option<CutReceipt>,
}

struct Progress {
    stage: Option<UpgradeStage>,
}

impl Progress {
    fn at(stage: Option<UpgradeStage>) -> Self {
        Self { stage }
    }

    fn advance(&mut self, stage: UpgradeStage) {
        tracing::info!("Upgrade stage {stage} reached");
        self.stage = Some(stage);
    }

    fn fail(&self, kind: impl Into<UpgradeErrorKind>) -> UpgradeError {
        UpgradeError::new(self.stage, kind)
    }

    fn config(&self, err: impl Into<anyhow::Error>) -> UpgradeError {
        self.fail(UpgradeErrorKind::Config(err.into()))
    }
}

/// Drives upgrades of the diamond behind `chain`, settling collisions with `policy`.
pub struct Upgrader<C, P> {
    chain: C,
    policy: P,
    config: UpgradeConfig,
}

impl<C: DiamondChain, P: CollisionPolicy> Upgrader<C, P> {
    pub fn new(chain: C, policy: P, config: UpgradeConfig) -> Self {
        Self { chain, policy, config }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    /// Run a complete upgrade against the contracts file at `registry_path`.
    ///
    /// The contracts file is rewritten only after the cut is confirmed. In a dry run the run
    /// stops after [UpgradeStage::CollisionsResolved] and nothing is deployed, submitted or
    /// written.
    pub async fn run(
        &self,
        registry_path: impl AsRef<Path>,
        plan: &UpgradePlan,
        artifacts: &ArtifactStore,
    ) -> Result<UpgradeReport, UpgradeError> {
        let registry_path = registry_path.as_ref();
        let mut progress = Progress::at(None);

        let mut registry =
            ContractsFile::load(registry_path).await.map_err(|err| progress.config(err))?;
        self.preflight(&progress, &registry, plan)?;
        let prepared = prepare_facets(artifacts, plan).map_err(|err| progress.config(err))?;
        progress.advance(UpgradeStage::Planned);

        let deployed = if self.config.dry_run {
            tracing::info!("Dry run: skipping authorization and deployment of {} facets", prepared.len());
            prepared.iter().map(|facet| facet.placeholder()).collect()
        } else {
            self.authorize(&progress, &registry).await?;
            deploy_facets(&self.chain, &prepared)
                .await
                .map_err(|err| progress.fail(UpgradeErrorKind::Submission(err)))?
        };
        progress.advance(UpgradeStage::FacetsDeployed);
        let deployed_addresses =
            deployed.iter().map(|facet| (facet.name.clone(), facet.address)).collect();

        if self.config.dry_run {
            let cut = self.plan_inner(&mut progress, &registry, plan, &deployed).await?;
            return Ok(UpgradeReport {
                dry_run: true,
                stage: UpgradeStage::CollisionsResolved,
                deployed: deployed_addresses,
                cut,
                receipt: None,
            });
        }

        let applied = self.apply_inner(&mut progress, &registry, plan, &deployed).await?;

        registry.record_upgrade(&plan.version, &applied.cut.facets, &applied.cut.collisions);
        registry
            .save(registry_path)
            .map_err(|err| progress.fail(UpgradeErrorKind::Persistence(err)))?;
        progress.advance(UpgradeStage::RegistryPersisted);

        Ok(UpgradeReport {
            dry_run: false,
            stage: UpgradeStage::RegistryPersisted,
            deployed: deployed_addresses,
            cut: applied.cut,
            receipt: Some(applied.receipt),
        })
    }

    /// Compute the cut that moves the diamond from `registry` to the state `plan` describes,
    /// given the facets already deployed for it. Reads the chain but changes nothing.
    pub async fn plan(
        &self,
        registry: &ContractsFile,
        plan: &UpgradePlan,
        deployed: &[DeployedFacet],
    ) -> Result<CutPlan, UpgradeError> {
        let mut progress = Progress::at(Some(UpgradeStage::FacetsDeployed));
        self.plan_inner(&mut progress, registry, plan, deployed).await
    }

    /// Check the signer's role, compute the cut as [Upgrader::plan] does, submit it and wait
    /// for confirmation.
    ///
    /// The contracts file is not touched; callers persist the result with
    /// [ContractsFile::record_upgrade].
    pub async fn plan_and_apply_upgrade(
        &self,
        registry: &ContractsFile,
        plan: &UpgradePlan,
        deployed: &[DeployedFacet],
    ) -> Result<AppliedUpgrade, UpgradeError> {
        let mut progress = Progress::at(Some(UpgradeStage::FacetsDeployed));
        self.authorize(&progress, registry).await?;
        self.apply_inner(&mut progress, registry, plan, deployed).await
    }

    /// Fail unless the signer holds the upgrader role on the recorded access controller.
    async fn authorize(
        &self,
        progress: &Progress,
        registry: &ContractsFile,
    ) -> Result<(), UpgradeError> {
        let access_controller = registry
            .require(&self.config.access_controller)
            .map_err(|err| progress.config(err))?
            .address;
        ensure_upgrader(&self.chain, &self.config.reads(), access_controller)
            .await
            .map_err(|kind| progress.fail(kind))?;
        Ok(())
    }

    /// Checks that need neither artifacts nor the chain.
    fn preflight(
        &self,
        progress: &Progress,
        registry: &ContractsFile,
        plan: &UpgradePlan,
    ) -> Result<(), UpgradeError> {
        plan.validate(&self.config.initializer_facet).map_err(|err| progress.fail(err))?;

        if registry.protocol_version == plan.version {
            return Err(progress.config(anyhow!(
                "the diamond is already at version {}",
                registry.protocol_version
            )));
        }
        match registry.find(&self.config.diamond_name) {
            Some(record) if record.address != self.chain.diamond() => {
                return Err(progress.config(anyhow!(
                    "contracts file records {} at {}, but the upgrade targets {}",
                    self.config.diamond_name,
                    record.address,
                    self.chain.diamond()
                )));
            }
            Some(_) => {}
            None => tracing::warn!(
                "{} is not recorded in the contracts file; cannot cross-check the diamond address",
                self.config.diamond_name
            ),
        }
        let initializer = &self.config.initializer_facet;
        if plan.upgrade_index(initializer).is_none() && registry.find(initializer).is_none() {
            return Err(progress.config(anyhow!(
                "{initializer} is neither recorded nor part of the upgrade"
            )));
        }
        for name in &plan.remove {
            if let Some(record) = registry.find(name) {
                if !record.is_facet() {
                    return Err(progress.config(anyhow!("{name} is not a facet and cannot be removed")));
                }
            }
        }
        Ok(())
    }

    async fn plan_inner(
        &self,
        progress: &mut Progress,
        registry: &ContractsFile,
        plan: &UpgradePlan,
        deployed: &[DeployedFacet],
    ) -> Result<CutPlan, UpgradeError> {
        self.preflight(progress, registry, plan)?;
        let reads = self.config.reads();
        let mut warnings = Vec::new();

        let mut by_name: BTreeMap<&str, &DeployedFacet> = BTreeMap::new();
        for facet in deployed {
            if plan.upgrade_index(&facet.name).is_none() {
                return Err(progress.config(anyhow!("{} was deployed but is not part of the plan", facet.name)));
            }
            by_name.insert(facet.name.as_str(), facet);
        }
        let mut upgrades = Vec::with_capacity(plan.add_or_upgrade.len());
        for name in &plan.add_or_upgrade {
            let facet = by_name
                .get(name.as_str())
                .copied()
                .ok_or_else(|| progress.config(anyhow!("no deployment supplied for {name}")))?;
            upgrades.push(facet);
        }

        let mut removals = Vec::new();
        for name in &plan.remove {
            match registry.find(name) {
                Some(record) => removals.push(record),
                None => {
                    let warning = format!("{name} is not recorded; skipping its removal");
                    tracing::warn!("{}", UpgradeErrorKind::Precondition(warning.clone()));
                    warnings.push(warning);
                }
            }
        }

        let old_address = |name: &str| registry.find(name).filter(|r| r.is_facet()).map(|r| r.address);
        let targets: Vec<(String, Option<Address>)> = upgrades
            .iter()
            .map(|facet| (facet.name.clone(), old_address(&facet.name)))
            .chain(removals.iter().map(|record| (record.name.clone(), Some(record.address))))
            .collect();
        let mut snapshots = snapshot_facets(&self.chain, &reads, &targets)
            .await
            .map_err(|err| progress.fail(UpgradeErrorKind::ChainCall(err)))?;

        let mut facets = Vec::with_capacity(targets.len());
        for facet in &upgrades {
            let old = snapshots.remove(&facet.name).unwrap_or_default();
            let skip = plan.skip_set(&facet.name).map_err(|err| progress.fail(err))?;
            let record = registry.find(&facet.name);
            facets.push(FacetPlan {
                name: facet.name.clone(),
                change: FacetChange::Upgrade { new_address: facet.address },
                old_address: old_address(&facet.name),
                old_interface_id: record.and_then(|r| r.interface_id),
                new_interface_id: facet.interface_id,
                diff: diff_selectors(&old, &facet.selectors.selectors, &skip),
                selectors: facet.selectors.clone(),
            });
        }
        for record in &removals {
            let old = snapshots.remove(&record.name).unwrap_or_default();
            let skip = plan.skip_set(&record.name).map_err(|err| progress.fail(err))?;
            facets.push(FacetPlan {
                name: record.name.clone(),
                change: FacetChange::Remove,
                old_address: Some(record.address),
                old_interface_id: record.interface_id,
                new_interface_id: None,
                diff: removal_diff(&old, &skip),
                selectors: Default::default(),
            });
        }
        progress.advance(UpgradeStage::DiffComputed);

        let candidates: Vec<_> =
            facets.iter().flat_map(|facet| facet.diff.to_add.iter().copied()).collect();
        let owners = selector_owners(&self.chain, &reads, candidates)
            .await
            .map_err(|err| progress.fail(UpgradeErrorKind::ChainCall(err)))?;
        let collisions = resolve_collisions(
            &mut facets,
            &owners,
            |address| registry.name_of(address).map(str::to_string),
            &self.policy,
        )
        .map_err(|err| progress.fail(err))?;

        for facet in &facets {
            tracing::info!("Planned {facet}");
        }

        let interfaces =
            self.interface_changes(progress, registry, plan, &facets, &collisions).await?;

        let init_address = match by_name.get(self.config.initializer_facet.as_str()) {
            Some(facet) => facet.address,
            None => registry.require(&self.config.initializer_facet).map_err(|err| progress.config(err))?.address,
        };
        let (addresses, calldata): (Vec<Address>, Vec<Bytes>) = upgrades
            .iter()
            .filter_map(|facet| facet.init_calldata.clone().map(|data| (facet.address, data)))
            .unzip();
        let initializer = InitializerCall {
            version: plan.version.clone(),
            addresses,
            calldata,
            initialization_data: plan.initialization_data.clone(),
            interfaces: interfaces.clone(),
        };
        let init_calldata: Bytes = initializer.encode().map_err(|err| progress.config(err))?;
        let batch =
            CutBatch::build(&facets, init_address, init_calldata).map_err(|err| progress.fail(err))?;
        if batch.entries.is_empty() {
            tracing::warn!("The cut changes no selectors; only the initializer will run");
        }
        progress.advance(UpgradeStage::CollisionsResolved);

        Ok(CutPlan {
            version: plan.version.clone(),
            facets,
            interfaces,
            collisions,
            initializer,
            batch,
            warnings,
        })
    }

    /// Interface IDs to add and remove, settled against the registry as it will look after
    /// the upgrade.
    async fn interface_changes(
        &self,
        progress: &Progress,
        registry: &ContractsFile,
        plan: &UpgradePlan,
        facets: &[FacetPlan],
        collisions: &CollisionReport,
    ) -> Result<InterfaceChanges, UpgradeError> {
        let reads = self.config.reads();
        let mut changes = InterfaceChanges::default();

        for facet in facets {
            if let Some(retired) = facet.retired_interface() {
                changes.schedule_remove(retired);
            }
            let Some(id) = facet.new_interface_id else { continue };
            if facet.old_interface_id == Some(id) || facet.diff.registered().is_empty() {
                continue;
            }
            let supported = reads
                .read(&format!("supportsInterface({})", format_bytes4(&id)), || {
                    self.chain.supports_interface(id)
                })
                .await
                .map_err(|err| progress.fail(UpgradeErrorKind::ChainCall(err)))?;
            if supported {
                tracing::debug!("Interface {} of {} is already supported", format_bytes4(&id), facet.name);
            } else {
                changes.schedule_add(id);
            }
        }

        let mut after = registry.clone();
        after.record_upgrade(&plan.version, facets, collisions);
        let changes = changes.settle(|id| after.interface_claimed(id));
        for id in &changes.to_add {
            tracing::info!("Interface {} will be added", format_bytes4(id));
        }
        for id in &changes.to_remove {
            tracing::info!("Interface {} will be removed", format_bytes4(id));
        }
        Ok(changes)
    }

    async fn apply_inner(
        &self,
        progress: &mut Progress,
        registry: &ContractsFile,
        plan: &UpgradePlan,
        deployed: &[DeployedFacet],
    ) -> Result<AppliedUpgrade, UpgradeError> {
        let cut = self.plan_inner(progress, registry, plan, deployed).await?;

        tracing::info!(
            "Submitting cut with {} entries ({} selectors) to {}",
            cut.batch.entries.len(),
            cut.batch.selector_count(),
            self.chain.diamond()
        );
        let tx_hash = self
            .chain
            .send_cut(cut.batch.facet_cuts(), cut.batch.init_address, cut.batch.init_calldata.clone())
            .await
            .map_err(|err| progress.fail(UpgradeErrorKind::Submission(err)))?;
        progress.advance(UpgradeStage::CutSubmitted);
        tracing::info!(%tx_hash, "Cut submitted");

        let receipt = self
            .chain
            .wait_for_cut(tx_hash, self.config.confirmation_timeout)
            .await
            .map_err(|err| {
                progress.fail(UpgradeErrorKind::Submission(err.context(format!(
                    "cut {tx_hash} was submitted; inspect the diamond before retrying"
                ))))
            })?;
        if !receipt.success {
            let reason = receipt.revert_reason.as_deref().unwrap_or("no revert reason available");
            return Err(progress.fail(UpgradeErrorKind::Submission(anyhow!(
                "cut transaction {tx_hash} reverted: {reason}"
            ))));
        }
        progress.advance(UpgradeStage::Confirmed);
        tracing::info!(%tx_hash, block = ?receipt.block_number, "Cut confirmed");

        Ok(AppliedUpgrade { cut, receipt })
    }
}

impl fmt::Display for UpgradeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(f, "Upgrade to {}{mode}: reached {}", self.cut.version, self.stage)?;
        for (name, address) in &self.deployed {
            if self.dry_run {
                writeln!(f, "would deploy {name}")?;
            } else {
                writeln!(f, "deployed {name} at {address}")?;
            }
        }
        for facet in &self.cut.facets {
            write!(f, "{facet}")?;
        }
        for handoff in &self.cut.collisions.handoffs {
            writeln!(
                f,
                "selector {} moves from {} to {}",
                format_bytes4(&handoff.selector),
                handoff.from,
                handoff.to
            )?;
        }
        for (collision, resolution) in &self.cut.collisions.resolved {
            writeln!(f, "collision: {collision}: {resolution}")?;
        }
        for id in &self.cut.interfaces.to_add {
            writeln!(f, "interface added: {}", format_bytes4(id))?;
        }
        for id in &self.cut.interfaces.to_remove {
            writeln!(f, "interface removed: {}", format_bytes4(id))?;
        }
        for warning in &self.cut.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        writeln!(f, "{}", self.cut.batch)?;
        if let Some(receipt) = &self.receipt {
            write!(f, "tx {}", receipt.tx_hash)?;
            if let Some(block) = receipt.block_number {
                write!(f, " in block {block}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

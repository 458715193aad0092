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

use std::fmt;

use thiserror::Error;

use crate::{collision::CollisionError, plan::PlanError};

/// Stages of one upgrade run, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpgradeStage {
    Planned,
    FacetsDeployed,
    DiffComputed,
    CollisionsResolved,
    CutSubmitted,
    Confirmed,
    RegistryPersisted,
}

impl UpgradeStage {
    /// True once the cut may have been applied on chain.
    pub fn chain_state_changed(&self) -> bool {
        *self >= UpgradeStage::CutSubmitted
    }
}

impl fmt::Display for UpgradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpgradeStage::Planned => "PLANNED",
            UpgradeStage::FacetsDeployed => "FACETS_DEPLOYED",
            UpgradeStage::DiffComputed => "DIFF_COMPUTED",
            UpgradeStage::CollisionsResolved => "COLLISIONS_RESOLVED",
            UpgradeStage::CutSubmitted => "CUT_SUBMITTED",
            UpgradeStage::Confirmed => "CONFIRMED",
            UpgradeStage::RegistryPersisted => "REGISTRY_PERSISTED",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum UpgradeErrorKind {
    #[error("invalid upgrade configuration: {0:#}")]
    Config(anyhow::Error),

    #[error("{account} is not authorized to upgrade: {reason}")]
    Authorization { account: String, reason: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error(transparent)]
    Collision(#[from] CollisionError),

    #[error("chain read failed: {0:#}")]
    ChainCall(anyhow::Error),

    #[error("cut submission failed: {0:#}")]
    Submission(anyhow::Error),

    #[error(
        "failed to persist the contracts file: {0:#}; the cut is applied on chain, manual registry reconciliation is required"
    )]
    Persistence(anyhow::Error),
}

impl From<PlanError> for UpgradeErrorKind {
    fn from(err: PlanError) -> Self {
        UpgradeErrorKind::Config(err.into())
    }
}

/// An aborted upgrade, tagged with the last stage that completed before the failure.
///
/// `stage` is `None` when the run failed before the plan was accepted.
#[derive(Error, Debug)]
pub struct UpgradeError {
    pub stage: Option<UpgradeStage>,
    pub kind: UpgradeErrorKind,
}

impl UpgradeError {
    pub fn new(stage: Option<UpgradeStage>, kind: impl Into<UpgradeErrorKind>) -> Self {
        Self { stage, kind: kind.into() }
    }

    /// True if on-chain state may have changed before the failure.
    pub fn chain_state_changed(&self) -> bool {
        self.stage.is_some_and(|stage| stage.chain_state_changed())
    }
}

impl fmt::Display for UpgradeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "upgrade aborted after {stage}")?,
            None => write!(f, "upgrade aborted before PLANNED")?,
        }
        if self.chain_state_changed() {
            write!(f, " (on-chain state may have changed): ")?;
        } else {
            write!(f, " (no on-chain state changed): ")?;
        }
        write!(f, "{}", self.kind)
    }
}

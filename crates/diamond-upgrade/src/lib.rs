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

//! Planning and execution of facet upgrades on a diamond proxy.
//!
//! The [Upgrader] computes, for a new protocol version, the selector additions, replacements
//! and removals that take the live diamond to its target configuration, and applies them in
//! one atomic diamond cut.

pub mod access;
pub mod artifacts;
pub mod chain;
pub mod collision;
pub mod contracts;
pub mod cut;
pub mod deploy;
pub mod deployments;
pub mod diff;
pub mod error;
pub mod interfaces;
pub mod loupe;
pub mod plan;
pub mod registry;
pub mod selectors;
pub mod upgrade;

pub use chain::{DiamondChain, RpcDiamond};
pub use collision::{CollisionPolicy, FailOnCollision, PreResolved, Resolution, ResolveAll};
pub use error::{UpgradeError, UpgradeErrorKind, UpgradeStage};
pub use plan::UpgradePlan;
pub use registry::ContractsFile;
pub use upgrade::{UpgradeConfig, UpgradeReport, Upgrader};

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

use std::{collections::BTreeMap, time::Duration};

use alloy::{json_abi::JsonAbi, primitives::Address, sol_types::SolCall};
use diamond_test_utils::{
    fixtures::{selectors_of, INITIALIZER_ADDRESS, TEST_CHAIN_ID},
    test_ctx, TestCtx,
};
use diamond_upgrade::{
    chain::ReadPolicy,
    contracts::IProtocolInitializationHandler,
    cut::{CutAction, CutEntry},
    deploy::{deploy_facets, prepare_facets},
    deployments::Deployment,
    loupe::{drift, live_facets},
    plan::{FacetInit, InterfaceSource},
    selectors::{interface_id, selector_of, InterfaceId, SelectorSet},
    ContractsFile, FailOnCollision, PreResolved, Resolution, ResolveAll, UpgradeConfig,
    UpgradeErrorKind, UpgradePlan, UpgradeStage, Upgrader,
};

const OLD_OFFER: Address = Address::repeat_byte(0x0f);
const OLD_PAUSE: Address = Address::repeat_byte(0x0e);
const UNRELATED: Address = Address::repeat_byte(0xee);

const OFFER_V1: &[&str] = &["function createOffer(uint256 price)", "function voidOffer(uint256 id)"];
const OFFER_V2: &[&str] =
    &["function voidOffer(uint256 id)", "function extendOffer(uint256 id, uint256 validUntil)"];
const PAUSE: &[&str] = &["function pause()", "function unpause()"];

fn config() -> UpgradeConfig {
    UpgradeConfig::builder().read_retry_delay(Duration::from_millis(1)).build().unwrap()
}

fn plan(add_or_upgrade: &[&str], remove: &[&str]) -> UpgradePlan {
    UpgradePlan {
        version: "2.4.0".into(),
        add_or_upgrade: add_or_upgrade.iter().map(|s| s.to_string()).collect(),
        remove: remove.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn abi_interface_id(items: &[&str]) -> InterfaceId {
    interface_id(&JsonAbi::parse(items.iter().copied()).unwrap(), &[])
}

/// Context with OfferHandlerFacet v1 installed and its v2 artifact available.
fn offer_ctx() -> anyhow::Result<TestCtx> {
    let mut ctx = test_ctx()?;
    ctx.install_facet("OfferHandlerFacet", OLD_OFFER, OFFER_V1, Some(abi_interface_id(OFFER_V1)))?;
    ctx.artifacts.add("OfferHandlerFacet", OFFER_V2)?;
    Ok(ctx)
}

fn on_disk(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn test_upgrade_replaces_removes_and_adds() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let report = upgrader.run(&ctx.registry_path, &plan(&["OfferHandlerFacet"], &[]), &store).await?;

    assert_eq!(report.stage, UpgradeStage::RegistryPersisted);
    let new_offer = report.deployed[0].1;
    let (create, void, extend) = (
        selector_of("createOffer(uint256)"),
        selector_of("voidOffer(uint256)"),
        selector_of("extendOffer(uint256,uint256)"),
    );
    assert_eq!(
        report.cut.batch.entries,
        vec![
            CutEntry { facet_address: new_offer, action: CutAction::Add, selectors: vec![extend] },
            CutEntry { facet_address: new_offer, action: CutAction::Replace, selectors: vec![void] },
            CutEntry { facet_address: Address::ZERO, action: CutAction::Remove, selectors: vec![create] },
        ]
    );

    let diamond = upgrader.chain();
    assert_eq!(diamond.owner_of(void), Some(new_offer));
    assert_eq!(diamond.owner_of(extend), Some(new_offer));
    assert_eq!(diamond.owner_of(create), None);
    assert_eq!(diamond.version().as_deref(), Some("2.4.0"));
    assert_eq!(diamond.recorded_cuts()[0].init, INITIALIZER_ADDRESS);

    let registry = ContractsFile::load(&ctx.registry_path).await?;
    assert_eq!(registry.protocol_version, "2.4.0");
    let record = registry.require("OfferHandlerFacet")?;
    assert_eq!(record.address, new_offer);
    assert_eq!(record.selectors, Some(SelectorSet::from(vec![void, extend])));

    Ok(())
}

#[tokio::test]
async fn test_facet_removal_uses_zero_address() -> anyhow::Result<()> {
    let mut ctx = test_ctx()?;
    let pause = ctx.install_facet("PauseHandlerFacet", OLD_PAUSE, PAUSE, None)?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let report = upgrader.run(&ctx.registry_path, &plan(&[], &["PauseHandlerFacet"]), &store).await?;

    assert_eq!(
        report.cut.batch.entries,
        vec![CutEntry {
            facet_address: Address::ZERO,
            action: CutAction::Remove,
            selectors: vec![selector_of("pause()"), selector_of("unpause()")],
        }]
    );
    assert!(pause.iter().all(|s| upgrader.chain().owner_of(*s).is_none()));
    let registry = ContractsFile::load(&ctx.registry_path).await?;
    assert!(registry.find("PauseHandlerFacet").is_none());
    Ok(())
}

#[tokio::test]
async fn test_removing_unrecorded_facet_is_skipped_with_warning() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let report = upgrader
        .run(&ctx.registry_path, &plan(&["OfferHandlerFacet"], &["GhostFacet"]), &store)
        .await?;

    assert_eq!(report.stage, UpgradeStage::RegistryPersisted);
    assert_eq!(report.cut.warnings, vec!["GhostFacet is not recorded; skipping its removal"]);
    Ok(())
}

#[tokio::test]
async fn test_interface_bookkeeping() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    ctx.artifacts.add("IOfferHandler", OFFER_V2)?;
    let old_id = abi_interface_id(OFFER_V1);
    let new_id = abi_interface_id(OFFER_V2);
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let mut plan = plan(&["OfferHandlerFacet"], &[]);
    plan.interfaces.insert(
        "OfferHandlerFacet".into(),
        InterfaceSource { artifact: "IOfferHandler".into(), inherits: vec![] },
    );
    let report = upgrader.run(&ctx.registry_path, &plan, &store).await?;

    assert_eq!(report.cut.interfaces.to_remove, vec![old_id]);
    assert_eq!(report.cut.interfaces.to_add, vec![new_id]);
    assert!(!upgrader.chain().supports(old_id));
    assert!(upgrader.chain().supports(new_id));
    let registry = ContractsFile::load(&ctx.registry_path).await?;
    assert_eq!(registry.require("OfferHandlerFacet")?.interface_id, Some(new_id));
    Ok(())
}

#[tokio::test]
async fn test_carried_over_interface_is_left_alone() -> anyhow::Result<()> {
    let mut ctx = test_ctx()?;
    // The interface only covers voidOffer, which both versions keep.
    let shared_items = &["function voidOffer(uint256 id)"];
    let id = abi_interface_id(shared_items);
    ctx.install_facet("OfferHandlerFacet", OLD_OFFER, OFFER_V1, Some(id))?;
    ctx.artifacts.add("OfferHandlerFacet", OFFER_V2)?;
    ctx.artifacts.add("IOfferHandler", shared_items)?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let mut plan = plan(&["OfferHandlerFacet"], &[]);
    plan.interfaces.insert(
        "OfferHandlerFacet".into(),
        InterfaceSource { artifact: "IOfferHandler".into(), inherits: vec![] },
    );
    let report = upgrader.run(&ctx.registry_path, &plan, &store).await?;

    assert!(report.cut.facets[0].diff.changes_selectors());
    assert!(report.cut.interfaces.is_empty());
    assert!(upgrader.chain().supports(id));
    Ok(())
}

#[tokio::test]
async fn test_shared_interface_survives_until_last_facet_is_removed() -> anyhow::Result<()> {
    let mut ctx = test_ctx()?;
    let shared = InterfaceId::from([0x5a, 0x5a, 0x5a, 0x5a]);
    ctx.install_facet("PauseHandlerFacet", OLD_PAUSE, PAUSE, Some(shared))?;
    ctx.install_facet("OfferHandlerFacet", OLD_OFFER, OFFER_V1, Some(shared))?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let report = upgrader.run(&ctx.registry_path, &plan(&[], &["PauseHandlerFacet"]), &store).await?;

    assert!(report.cut.interfaces.to_remove.is_empty());
    assert!(upgrader.chain().supports(shared));
    Ok(())
}

#[tokio::test]
async fn test_collision_without_policy_aborts_before_submission() -> anyhow::Result<()> {
    let ctx = test_ctx()?;
    ctx.artifacts.add("FundsHandlerFacet", &["function withdraw(uint256 amount)", "function deposit()"])?;
    ctx.diamond.register_facet(UNRELATED, [selector_of("withdraw(uint256)")]);
    let before = ctx.registry_on_disk()?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let err = upgrader
        .run(&ctx.registry_path, &plan(&["FundsHandlerFacet"], &[]), &store)
        .await
        .unwrap_err();

    assert!(matches!(err.kind, UpgradeErrorKind::Collision(_)), "{err}");
    assert_eq!(err.stage, Some(UpgradeStage::DiffComputed));
    assert!(!err.chain_state_changed());
    assert!(upgrader.chain().recorded_cuts().is_empty());
    assert_eq!(upgrader.chain().owner_of(selector_of("withdraw(uint256)")), Some(UNRELATED));
    assert_eq!(on_disk(&ctx.registry_path), before);
    Ok(())
}

#[tokio::test]
async fn test_collision_resolved_by_replace() -> anyhow::Result<()> {
    let ctx = test_ctx()?;
    ctx.artifacts.add("FundsHandlerFacet", &["function withdraw(uint256 amount)", "function deposit()"])?;
    ctx.diamond.register_facet(UNRELATED, [selector_of("withdraw(uint256)")]);
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, ResolveAll(Resolution::Replace), config());

    let report = upgrader.run(&ctx.registry_path, &plan(&["FundsHandlerFacet"], &[]), &store).await?;

    let funds = report.deployed[0].1;
    let withdraw = selector_of("withdraw(uint256)");
    let diff = &report.cut.facets[0].diff;
    assert!(!diff.to_add.contains(&withdraw));
    assert!(diff.to_replace.contains(&withdraw));
    assert_eq!(report.cut.collisions.resolved.len(), 1);
    assert_eq!(upgrader.chain().owner_of(withdraw), Some(funds));
    Ok(())
}

#[tokio::test]
async fn test_replaced_collision_updates_previous_owner_record() -> anyhow::Result<()> {
    let mut ctx = test_ctx()?;
    let other = &["function withdraw(uint256 amount)", "function balance()"];
    ctx.install_facet("OtherFacet", UNRELATED, other, None)?;
    ctx.artifacts.add("FundsHandlerFacet", &["function withdraw(uint256 amount)", "function deposit()"])?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, ResolveAll(Resolution::Replace), config());

    upgrader.run(&ctx.registry_path, &plan(&["FundsHandlerFacet"], &[]), &store).await?;

    let registry = ContractsFile::load(&ctx.registry_path).await?;
    let other = registry.require("OtherFacet")?;
    assert_eq!(other.selectors, Some(SelectorSet::from(vec![selector_of("balance()")])));

    let live = live_facets(upgrader.chain(), &ReadPolicy::default()).await?;
    let drift = drift(&registry, &live);
    assert!(drift.is_empty(), "{drift}");
    Ok(())
}

#[tokio::test]
async fn test_collision_pre_resolved_as_skip() -> anyhow::Result<()> {
    let ctx = test_ctx()?;
    ctx.artifacts.add("FundsHandlerFacet", &["function withdraw(uint256 amount)", "function deposit()"])?;
    ctx.diamond.register_facet(UNRELATED, [selector_of("withdraw(uint256)")]);
    let store = ctx.artifacts.store();

    let mut plan = plan(&["FundsHandlerFacet"], &[]);
    plan.collisions.insert("withdraw(uint256)".into(), Resolution::Skip);
    let policy = PreResolved::new(plan.collision_decisions()?);
    let upgrader = Upgrader::new(ctx.diamond, policy, config());

    let report = upgrader.run(&ctx.registry_path, &plan, &store).await?;

    let withdraw = selector_of("withdraw(uint256)");
    assert!(report.cut.facets[0].diff.skipped.contains(&withdraw));
    assert_eq!(upgrader.chain().owner_of(withdraw), Some(UNRELATED));
    let registry = ContractsFile::load(&ctx.registry_path).await?;
    assert_eq!(
        registry.require("FundsHandlerFacet")?.selectors,
        Some(SelectorSet::from(vec![selector_of("deposit()")]))
    );
    Ok(())
}

// A selector of a facet removed in the same plan is vacated by that removal, so taking it over
// is treated as a hand-off and not as a collision.
#[tokio::test]
async fn test_selector_of_removed_facet_is_handed_off() -> anyhow::Result<()> {
    let mut ctx = test_ctx()?;
    ctx.install_facet("PauseHandlerFacet", OLD_PAUSE, PAUSE, None)?;
    ctx.artifacts.add("EmergencyHandlerFacet", &["function pause()", "function halt()"])?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let report = upgrader
        .run(&ctx.registry_path, &plan(&["EmergencyHandlerFacet"], &["PauseHandlerFacet"]), &store)
        .await?;

    let emergency = report.deployed[0].1;
    assert_eq!(report.cut.collisions.handoffs.len(), 1);
    assert!(report.cut.collisions.resolved.is_empty());
    assert_eq!(upgrader.chain().owner_of(selector_of("pause()")), Some(emergency));
    assert_eq!(upgrader.chain().owner_of(selector_of("halt()")), Some(emergency));
    assert_eq!(upgrader.chain().owner_of(selector_of("unpause()")), None);
    Ok(())
}

#[tokio::test]
async fn test_rejected_cut_leaves_contracts_file_untouched() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    ctx.diamond.fail_next_cut("execution reverted");
    let before = ctx.registry_on_disk()?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let err = upgrader
        .run(&ctx.registry_path, &plan(&["OfferHandlerFacet"], &[]), &store)
        .await
        .unwrap_err();

    assert!(matches!(err.kind, UpgradeErrorKind::Submission(_)), "{err}");
    assert_eq!(err.stage, Some(UpgradeStage::CollisionsResolved));
    assert_eq!(upgrader.chain().deployment_count(), 1);
    assert_eq!(upgrader.chain().owner_of(selector_of("createOffer(uint256)")), Some(OLD_OFFER));
    assert_eq!(on_disk(&ctx.registry_path), before);
    Ok(())
}

#[tokio::test]
async fn test_reverted_cut_leaves_contracts_file_untouched() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    ctx.diamond.revert_next_cut(Some("InitializationFailed"));
    let before = ctx.registry_on_disk()?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let err = upgrader
        .run(&ctx.registry_path, &plan(&["OfferHandlerFacet"], &[]), &store)
        .await
        .unwrap_err();

    assert!(matches!(err.kind, UpgradeErrorKind::Submission(_)), "{err}");
    assert_eq!(err.stage, Some(UpgradeStage::CutSubmitted));
    assert!(format!("{err:#}").contains("reverted: InitializationFailed"), "{err:#}");
    assert_eq!(on_disk(&ctx.registry_path), before);
    Ok(())
}

#[tokio::test]
async fn test_reverted_cut_without_reason_says_so() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    ctx.diamond.revert_next_cut(None);
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let err = upgrader
        .run(&ctx.registry_path, &plan(&["OfferHandlerFacet"], &[]), &store)
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("no revert reason available"), "{err:#}");
    Ok(())
}

#[tokio::test]
async fn test_unauthorized_signer_is_rejected_before_deploying() -> anyhow::Result<()> {
    let mut ctx = offer_ctx()?;
    let mut controller = ctx.registry.require("AccessController")?.clone();
    controller.address = Address::repeat_byte(0xbd);
    ctx.registry.upsert(controller);
    ctx.save_registry()?;
    let before = ctx.registry_on_disk()?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let err = upgrader
        .run(&ctx.registry_path, &plan(&["OfferHandlerFacet"], &[]), &store)
        .await
        .unwrap_err();

    assert!(matches!(err.kind, UpgradeErrorKind::Authorization { .. }), "{err}");
    assert_eq!(err.stage, Some(UpgradeStage::Planned));
    assert_eq!(upgrader.chain().deployment_count(), 0);
    assert_eq!(on_disk(&ctx.registry_path), before);
    Ok(())
}

#[tokio::test]
async fn test_plan_and_apply_rejects_unauthorized_signer() -> anyhow::Result<()> {
    let mut ctx = offer_ctx()?;
    let mut controller = ctx.registry.require("AccessController")?.clone();
    controller.address = Address::repeat_byte(0xbd);
    ctx.registry.upsert(controller);
    let store = ctx.artifacts.store();
    let plan = plan(&["OfferHandlerFacet"], &[]);
    let deployed = deploy_facets(&ctx.diamond, &prepare_facets(&store, &plan)?).await?;
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let err = upgrader.plan_and_apply_upgrade(&ctx.registry, &plan, &deployed).await.unwrap_err();

    assert!(matches!(err.kind, UpgradeErrorKind::Authorization { .. }), "{err}");
    assert_eq!(err.stage, Some(UpgradeStage::FacetsDeployed));
    assert!(upgrader.chain().recorded_cuts().is_empty());
    assert_eq!(upgrader.chain().owner_of(selector_of("createOffer(uint256)")), Some(OLD_OFFER));
    Ok(())
}

#[tokio::test]
async fn test_reads_are_retried() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    ctx.diamond.fail_reads(2);
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let report = upgrader.run(&ctx.registry_path, &plan(&["OfferHandlerFacet"], &[]), &store).await?;
    assert_eq!(report.stage, UpgradeStage::RegistryPersisted);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_read_retries_abort() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    ctx.diamond.fail_reads(10);
    let store = ctx.artifacts.store();
    let config = UpgradeConfig::builder()
        .read_retries(1u32)
        .read_retry_delay(Duration::from_millis(1))
        .build()?;
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config);

    let err = upgrader
        .run(&ctx.registry_path, &plan(&["OfferHandlerFacet"], &[]), &store)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, UpgradeErrorKind::ChainCall(_)), "{err}");
    assert!(!err.chain_state_changed());
    Ok(())
}

#[tokio::test]
async fn test_dry_run_changes_nothing() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    let before = ctx.registry_on_disk()?;
    let store = ctx.artifacts.store();
    let config = UpgradeConfig::builder()
        .dry_run(true)
        .read_retry_delay(Duration::from_millis(1))
        .build()?;
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config);

    let report = upgrader.run(&ctx.registry_path, &plan(&["OfferHandlerFacet"], &[]), &store).await?;

    assert!(report.dry_run);
    assert_eq!(report.stage, UpgradeStage::CollisionsResolved);
    assert_eq!(report.cut.batch.entries.len(), 3);
    assert_eq!(upgrader.chain().deployment_count(), 0);
    assert!(upgrader.chain().recorded_cuts().is_empty());
    assert_eq!(on_disk(&ctx.registry_path), before);
    assert!(report.to_string().contains("would deploy OfferHandlerFacet"));
    Ok(())
}

#[tokio::test]
async fn test_same_version_is_a_config_error() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let mut plan = plan(&["OfferHandlerFacet"], &[]);
    plan.version = "2.3.0".into();
    let err = upgrader.run(&ctx.registry_path, &plan, &store).await.unwrap_err();
    assert!(matches!(err.kind, UpgradeErrorKind::Config(_)), "{err}");
    assert_eq!(err.stage, None);
    assert_eq!(upgrader.chain().deployment_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_facet_initializer_is_excluded_and_called() -> anyhow::Result<()> {
    let ctx = test_ctx()?;
    ctx.artifacts.add(
        "ConfigHandlerFacet",
        &["function initialize(uint256 limit)", "function setLimit(uint256 limit)"],
    )?;
    let store = ctx.artifacts.store();
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let mut plan = plan(&["ConfigHandlerFacet"], &[]);
    plan.facets_to_init.insert(
        "ConfigHandlerFacet".into(),
        FacetInit { init: vec![serde_json::json!(5)], signature: None },
    );
    let report = upgrader.run(&ctx.registry_path, &plan, &store).await?;

    let facet = report.deployed[0].1;
    let diamond = upgrader.chain();
    assert_eq!(diamond.owner_of(selector_of("setLimit(uint256)")), Some(facet));
    assert_eq!(diamond.owner_of(selector_of("initialize(uint256)")), None);

    let cut = &diamond.recorded_cuts()[0];
    let call = IProtocolInitializationHandler::initializeCall::abi_decode(&cut.calldata)?;
    assert_eq!(call._addresses, vec![facet]);
    assert_eq!(&call._calldata[0][..4], selector_of("initialize(uint256)").as_slice());
    assert!(call._isUpgrade);
    Ok(())
}

#[tokio::test]
async fn test_planning_is_deterministic() -> anyhow::Result<()> {
    let ctx = offer_ctx()?;
    ctx.artifacts.add("PauseHandlerFacet", PAUSE)?;
    let store = ctx.artifacts.store();
    let registry = ContractsFile::load(&ctx.registry_path).await?;
    let plan = plan(&["OfferHandlerFacet", "PauseHandlerFacet"], &[]);

    let prepared = prepare_facets(&store, &plan)?;
    let deployed = deploy_facets(&ctx.diamond, &prepared).await?;
    let upgrader = Upgrader::new(ctx.diamond, FailOnCollision, config());

    let first = upgrader.plan(&registry, &plan, &deployed).await?;
    let second = upgrader.plan(&registry, &plan, &deployed).await?;
    assert_eq!(first.batch.calldata(), second.batch.calldata());

    let expected: BTreeMap<_, _> = [("OfferHandlerFacet", 3usize), ("PauseHandlerFacet", 2)].into();
    for facet in &first.facets {
        let touched = facet.diff.to_add.len() + facet.diff.to_replace.len() + facet.diff.to_remove.len();
        assert_eq!(touched, expected[facet.name.as_str()]);
    }
    assert!(selectors_of(PAUSE)?.iter().all(|s| first.facets[1].diff.to_add.contains(s)));

    let applied = upgrader.plan_and_apply_upgrade(&registry, &plan, &deployed).await?;
    assert!(applied.receipt.success);
    assert_eq!(applied.cut.batch, first.batch);
    Ok(())
}

#[tokio::test]
async fn test_deployment_locates_contracts_file() -> anyhow::Result<()> {
    let ctx = test_ctx()?;
    let deployment = Deployment::builder().addresses_dir(ctx.addresses_dir()).build()?;

    let path = deployment.contracts_file(deployment.resolve_chain_id(TEST_CHAIN_ID)?);
    assert_eq!(path, ctx.registry_path);
    assert_eq!(ContractsFile::load(&path).await?, ctx.registry);
    Ok(())
}

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

//! Integration tests for the `upgrade-facets` command that fail before reaching the chain.

use assert_cmd::Command;
use predicates::str::contains;

const PLAN: &str = r#"{"version": "2.4.0", "addOrUpgrade": ["OfferHandlerFacet"]}"#;

#[test]
fn test_upgrade_requires_private_key() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let plan = dir.path().join("plan.json");
    std::fs::write(&plan, PLAN)?;

    let mut cmd = Command::cargo_bin("diamond")?;
    cmd.arg("upgrade-facets")
        .arg("--plan")
        .arg(&plan)
        .env("RPC_URL", "http://127.0.0.1:1")
        .env_remove("PRIVATE_KEY")
        .env("NO_COLOR", "1")
        .assert()
        .failure()
        .stderr(contains("Private key not provided"));

    Ok(())
}

#[test]
fn test_upgrade_rejects_invalid_plan() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let plan = dir.path().join("plan.json");
    std::fs::write(&plan, r#"{"version": "2.4.0"}"#)?;

    let mut cmd = Command::cargo_bin("diamond")?;
    cmd.arg("upgrade-facets")
        .arg("--plan")
        .arg(&plan)
        .env_remove("PRIVATE_KEY")
        .env("NO_COLOR", "1")
        .assert()
        .failure()
        .stderr(contains("invalid upgrade plan"));

    Ok(())
}

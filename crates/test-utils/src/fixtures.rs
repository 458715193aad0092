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

use std::path::{Path, PathBuf};

use alloy::{json_abi::JsonAbi, primitives::Address};
use anyhow::{Context, Result};
use diamond_upgrade::{
    access::upgrader_role,
    artifacts::ArtifactStore,
    registry::{contracts_file_path, ContractRecord, ContractsFile},
    selectors::{selector_of, InterfaceId, SelectorSet},
    upgrade::{DEFAULT_ACCESS_CONTROLLER, DEFAULT_DIAMOND_NAME, DEFAULT_INITIALIZER_FACET},
};
use tempfile::TempDir;

use crate::mock::{MockDiamond, DIAMOND_ADDRESS, SIGNER_ADDRESS};

pub const TEST_CHAIN_ID: u64 = 31337;
pub const TEST_NETWORK: &str = "localhost";
pub const TEST_ENV: &str = "test";
pub const INITIAL_VERSION: &str = "2.3.0";

pub const ACCESS_CONTROLLER_ADDRESS: Address = Address::repeat_byte(0xac);
pub const INITIALIZER_ADDRESS: Address = Address::repeat_byte(0x1f);

/// Functions of the initializer facet as registered on the diamond.
pub const INITIALIZER_FUNCTIONS: &[&str] = &[
    "function initialize(bytes32 _version, address[] _addresses, bytes[] _calldata, bool _isUpgrade, bytes _initializationData, bytes4[] _interfacesToRemove, bytes4[] _interfacesToAdd)",
    "function getVersion() view returns (string)",
];

/// Forge-style artifact JSON for a contract with the given human-readable ABI items.
pub fn artifact_json(items: &[&str]) -> Result<String> {
    let abi = JsonAbi::parse(items.iter().copied()).context("invalid ABI fixture")?;
    let json = serde_json::json!({
        "abi": abi,
        "bytecode": {"object": "0x6080604052", "sourceMap": "", "linkReferences": {}},
    });
    Ok(json.to_string())
}

/// Selectors of the functions among `items`, in order.
pub fn selectors_of(items: &[&str]) -> Result<SelectorSet> {
    let abi = JsonAbi::parse(items.iter().copied()).context("invalid ABI fixture")?;
    let mut selectors = SelectorSet::new();
    for item in items {
        let name = item.trim_start_matches("function ").split('(').next().unwrap_or_default();
        for function in abi.function(name).into_iter().flatten() {
            selectors.insert(function.selector());
        }
    }
    Ok(selectors)
}

/// A temporary forge `out` directory.
pub struct ArtifactDir {
    dir: TempDir,
}

impl ArtifactDir {
    pub fn new() -> Result<Self> {
        Ok(Self { dir: tempfile::tempdir()? })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the artifact of contract `name` to `<name>.sol/<name>.json`.
    pub fn add(&self, name: &str, items: &[&str]) -> Result<PathBuf> {
        let dir = self.dir.path().join(format!("{name}.sol"));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{name}.json"));
        std::fs::write(&path, artifact_json(items)?)?;
        Ok(path)
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.dir.path())
    }
}

/// Contracts file with the diamond, its access controller and the initializer facet.
pub fn contracts_file() -> ContractsFile {
    let initializer_selectors = SelectorSet::from(vec![selector_of("getVersion()")]);
    ContractsFile {
        chain_id: TEST_CHAIN_ID,
        network: TEST_NETWORK.into(),
        env: TEST_ENV.into(),
        protocol_version: INITIAL_VERSION.into(),
        contracts: vec![
            ContractRecord {
                name: DEFAULT_DIAMOND_NAME.into(),
                address: DIAMOND_ADDRESS,
                args: vec![],
                interface_id: None,
                selectors: None,
            },
            ContractRecord {
                name: DEFAULT_ACCESS_CONTROLLER.into(),
                address: ACCESS_CONTROLLER_ADDRESS,
                args: vec![serde_json::json!(SIGNER_ADDRESS.to_string())],
                interface_id: None,
                selectors: None,
            },
            ContractRecord::facet(
                DEFAULT_INITIALIZER_FACET,
                INITIALIZER_ADDRESS,
                None,
                initializer_selectors,
            ),
        ],
    }
}

/// A diamond at [INITIAL_VERSION] with a matching contracts file on disk.
pub struct TestCtx {
    pub diamond: MockDiamond,
    pub artifacts: ArtifactDir,
    pub registry: ContractsFile,
    pub registry_path: PathBuf,
    addresses: TempDir,
}

/// Creates a new [TestCtx] whose signer holds the upgrader role.
pub fn test_ctx() -> Result<TestCtx> {
    let diamond = MockDiamond::default();
    diamond.set_version(INITIAL_VERSION);
    diamond.grant_role(ACCESS_CONTROLLER_ADDRESS, upgrader_role(), SIGNER_ADDRESS);
    diamond.register_facet(INITIALIZER_ADDRESS, [selector_of("getVersion()")]);

    let addresses = tempfile::tempdir()?;
    let registry_path = contracts_file_path(addresses.path(), TEST_CHAIN_ID, TEST_NETWORK, TEST_ENV);
    let ctx = TestCtx {
        diamond,
        artifacts: ArtifactDir::new()?,
        registry: contracts_file(),
        registry_path,
        addresses,
    };
    ctx.save_registry()?;
    Ok(ctx)
}

impl TestCtx {
    /// Register an already deployed facet on the diamond and in the contracts file.
    pub fn install_facet(
        &mut self,
        name: &str,
        address: Address,
        items: &[&str],
        interface_id: Option<InterfaceId>,
    ) -> Result<SelectorSet> {
        let selectors = selectors_of(items)?;
        self.diamond.register_facet(address, selectors.iter().copied());
        if let Some(id) = interface_id {
            self.diamond.set_interface_supported(id);
        }
        self.registry.upsert(ContractRecord::facet(name, address, interface_id, selectors.clone()));
        self.save_registry()?;
        Ok(selectors)
    }

    pub fn save_registry(&self) -> Result<()> {
        self.registry.save(&self.registry_path)
    }

    pub fn addresses_dir(&self) -> &Path {
        self.addresses.path()
    }

    /// Contents of the contracts file as currently stored on disk.
    pub fn registry_on_disk(&self) -> Result<String> {
        std::fs::read_to_string(&self.registry_path)
            .with_context(|| format!("failed to read {}", self.registry_path.display()))
    }
}

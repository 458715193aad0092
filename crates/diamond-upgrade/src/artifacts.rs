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

//! Loading of compiled contract artifacts from a forge `out` directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy::{
    json_abi::{ContractObject, JsonAbi},
    primitives::Bytes,
};
use anyhow::{Context, Result};

/// A compiled contract: its ABI and, for deployable contracts, its creation bytecode.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Option<Bytes>,
}

impl Artifact {
    /// Parse an artifact from its JSON representation (forge or hardhat layout).
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self> {
        let name = name.into();
        let object: ContractObject = serde_json::from_str(json)
            .with_context(|| format!("failed to parse artifact for {name}"))?;
        let abi = object.abi.with_context(|| format!("artifact for {name} has no ABI"))?;
        let bytecode = object.bytecode.filter(|code| !code.is_empty());
        Ok(Self { name, abi, bytecode })
    }

    /// Read and parse the artifact stored at `path`.
    pub fn from_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read artifact {}", path.display()))?;
        Self::from_json(name, &json)
    }

    /// Creation bytecode, or an error for abstract contracts and interfaces.
    pub fn require_bytecode(&self) -> Result<&Bytes> {
        self.bytecode
            .as_ref()
            .with_context(|| format!("artifact for {} has no deployable bytecode", self.name))
    }
}

/// Lookup of artifacts by contract name within a forge output directory.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locate the artifact for contract `name`.
    ///
    /// Forge writes `<File>.sol/<Contract>.json`. The conventional `<Name>.sol/<Name>.json` is
    /// tried first, then every source directory is searched for `<Name>.json`.
    pub fn locate(&self, name: &str) -> Result<PathBuf> {
        let primary = self.root.join(format!("{name}.sol")).join(format!("{name}.json"));
        if primary.is_file() {
            return Ok(primary);
        }

        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("failed to read artifacts dir {}", self.root.display()))?;
        let mut candidates = Vec::new();
        for entry in entries {
            let candidate = entry?.path().join(format!("{name}.json"));
            if candidate.is_file() {
                candidates.push(candidate);
            }
        }
        candidates.sort();
        match candidates.len() {
            0 => anyhow::bail!(
                "no artifact for {name} under {}; run `forge build` first",
                self.root.display()
            ),
            1 => Ok(candidates.remove(0)),
            _ => anyhow::bail!("artifact for {name} is ambiguous: {candidates:?}"),
        }
    }

    /// Load the artifact for contract `name`.
    pub fn load(&self, name: &str) -> Result<Artifact> {
        let path = self.locate(name)?;
        tracing::debug!("Loading artifact for {name} from {}", path.display());
        Artifact::from_file(name, path)
    }
}

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

use alloy::primitives::{keccak256, Address, B256};

use crate::{
    chain::{DiamondChain, ReadPolicy},
    error::UpgradeErrorKind,
};

/// Role the signer must hold on the access controller to cut the diamond.
pub fn upgrader_role() -> B256 {
    keccak256("UPGRADER")
}

/// Fail with an authorization error unless the signer holds [upgrader_role] on
/// `access_controller`.
pub async fn ensure_upgrader(
    chain: &dyn DiamondChain,
    reads: &ReadPolicy,
    access_controller: Address,
) -> Result<Address, UpgradeErrorKind> {
    let account = chain.signer_address().await.map_err(|err| UpgradeErrorKind::Authorization {
        account: "<none>".into(),
        reason: format!("{err:#}"),
    })?;
    let role = upgrader_role();
    let granted = reads
        .read("UPGRADER role", || chain.has_role(access_controller, role, account))
        .await
        .map_err(UpgradeErrorKind::ChainCall)?;
    if !granted {
        return Err(UpgradeErrorKind::Authorization {
            account: account.to_string(),
            reason: format!("missing UPGRADER role on access controller {access_controller}"),
        });
    }
    tracing::debug!("{account} holds the UPGRADER role");
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrader_role() {
        assert_eq!(
            upgrader_role(),
            "0xa615a8afb6fffcb8c6809ac0997b5c9c12b8cc97651150f14c8f6203168cff4c".parse::<B256>().unwrap()
        );
    }
}

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

//! Smart contract interfaces of the diamond and its supporting facets.

use alloy::{
    contract::Error as ContractError,
    primitives::{B256, FixedBytes},
    sol_types::decode_revert_reason,
};
use anyhow::{ensure, Result};

use crate::cut::CutAction;

alloy::sol!(
    #![sol(rpc, all_derives)]
    "src/contracts/artifacts/IDiamondCut.sol"
);

alloy::sol!(
    #![sol(rpc, all_derives)]
    "src/contracts/artifacts/IDiamondLoupe.sol"
);

alloy::sol!(
    #![sol(rpc, all_derives)]
    "src/contracts/artifacts/IERC165.sol"
);

alloy::sol!(
    #![sol(rpc, all_derives)]
    "src/contracts/artifacts/IAccessControl.sol"
);

alloy::sol!(
    #![sol(rpc, all_derives)]
    "src/contracts/artifacts/IProtocolInitializationHandler.sol"
);

impl From<CutAction> for IDiamondCut::FacetCutAction {
    fn from(action: CutAction) -> Self {
        match action {
            CutAction::Add => Self::Add,
            CutAction::Replace => Self::Replace,
            CutAction::Remove => Self::Remove,
        }
    }
}

/// Encode a protocol version string the way the initializer facet stores it: UTF-8 bytes,
/// left-aligned and zero-padded to 32 bytes.
pub fn version_to_bytes32(version: &str) -> Result<B256> {
    ensure!(!version.is_empty(), "protocol version must not be empty");
    ensure!(
        version.len() <= 31,
        "protocol version {version:?} is {} bytes long; at most 31 bytes fit in a bytes32",
        version.len()
    );
    Ok(B256::right_padding_from(version.as_bytes()))
}

/// Decode a bytes32 version back into its string form, trimming the zero padding.
pub fn version_from_bytes32(version: B256) -> String {
    let trimmed: Vec<u8> = version.iter().copied().take_while(|b| *b != 0).collect();
    String::from_utf8_lossy(&trimmed).into_owned()
}

/// Best-effort description of why a contract call was rejected.
///
/// Known diamond and initializer errors are decoded by name, plain `Error(string)` reverts are
/// decoded to their message and anything else falls back to the transport error.
pub fn revert_reason(err: &ContractError) -> String {
    if let Some(decoded) = err.as_decoded_interface_error::<IDiamondCut::IDiamondCutErrors>() {
        return format!("{decoded:?}");
    }
    if let Some(decoded) = err
        .as_decoded_interface_error::<IProtocolInitializationHandler::IProtocolInitializationHandlerErrors>()
    {
        return format!("{decoded:?}");
    }
    if let Some(reason) = err.as_revert_data().and_then(|data| decode_revert_reason(&data)) {
        return reason;
    }
    err.to_string()
}

/// Format a 4-byte identifier the way operators read them in logs, e.g. `0x01ffc9a7`.
pub fn format_bytes4(value: &FixedBytes<4>) -> String {
    format!("0x{}", hex::encode(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_bytes32() {
        let encoded = version_to_bytes32("2.4.0").unwrap();
        assert_eq!(&encoded[..5], b"2.4.0");
        assert!(encoded[5..].iter().all(|b| *b == 0));
        assert_eq!(version_from_bytes32(encoded), "2.4.0");

        assert!(version_to_bytes32("").is_err());
        assert!(version_to_bytes32(&"9".repeat(32)).is_err());
    }

    #[test]
    fn test_format_bytes4() {
        assert_eq!(format_bytes4(&FixedBytes::from([0x01, 0xff, 0xc9, 0xa7])), "0x01ffc9a7");
    }
}

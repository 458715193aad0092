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

//! The seam between the upgrade orchestrator and the chain hosting the diamond.

use std::{future::Future, time::Duration};

use alloy::{
    contract::Error as ContractError,
    eips::BlockId,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, B256},
    providers::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder},
    rpc::{client::RpcClient, types::TransactionRequest},
    signers::local::PrivateKeySigner,
    transports::layers::RetryBackoffLayer,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use url::Url;

use crate::{
    contracts::{revert_reason, IAccessControl, IDiamondCut, IDiamondLoupe, IERC165},
    selectors::{InterfaceId, Selector},
};

/// Outcome of a mined diamond cut transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CutReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    /// False when the transaction was mined but reverted.
    pub success: bool,
    /// Decoded reason of a reverted cut, when the node could replay it.
    pub revert_reason: Option<String>,
}

/// Reads and writes the orchestrator needs from the chain.
///
/// Every method is a network call. Implementations are bound to a single diamond.
#[async_trait]
pub trait DiamondChain: Send + Sync {
    /// Address of the diamond proxy this handle operates on.
    fn diamond(&self) -> Address;

    /// Account that signs deployments and the cut.
    async fn signer_address(&self) -> Result<Address>;

    /// Selectors currently dispatched to `facet`.
    async fn facet_function_selectors(&self, facet: Address) -> Result<Vec<Selector>>;

    /// Facet currently serving `selector`, or the zero address if none does.
    async fn facet_address(&self, selector: Selector) -> Result<Address>;

    /// Every registered facet with its selectors.
    async fn facets(&self) -> Result<Vec<(Address, Vec<Selector>)>>;

    async fn supports_interface(&self, interface_id: InterfaceId) -> Result<bool>;

    async fn has_role(&self, access_controller: Address, role: B256, account: Address)
        -> Result<bool>;

    /// Deploy `bytecode` and wait for the address of the created contract.
    async fn deploy(&self, bytecode: Bytes) -> Result<Address>;

    /// Send the cut transaction. An error means the transaction was not accepted.
    async fn send_cut(
        &self,
        cuts: Vec<IDiamondCut::FacetCut>,
        init: Address,
        calldata: Bytes,
    ) -> Result<B256>;

    /// Wait until the cut transaction `tx_hash` is mined.
    async fn wait_for_cut(&self, tx_hash: B256, timeout: Option<Duration>) -> Result<CutReceipt>;
}

/// Bounded retries for correctness-critical reads.
#[derive(Clone, Copy, Debug)]
pub struct ReadPolicy {
    /// Retries after the first failed attempt.
    pub retries: u32,
    pub delay: Duration,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self { retries: 3, delay: Duration::from_millis(500) }
    }
}

impl ReadPolicy {
    /// Run `op` until it succeeds or the retry budget is exhausted.
    pub async fn read<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Read {what} failed (attempt {attempt}/{}): {err:#}",
                        self.retries + 1
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => {
                    return Err(err.context(format!(
                        "read {what} failed after {} attempts",
                        attempt + 1
                    )))
                }
            }
        }
    }
}

/// [DiamondChain] backed by an alloy provider.
#[derive(Clone)]
pub struct RpcDiamond<P> {
    provider: P,
    diamond: Address,
    signer: Option<Address>,
}

impl RpcDiamond<DynProvider> {
    /// Connect to `rpc_url` with transport-level retries, signing with `signer` when given.
    pub fn connect(rpc_url: Url, signer: Option<PrivateKeySigner>, diamond: Address) -> Self {
        let client =
            RpcClient::builder().layer(RetryBackoffLayer::new(3, 1000, 200)).http(rpc_url);
        match signer {
            Some(signer) => {
                let address = signer.address();
                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer))
                    .connect_client(client)
                    .erased();
                Self::new(provider, diamond, Some(address))
            }
            None => Self::new(ProviderBuilder::new().connect_client(client).erased(), diamond, None),
        }
    }
}

impl<P: Provider + Clone> RpcDiamond<P> {
    pub fn new(provider: P, diamond: Address, signer: Option<Address>) -> Self {
        Self { provider, diamond, signer }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Re-execute a reverted cut with `eth_call` against the state before `block` to recover its
    /// revert reason. Best effort: any failure to replay yields `None`.
    async fn replay_cut(&self, tx_hash: B256, block: u64) -> Option<String> {
        let tx = match self.provider.get_transaction_by_hash(tx_hash).await {
            Ok(Some(tx)) => tx,
            Ok(None) => return None,
            Err(err) => {
                tracing::debug!(%tx_hash, "Failed to fetch reverted cut for replay: {err}");
                return None;
            }
        };
        let request = tx.into_request();
        match self.provider.call(request).block(BlockId::number(block.saturating_sub(1))).await {
            Ok(_) => {
                tracing::debug!(%tx_hash, "Replay of reverted cut succeeded; state has moved on");
                None
            }
            Err(err) => Some(revert_reason(&ContractError::from(err))),
        }
    }
}

#[async_trait]
impl<P: Provider + Clone + 'static> DiamondChain for RpcDiamond<P> {
    fn diamond(&self) -> Address {
        self.diamond
    }

    async fn signer_address(&self) -> Result<Address> {
        self.signer.context("no signer configured; please set --private-key or PRIVATE_KEY")
    }

    async fn facet_function_selectors(&self, facet: Address) -> Result<Vec<Selector>> {
        let loupe = IDiamondLoupe::new(self.diamond, &self.provider);
        tracing::trace!("Calling facetFunctionSelectors({facet})");
        loupe
            .facetFunctionSelectors(facet)
            .call()
            .await
            .with_context(|| format!("facetFunctionSelectors({facet}) failed"))
    }

    async fn facet_address(&self, selector: Selector) -> Result<Address> {
        let loupe = IDiamondLoupe::new(self.diamond, &self.provider);
        tracing::trace!("Calling facetAddress({selector})");
        loupe.facetAddress(selector).call().await.with_context(|| format!("facetAddress({selector}) failed"))
    }

    async fn facets(&self) -> Result<Vec<(Address, Vec<Selector>)>> {
        let loupe = IDiamondLoupe::new(self.diamond, &self.provider);
        let facets = loupe.facets().call().await.context("facets() failed")?;
        Ok(facets.into_iter().map(|f| (f.facetAddress, f.functionSelectors)).collect())
    }

    async fn supports_interface(&self, interface_id: InterfaceId) -> Result<bool> {
        let erc165 = IERC165::new(self.diamond, &self.provider);
        erc165
            .supportsInterface(interface_id)
            .call()
            .await
            .with_context(|| format!("supportsInterface({interface_id}) failed"))
    }

    async fn has_role(
        &self,
        access_controller: Address,
        role: B256,
        account: Address,
    ) -> Result<bool> {
        let access = IAccessControl::new(access_controller, &self.provider);
        access
            .hasRole(role, account)
            .call()
            .await
            .with_context(|| format!("hasRole({role}, {account}) failed"))
    }

    async fn deploy(&self, bytecode: Bytes) -> Result<Address> {
        let tx = TransactionRequest::default().with_deploy_code(bytecode);
        let receipt = self
            .provider
            .send_transaction(tx)
            .await
            .context("failed to send deployment transaction")?
            .get_receipt()
            .await
            .context("failed to receive deployment receipt")?;
        anyhow::ensure!(
            receipt.status(),
            "deployment transaction reverted: tx_hash = {}",
            receipt.transaction_hash
        );
        receipt.contract_address.context("deployment receipt has no contract address")
    }

    async fn send_cut(
        &self,
        cuts: Vec<IDiamondCut::FacetCut>,
        init: Address,
        calldata: Bytes,
    ) -> Result<B256> {
        let diamond_cut = IDiamondCut::new(self.diamond, &self.provider);
        let pending = diamond_cut
            .diamondCut(cuts, init, calldata)
            .send()
            .await
            .map_err(|err| anyhow!("diamondCut rejected: {}", revert_reason(&err)))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_cut(&self, tx_hash: B256, timeout: Option<Duration>) -> Result<CutReceipt> {
        tracing::debug!(?timeout, %tx_hash, "Waiting for cut receipt");
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_timeout(timeout)
            .get_receipt()
            .await
            .with_context(|| format!("failed to receive receipt for cut transaction {tx_hash}"))?;
        let success = receipt.status();
        let revert_reason = match (success, receipt.block_number) {
            (false, Some(block)) => self.replay_cut(tx_hash, block).await,
            _ => None,
        };
        Ok(CutReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            success,
            revert_reason,
        })
    }
}

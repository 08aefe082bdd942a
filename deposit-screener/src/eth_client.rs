// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Deposit manager access over JSON-RPC.

use crate::chain::{
    CompletionCall, DepositManagerReader, GlobalCapState, SubmittedTx, TransactionSubmitter,
};
use crate::error::{ScreenerError, ScreenerResult};
use crate::types::DepositHash;
use async_trait::async_trait;
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256, U64};
use ethers::utils::id;
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;

pub const OUTSTANDING_DEPOSIT_HASHES_SIGNATURE: &str = "_outstandingDepositHashes(bytes32)";
pub const ERC20_CAPS_SIGNATURE: &str = "_erc20Caps(address)";

pub type SigningEthProvider = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EthClient<M> {
    client: Arc<M>,
    deposit_manager: Address,
    expected_chain_id: Option<u64>,
}

impl EthClient<SigningEthProvider> {
    /// Connect and verify the chain id. `tx_signer` pays for completions.
    pub async fn new(
        provider_url: &str,
        deposit_manager: Address,
        tx_signer: LocalWallet,
        expected_chain_id: u64,
    ) -> anyhow::Result<Self> {
        let provider =
            Provider::<Http>::try_from(provider_url)?.interval(Duration::from_millis(2000));
        let client = SignerMiddleware::new(provider, tx_signer.with_chain_id(expected_chain_id));
        let self_ = Self {
            client: Arc::new(client),
            deposit_manager,
            expected_chain_id: Some(expected_chain_id),
        };
        self_.describe().await?;
        Ok(self_)
    }
}

impl<M> EthClient<M>
where
    M: Middleware + 'static,
{
    pub fn new_with_client(client: Arc<M>, deposit_manager: Address) -> Self {
        Self {
            client,
            deposit_manager,
            expected_chain_id: None,
        }
    }

    pub fn client(&self) -> Arc<M> {
        self.client.clone()
    }

    pub fn deposit_manager(&self) -> Address {
        self.deposit_manager
    }

    async fn describe(&self) -> anyhow::Result<()> {
        let chain_id = self.client.get_chainid().await?.as_u64();
        let block_number = self.client.get_block_number().await?;
        if let Some(expected) = self.expected_chain_id {
            if chain_id != expected {
                return Err(anyhow::anyhow!(
                    "Chain ID mismatch: expected {}, got {}",
                    expected,
                    chain_id
                ));
            }
        }
        tracing::info!(
            "[EthClient] Connected to chain {}, current block: {}, deposit manager: {:?}",
            chain_id,
            block_number,
            self.deposit_manager
        );
        Ok(())
    }

    async fn view(
        &self,
        signature: &str,
        args: &[Token],
        output: &[ParamType],
    ) -> ScreenerResult<Vec<Token>> {
        let mut data = id(signature).to_vec();
        data.extend(encode(args));
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.deposit_manager)
            .data(data)
            .into();
        let raw = self
            .client
            .call(&tx, None)
            .await
            .map_err(|e| ScreenerError::ChainRead(e.to_string()))
            .tap_err(|e| tracing::error!("[EthClient] {} failed: {:?}", signature, e))?;
        decode(output, &raw)
            .map_err(|e| ScreenerError::ChainRead(format!("{} returned bad data: {}", signature, e)))
    }
}

fn completion_tx(call: &CompletionCall) -> TransactionRequest {
    TransactionRequest::new().to(call.to).data(call.data.clone())
}

#[async_trait]
impl<M> DepositManagerReader for EthClient<M>
where
    M: Middleware + 'static,
{
    async fn is_outstanding(&self, hash: DepositHash) -> ScreenerResult<bool> {
        let tokens = self
            .view(
                OUTSTANDING_DEPOSIT_HASHES_SIGNATURE,
                &[Token::FixedBytes(hash.as_bytes().to_vec())],
                &[ParamType::Bool],
            )
            .await?;
        tokens
            .into_iter()
            .next()
            .and_then(Token::into_bool)
            .ok_or_else(|| ScreenerError::ChainRead("missing outstanding flag".to_string()))
    }

    async fn global_cap_state(&self, asset: Address) -> ScreenerResult<GlobalCapState> {
        // (runningGlobalTotal, globalCapWholeTokens, maxDepositSizeWholeTokens, lastResetTimestamp, precision)
        let tokens = self
            .view(
                ERC20_CAPS_SIGNATURE,
                &[Token::Address(asset)],
                &[
                    ParamType::Uint(128),
                    ParamType::Uint(32),
                    ParamType::Uint(32),
                    ParamType::Uint(32),
                    ParamType::Uint(8),
                ],
            )
            .await?;
        let uint = |i: usize| -> ScreenerResult<U256> {
            tokens
                .get(i)
                .cloned()
                .and_then(Token::into_uint)
                .ok_or_else(|| ScreenerError::ChainRead(format!("missing cap field {}", i)))
        };
        Ok(GlobalCapState {
            running_total: uint(0)?,
            last_reset_ms: uint(3)?.as_u64() * 1000,
        })
    }
}

#[async_trait]
impl<M> TransactionSubmitter for EthClient<M>
where
    M: Middleware + 'static,
{
    async fn estimate_gas(&self, call: &CompletionCall) -> ScreenerResult<U256> {
        let tx: TypedTransaction = completion_tx(call).into();
        self.client
            .estimate_gas(&tx, None)
            .await
            .map_err(|e| ScreenerError::Submission(format!("gas estimation failed: {}", e)))
    }

    async fn submit(&self, call: &CompletionCall, gas_limit: U256) -> ScreenerResult<SubmittedTx> {
        let tx = completion_tx(call).gas(gas_limit);
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ScreenerError::Submission(e.to_string()))?;
        let tx_hash = *pending;
        let receipt = pending
            .await
            .map_err(|e| ScreenerError::Submission(e.to_string()))?
            .ok_or_else(|| {
                ScreenerError::Submission(format!("transaction {:?} dropped from mempool", tx_hash))
            })?;
        if receipt.status != Some(U64::one()) {
            return Err(ScreenerError::Submission(format!(
                "transaction {:?} reverted",
                tx_hash
            )));
        }
        let block_number = receipt.block_number.ok_or_else(|| {
            ScreenerError::ChainRead("receipt without block number".to_string())
        })?;
        let block = self
            .client
            .get_block(block_number)
            .await
            .map_err(|e| ScreenerError::ChainRead(e.to_string()))?
            .ok_or_else(|| ScreenerError::ChainRead(format!("block {} not found", block_number)))?;
        Ok(SubmittedTx {
            tx_hash,
            block_number: block_number.as_u64(),
            block_timestamp_ms: block.timestamp.as_u64() * 1000,
        })
    }
}

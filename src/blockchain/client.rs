// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM JSON-RPC client for token balance and ownership reads.

use alloy::{
    network::Ethereum,
    primitives::{Address, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
};

use super::contracts::{IERC1155, IERC20, IERC721};
use super::TokenReader;

/// HTTP provider type (with the default fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Read-only chain client over HTTP.
pub struct EvmClient {
    provider: HttpProvider,
}

impl EvmClient {
    pub fn new(rpc_url: &str) -> Result<Self, ChainClientError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainClientError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(url);
        Ok(Self { provider })
    }
}

impl TokenReader for EvmClient {
    async fn block_number(&self) -> Result<u64, ChainClientError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainClientError::RpcError(e.to_string()))
    }

    async fn erc20_balance(&self, contract: Address, owner: Address) -> Result<U256, ChainClientError> {
        IERC20::new(contract, self.provider.clone())
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| ChainClientError::ContractError(e.to_string()))
    }

    async fn erc721_owner(&self, contract: Address, token_id: U256) -> Result<Address, ChainClientError> {
        IERC721::new(contract, self.provider.clone())
            .ownerOf(token_id)
            .call()
            .await
            .map_err(|e| ChainClientError::ContractError(e.to_string()))
    }

    async fn erc1155_balance(
        &self,
        contract: Address,
        owner: Address,
        token_id: U256,
    ) -> Result<U256, ChainClientError> {
        IERC1155::new(contract, self.provider.clone())
            .balanceOf(owner, token_id)
            .call()
            .await
            .map_err(|e| ChainClientError::ContractError(e.to_string()))
    }
}

/// Chain client errors.
#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Contract error: {0}")]
    ContractError(String),
}

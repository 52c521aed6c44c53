// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain integration module.
//!
//! This module provides:
//! - Contract bindings for the three token standards
//! - An HTTP client for balance / ownership / block height reads
//! - The [`TokenReader`] seam the reconciler is written against

use std::future::Future;

use alloy::primitives::{Address, U256};

pub mod client;
pub mod contracts;

pub use client::{ChainClientError, EvmClient};

/// On-chain reads used by full reconciliation.
pub trait TokenReader: Send + Sync + 'static {
    fn block_number(&self) -> impl Future<Output = Result<u64, ChainClientError>> + Send;

    fn erc20_balance(
        &self,
        contract: Address,
        owner: Address,
    ) -> impl Future<Output = Result<U256, ChainClientError>> + Send;

    fn erc721_owner(
        &self,
        contract: Address,
        token_id: U256,
    ) -> impl Future<Output = Result<Address, ChainClientError>> + Send;

    fn erc1155_balance(
        &self,
        contract: Address,
        owner: Address,
        token_id: U256,
    ) -> impl Future<Output = Result<U256, ChainClientError>> + Send;
}

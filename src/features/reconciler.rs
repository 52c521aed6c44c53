// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Balance Reconciler
//!
//! Two paths keep [`AccessState`] in line with the chain:
//!
//! - **Incremental**: apply the deltas of one decoded transfer to the sender's
//!   and receiver's documents. Writes carry the event's block number and are
//!   skipped when the stored document is newer.
//! - **Full**: recompute every gated balance for one user directly from the
//!   chain and overwrite the document.
//!
//! Endpoints that do not resolve to a known user are skipped. A user with no
//! document yet is reported back as `missing` so the caller can schedule a
//! full pass instead.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tracing::{debug, info, warn};

use super::events::DecodedLog;
use crate::blockchain::{ChainClientError, TokenReader};
use crate::models::{AccessState, FeatureFlag, TokenStandard, WalletAddress};
use crate::storage::{AccessDatabase, ApplyOutcome, DbError};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainClientError),
}

/// Per-user results of one incremental update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    pub applied: Vec<String>,
    pub stale: Vec<String>,
    pub missing: Vec<String>,
}

pub struct BalanceReconciler<C> {
    db: Arc<AccessDatabase>,
    chain: Arc<C>,
}

impl<C: TokenReader> BalanceReconciler<C> {
    pub fn new(db: Arc<AccessDatabase>, chain: Arc<C>) -> Self {
        Self { db, chain }
    }

    /// Apply one transfer's deltas to the sender and the receiver.
    pub async fn apply_transfer(&self, log: &DecodedLog) -> Result<TransferOutcome, ReconcileError> {
        let mut outcome = TransferOutcome::default();
        let Some((from, to)) = log.event.endpoints() else {
            return Ok(outcome);
        };
        let (from_deltas, to_deltas) = log.event.balance_changes(log.contract);

        for (endpoint, deltas) in [(from, from_deltas), (to, to_deltas)] {
            if endpoint == Address::ZERO || deltas.is_empty() {
                continue;
            }
            let Some(user_id) = self.db.user_id_for_address(&WalletAddress::from(endpoint))? else {
                continue;
            };

            match self
                .db
                .apply_access_changes(&user_id, &deltas, log.block_number)?
            {
                ApplyOutcome::Applied(_) => {
                    debug!(user_id = %user_id, block = log.block_number, changes = deltas.len(), "Applied transfer");
                    outcome.applied.push(user_id);
                }
                ApplyOutcome::Stale { stored_block } => {
                    debug!(
                        user_id = %user_id,
                        block = log.block_number,
                        stored_block,
                        "Dropped transfer older than stored snapshot"
                    );
                    outcome.stale.push(user_id);
                }
                ApplyOutcome::Missing => outcome.missing.push(user_id),
            }
        }
        Ok(outcome)
    }

    /// Recompute the user's balances from the chain and overwrite the stored
    /// document.
    pub async fn reconcile(&self, user_id: &str) -> Result<AccessState, ReconcileError> {
        let user = self.db.get_user(user_id)?;
        let flags = self.db.list_feature_flags()?;
        let block = self.chain.block_number().await?;
        let owners: Vec<Address> = user.addresses.iter().map(WalletAddress::address).collect();

        let mut state = AccessState::new(user_id, block);
        for flag in &flags {
            let token = flag.token();
            if state.required_tokens_owned.contains_key(&token) {
                continue;
            }
            let owned = self.owned(flag, &owners).await;
            state.required_tokens_owned.insert(token, owned);
        }

        self.db.upsert_access_state(&state)?;
        info!(
            user_id = %user_id,
            block,
            tokens = state.required_tokens_owned.len(),
            "Reconciled access state"
        );
        Ok(state)
    }

    /// Balance of the flag's token across `owners`. Failed reads count as zero.
    async fn owned(&self, flag: &FeatureFlag, owners: &[Address]) -> u64 {
        let token = flag.token();
        match flag.token_type {
            TokenStandard::Erc721 => match self.chain.erc721_owner(token.address, token.token_id).await {
                Ok(holder) => u64::from(owners.contains(&holder)),
                Err(e) => {
                    warn!(contract = %token.address, token_id = %token.token_id, error = %e, "ownerOf failed");
                    0
                }
            },
            TokenStandard::Erc20 | TokenStandard::Erc1155 => {
                let mut total = U256::ZERO;
                for owner in owners {
                    let read = match flag.token_type {
                        TokenStandard::Erc20 => self.chain.erc20_balance(token.address, *owner).await,
                        _ => {
                            self.chain
                                .erc1155_balance(token.address, *owner, token.token_id)
                                .await
                        }
                    };
                    match read {
                        Ok(balance) => total = total.saturating_add(balance),
                        Err(e) => warn!(
                            contract = %token.address,
                            owner = %owner,
                            error = %e,
                            "Balance read failed, counting as zero"
                        ),
                    }
                }
                total.saturating_to::<u64>()
            }
        }
    }
}

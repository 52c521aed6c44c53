// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Chain Event Listener
//!
//! Streams transfer logs for the watched token contracts over a WebSocket
//! subscription and hands decoded events to the update queue.
//!
//! ## Strategy
//!
//! 1. The watch set is fixed at construction. An empty set means nothing to
//!    listen for, so the task idles until shutdown.
//! 2. The subscription starts one block behind head so a transfer mined while
//!    connecting is not missed. The block guard in storage drops logs older
//!    than a user's snapshot, but a log replayed at or after the snapshot
//!    block is applied again.
//! 3. Logs removed by a reorg and logs that fail to decode are skipped.
//! 4. Enqueueing waits for capacity, so a slow pool applies backpressure to
//!    the subscription instead of dropping events.
//!
//! A closed stream or queue is fatal: the caller decides whether to exit.

use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::catalog::WatchSet;
use super::events::{DecodedLog, TransferEvent, WATCHED_TOPICS};
use super::worker::{UpdateJob, UpdateQueue};

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("log subscription failed: {0}")]
    Subscribe(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("log subscription stream closed")]
    StreamClosed,

    #[error("update queue closed")]
    QueueClosed,
}

/// What to do with one incoming log.
#[derive(Debug, PartialEq, Eq)]
enum LogAction {
    Enqueue(DecodedLog),
    Skip(&'static str),
}

pub struct ChainEventListener {
    ws_url: String,
    watch: WatchSet,
    queue: UpdateQueue,
}

impl ChainEventListener {
    pub fn new(ws_url: impl Into<String>, watch: WatchSet, queue: UpdateQueue) -> Self {
        Self {
            ws_url: ws_url.into(),
            watch,
            queue,
        }
    }

    /// Subscription filter: watched contracts, transfer topics, from `from_block`.
    pub fn filter(&self, from_block: u64) -> Filter {
        Filter::new()
            .address(self.watch.contracts())
            .event_signature(WATCHED_TOPICS.to_vec())
            .from_block(from_block)
    }

    /// Run until cancelled or the subscription fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        if self.watch.is_empty() {
            info!("No token contracts to watch, chain listener idle");
            shutdown.cancelled().await;
            return Ok(());
        }

        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(self.ws_url.clone()))
            .await
            .map_err(|e| ListenerError::Connect {
                url: self.ws_url.clone(),
                reason: e.to_string(),
            })?;

        let head = provider
            .get_block_number()
            .await
            .map_err(|e| ListenerError::Rpc(e.to_string()))?;
        let from_block = head.saturating_sub(1);

        let mut subscription = provider
            .subscribe_logs(&self.filter(from_block))
            .await
            .map_err(|e| ListenerError::Subscribe(e.to_string()))?;

        info!(
            contracts = self.watch.len(),
            from_block, "Chain listener subscribed"
        );

        loop {
            let log = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Chain listener shutting down");
                    return Ok(());
                }
                received = subscription.recv() => match received {
                    Ok(log) => log,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Chain listener lagged behind the subscription");
                        continue;
                    }
                    Err(RecvError::Closed) => return Err(ListenerError::StreamClosed),
                },
            };

            match self.classify(&log) {
                LogAction::Enqueue(decoded) => {
                    debug!(
                        contract = %decoded.contract,
                        block = decoded.block_number,
                        "Queueing transfer"
                    );
                    self.queue
                        .submit(UpdateJob::Transfer(decoded))
                        .await
                        .map_err(|_| ListenerError::QueueClosed)?;
                }
                LogAction::Skip(reason) => {
                    warn!(
                        contract = %log.address(),
                        tx = ?log.transaction_hash,
                        reason,
                        "Skipping log"
                    );
                }
            }
        }
    }

    fn classify(&self, log: &Log) -> LogAction {
        if log.removed {
            return LogAction::Skip("removed by reorg");
        }
        if !self.watch.contains(&log.address()) {
            return LogAction::Skip("contract not watched");
        }
        match DecodedLog::from_rpc_log(log) {
            Ok(decoded) if matches!(decoded.event, TransferEvent::Unknown { .. }) => {
                LogAction::Skip("unknown event")
            }
            Ok(decoded) => LogAction::Enqueue(decoded),
            Err(e) => {
                warn!(error = %e, "Failed to decode transfer log");
                LogAction::Skip("undecodable")
            }
        }
    }
}

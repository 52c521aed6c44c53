// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Update Worker Pool
//!
//! Bounded queue of balance update jobs drained by a fixed number of
//! concurrent tasks.
//!
//! ## Strategy
//!
//! 1. Producers push [`UpdateJob`]s onto a bounded channel. The chain listener
//!    awaits free capacity; request and notification paths drop the job when
//!    the queue is full (the next trigger will retry).
//! 2. A single dispatcher takes a semaphore permit per job, so at most
//!    `concurrency` jobs run at once.
//! 3. Every job runs under a fixed deadline.
//!
//! ## Shutdown
//!
//! The dispatcher stops taking jobs when the cancellation token fires and
//! waits for in-flight jobs to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::DecodedLog;
use super::reconciler::BalanceReconciler;
use crate::blockchain::TokenReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateJob {
    /// Apply one decoded transfer incrementally.
    Transfer(DecodedLog),
    /// Recompute one user's balances from the chain.
    Reconcile { user_id: String },
}

impl UpdateJob {
    fn kind(&self) -> &'static str {
        match self {
            UpdateJob::Transfer(_) => "transfer",
            UpdateJob::Reconcile { .. } => "reconcile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("update queue is full")]
    Full,

    #[error("update queue is closed")]
    Closed,
}

/// Producer handle for the update queue.
#[derive(Clone)]
pub struct UpdateQueue {
    tx: mpsc::Sender<UpdateJob>,
}

impl UpdateQueue {
    /// Create a queue holding at most `capacity` pending jobs.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<UpdateJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue, waiting for capacity.
    pub async fn submit(&self, job: UpdateJob) -> Result<(), QueueError> {
        self.tx.send(job).await.map_err(|_| QueueError::Closed)
    }

    /// Enqueue without waiting.
    pub fn try_submit(&self, job: UpdateJob) -> Result<(), QueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Fire-and-forget reconciliation request. Returns whether it was queued.
    pub fn request_reconcile(&self, user_id: &str) -> bool {
        match self.try_submit(UpdateJob::Reconcile {
            user_id: user_id.to_string(),
        }) {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id, error = %e, "Reconciliation request dropped");
                false
            }
        }
    }
}

/// Pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub task_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            task_timeout: Duration::from_secs(60),
        }
    }
}

/// Executes queued update jobs against a [`BalanceReconciler`].
pub struct UpdateWorkerPool<C> {
    reconciler: Arc<BalanceReconciler<C>>,
    queue: UpdateQueue,
    config: PoolConfig,
}

impl<C: TokenReader> UpdateWorkerPool<C> {
    /// `queue` is used to schedule full passes for users whose document does
    /// not exist yet.
    pub fn new(reconciler: Arc<BalanceReconciler<C>>, queue: UpdateQueue, config: PoolConfig) -> Self {
        Self {
            reconciler,
            queue,
            config,
        }
    }

    /// Drain `jobs` until `shutdown` is cancelled.
    ///
    /// The pool holds a queue sender of its own for follow-up passes, so the
    /// channel stays open after external producers drop and cancellation is
    /// the only way to stop it.
    ///
    /// ```rust,ignore
    /// tokio::spawn(pool.run(receiver, shutdown.clone()));
    /// ```
    pub async fn run(self, mut jobs: mpsc::Receiver<UpdateJob>, shutdown: CancellationToken) {
        info!(
            concurrency = self.config.concurrency,
            timeout_secs = self.config.task_timeout.as_secs(),
            "Update worker pool starting"
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        loop {
            let job = tokio::select! {
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let reconciler = self.reconciler.clone();
            let queue = self.queue.clone();
            let limit = self.config.task_timeout;
            tasks.spawn(async move {
                let _permit = permit;
                run_job(&reconciler, &queue, job, limit).await;
            });

            // Reap finished tasks so the set does not grow without bound.
            while tasks.try_join_next().is_some() {}
        }

        info!(in_flight = tasks.len(), "Update worker pool shutting down");
        while tasks.join_next().await.is_some() {}
    }
}

async fn run_job<C: TokenReader>(
    reconciler: &BalanceReconciler<C>,
    queue: &UpdateQueue,
    job: UpdateJob,
    limit: Duration,
) {
    let kind = job.kind();
    let work = async {
        match job {
            UpdateJob::Transfer(log) => {
                let outcome = reconciler.apply_transfer(&log).await?;
                for user_id in &outcome.missing {
                    debug!(user_id = %user_id, "No access state yet, scheduling full reconciliation");
                    queue.request_reconcile(user_id);
                }
                Ok(())
            }
            UpdateJob::Reconcile { user_id } => reconciler.reconcile(&user_id).await.map(|_| ()),
        }
    };

    match tokio::time::timeout(limit, work).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(job = kind, error = %e, "Update job failed"),
        Err(_) => warn!(job = kind, timeout_secs = limit.as_secs(), "Update job timed out"),
    }
}

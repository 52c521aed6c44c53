// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token-gated feature access.
//!
//! - [`catalog`]: feature flags, gating, and the watch set
//! - [`events`]: transfer log decoding
//! - [`listener`]: WebSocket log subscription feeding the update queue
//! - [`worker`]: bounded queue and worker pool
//! - [`reconciler`]: incremental and full balance updates
//! - [`notifications`]: account lifecycle bus and signup listener

pub mod catalog;
pub mod events;
pub mod listener;
pub mod notifications;
pub mod reconciler;
pub mod worker;

pub use catalog::{FeatureCatalog, WatchSet};
pub use listener::{ChainEventListener, ListenerError};
pub use notifications::{AccessNotification, NotificationBus, NotificationKind, SignupListener};
pub use reconciler::BalanceReconciler;
pub use worker::{PoolConfig, UpdateJob, UpdateQueue, UpdateWorkerPool};

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::AuthService;
use crate::features::{FeatureCatalog, NotificationBus, UpdateQueue};
use crate::storage::AccessDatabase;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<AccessDatabase>,
    pub auth: Arc<AuthService>,
    pub catalog: Arc<FeatureCatalog>,
    /// Producer side of the balance update queue.
    pub queue: UpdateQueue,
    pub bus: NotificationBus,
    pub signup_topic: String,
}

#[cfg(test)]
pub(crate) struct TestGuard {
    pub jobs: tokio::sync::mpsc::Receiver<crate::features::UpdateJob>,
    _dir: tempfile::TempDir,
}

/// State over a throwaway database. The guard keeps the directory and the
/// queue receiver alive.
#[cfg(test)]
pub(crate) fn test_state() -> (AppState, TestGuard) {
    use crate::auth::SessionIssuer;

    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(AccessDatabase::open(&dir.path().join("test.redb")).unwrap());
    let bus = NotificationBus::new();
    let sessions = SessionIssuer::new(db.clone(), "gallery", 3600);
    let auth = AuthService::new(db.clone(), sessions, bus.clone(), "user-signup");
    let (queue, jobs) = UpdateQueue::bounded(16);

    let state = AppState {
        catalog: Arc::new(FeatureCatalog::new(db.clone())),
        auth: Arc::new(auth),
        db,
        queue,
        bus,
        signup_topic: "user-signup".into(),
    };
    (state, TestGuard { jobs, _dir: dir })
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Nonce challenges.
//!
//! One live challenge per address: the most recently created one. Older
//! nonces stay in the store for audit but can no longer be used.

use std::sync::Arc;

use chrono::Utc;

use super::session::random_hex;
use crate::models::{Nonce, WalletAddress};
use crate::storage::{AccessDatabase, DbResult, NonceConsumption};

/// Random bytes per challenge value.
const NONCE_LEN: usize = 16;

pub struct NonceStore {
    db: Arc<AccessDatabase>,
}

impl NonceStore {
    pub fn new(db: Arc<AccessDatabase>) -> Self {
        Self { db }
    }

    fn fresh(address: &WalletAddress, user_id: Option<&str>) -> Nonce {
        Nonce {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            value: random_hex(NONCE_LEN),
            user_id: user_id.map(str::to_string),
            address: address.clone(),
        }
    }

    /// Create a fresh challenge, superseding any previous one.
    pub fn issue(&self, address: &WalletAddress, user_id: Option<&str>) -> DbResult<Nonce> {
        let nonce = Self::fresh(address, user_id);
        self.db.insert_nonce(&nonce)?;
        tracing::debug!(address = %address, "Issued nonce");
        Ok(nonce)
    }

    /// Retire `value` if it is still the live challenge.
    ///
    /// Returns the replacement, or `None` when another caller consumed it first.
    pub fn consume(
        &self,
        address: &WalletAddress,
        value: &str,
        user_id: Option<&str>,
    ) -> DbResult<Option<Nonce>> {
        match self.db.consume_nonce(value, Self::fresh(address, user_id))? {
            NonceConsumption::Rotated(next) => Ok(Some(next)),
            NonceConsumption::Superseded => Ok(None),
        }
    }

    /// The live challenge, if any was ever issued.
    pub fn live(&self, address: &WalletAddress) -> DbResult<Option<Nonce>> {
        match self.db.latest_nonce(address) {
            Ok(nonce) => Ok(Some(nonce)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn live_or_issue(&self, address: &WalletAddress, user_id: Option<&str>) -> DbResult<Nonce> {
        match self.live(address)? {
            Some(nonce) => Ok(nonce),
            None => self.issue(address, user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    #[test]
    fn issue_supersedes_and_live_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(AccessDatabase::open(&dir.path().join("t.redb")).unwrap());
        let store = NonceStore::new(db);
        let addr = WalletAddress::from(Address::repeat_byte(7));

        assert!(store.live(&addr).unwrap().is_none());
        let first = store.live_or_issue(&addr, None).unwrap();
        assert_eq!(first.value.len(), NONCE_LEN * 2);
        assert_eq!(store.live_or_issue(&addr, None).unwrap().value, first.value);

        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = store.issue(&addr, Some("u1")).unwrap();
        assert_ne!(second.value, first.value);
        assert_eq!(store.live(&addr).unwrap().unwrap().value, second.value);
    }

    #[test]
    fn consume_succeeds_once_per_value() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(AccessDatabase::open(&dir.path().join("t.redb")).unwrap());
        let store = NonceStore::new(db);
        let addr = WalletAddress::from(Address::repeat_byte(7));
        let issued = store.issue(&addr, None).unwrap();

        let next = store.consume(&addr, &issued.value, Some("u1")).unwrap().unwrap();
        assert_ne!(next.value, issued.value);
        assert_eq!(next.user_id.as_deref(), Some("u1"));
        assert_eq!(store.live(&addr).unwrap().unwrap(), next);

        assert!(store.consume(&addr, &issued.value, Some("u1")).unwrap().is_none());
        assert_eq!(store.live(&addr).unwrap().unwrap(), next);
    }
}

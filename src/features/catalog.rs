// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Feature catalog and gating.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use alloy::primitives::Address;

use crate::models::{AccessState, FeatureFlag};
use crate::storage::{AccessDatabase, DbError, DbResult};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read feature file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid feature file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// Flags unlocked by `state`: every flag whose required balance is owned.
pub fn unlocked_features(flags: &[FeatureFlag], state: &AccessState) -> Vec<FeatureFlag> {
    flags
        .iter()
        .filter(|flag| state.owned(&flag.token()) >= flag.required_amount)
        .cloned()
        .collect()
}

/// Immutable set of contracts the chain listener watches.
///
/// Built once at startup; a catalog change takes effect on restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    contracts: BTreeSet<Address>,
}

impl WatchSet {
    pub fn from_flags(flags: &[FeatureFlag]) -> Self {
        Self {
            contracts: flags.iter().map(|f| f.required_token.address).collect(),
        }
    }

    pub fn contracts(&self) -> Vec<Address> {
        self.contracts.iter().copied().collect()
    }

    pub fn contains(&self, contract: &Address) -> bool {
        self.contracts.contains(contract)
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }
}

/// Read-mostly registry of feature flags.
pub struct FeatureCatalog {
    db: Arc<AccessDatabase>,
}

impl FeatureCatalog {
    pub fn new(db: Arc<AccessDatabase>) -> Self {
        Self { db }
    }

    pub fn list(&self) -> DbResult<Vec<FeatureFlag>> {
        self.db.list_feature_flags()
    }

    /// Insert flags that are not registered yet. Returns how many were added.
    pub fn seed(&self, flags: &[FeatureFlag]) -> DbResult<usize> {
        let mut added = 0;
        for flag in flags {
            match self.db.insert_feature_flag(flag) {
                Ok(()) => added += 1,
                Err(DbError::AlreadyExists(_)) => {
                    tracing::debug!(name = %flag.name, "Feature flag already registered");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    /// Seed from a JSON array of flags on disk.
    pub fn seed_from_file(&self, path: &Path) -> Result<usize, CatalogError> {
        let raw = std::fs::read(path)?;
        let flags: Vec<FeatureFlag> = serde_json::from_slice(&raw)?;
        let added = self.seed(&flags)?;
        tracing::info!(path = %path.display(), added, total = flags.len(), "Seeded feature flags");
        Ok(added)
    }

    /// Features the user currently unlocks. A user without an access state
    /// owns nothing.
    pub fn user_features(&self, user_id: &str) -> DbResult<Vec<FeatureFlag>> {
        let state = match self.db.get_access_state(user_id) {
            Ok(state) => state,
            Err(e) if e.is_not_found() => AccessState::new(user_id, 0),
            Err(e) => return Err(e),
        };
        let flags = self.list()?;
        Ok(unlocked_features(&flags, &state))
    }

    pub fn watch_set(&self) -> DbResult<WatchSet> {
        Ok(WatchSet::from_flags(&self.list()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BalanceChange, TokenDelta, TokenIdentifier, TokenStandard};
    use alloy::primitives::U256;

    fn vip() -> FeatureFlag {
        FeatureFlag {
            name: "vip".into(),
            required_token: TokenIdentifier::fungible(Address::repeat_byte(0xab)),
            required_amount: 5,
            token_type: TokenStandard::Erc20,
        }
    }

    fn catalog() -> (FeatureCatalog, Arc<AccessDatabase>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(AccessDatabase::open(&dir.path().join("t.redb")).unwrap());
        (FeatureCatalog::new(db.clone()), db, dir)
    }

    #[test]
    fn gating_is_exact_threshold() {
        let flags = vec![
            vip(),
            FeatureFlag {
                name: "holder".into(),
                required_token: TokenIdentifier::new(Address::repeat_byte(0x72), U256::from(1)),
                required_amount: 1,
                token_type: TokenStandard::Erc721,
            },
        ];
        let mut state = AccessState::new("u", 1);
        state.required_tokens_owned.insert(vip().token(), 5);

        let names: Vec<_> = unlocked_features(&flags, &state)
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["vip"]);
    }

    #[test]
    fn vip_scenario_drops_after_decrement() {
        let (catalog, db, _dir) = catalog();
        catalog.seed(&[vip()]).unwrap();

        let mut state = AccessState::new("U", 10);
        state.required_tokens_owned.insert(vip().token(), 5);
        db.upsert_access_state(&state).unwrap();
        assert_eq!(catalog.user_features("U").unwrap(), vec![vip()]);

        db.apply_access_changes(
            "U",
            &[TokenDelta {
                token: vip().token(),
                change: BalanceChange::Decrease(1),
            }],
            11,
        )
        .unwrap();
        assert!(catalog.user_features("U").unwrap().is_empty());
    }

    #[test]
    fn user_without_state_owns_nothing() {
        let (catalog, _db, _dir) = catalog();
        catalog.seed(&[vip()]).unwrap();
        assert!(catalog.user_features("nobody").unwrap().is_empty());
    }

    #[test]
    fn seed_skips_existing_and_builds_watch_set() {
        let (catalog, _db, dir) = catalog();
        let path = dir.path().join("features.json");
        std::fs::write(&path, serde_json::to_vec(&vec![vip()]).unwrap()).unwrap();

        assert_eq!(catalog.seed_from_file(&path).unwrap(), 1);
        assert_eq!(catalog.seed_from_file(&path).unwrap(), 0);

        let watch = catalog.watch_set().unwrap();
        assert_eq!(watch.len(), 1);
        assert!(watch.contains(&Address::repeat_byte(0xab)));
    }
}

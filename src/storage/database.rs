// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded document store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user_id → serialized User
//! - `address_users`: lowercase address → user_id
//! - `nonces`: composite key (address|!created_at|id) → serialized Nonce
//! - `session_keys`: composite key (address|!created_at|id) → serialized SessionKey
//! - `login_attempts`: attempt id → serialized LoginAttempt
//! - `feature_flags`: flag name → serialized FeatureFlag
//! - `access_states`: user_id → serialized AccessState
//!
//! Every mutating operation runs in a single write transaction, which gives
//! atomic per-document read-modify-write semantics. No operation spans more
//! than one user's AccessState.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;

use crate::models::{
    AccessState, FeatureFlag, LoginAttempt, Nonce, SessionKey, TokenDelta, User, WalletAddress,
};

// =============================================================================
// Table Definitions
// =============================================================================

const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Map: lowercase on-chain address → user_id.
const ADDRESS_USERS: TableDefinition<&str, &str> = TableDefinition::new("address_users");

/// Key format: `address|!created_at_be|id` for newest-first range scans.
const NONCES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("nonces");

/// Same key layout as `nonces`.
const SESSION_KEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("session_keys");

const LOGIN_ATTEMPTS: TableDefinition<&str, &[u8]> = TableDefinition::new("login_attempts");

const FEATURE_FLAGS: TableDefinition<&str, &[u8]> = TableDefinition::new("feature_flags");

const ACCESS_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("access_states");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Result of an incremental AccessState update.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Changes were written; carries the new document.
    Applied(AccessState),
    /// The stored document is newer than the event; nothing was written.
    Stale { stored_block: u64 },
    /// No document exists for the user yet; nothing was written.
    Missing,
}

/// Result of consuming a nonce.
#[derive(Debug, Clone, PartialEq)]
pub enum NonceConsumption {
    /// The expected nonce was live; the carried nonce replaced it.
    Rotated(Nonce),
    /// The expected nonce was no longer live; nothing was written.
    Superseded,
}

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite key: `address | inverted_timestamp_be_bytes | id`.
///
/// The inverted timestamp ensures newest-first ordering when scanning forward.
fn make_index_key(address: &WalletAddress, created_at: DateTime<Utc>, id: &str) -> Vec<u8> {
    let addr = address.as_str();
    let nanos = created_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
    let mut key = Vec::with_capacity(addr.len() + 1 + 8 + 1 + id.len());
    key.extend_from_slice(addr.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!(nanos as u64)).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(id.as_bytes());
    key
}

fn make_prefix(address: &WalletAddress) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(address.as_str().len() + 1);
    prefix.extend_from_slice(address.as_str().as_bytes());
    prefix.push(b'|');
    prefix
}

/// Upper bound for a prefix scan (prefix with 0xFF bytes appended).
fn make_prefix_end(address: &WalletAddress) -> Vec<u8> {
    let mut end = make_prefix(address);
    end.extend_from_slice(&[0xFF; 20]);
    end
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn newest_nonce(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    address: &WalletAddress,
) -> DbResult<Option<Nonce>> {
    let prefix = make_prefix(address);
    let prefix_end = make_prefix_end(address);
    let mut range = table.range(prefix.as_slice()..prefix_end.as_slice())?;
    match range.next() {
        Some(entry) => {
            let (_, value) = entry?;
            Ok(Some(decode(value.value())?))
        }
        None => Ok(None),
    }
}

// =============================================================================
// AccessDatabase
// =============================================================================

/// Embedded ACID document store for users, challenges and access state.
pub struct AccessDatabase {
    db: Database,
}

impl AccessDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(ADDRESS_USERS)?;
            let _ = write_txn.open_table(NONCES)?;
            let _ = write_txn.open_table(SESSION_KEYS)?;
            let _ = write_txn.open_table(LOGIN_ATTEMPTS)?;
            let _ = write_txn.open_table(FEATURE_FLAGS)?;
            let _ = write_txn.open_table(ACCESS_STATES)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Cheap liveness probe: opens and drops a read transaction.
    pub fn ping(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(FEATURE_FLAGS)?;
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a new user and claim all of its addresses.
    ///
    /// Fails with `AlreadyExists` if any address already belongs to a user.
    pub fn create_user(&self, user: &User) -> DbResult<()> {
        let json = serde_json::to_vec(user)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut map = write_txn.open_table(ADDRESS_USERS)?;
            for address in &user.addresses {
                if map.get(address.as_str())?.is_some() {
                    return Err(DbError::AlreadyExists(format!("User for {address}")));
                }
            }
            for address in &user.addresses {
                map.insert(address.as_str(), user.id.as_str())?;
            }

            let mut users = write_txn.open_table(USERS)?;
            users.insert(user.id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> DbResult<User> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;
        match table.get(user_id)? {
            Some(value) => decode(value.value()),
            None => Err(DbError::NotFound(format!("User {user_id}"))),
        }
    }

    pub fn get_user_by_address(&self, address: &WalletAddress) -> DbResult<User> {
        let read_txn = self.db.begin_read()?;
        let map = read_txn.open_table(ADDRESS_USERS)?;
        let user_id = match map.get(address.as_str())? {
            Some(v) => v.value().to_string(),
            None => return Err(DbError::NotFound(format!("User for {address}"))),
        };
        let users = read_txn.open_table(USERS)?;
        match users.get(user_id.as_str())? {
            Some(value) => decode(value.value()),
            None => Err(DbError::NotFound(format!("User {user_id}"))),
        }
    }

    /// Resolve an address to its owning user id, if any.
    pub fn user_id_for_address(&self, address: &WalletAddress) -> DbResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let map = read_txn.open_table(ADDRESS_USERS)?;
        Ok(map.get(address.as_str())?.map(|v| v.value().to_string()))
    }

    /// Replace the profile fields that are `Some`.
    pub fn update_user_profile(
        &self,
        user_id: &str,
        username: Option<String>,
        bio: Option<String>,
    ) -> DbResult<User> {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut users = write_txn.open_table(USERS)?;
            let existing_bytes = {
                let existing = users
                    .get(user_id)?
                    .ok_or_else(|| DbError::NotFound(format!("User {user_id}")))?;
                existing.value().to_vec()
            };

            let mut user: User = decode(&existing_bytes)?;
            if username.is_some() {
                user.username = username;
            }
            if bio.is_some() {
                user.bio = bio;
            }
            user.updated_at = Utc::now();

            let json = serde_json::to_vec(&user)?;
            users.insert(user_id, json.as_slice())?;
            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    /// Link another address to an existing user.
    ///
    /// Linking an address the user already owns is a no-op.
    pub fn add_user_address(&self, user_id: &str, address: &WalletAddress) -> DbResult<User> {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut users = write_txn.open_table(USERS)?;
            let existing_bytes = {
                let existing = users
                    .get(user_id)?
                    .ok_or_else(|| DbError::NotFound(format!("User {user_id}")))?;
                existing.value().to_vec()
            };
            let mut user: User = decode(&existing_bytes)?;

            let mut map = write_txn.open_table(ADDRESS_USERS)?;
            let owner = map.get(address.as_str())?.map(|v| v.value().to_string());
            match owner {
                Some(owner) if owner == user_id => {}
                Some(_) => {
                    return Err(DbError::AlreadyExists(format!("User for {address}")));
                }
                None => {
                    map.insert(address.as_str(), user_id)?;
                    user.addresses.push(address.clone());
                    user.updated_at = Utc::now();
                    let json = serde_json::to_vec(&user)?;
                    users.insert(user_id, json.as_slice())?;
                }
            }
            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    // =========================================================================
    // Nonces
    // =========================================================================

    pub fn insert_nonce(&self, nonce: &Nonce) -> DbResult<()> {
        let key = make_index_key(&nonce.address, nonce.created_at, &nonce.id);
        let json = serde_json::to_vec(nonce)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(NONCES)?;
            table.insert(key.as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// The most recently created nonce for an address.
    pub fn latest_nonce(&self, address: &WalletAddress) -> DbResult<Nonce> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NONCES)?;
        newest_nonce(&table, address)?
            .ok_or_else(|| DbError::NotFound(format!("Nonce for {address}")))
    }

    /// Replace the live nonce with `next`, but only if the live nonce still
    /// has the value `expected`.
    ///
    /// The check and the insert share one write transaction, so of several
    /// callers presenting the same nonce exactly one sees `Rotated`.
    pub fn consume_nonce(&self, expected: &str, mut next: Nonce) -> DbResult<NonceConsumption> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(NONCES)?;
            match newest_nonce(&table, &next.address)? {
                Some(live) if live.value == expected => {
                    // The replacement must sort first.
                    if next.created_at <= live.created_at {
                        next.created_at = live.created_at + chrono::Duration::nanoseconds(1);
                    }
                    let key = make_index_key(&next.address, next.created_at, &next.id);
                    let json = serde_json::to_vec(&next)?;
                    table.insert(key.as_slice(), json.as_slice())?;
                    NonceConsumption::Rotated(next)
                }
                _ => NonceConsumption::Superseded,
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    // =========================================================================
    // Login attempts
    // =========================================================================

    pub fn record_login_attempt(&self, attempt: &LoginAttempt) -> DbResult<()> {
        let json = serde_json::to_vec(attempt)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LOGIN_ATTEMPTS)?;
            table.insert(attempt.id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All recorded attempts for an address, oldest first.
    pub fn login_attempts_for(&self, address: &WalletAddress) -> DbResult<Vec<LoginAttempt>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOGIN_ATTEMPTS)?;
        let mut attempts = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let attempt: LoginAttempt = decode(value.value())?;
            if &attempt.address == address {
                attempts.push(attempt);
            }
        }
        attempts.sort_by_key(|a| a.created_at);
        Ok(attempts)
    }

    // =========================================================================
    // Session keys
    // =========================================================================

    pub fn insert_session_key(&self, key: &SessionKey) -> DbResult<()> {
        let index = make_index_key(&key.address, key.created_at, &key.id);
        let json = serde_json::to_vec(key)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSION_KEYS)?;
            table.insert(index.as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn latest_session_key(&self, address: &WalletAddress) -> DbResult<SessionKey> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSION_KEYS)?;
        let prefix = make_prefix(address);
        let prefix_end = make_prefix_end(address);
        let mut range = table.range(prefix.as_slice()..prefix_end.as_slice())?;
        match range.next() {
            Some(entry) => {
                let (_, value) = entry?;
                decode(value.value())
            }
            None => Err(DbError::NotFound(format!("Session key for {address}"))),
        }
    }

    // =========================================================================
    // Feature flags
    // =========================================================================

    /// Insert a flag. Names are unique.
    pub fn insert_feature_flag(&self, flag: &FeatureFlag) -> DbResult<()> {
        let json = serde_json::to_vec(flag)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FEATURE_FLAGS)?;
            if table.get(flag.name.as_str())?.is_some() {
                return Err(DbError::AlreadyExists(format!("Feature flag {}", flag.name)));
            }
            table.insert(flag.name.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_feature_flag(&self, name: &str) -> DbResult<FeatureFlag> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FEATURE_FLAGS)?;
        match table.get(name)? {
            Some(value) => decode(value.value()),
            None => Err(DbError::NotFound(format!("Feature flag {name}"))),
        }
    }

    /// All flags, ordered by name.
    pub fn list_feature_flags(&self) -> DbResult<Vec<FeatureFlag>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FEATURE_FLAGS)?;
        let mut flags = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            flags.push(decode(value.value())?);
        }
        Ok(flags)
    }

    // =========================================================================
    // Access state
    // =========================================================================

    pub fn get_access_state(&self, user_id: &str) -> DbResult<AccessState> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCESS_STATES)?;
        match table.get(user_id)? {
            Some(value) => decode(value.value()),
            None => Err(DbError::NotFound(format!("Access state for {user_id}"))),
        }
    }

    /// Overwrite the whole document (full reconciliation).
    pub fn upsert_access_state(&self, state: &AccessState) -> DbResult<()> {
        let json = serde_json::to_vec(state)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACCESS_STATES)?;
            table.insert(state.user_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Apply incremental changes observed at `block`.
    ///
    /// The write is skipped when the stored document was produced at a later
    /// block, so a delayed event cannot corrupt a newer snapshot.
    pub fn apply_access_changes(
        &self,
        user_id: &str,
        deltas: &[TokenDelta],
        block: u64,
    ) -> DbResult<ApplyOutcome> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(ACCESS_STATES)?;
            let existing_bytes = match table.get(user_id)? {
                Some(existing) => existing.value().to_vec(),
                None => return Ok(ApplyOutcome::Missing),
            };

            let mut state: AccessState = decode(&existing_bytes)?;
            if block < state.block_number {
                return Ok(ApplyOutcome::Stale {
                    stored_block: state.block_number,
                });
            }
            state.apply(deltas);
            state.block_number = block;

            let json = serde_json::to_vec(&state)?;
            table.insert(user_id, json.as_slice())?;
            ApplyOutcome::Applied(state)
        };
        write_txn.commit()?;
        Ok(outcome)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BalanceChange, TokenIdentifier, TokenStandard};
    use alloy::primitives::Address;

    fn temp_db() -> (AccessDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = AccessDatabase::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    fn addr(byte: u8) -> WalletAddress {
        WalletAddress::from(Address::repeat_byte(byte))
    }

    fn nonce(address: &WalletAddress, value: &str, seconds_ago: i64) -> Nonce {
        Nonce {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now() - chrono::Duration::seconds(seconds_ago),
            value: value.to_string(),
            user_id: None,
            address: address.clone(),
        }
    }

    fn token() -> TokenIdentifier {
        TokenIdentifier::fungible(Address::repeat_byte(0xee))
    }

    #[test]
    fn create_and_lookup_user_by_address() {
        let (db, _dir) = temp_db();
        let user = User::new(addr(1));
        db.create_user(&user).unwrap();

        assert_eq!(db.get_user(&user.id).unwrap(), user);
        assert_eq!(db.get_user_by_address(&addr(1)).unwrap().id, user.id);
        assert!(db.get_user_by_address(&addr(2)).unwrap_err().is_not_found());
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let (db, _dir) = temp_db();
        db.create_user(&User::new(addr(1))).unwrap();
        let err = db.create_user(&User::new(addr(1))).unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists(_)));
    }

    #[test]
    fn add_address_links_and_rejects_foreign() {
        let (db, _dir) = temp_db();
        let alice = User::new(addr(1));
        let bob = User::new(addr(2));
        db.create_user(&alice).unwrap();
        db.create_user(&bob).unwrap();

        let updated = db.add_user_address(&alice.id, &addr(3)).unwrap();
        assert_eq!(updated.addresses, vec![addr(1), addr(3)]);
        assert_eq!(db.user_id_for_address(&addr(3)).unwrap(), Some(alice.id.clone()));

        // Idempotent for own address
        let again = db.add_user_address(&alice.id, &addr(3)).unwrap();
        assert_eq!(again.addresses.len(), 2);

        let err = db.add_user_address(&alice.id, &addr(2)).unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists(_)));
    }

    #[test]
    fn update_profile_keeps_unset_fields() {
        let (db, _dir) = temp_db();
        let user = User::new(addr(1));
        db.create_user(&user).unwrap();

        db.update_user_profile(&user.id, Some("alice".into()), Some("hi".into()))
            .unwrap();
        let updated = db.update_user_profile(&user.id, None, Some("bye".into())).unwrap();
        assert_eq!(updated.username.as_deref(), Some("alice"));
        assert_eq!(updated.bio.as_deref(), Some("bye"));

        assert!(db
            .update_user_profile("missing", None, None)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn latest_nonce_is_newest() {
        let (db, _dir) = temp_db();
        let a = addr(1);
        assert!(db.latest_nonce(&a).unwrap_err().is_not_found());

        db.insert_nonce(&nonce(&a, "old", 10)).unwrap();
        db.insert_nonce(&nonce(&a, "new", 0)).unwrap();
        db.insert_nonce(&nonce(&addr(2), "other", 0)).unwrap();

        assert_eq!(db.latest_nonce(&a).unwrap().value, "new");
    }

    #[test]
    fn consume_nonce_rotates_only_the_live_value() {
        let (db, _dir) = temp_db();
        let a = addr(1);
        db.insert_nonce(&nonce(&a, "live", 0)).unwrap();

        // Same timestamp as the live nonce: the replacement still sorts first.
        let mut next = nonce(&a, "next", 0);
        next.created_at = db.latest_nonce(&a).unwrap().created_at;
        assert!(matches!(
            db.consume_nonce("live", next).unwrap(),
            NonceConsumption::Rotated(n) if n.value == "next"
        ));
        assert_eq!(db.latest_nonce(&a).unwrap().value, "next");

        assert_eq!(
            db.consume_nonce("live", nonce(&a, "again", 0)).unwrap(),
            NonceConsumption::Superseded
        );
        assert_eq!(db.latest_nonce(&a).unwrap().value, "next");

        assert_eq!(
            db.consume_nonce("anything", nonce(&addr(9), "x", 0)).unwrap(),
            NonceConsumption::Superseded
        );
        assert!(db.latest_nonce(&addr(9)).unwrap_err().is_not_found());
    }

    #[test]
    fn latest_session_key_is_newest() {
        let (db, _dir) = temp_db();
        let a = addr(1);
        for (secret, ago) in [("first", 20), ("second", 5)] {
            db.insert_session_key(&SessionKey {
                id: uuid::Uuid::new_v4().to_string(),
                address: a.clone(),
                secret_value: secret.into(),
                created_at: Utc::now() - chrono::Duration::seconds(ago),
            })
            .unwrap();
        }
        assert_eq!(db.latest_session_key(&a).unwrap().secret_value, "second");
        assert!(db.latest_session_key(&addr(9)).unwrap_err().is_not_found());
    }

    #[test]
    fn feature_flag_names_are_unique() {
        let (db, _dir) = temp_db();
        let flag = FeatureFlag {
            name: "vip".into(),
            required_token: token(),
            required_amount: 5,
            token_type: TokenStandard::Erc20,
        };
        db.insert_feature_flag(&flag).unwrap();
        assert!(matches!(
            db.insert_feature_flag(&flag).unwrap_err(),
            DbError::AlreadyExists(_)
        ));
        assert_eq!(db.get_feature_flag("vip").unwrap(), flag);
        assert_eq!(db.list_feature_flags().unwrap().len(), 1);
    }

    #[test]
    fn apply_changes_respects_block_guard() {
        let (db, _dir) = temp_db();
        let deltas = [TokenDelta {
            token: token(),
            change: BalanceChange::Increase(3),
        }];

        assert_eq!(
            db.apply_access_changes("u1", &deltas, 10).unwrap(),
            ApplyOutcome::Missing
        );

        let mut snapshot = AccessState::new("u1", 100);
        snapshot.required_tokens_owned.insert(token(), 5);
        db.upsert_access_state(&snapshot).unwrap();

        assert_eq!(
            db.apply_access_changes("u1", &deltas, 99).unwrap(),
            ApplyOutcome::Stale { stored_block: 100 }
        );
        assert_eq!(db.get_access_state("u1").unwrap().owned(&token()), 5);

        match db.apply_access_changes("u1", &deltas, 101).unwrap() {
            ApplyOutcome::Applied(state) => {
                assert_eq!(state.owned(&token()), 8);
                assert_eq!(state.block_number, 101);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn changes_at_the_stored_block_are_not_deduplicated() {
        let (db, _dir) = temp_db();
        let deltas = [TokenDelta {
            token: token(),
            change: BalanceChange::Increase(3),
        }];
        db.upsert_access_state(&AccessState::new("u1", 100)).unwrap();

        // Two transfers in one block and a replay of the same log look alike.
        for _ in 0..2 {
            assert!(matches!(
                db.apply_access_changes("u1", &deltas, 100).unwrap(),
                ApplyOutcome::Applied(_)
            ));
        }
        assert_eq!(db.get_access_state("u1").unwrap().owned(&token()), 6);
    }

    #[test]
    fn login_attempts_are_filtered_by_address() {
        let (db, _dir) = temp_db();
        for byte in [1u8, 1, 2] {
            db.record_login_attempt(&LoginAttempt {
                id: uuid::Uuid::new_v4().to_string(),
                address: addr(byte),
                signature: "0x00".into(),
                nonce_value: "n".into(),
                user_exists: false,
                signature_valid: false,
                request_host: None,
                request_headers: Default::default(),
                created_at: Utc::now(),
            })
            .unwrap();
        }
        assert_eq!(db.login_attempts_for(&addr(1)).unwrap().len(), 2);
    }

    #[test]
    fn make_index_key_ordering() {
        let a = addr(1);
        let now = Utc::now();
        let key_old = make_index_key(&a, now - chrono::Duration::seconds(1), "x");
        let key_new = make_index_key(&a, now, "y");
        assert!(key_new < key_old, "Newer timestamps should sort first");
    }
}

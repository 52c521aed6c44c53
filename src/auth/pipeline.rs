// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Challenge / Login Pipeline
//!
//! Per address: `NoChallenge → ChallengeIssued → AttemptRecorded →
//! {Authenticated | Rejected}`.
//!
//! - **Preflight** issues (or returns) the live nonce.
//! - **Create / Login / Add address** verify a wallet signature over the live
//!   nonce and always record a [`LoginAttempt`].
//! - A wrong signature is a normal outcome (`signature_valid = false`), not an
//!   error.
//! - A verified nonce is checked and replaced in one storage transaction, so
//!   a signature authenticates at most one request, even under concurrency.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use super::nonce::NonceStore;
use super::session::SessionIssuer;
use super::signature::{verify_signature, SignatureError};
use super::AuthError;
use crate::features::notifications::{AccessNotification, NotificationBus, NotificationKind};
use crate::models::{LoginAttempt, User, WalletAddress};
use crate::storage::{AccessDatabase, DbError};

/// Headers never copied into the audit log.
const REDACTED_HEADERS: [&str; 2] = ["authorization", "cookie"];

#[derive(Debug, thiserror::Error)]
pub enum AuthFlowError {
    #[error("malformed signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("no user for address {0}")]
    UserNotFound(WalletAddress),

    #[error("address {0} already belongs to a user")]
    AddressTaken(WalletAddress),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("session error: {0}")]
    Session(#[from] AuthError),
}

/// Caller details copied into each [`LoginAttempt`].
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub host: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl RequestMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let host = headers
            .get("x-forwarded-for")
            .or_else(|| headers.get("host"))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let headers = headers
            .iter()
            .filter(|(name, _)| !REDACTED_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self { host, headers }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct PreflightOutput {
    pub nonce: String,
    pub user_exists: bool,
}

/// Outcome of a signature-gated operation.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct AuthOutcome {
    pub signature_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub address: WalletAddress,
}

impl AuthOutcome {
    fn rejected(address: &WalletAddress) -> Self {
        Self {
            signature_valid: false,
            jwt_token: None,
            user_id: None,
            address: address.clone(),
        }
    }
}

/// Public view of a user.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct UserView {
    pub user_id: String,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub addresses: Vec<WalletAddress>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            bio: user.bio,
            addresses: user.addresses,
        }
    }
}

/// Address-ownership authentication service.
pub struct AuthService {
    db: Arc<AccessDatabase>,
    nonces: NonceStore,
    sessions: SessionIssuer,
    bus: NotificationBus,
    signup_topic: String,
}

impl AuthService {
    pub fn new(
        db: Arc<AccessDatabase>,
        sessions: SessionIssuer,
        bus: NotificationBus,
        signup_topic: impl Into<String>,
    ) -> Self {
        Self {
            nonces: NonceStore::new(db.clone()),
            db,
            sessions,
            bus,
            signup_topic: signup_topic.into(),
        }
    }

    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    fn find_user(&self, address: &WalletAddress) -> Result<Option<User>, AuthFlowError> {
        match self.db.get_user_by_address(address) {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Report whether the address has an account and hand out its challenge.
    ///
    /// Known users get their live nonce back (stable until consumed); unknown
    /// addresses receive a fresh one.
    pub fn preflight(&self, address: &WalletAddress) -> Result<PreflightOutput, AuthFlowError> {
        let (nonce, user_exists) = match self.find_user(address)? {
            Some(user) => (self.nonces.live_or_issue(address, Some(&user.id))?, true),
            None => (self.nonces.issue(address, None)?, false),
        };
        Ok(PreflightOutput {
            nonce: nonce.value,
            user_exists,
        })
    }

    /// Verify `signature` against the live nonce, consume it, and record the
    /// attempt.
    ///
    /// A signature that verifies against a nonce some concurrent request has
    /// already consumed counts as invalid.
    fn check_signature(
        &self,
        address: &WalletAddress,
        signature: &str,
        supplied_nonce: Option<&str>,
        owner: Option<&str>,
        meta: &RequestMeta,
    ) -> Result<bool, AuthFlowError> {
        let live = self.nonces.live(address)?;
        let nonce_value = live.as_ref().map(|n| n.value.clone()).unwrap_or_default();

        let mut verdict = match &live {
            Some(nonce) if supplied_nonce.is_none_or(|s| s == nonce.value) => {
                verify_signature(signature, nonce.value.as_bytes(), address)
            }
            _ => Ok(false),
        };

        if matches!(verdict, Ok(true))
            && self.nonces.consume(address, &nonce_value, owner)?.is_none()
        {
            tracing::info!(address = %address, "Nonce already consumed");
            verdict = Ok(false);
        }

        let attempt = LoginAttempt {
            id: uuid::Uuid::new_v4().to_string(),
            address: address.clone(),
            signature: signature.to_string(),
            nonce_value,
            user_exists: owner.is_some(),
            signature_valid: matches!(verdict, Ok(true)),
            request_host: meta.host.clone(),
            request_headers: meta.headers.clone(),
            created_at: Utc::now(),
        };
        self.db.record_login_attempt(&attempt)?;

        if !attempt.signature_valid {
            tracing::info!(address = %address, "Signature rejected");
        }
        Ok(verdict?)
    }

    fn notify(&self, user_id: &str, event: NotificationKind, address: &WalletAddress) {
        let message = AccessNotification {
            user_id: user_id.to_string(),
            event,
            address: Some(address.clone()),
        };
        if let Err(e) = self.bus.publish_json(&self.signup_topic, &message) {
            tracing::warn!(error = %e, user_id, "Failed to publish account notification");
        }
    }

    /// Register a new user owning `address`.
    pub fn create_user(
        &self,
        address: &WalletAddress,
        signature: &str,
        nonce: Option<&str>,
        meta: &RequestMeta,
    ) -> Result<AuthOutcome, AuthFlowError> {
        if self.find_user(address)?.is_some() {
            return Err(AuthFlowError::AddressTaken(address.clone()));
        }
        if !self.check_signature(address, signature, nonce, None, meta)? {
            return Ok(AuthOutcome::rejected(address));
        }

        let user = User::new(address.clone());
        self.db.create_user(&user).map_err(|e| match e {
            DbError::AlreadyExists(_) => AuthFlowError::AddressTaken(address.clone()),
            other => other.into(),
        })?;
        let token = self.sessions.issue(address)?;

        tracing::info!(user_id = %user.id, address = %address, "User created");
        self.notify(&user.id, NotificationKind::Signup, address);

        Ok(AuthOutcome {
            signature_valid: true,
            jwt_token: Some(token),
            user_id: Some(user.id),
            address: address.clone(),
        })
    }

    /// Authenticate an existing user.
    pub fn login(
        &self,
        address: &WalletAddress,
        signature: &str,
        nonce: Option<&str>,
        meta: &RequestMeta,
    ) -> Result<AuthOutcome, AuthFlowError> {
        let user = self
            .find_user(address)?
            .ok_or_else(|| AuthFlowError::UserNotFound(address.clone()))?;

        if !self.check_signature(address, signature, nonce, Some(&user.id), meta)? {
            return Ok(AuthOutcome::rejected(address));
        }

        let token = self.sessions.issue(address)?;
        tracing::info!(user_id = %user.id, address = %address, "User logged in");

        Ok(AuthOutcome {
            signature_valid: true,
            jwt_token: Some(token),
            user_id: Some(user.id),
            address: address.clone(),
        })
    }

    pub fn get_user(&self, address: &WalletAddress) -> Result<UserView, AuthFlowError> {
        self.find_user(address)?
            .map(UserView::from)
            .ok_or_else(|| AuthFlowError::UserNotFound(address.clone()))
    }

    /// Update profile fields of the session holder.
    pub fn update_user(
        &self,
        session_address: &WalletAddress,
        username: Option<String>,
        bio: Option<String>,
    ) -> Result<UserView, AuthFlowError> {
        let user = self
            .find_user(session_address)?
            .ok_or_else(|| AuthFlowError::UserNotFound(session_address.clone()))?;
        Ok(self.db.update_user_profile(&user.id, username, bio)?.into())
    }

    /// Link `new_address` to the session holder's account.
    ///
    /// The new address must sign its own live nonce.
    pub fn add_address(
        &self,
        session_address: &WalletAddress,
        new_address: &WalletAddress,
        signature: &str,
        nonce: Option<&str>,
        meta: &RequestMeta,
    ) -> Result<AuthOutcome, AuthFlowError> {
        let user = self
            .find_user(session_address)?
            .ok_or_else(|| AuthFlowError::UserNotFound(session_address.clone()))?;
        let owner = self.find_user(new_address)?;
        if owner.as_ref().is_some_and(|o| o.id != user.id) {
            return Err(AuthFlowError::AddressTaken(new_address.clone()));
        }

        let owner_id = owner.as_ref().map(|o| o.id.as_str());
        if !self.check_signature(new_address, signature, nonce, owner_id, meta)? {
            return Ok(AuthOutcome::rejected(new_address));
        }

        self.db
            .add_user_address(&user.id, new_address)
            .map_err(|e| match e {
                DbError::AlreadyExists(_) => AuthFlowError::AddressTaken(new_address.clone()),
                other => other.into(),
            })?;

        tracing::info!(user_id = %user.id, address = %new_address, "Address linked");
        self.notify(&user.id, NotificationKind::AddressAdded, new_address);

        Ok(AuthOutcome {
            signature_valid: true,
            jwt_token: None,
            user_id: Some(user.id),
            address: new_address.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};

    struct Harness {
        service: AuthService,
        db: Arc<AccessDatabase>,
        bus: NotificationBus,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(AccessDatabase::open(&dir.path().join("t.redb")).unwrap());
        let bus = NotificationBus::new();
        let sessions = SessionIssuer::new(db.clone(), "gallery", 3600);
        let service = AuthService::new(db.clone(), sessions, bus.clone(), "user-signup");
        Harness {
            service,
            db,
            bus,
            _dir: dir,
        }
    }

    fn sign(signer: &PrivateKeySigner, nonce: &str) -> String {
        alloy::hex::encode_prefixed(signer.sign_message_sync(nonce.as_bytes()).unwrap().as_bytes())
    }

    fn wallet(signer: &PrivateKeySigner) -> WalletAddress {
        WalletAddress::from(signer.address())
    }

    #[test]
    fn preflight_for_unknown_address_reports_no_user() {
        let h = harness();
        let signer = PrivateKeySigner::random();
        let out = h.service.preflight(&wallet(&signer)).unwrap();
        assert!(!out.user_exists);
        assert_eq!(out.nonce.len(), 32);
    }

    #[test]
    fn create_then_login_round_trip() {
        let h = harness();
        let mut signups = h.bus.subscribe();
        let signer = PrivateKeySigner::random();
        let addr = wallet(&signer);
        let meta = RequestMeta::default();

        let nonce = h.service.preflight(&addr).unwrap().nonce;
        let created = h
            .service
            .create_user(&addr, &sign(&signer, &nonce), Some(&nonce), &meta)
            .unwrap();
        assert!(created.signature_valid);
        let user_id = created.user_id.clone().unwrap();
        assert_eq!(
            h.service.sessions().verify(created.jwt_token.as_deref().unwrap()).unwrap(),
            addr
        );

        let published = signups.try_recv().unwrap();
        assert_eq!(published.topic, "user-signup");
        let message: AccessNotification = serde_json::from_slice(&published.payload).unwrap();
        assert_eq!(message.user_id, user_id);

        let pre = h.service.preflight(&addr).unwrap();
        assert!(pre.user_exists);
        assert_ne!(pre.nonce, nonce, "consumed nonce must be rotated");
        // Stable until consumed
        assert_eq!(h.service.preflight(&addr).unwrap().nonce, pre.nonce);

        let logged_in = h
            .service
            .login(&addr, &sign(&signer, &pre.nonce), None, &meta)
            .unwrap();
        assert!(logged_in.signature_valid);
        assert_eq!(logged_in.user_id.as_deref(), Some(user_id.as_str()));
    }

    #[test]
    fn replayed_signature_is_rejected() {
        let h = harness();
        let signer = PrivateKeySigner::random();
        let addr = wallet(&signer);
        let meta = RequestMeta::default();

        let nonce = h.service.preflight(&addr).unwrap().nonce;
        let sig = sign(&signer, &nonce);
        h.service.create_user(&addr, &sig, None, &meta).unwrap();

        let replay = h.service.login(&addr, &sig, None, &meta).unwrap();
        assert!(!replay.signature_valid);
        assert!(replay.jwt_token.is_none());
    }

    #[test]
    fn concurrent_logins_accept_a_signature_once() {
        const ROUNDS: usize = 20;
        const CALLERS: usize = 4;

        let h = harness();
        let signer = PrivateKeySigner::random();
        let addr = wallet(&signer);
        let meta = RequestMeta::default();
        let nonce = h.service.preflight(&addr).unwrap().nonce;
        h.service
            .create_user(&addr, &sign(&signer, &nonce), None, &meta)
            .unwrap();

        for _ in 0..ROUNDS {
            let sig = sign(&signer, &h.service.preflight(&addr).unwrap().nonce);
            let barrier = std::sync::Barrier::new(CALLERS);
            let outcomes: Vec<AuthOutcome> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..CALLERS)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            h.service.login(&addr, &sig, None, &meta).unwrap()
                        })
                    })
                    .collect();
                handles.into_iter().map(|t| t.join().unwrap()).collect()
            });

            let accepted: Vec<_> = outcomes.iter().filter(|o| o.signature_valid).collect();
            assert_eq!(accepted.len(), 1);
            assert!(accepted[0].jwt_token.is_some());
            assert!(outcomes
                .iter()
                .filter(|o| !o.signature_valid)
                .all(|o| o.jwt_token.is_none()));
        }

        let valid = h
            .db
            .login_attempts_for(&addr)
            .unwrap()
            .into_iter()
            .filter(|a| a.signature_valid)
            .count();
        assert_eq!(valid, ROUNDS + 1);
    }

    #[test]
    fn invalid_signature_is_recorded_not_raised() {
        let h = harness();
        let signer = PrivateKeySigner::random();
        let imposter = PrivateKeySigner::random();
        let addr = wallet(&signer);

        let nonce = h.service.preflight(&addr).unwrap().nonce;
        let mut headers = HeaderMap::new();
        headers.insert("host", "example.test".parse().unwrap());
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        let meta = RequestMeta::from_headers(&headers);

        let out = h
            .service
            .create_user(&addr, &sign(&imposter, &nonce), None, &meta)
            .unwrap();
        assert!(!out.signature_valid);
        assert!(h.db.get_user_by_address(&addr).unwrap_err().is_not_found());

        let attempts = h.db.login_attempts_for(&addr).unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].signature_valid);
        assert_eq!(attempts[0].nonce_value, nonce);
        assert_eq!(attempts[0].request_host.as_deref(), Some("example.test"));
        assert!(!attempts[0].request_headers.contains_key("authorization"));
    }

    #[test]
    fn stale_supplied_nonce_is_rejected() {
        let h = harness();
        let signer = PrivateKeySigner::random();
        let addr = wallet(&signer);
        let nonce = h.service.preflight(&addr).unwrap().nonce;

        let out = h
            .service
            .create_user(&addr, &sign(&signer, &nonce), Some("something-else"), &RequestMeta::default())
            .unwrap();
        assert!(!out.signature_valid);
    }

    #[test]
    fn malformed_signature_is_recorded_then_raised() {
        let h = harness();
        let addr = wallet(&PrivateKeySigner::random());
        h.service.preflight(&addr).unwrap();

        let err = h
            .service
            .create_user(&addr, "zz", None, &RequestMeta::default())
            .unwrap_err();
        assert!(matches!(err, AuthFlowError::Signature(_)));
        assert_eq!(h.db.login_attempts_for(&addr).unwrap().len(), 1);
    }

    #[test]
    fn login_for_unknown_user_is_not_found() {
        let h = harness();
        let addr = wallet(&PrivateKeySigner::random());
        let err = h
            .service
            .login(&addr, "0x00", None, &RequestMeta::default())
            .unwrap_err();
        assert!(matches!(err, AuthFlowError::UserNotFound(_)));
    }

    #[test]
    fn add_address_links_and_notifies() {
        let h = harness();
        let owner = PrivateKeySigner::random();
        let second = PrivateKeySigner::random();
        let meta = RequestMeta::default();

        let nonce = h.service.preflight(&wallet(&owner)).unwrap().nonce;
        let created = h
            .service
            .create_user(&wallet(&owner), &sign(&owner, &nonce), None, &meta)
            .unwrap();
        let mut events = h.bus.subscribe();

        let second_nonce = h.service.preflight(&wallet(&second)).unwrap().nonce;
        let out = h
            .service
            .add_address(
                &wallet(&owner),
                &wallet(&second),
                &sign(&second, &second_nonce),
                None,
                &meta,
            )
            .unwrap();
        assert!(out.signature_valid);
        assert_eq!(out.user_id, created.user_id);

        let view = h.service.get_user(&wallet(&second)).unwrap();
        assert_eq!(view.addresses, vec![wallet(&owner), wallet(&second)]);

        let message: AccessNotification =
            serde_json::from_slice(&events.try_recv().unwrap().payload).unwrap();
        assert_eq!(message.event, NotificationKind::AddressAdded);
    }

    #[test]
    fn update_user_changes_profile() {
        let h = harness();
        let signer = PrivateKeySigner::random();
        let addr = wallet(&signer);
        let nonce = h.service.preflight(&addr).unwrap().nonce;
        h.service
            .create_user(&addr, &sign(&signer, &nonce), None, &RequestMeta::default())
            .unwrap();

        let view = h
            .service
            .update_user(&addr, Some("satoshi".into()), None)
            .unwrap();
        assert_eq!(view.username.as_deref(), Some("satoshi"));
    }
}

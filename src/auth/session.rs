// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session tokens.
//!
//! Each issued token is an HS256 JWT signed with a fresh random secret that is
//! persisted per address. Verification reads the address claim without
//! checking the signature, loads the latest secret for that address, and then
//! performs full validation. Issuing a new token therefore revokes older ones.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use k256::elliptic_curve::rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::AuthError;
use crate::models::{SessionKey, WalletAddress};
use crate::storage::AccessDatabase;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Random bytes per signing secret.
const SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionClaims {
    pub address: WalletAddress,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies address-bound session tokens.
pub struct SessionIssuer {
    db: Arc<AccessDatabase>,
    issuer: String,
    ttl_secs: i64,
}

/// Random hex string read from the OS RNG.
pub(crate) fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    alloy::hex::encode(bytes)
}

impl SessionIssuer {
    pub fn new(db: Arc<AccessDatabase>, issuer: impl Into<String>, ttl_secs: i64) -> Self {
        Self {
            db,
            issuer: issuer.into(),
            ttl_secs,
        }
    }

    /// Mint a token for `address`, persisting its signing secret.
    pub fn issue(&self, address: &WalletAddress) -> Result<String, AuthError> {
        let now = Utc::now();
        let key = SessionKey {
            id: uuid::Uuid::new_v4().to_string(),
            address: address.clone(),
            secret_value: random_hex(SECRET_LEN),
            created_at: now,
        };
        self.db
            .insert_session_key(&key)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;

        let claims = SessionClaims {
            address: address.clone(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + self.ttl_secs,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(key.secret_value.as_bytes()),
        )
        .map_err(|e| AuthError::InternalError(e.to_string()))
    }

    /// Validate a token and return the address it is bound to.
    pub fn verify(&self, token: &str) -> Result<WalletAddress, AuthError> {
        // Read the claimed address to locate the signing secret.
        let unverified = jsonwebtoken::dangerous::insecure_decode::<SessionClaims>(token)
            .map_err(|_| AuthError::MalformedToken)?;
        let address = unverified.claims.address;

        let key = self.db.latest_session_key(&address).map_err(|e| {
            if e.is_not_found() {
                AuthError::InvalidSignature
            } else {
                AuthError::InternalError(e.to_string())
            }
        })?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(key.secret_value.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            _ => AuthError::MalformedToken,
        })?;

        if data.claims.address != key.address {
            return Err(AuthError::InvalidSignature);
        }
        Ok(data.claims.address)
    }
}

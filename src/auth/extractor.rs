// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for session-authenticated callers.
//!
//! ```rust,ignore
//! async fn my_handler(SessionAuth(address): SessionAuth) -> impl IntoResponse {
//!     // address is the WalletAddress the session token is bound to
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::AuthError;
use crate::models::WalletAddress;
use crate::state::AppState;

/// Address proven by a valid `Authorization: Bearer <session token>` header.
pub struct SessionAuth(pub WalletAddress);

/// Pull the bearer token out of the request headers.
pub fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)
}

impl FromRequestParts<AppState> for SessionAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let address = state.auth.sessions().verify(token)?;
        Ok(SessionAuth(address))
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Address-ownership authentication endpoints.
//!
//! A rejected signature is a normal outcome: the response is `200` with
//! `signature_valid: false`.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::{AuthError, AuthOutcome, PreflightOutput, RequestMeta, SessionAuth, UserView},
    error::ApiError,
    models::WalletAddress,
    state::AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct AddressQuery {
    /// 0x-prefixed wallet address.
    pub address: String,
}

/// Signed challenge presented on create, login and address linking.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignedChallengeRequest {
    pub address: String,
    /// Hex-encoded 65-byte signature over the nonce.
    pub signature: String,
    /// Nonce the client signed. When present it must match the live nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JwtValidResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

fn parse_address(raw: &str) -> Result<WalletAddress, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid address: {raw}")))
}

#[utoipa::path(
    get,
    path = "/auth/v1/preflight",
    params(AddressQuery),
    tag = "Auth",
    responses(
        (status = 200, body = PreflightOutput),
        (status = 400, description = "Malformed address")
    )
)]
pub async fn preflight(
    State(state): State<AppState>,
    Query(params): Query<AddressQuery>,
) -> Result<Json<PreflightOutput>, ApiError> {
    let address = parse_address(&params.address)?;
    Ok(Json(state.auth.preflight(&address)?))
}

#[utoipa::path(
    post,
    path = "/auth/v1/users/create",
    request_body = SignedChallengeRequest,
    tag = "Auth",
    responses(
        (status = 200, description = "Signature checked; token present when valid", body = AuthOutcome),
        (status = 400, description = "Malformed address or signature"),
        (status = 409, description = "Address already registered")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SignedChallengeRequest>,
) -> Result<Json<AuthOutcome>, ApiError> {
    let address = parse_address(&request.address)?;
    let meta = RequestMeta::from_headers(&headers);
    let outcome = state
        .auth
        .create_user(&address, &request.signature, request.nonce.as_deref(), &meta)?;
    Ok(Json(outcome))
}

#[utoipa::path(
    post,
    path = "/auth/v1/users/login",
    request_body = SignedChallengeRequest,
    tag = "Auth",
    responses(
        (status = 200, description = "Signature checked; token present when valid", body = AuthOutcome),
        (status = 400, description = "Malformed address or signature"),
        (status = 404, description = "No user for address")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SignedChallengeRequest>,
) -> Result<Json<AuthOutcome>, ApiError> {
    let address = parse_address(&request.address)?;
    let meta = RequestMeta::from_headers(&headers);
    let outcome = state
        .auth
        .login(&address, &request.signature, request.nonce.as_deref(), &meta)?;
    Ok(Json(outcome))
}

#[utoipa::path(
    post,
    path = "/auth/v1/users/update",
    request_body = UpdateUserRequest,
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, body = UserView),
        (status = 401, description = "Missing or invalid session")
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    SessionAuth(address): SessionAuth,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserView>, ApiError> {
    let user = state
        .auth
        .update_user(&address, request.username, request.bio)?;
    Ok(Json(user))
}

/// Link another address to the session holder's account.
///
/// The new address proves ownership by signing its own preflight nonce.
#[utoipa::path(
    post,
    path = "/auth/v1/users/addresses/add",
    request_body = SignedChallengeRequest,
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, body = AuthOutcome),
        (status = 401, description = "Missing or invalid session"),
        (status = 409, description = "Address belongs to another user")
    )
)]
pub async fn add_address(
    State(state): State<AppState>,
    SessionAuth(session_address): SessionAuth,
    headers: HeaderMap,
    Json(request): Json<SignedChallengeRequest>,
) -> Result<Json<AuthOutcome>, ApiError> {
    let new_address = parse_address(&request.address)?;
    let meta = RequestMeta::from_headers(&headers);
    let outcome = state.auth.add_address(
        &session_address,
        &new_address,
        &request.signature,
        request.nonce.as_deref(),
        &meta,
    )?;
    Ok(Json(outcome))
}

#[utoipa::path(
    get,
    path = "/auth/v1/users/get",
    params(AddressQuery),
    tag = "Auth",
    responses(
        (status = 200, body = UserView),
        (status = 404, description = "No user for address")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Query(params): Query<AddressQuery>,
) -> Result<Json<UserView>, ApiError> {
    let address = parse_address(&params.address)?;
    Ok(Json(state.auth.get_user(&address)?))
}

/// Whether the presented bearer token is currently valid.
#[utoipa::path(
    get,
    path = "/auth/v1/jwt_valid",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses((status = 200, body = JwtValidResponse))
)]
pub async fn jwt_valid(session: Result<SessionAuth, AuthError>) -> Result<Json<JwtValidResponse>, ApiError> {
    match session {
        Ok(SessionAuth(address)) => Ok(Json(JwtValidResponse {
            valid: true,
            address: Some(address.to_string()),
        })),
        Err(AuthError::InternalError(detail)) => Err(ApiError::internal(detail)),
        Err(e) => {
            tracing::debug!(error_code = e.error_code(), "Session token rejected");
            Ok(Json(JwtValidResponse {
                valid: false,
                address: None,
            }))
        }
    }
}

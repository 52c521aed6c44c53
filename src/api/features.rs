// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Feature access endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::ApiError,
    features::AccessNotification,
    models::FeatureFlag,
    state::AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct UserFeaturesQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserFeaturesResponse {
    pub features: Vec<FeatureFlag>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FlagListResponse {
    pub flags: Vec<FeatureFlag>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NotifyResponse {
    /// Whether a reconciliation was scheduled.
    pub accepted: bool,
}

/// Features the user currently unlocks.
///
/// Also schedules a full reconciliation for the user in the background; the
/// response reflects the state stored before it runs.
#[utoipa::path(
    get,
    path = "/features/v1/access/user_get",
    params(UserFeaturesQuery),
    tag = "Features",
    responses(
        (status = 200, description = "Unlocked features", body = UserFeaturesResponse),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn user_get(
    State(state): State<AppState>,
    Query(params): Query<UserFeaturesQuery>,
) -> Result<Json<UserFeaturesResponse>, ApiError> {
    state.db.get_user(&params.user_id)?;
    let features = state.catalog.user_features(&params.user_id)?;
    state.queue.request_reconcile(&params.user_id);
    Ok(Json(UserFeaturesResponse { features }))
}

#[utoipa::path(
    get,
    path = "/features/v1/flags",
    tag = "Features",
    responses((status = 200, body = FlagListResponse))
)]
pub async fn list_flags(State(state): State<AppState>) -> Result<Json<FlagListResponse>, ApiError> {
    let flags = state.catalog.list()?;
    Ok(Json(FlagListResponse {
        total: flags.len(),
        flags,
    }))
}

/// Push an account notification (signup or address added).
///
/// Delivered on the notification bus; when no listener is subscribed the
/// reconciliation is queued directly.
#[utoipa::path(
    post,
    path = "/features/v1/access/notify",
    request_body = AccessNotification,
    tag = "Features",
    responses(
        (status = 202, description = "Notification accepted", body = NotifyResponse),
        (status = 400, description = "Missing user id")
    )
)]
pub async fn notify(
    State(state): State<AppState>,
    Json(message): Json<AccessNotification>,
) -> Result<(StatusCode, Json<NotifyResponse>), ApiError> {
    if message.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }

    let delivered = state
        .bus
        .publish_json(&state.signup_topic, &message)
        .map_err(ApiError::internal)?;
    let accepted = if delivered > 0 {
        true
    } else {
        state.queue.request_reconcile(&message.user_id)
    };

    Ok((StatusCode::ACCEPTED, Json(NotifyResponse { accepted })))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{AuthOutcome, PreflightOutput, UserView},
    features::{AccessNotification, NotificationKind},
    models::{FeatureFlag, TokenIdentifier, TokenStandard},
    state::AppState,
};

pub mod auth;
pub mod features;
pub mod health;

pub fn router(state: AppState) -> Router {
    let feature_routes = Router::new()
        .route("/access/user_get", get(features::user_get))
        .route("/access/notify", post(features::notify))
        .route("/flags", get(features::list_flags));

    let auth_routes = Router::new()
        .route("/preflight", get(auth::preflight))
        .route("/users/create", post(auth::create_user))
        .route("/users/login", post(auth::login))
        .route("/users/update", post(auth::update_user))
        .route("/users/addresses/add", post(auth::add_address))
        .route("/users/get", get(auth::get_user))
        .route("/jwt_valid", get(auth::jwt_valid));

    Router::new()
        .nest("/features/v1", feature_routes)
        .nest("/auth/v1", auth_routes)
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        features::user_get,
        features::list_flags,
        features::notify,
        auth::preflight,
        auth::create_user,
        auth::login,
        auth::update_user,
        auth::add_address,
        auth::get_user,
        auth::jwt_valid,
        health::health,
        health::liveness
    ),
    components(
        schemas(
            FeatureFlag,
            TokenIdentifier,
            TokenStandard,
            AccessNotification,
            NotificationKind,
            PreflightOutput,
            AuthOutcome,
            UserView,
            auth::SignedChallengeRequest,
            auth::UpdateUserRequest,
            auth::JwtValidResponse,
            features::UserFeaturesResponse,
            features::FlagListResponse,
            features::NotifyResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Features", description = "Token-gated feature access"),
        (name = "Auth", description = "Wallet signature authentication"),
        (name = "Health", description = "Service health")
    )
)]
struct ApiDoc;

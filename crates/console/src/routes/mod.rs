//! HTTP route handlers for the console.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Health check
//! GET  /                       - Redirect to the dashboard
//!
//! # Auth
//! POST /auth/session           - Identity-provider hand-off
//! POST /auth/logout            - Logout action
//! GET  /sign-in                - Sign-in landing
//!
//! # Console (behind the access gate)
//! GET  /dashboard              - Merchant overview
//! GET  /cards                  - Card tooling, bound to the merchant's customer
//! GET  /settings               - Cached identity record
//! GET  /onboarding             - Onboarding form data
//! POST /onboarding             - Complete onboarding
//! ```

pub mod auth;
pub mod dashboard;
pub mod onboarding;
pub mod settings;

use axum::{
    Router,
    extract::Request,
    middleware::{from_fn, from_fn_with_state},
    response::Redirect,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::middleware::{create_session_layer, request_id_middleware, require_identity};
use crate::state::AppState;

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/session", post(auth::create_session))
        .route("/logout", post(auth::logout))
}

/// Create the gated console routes router.
pub fn console_routes(state: &AppState) -> Router<AppState> {
    let routes = &state.config().gate.routes;

    Router::new()
        .route(&routes.dashboard, get(dashboard::show))
        .route("/cards", get(dashboard::cards))
        .route("/settings", get(settings::show))
        .route(
            &routes.onboarding,
            get(onboarding::show).post(onboarding::complete),
        )
        .route_layer(from_fn_with_state(state.clone(), require_identity))
}

/// Create all routes for the console.
pub fn routes(state: &AppState) -> Router<AppState> {
    let dashboard = state.config().gate.routes.dashboard.clone();

    Router::new()
        .route("/", get(move || async move { Redirect::to(&dashboard) }))
        .route(&state.config().gate.routes.sign_in, get(auth::sign_in))
        .nest("/auth", auth_routes())
        .merge(console_routes(state))
}

/// Build the complete application with its middleware stack.
pub fn build_app(state: AppState) -> Router {
    let session_layer = create_session_layer(state.config());

    Router::new()
        .route("/health", get(health))
        .merge(routes(&state))
        .layer(session_layer)
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = tracing::field::Empty,
            )
        }))
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}

/// Liveness health check endpoint.
async fn health() -> &'static str {
    "ok"
}

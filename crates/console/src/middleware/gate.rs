//! Access gate middleware and the identity extractor.
//!
//! Every protected route runs the principal's [`AccessGate`](crate::gate::AccessGate)
//! before the handler. Decisions other than `Allow` become responses here:
//!
//! | decision     | response                                        |
//! |--------------|-------------------------------------------------|
//! | `Checking`   | `503` with `Retry-After: 1`                     |
//! | `SignIn`     | redirect to sign-in (`401` for `/api/` paths)   |
//! | `Onboarding` | redirect to the onboarding route                |
//! | `Dashboard`  | redirect to the dashboard route                 |

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tokio_util::sync::CancellationToken;
use tower_sessions::Session;
use tracing::debug;

use punchcard_core::{GateDecision, IdentityRecord};

use super::session::GateSession;
use crate::config::GateRoutes;
use crate::error::{AppError, add_breadcrumb, set_sentry_user};
use crate::gate::{IdentityStatus, transition};
use crate::identity::SessionProvider;
use crate::models::SignedInPrincipal;
use crate::state::AppState;

/// The signed-in principal and resolved identity of an allowed request.
///
/// `identity` is `None` on the onboarding route when no record was cached.
#[derive(Debug, Clone)]
pub struct CurrentIdentity {
    /// Session hand-off from the identity provider.
    pub principal: SignedInPrincipal,
    /// Resolved identity record.
    pub identity: Option<IdentityRecord>,
}

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("not signed in".to_string()))
    }
}

/// Gate the request on the principal's identity.
pub async fn require_identity(
    State(state): State<AppState>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Response {
    let routes = &state.config().gate.routes;
    let target = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), ToString::to_string);
    let path = request.uri().path().to_string();

    let gate_session = GateSession::load(session).await;
    let Some(principal) = gate_session.principal().cloned() else {
        let decision = transition(gate_session.snapshot(), false, IdentityStatus::Pending);
        return decision_response(decision, &path, &target, routes)
            .unwrap_or_else(|| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    };
    set_sentry_user(&principal.subject, principal.email.as_deref());

    let gate = state.gate_for(principal.login_id).await;
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let evaluation = gate.evaluate(&gate_session, &path, &cancel).await;
    guard.disarm();

    let Some(evaluation) = evaluation else {
        return checking();
    };

    if let Some(response) = decision_response(evaluation.decision, &path, &target, routes) {
        debug!(decision = %evaluation.decision, %path, "request gated");
        add_breadcrumb(
            "gate",
            evaluation.decision.as_str(),
            Some(&[("route", path.as_str())]),
        );
        return response;
    }

    request.extensions_mut().insert(CurrentIdentity {
        principal,
        identity: evaluation.identity,
    });
    next.run(request).await
}

/// Map a non-`Allow` decision to a response. `Allow` yields `None`.
#[must_use]
pub fn decision_response(
    decision: GateDecision,
    path: &str,
    target: &str,
    routes: &GateRoutes,
) -> Option<Response> {
    match decision {
        GateDecision::Allow => None,
        GateDecision::Checking => Some(checking()),
        GateDecision::SignIn if path.starts_with("/api/") => {
            Some(StatusCode::UNAUTHORIZED.into_response())
        }
        GateDecision::SignIn => {
            let location = format!(
                "{}?redirect_url={}",
                routes.sign_in,
                urlencoding::encode(target)
            );
            Some(Redirect::to(&location).into_response())
        }
        GateDecision::Onboarding => Some(Redirect::to(&routes.onboarding).into_response()),
        GateDecision::Dashboard => Some(Redirect::to(&routes.dashboard).into_response()),
    }
}

fn checking() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, "1")],
        "Checking your account",
    )
        .into_response()
}

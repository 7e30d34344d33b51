//! Authentication route handlers.
//!
//! The external identity provider signs the principal in and hands the
//! result to `POST /auth/session`; the console only keeps that hand-off in
//! the session.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::middleware::{clear_principal, set_principal};
use crate::models::{SignedInPrincipal, session_keys};
use crate::state::AppState;

/// Identity-provider hand-off.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandOff {
    /// Stable subject identifier.
    pub subject: String,
    /// Name shown by the identity provider.
    pub display_name: Option<String>,
    /// Primary email address.
    pub email: Option<String>,
    /// Bearer token for the backend.
    pub access_token: String,
    /// Token lifetime in seconds.
    pub expires_in: Option<i64>,
}

/// Query parameters of the sign-in landing.
#[derive(Debug, Deserialize)]
pub struct SignInQuery {
    /// Where to return after signing in.
    pub redirect_url: Option<String>,
}

/// Sign-in landing payload.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignInView {
    /// Local path to return to after signing in.
    pub redirect_url: String,
}

/// Store the principal handed over by the identity provider.
pub async fn create_session(
    State(state): State<AppState>,
    session: Session,
    Json(hand_off): Json<SessionHandOff>,
) -> Result<StatusCode> {
    let subject = hand_off.subject.trim();
    if subject.is_empty() {
        return Err(AppError::BadRequest("subject is required".to_string()));
    }
    if hand_off.access_token.trim().is_empty() {
        return Err(AppError::BadRequest("access token is required".to_string()));
    }

    let expires_at = hand_off
        .expires_in
        .map(|seconds| expiry_after(Utc::now(), seconds))
        .transpose()?;

    if let Some(previous) = session
        .get::<SignedInPrincipal>(session_keys::PRINCIPAL)
        .await?
    {
        state.forget_login(previous.login_id).await;
    }

    let principal = SignedInPrincipal {
        login_id: Uuid::new_v4(),
        subject: subject.to_string(),
        display_name: hand_off.display_name,
        email: hand_off.email,
        access_token: hand_off.access_token,
        expires_at,
    };
    set_principal(&session, &principal).await?;
    set_sentry_user(&principal.subject, principal.email.as_deref());

    info!(subject = %principal.subject, "principal signed in");
    Ok(StatusCode::NO_CONTENT)
}

/// Logout action.
pub async fn logout(State(state): State<AppState>, session: Session) -> Result<Response> {
    if let Some(principal) = session
        .get::<SignedInPrincipal>(session_keys::PRINCIPAL)
        .await?
    {
        state.forget_login(principal.login_id).await;
        info!(subject = %principal.subject, "principal signed out");
    }
    clear_principal(&session).await?;
    clear_sentry_user();

    Ok(Redirect::to(&state.config().gate.routes.sign_in).into_response())
}

/// Sign-in landing.
pub async fn sign_in(State(state): State<AppState>, Query(query): Query<SignInQuery>) -> Json<SignInView> {
    let redirect_url = query
        .redirect_url
        .filter(|url| is_local_path(url))
        .unwrap_or_else(|| state.config().gate.routes.dashboard.clone());

    Json(SignInView { redirect_url })
}

/// Token expiry `seconds` after `now`. Non-positive or unrepresentable
/// lifetimes are rejected.
fn expiry_after(now: DateTime<Utc>, seconds: i64) -> Result<DateTime<Utc>> {
    if seconds <= 0 {
        return Err(AppError::BadRequest("expiresIn must be positive".to_string()));
    }
    Duration::try_seconds(seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| AppError::BadRequest("expiresIn is out of range".to_string()))
}

/// Only same-origin absolute paths are accepted as return targets.
fn is_local_path(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.contains('\\')
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_after_adds_lifetime() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 3600).unwrap(), now + Duration::hours(1));
    }

    #[test]
    fn test_expiry_after_rejects_bad_lifetimes() {
        let now = Utc::now();
        for seconds in [0, -5, i64::MAX, i64::MIN] {
            assert!(
                matches!(expiry_after(now, seconds), Err(AppError::BadRequest(_))),
                "{seconds} should be rejected"
            );
        }
    }

    #[test]
    fn test_is_local_path() {
        assert!(is_local_path("/cards?page=2"));
        assert!(!is_local_path("//evil.example.com"));
        assert!(!is_local_path("https://evil.example.com"));
        assert!(!is_local_path("/\\evil.example.com"));
        assert!(!is_local_path(""));
    }
}

//! Onboarding handlers.
//!
//! The onboarding route stays reachable while the identity is unresolved, so
//! `show` works without a record and prefills from the principal's profile.

use axum::{
    Form, Json,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;

use crate::error::{AppError, Result, add_breadcrumb};
use crate::identity::{OnboardingRequest, SessionProvider};
use crate::middleware::{CurrentIdentity, GateSession};
use crate::state::AppState;

/// Onboarding form data.
#[derive(Debug, Deserialize)]
pub struct OnboardingForm {
    /// Business name.
    pub name: String,
}

/// Onboarding form prefill.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingView {
    /// Suggested business name.
    pub name: Option<String>,
    /// Principal's email.
    pub email: Option<String>,
    /// Whether an identity record already exists.
    pub provisioned: bool,
}

/// Onboarding form prefill.
pub async fn show(current: CurrentIdentity) -> Json<OnboardingView> {
    let name = current
        .identity
        .as_ref()
        .and_then(|identity| identity.name.clone())
        .or_else(|| current.principal.display_name.clone());

    Json(OnboardingView {
        name,
        email: current.principal.email,
        provisioned: current.identity.is_some(),
    })
}

/// Complete onboarding.
pub async fn complete(
    State(state): State<AppState>,
    session: Session,
    current: CurrentIdentity,
    Form(form): Form<OnboardingForm>,
) -> Result<Response> {
    let request = validate(form, current.principal.email.clone())?;

    let token = GateSession::load(session)
        .await
        .acquire_token()
        .await
        .ok_or_else(|| AppError::Unauthorized("session token unavailable".to_string()))?;

    state.api().complete_onboarding(&token, &request).await?;
    state.invalidate_identity(current.principal.login_id).await;

    info!(subject = %current.principal.subject, "onboarding completed");
    add_breadcrumb("onboarding", "Completed onboarding", None);

    Ok(Redirect::to(&state.config().gate.routes.dashboard).into_response())
}

fn validate(form: OnboardingForm, email: Option<String>) -> Result<OnboardingRequest> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("business name is required".to_string()));
    }
    Ok(OnboardingRequest {
        name: name.to_string(),
        email,
    })
}

//! Merchant settings handler.

use axum::{Json, extract::State};

use punchcard_core::IdentityRecord;

use crate::error::{AppError, Result};
use crate::middleware::CurrentIdentity;
use crate::state::AppState;

/// Show the cached identity record.
pub async fn show(
    State(state): State<AppState>,
    current: CurrentIdentity,
) -> Result<Json<IdentityRecord>> {
    state
        .cached_identity(current.principal.login_id)
        .await
        .or(current.identity)
        .map(Json)
        .ok_or_else(|| AppError::Internal("settings reached without identity".to_string()))
}

//! Punchcard backend identity API.
//!
//! # Endpoints
//!
//! ```text
//! GET  {base}/api/me            - 200 identity payload | 404 not provisioned
//! POST {base}/api/me/ensure     - 200/201 identity payload | 409 already provisioned
//! POST {base}/api/onboarding    - 2xx on success
//! ```
//!
//! All calls carry the principal's bearer token.

use std::future::Future;
use std::sync::Arc;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{BearerToken, PrincipalProfile};

const USER_AGENT: &str = concat!("PunchcardConsole/", env!("CARGO_PKG_VERSION"));

/// Display name sent when the principal's profile has none.
pub const PLACEHOLDER_DISPLAY_NAME: &str = "New business";

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not JSON.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body (truncated) for diagnostics.
        message: String,
    },
}

/// Result of the primary "fetch my identity" call.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// 2xx with a decoded JSON body (shape not yet validated).
    Found(Value),
    /// 404: the identity has not been provisioned yet.
    NotProvisioned,
    /// Any other status.
    Rejected(StatusCode),
}

/// Result of the "create my identity" call.
#[derive(Debug, Clone, PartialEq)]
pub enum EnsureOutcome {
    /// 200/201 with a decoded JSON body (shape not yet validated).
    Created(Value),
    /// 409: someone else provisioned the identity first.
    AlreadyProvisioned,
    /// Any other status.
    Rejected(StatusCode),
}

/// Body of the ensure call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureIdentityRequest {
    /// Best-effort business display name.
    pub display_name: String,
    /// Principal's email, if known.
    pub email: Option<String>,
}

impl EnsureIdentityRequest {
    /// Derive the request from the principal's profile.
    #[must_use]
    pub fn from_profile(profile: PrincipalProfile) -> Self {
        let display_name = profile
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| PLACEHOLDER_DISPLAY_NAME.to_string());

        Self {
            display_name,
            email: profile.email.filter(|email| !email.trim().is_empty()),
        }
    }
}

/// Body of the onboarding completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnboardingRequest {
    /// Business name entered by the merchant.
    pub name: String,
    /// Principal's email, if known.
    pub email: Option<String>,
}

/// The backend operations identity resolution depends on.
pub trait IdentityBackend: Send + Sync {
    /// `GET identity` with the bearer token.
    fn fetch_identity(
        &self,
        token: &BearerToken,
    ) -> impl Future<Output = Result<LookupOutcome, BackendError>> + Send;

    /// `POST identity/ensure` with the bearer token.
    fn ensure_identity(
        &self,
        token: &BearerToken,
        request: &EnsureIdentityRequest,
    ) -> impl Future<Output = Result<EnsureOutcome, BackendError>> + Send;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────────────────────────

/// `reqwest` client for the Punchcard backend.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client for the backend at `base_url`.
    #[must_use]
    pub fn new(base_url: &Url) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &Url) -> Self {
        Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url: base_url.as_str().trim_end_matches('/').to_string(),
            }),
        }
    }

    /// Backend base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.inner.base_url)
    }

    /// Submit the onboarding form.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Status` for non-success responses and
    /// `BackendError::Http` if the request fails.
    #[instrument(skip_all)]
    pub async fn complete_onboarding(
        &self,
        token: &BearerToken,
        request: &OnboardingRequest,
    ) -> Result<(), BackendError> {
        let response = self
            .inner
            .client
            .post(self.endpoint("/api/onboarding"))
            .bearer_auth(token.expose())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, "onboarding submitted");
            return Ok(());
        }

        let message = error_body(response).await;
        warn!(%status, %message, "onboarding rejected");
        Err(BackendError::Status { status, message })
    }
}

impl IdentityBackend for ApiClient {
    #[instrument(skip_all)]
    async fn fetch_identity(&self, token: &BearerToken) -> Result<LookupOutcome, BackendError> {
        let response = self
            .inner
            .client
            .get(self.endpoint("/api/me"))
            .bearer_auth(token.expose())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(LookupOutcome::Found(read_json(response).await?));
        }
        if status == StatusCode::NOT_FOUND {
            debug!("identity not provisioned");
            return Ok(LookupOutcome::NotProvisioned);
        }

        let message = error_body(response).await;
        warn!(%status, %message, "identity lookup rejected");
        Ok(LookupOutcome::Rejected(status))
    }

    #[instrument(skip_all)]
    async fn ensure_identity(
        &self,
        token: &BearerToken,
        request: &EnsureIdentityRequest,
    ) -> Result<EnsureOutcome, BackendError> {
        let response = self
            .inner
            .client
            .post(self.endpoint("/api/me/ensure"))
            .bearer_auth(token.expose())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(EnsureOutcome::Created(read_json(response).await?));
        }
        if status == StatusCode::CONFLICT {
            debug!("identity already provisioned");
            return Ok(EnsureOutcome::AlreadyProvisioned);
        }

        let message = error_body(response).await;
        warn!(%status, %message, "identity provisioning rejected");
        Ok(EnsureOutcome::Rejected(status))
    }
}

/// Read the body as text first for better error diagnostics, then decode.
async fn read_json(response: reqwest::Response) -> Result<Value, BackendError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        warn!(error = %e, body_len = body.len(), "identity response is not JSON");
        BackendError::Parse(e)
    })
}

async fn error_body(response: reqwest::Response) -> String {
    const MAX_LEN: usize = 256;
    let mut text = response.text().await.unwrap_or_default();
    if text.len() > MAX_LEN {
        let cut = (0..=MAX_LEN).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_ensure_request_uses_profile_name() {
        let request = EnsureIdentityRequest::from_profile(PrincipalProfile {
            display_name: Some("  Jane's Cafe ".to_string()),
            email: None,
        });
        assert_eq!(request.display_name, "Jane's Cafe");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"displayName": "Jane's Cafe", "email": null})
        );
    }

    #[test]
    fn test_ensure_request_placeholder_name() {
        let request = EnsureIdentityRequest::from_profile(PrincipalProfile {
            display_name: Some("   ".to_string()),
            email: Some("jane@example.com".to_string()),
        });
        assert_eq!(request.display_name, PLACEHOLDER_DISPLAY_NAME);
        assert_eq!(request.email.as_deref(), Some("jane@example.com"));
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = ApiClient::new(&Url::parse("https://api.example.com/").unwrap());
        assert_eq!(client.base_url(), "https://api.example.com");
        assert_eq!(client.endpoint("/api/me"), "https://api.example.com/api/me");
    }

    #[test]
    fn test_endpoint_keeps_path_prefix() {
        let client = ApiClient::new(&Url::parse("https://example.com/backend/").unwrap());
        assert_eq!(
            client.endpoint("/api/me/ensure"),
            "https://example.com/backend/api/me/ensure"
        );
    }
}

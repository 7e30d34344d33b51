//! Identity bootstrap: who is the signed-in principal, as a merchant?
//!
//! # Architecture
//!
//! - [`SessionProvider`] is the seam to the external credential provider: it
//!   knows whether session state has loaded, whether a principal is signed in,
//!   and can (eventually) hand out a short-lived bearer token.
//! - [`IdentityCache`] is a single-slot, time-bound memo of the last resolved
//!   [`IdentityRecord`](punchcard_core::IdentityRecord).
//! - [`IdentityResolver`] fetches the record from the backend, provisioning it
//!   on first contact, and writes successful results to the cache.
//! - [`ApiClient`] is the `reqwest` implementation of [`IdentityBackend`].
//!
//! Malformed payloads and error responses are never cached.

mod backend;
mod cache;
mod fallback;
mod resolver;

pub use backend::{
    ApiClient, BackendError, EnsureIdentityRequest, EnsureOutcome, IdentityBackend,
    LookupOutcome, OnboardingRequest,
};
pub use cache::{CacheEntry, Clock, IdentityCache, SystemClock};
#[cfg(test)]
pub use cache::ManualClock;
pub use fallback::CustomerBinding;
pub use resolver::{IdentityResolver, TokenRetryPolicy};

#[cfg(test)]
pub(crate) use resolver::tests as testing;

use std::future::Future;

pub use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use punchcard_core::ShapeError;

/// Opaque bearer credential issued by the session provider.
///
/// Never persisted by the identity layer and never logged.
#[derive(Debug, Clone)]
pub struct BearerToken(SecretString);

impl BearerToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Expose the raw token for an `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Profile details of the signed-in principal, as known to the session provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalProfile {
    /// Name shown by the identity provider (e.g. full name or organisation).
    pub display_name: Option<String>,
    /// Primary email address.
    pub email: Option<String>,
}

/// Point-in-time view of the session provider's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionSnapshot {
    /// Identity-provider state has loaded.
    pub ready: bool,
    /// A principal is signed in.
    pub authenticated: bool,
}

impl SessionSnapshot {
    /// Loaded and signed in.
    #[must_use]
    pub const fn is_signed_in(self) -> bool {
        self.ready && self.authenticated
    }
}

/// The external credential/session provider.
///
/// Implementations: [`GateSession`](crate::middleware::GateSession) over a
/// `tower-sessions` session, and the CLI's static token session.
pub trait SessionProvider: Send + Sync {
    /// Whether identity-provider state has loaded.
    fn is_ready(&self) -> bool;

    /// Whether a principal is signed in.
    fn is_authenticated(&self) -> bool;

    /// Profile of the signed-in principal (empty when signed out).
    fn profile(&self) -> PrincipalProfile;

    /// Try to obtain a bearer token. `None` means "not available right now".
    fn acquire_token(&self) -> impl Future<Output = Option<BearerToken>> + Send;

    /// Capture readiness and sign-in state together.
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            ready: self.is_ready(),
            authenticated: self.is_authenticated(),
        }
    }
}

/// Why the backend did not produce an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// 401 or 403: the token was not accepted.
    #[error("backend rejected the credentials ({0})")]
    Unauthorized(StatusCode),
    /// Any other non-success status.
    #[error("backend returned {0}")]
    Status(StatusCode),
    /// The request never produced a usable response.
    #[error("transport error: {0}")]
    Transport(String),
}

impl FailureReason {
    /// Classify a non-success status.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Self::Unauthorized(status)
        } else {
            Self::Status(status)
        }
    }
}

impl From<BackendError> for FailureReason {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Status { status, .. } => Self::from_status(status),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Errors surfaced by identity resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The session provider produced no token within the retry bound.
    #[error("no session token after {attempts} attempts")]
    TokenUnavailable {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The backend answered with an error or could not be reached.
    #[error("identity resolution failed: {0}")]
    ResolutionFailed(#[from] FailureReason),

    /// The payload was JSON but not a well-formed identity record.
    #[error("invalid identity payload: {0}")]
    InvalidShape(#[from] ShapeError),

    /// The evaluation that requested the identity is no longer current.
    #[error("identity resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// The backend explicitly refused the principal's credentials.
    #[must_use]
    pub const fn is_authorization_failure(&self) -> bool {
        matches!(self, Self::ResolutionFailed(FailureReason::Unauthorized(_)))
    }

    /// Whether previously cached identity data must stop being trusted.
    #[must_use]
    pub const fn invalidates_trust(&self) -> bool {
        matches!(self, Self::InvalidShape(_)) || self.is_authorization_failure()
    }
}

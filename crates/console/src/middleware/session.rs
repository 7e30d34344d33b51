//! Session middleware configuration and the session-backed credential source.
//!
//! Sessions live in the in-process `MemoryStore`; the console keeps nothing
//! but the identity-provider hand-off in them.

use chrono::Utc;
use tower_sessions::{Expiry, MemoryStore, Session, SessionManagerLayer};
use tracing::warn;

use crate::config::ConsoleConfig;
use crate::identity::{BearerToken, PrincipalProfile, SessionProvider};
use crate::models::{SignedInPrincipal, session_keys};

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "pc_session";

/// Session expiry time in seconds (12 hours).
const SESSION_EXPIRY_SECONDS: i64 = 12 * 60 * 60;

/// Create the session layer with an in-memory store.
#[must_use]
pub fn create_session_layer(config: &ConsoleConfig) -> SessionManagerLayer<MemoryStore> {
    SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(config.is_secure())
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}

/// Store the signed-in principal in the session.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_principal(
    session: &Session,
    principal: &SignedInPrincipal,
) -> Result<(), tower_sessions::session::Error> {
    session.cycle_id().await?;
    session.insert(session_keys::PRINCIPAL, principal).await
}

/// Clear the whole session.
///
/// # Errors
///
/// Returns an error if the session store cannot be modified.
pub async fn clear_principal(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.flush().await
}

/// [`SessionProvider`] over a `tower-sessions` session.
///
/// Readiness and sign-in state are captured when the adapter is loaded; a
/// session store failure leaves it not ready. Tokens are re-read from the
/// session on every acquisition attempt.
#[derive(Debug, Clone)]
pub struct GateSession {
    session: Session,
    ready: bool,
    principal: Option<SignedInPrincipal>,
}

impl GateSession {
    /// Load the principal from `session`.
    pub async fn load(session: Session) -> Self {
        match session.get::<SignedInPrincipal>(session_keys::PRINCIPAL).await {
            Ok(principal) => Self {
                session,
                ready: true,
                principal,
            },
            Err(e) => {
                warn!(error = %e, "session store unavailable");
                Self {
                    session,
                    ready: false,
                    principal: None,
                }
            }
        }
    }

    /// The signed-in principal, if any.
    #[must_use]
    pub const fn principal(&self) -> Option<&SignedInPrincipal> {
        self.principal.as_ref()
    }
}

impl SessionProvider for GateSession {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    fn profile(&self) -> PrincipalProfile {
        self.principal
            .as_ref()
            .map(SignedInPrincipal::profile)
            .unwrap_or_default()
    }

    async fn acquire_token(&self) -> Option<BearerToken> {
        self.session
            .get::<SignedInPrincipal>(session_keys::PRINCIPAL)
            .await
            .ok()
            .flatten()
            .and_then(|principal| principal.usable_token(Utc::now()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;

    fn session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    fn principal() -> SignedInPrincipal {
        SignedInPrincipal {
            login_id: uuid::Uuid::new_v4(),
            subject: "user_123".to_string(),
            display_name: Some("Jane's Cafe".to_string()),
            email: Some("jane@example.com".to_string()),
            access_token: "tok".to_string(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_empty_session_is_ready_but_signed_out() {
        let gate_session = GateSession::load(session()).await;

        assert!(gate_session.is_ready());
        assert!(!gate_session.is_authenticated());
        assert_eq!(gate_session.profile(), PrincipalProfile::default());
        assert!(gate_session.acquire_token().await.is_none());
    }

    #[tokio::test]
    async fn test_signed_in_session_yields_token_and_profile() {
        let session = session();
        session.insert(session_keys::PRINCIPAL, principal()).await.unwrap();

        let gate_session = GateSession::load(session).await;

        assert!(gate_session.snapshot().is_signed_in());
        assert_eq!(
            gate_session.profile().display_name.as_deref(),
            Some("Jane's Cafe")
        );
        assert_eq!(gate_session.acquire_token().await.unwrap().expose(), "tok");
    }

    #[tokio::test]
    async fn test_token_is_reread_each_attempt() {
        let session = session();
        let mut expired = principal();
        expired.expires_at = Some(Utc::now() - Duration::minutes(5));
        session.insert(session_keys::PRINCIPAL, &expired).await.unwrap();
        let gate_session = GateSession::load(session.clone()).await;

        assert!(gate_session.acquire_token().await.is_none());

        session.insert(session_keys::PRINCIPAL, principal()).await.unwrap();
        assert!(gate_session.acquire_token().await.is_some());
    }
}

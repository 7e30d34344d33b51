//! Session-related types.
//!
//! Types stored in the session for authentication state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{BearerToken, PrincipalProfile};

/// Seconds before expiry at which a token is no longer handed out.
const EXPIRY_BUFFER_SECONDS: i64 = 30;

/// The signed-in principal as handed over by the identity provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct SignedInPrincipal {
    /// Server-issued ID of this sign-in. Identity slots are keyed by it, so a
    /// cached identity is only ever served back to the login whose token
    /// resolved it.
    pub login_id: Uuid,
    /// Stable subject identifier from the identity provider.
    pub subject: String,
    /// Name shown by the identity provider.
    pub display_name: Option<String>,
    /// Primary email address.
    pub email: Option<String>,
    /// Short-lived bearer token for the backend.
    pub access_token: String,
    /// When the access token stops being accepted.
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for SignedInPrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedInPrincipal")
            .field("login_id", &self.login_id)
            .field("subject", &self.subject)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl SignedInPrincipal {
    /// Profile details for identity provisioning.
    #[must_use]
    pub fn profile(&self) -> PrincipalProfile {
        PrincipalProfile {
            display_name: self.display_name.clone(),
            email: self.email.clone(),
        }
    }

    /// Whether the token is expired at `now` (with a small buffer).
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now.timestamp() >= expires_at.timestamp() - EXPIRY_BUFFER_SECONDS)
    }

    /// The bearer token, unless it is empty or expired at `now`.
    #[must_use]
    pub fn usable_token(&self, now: DateTime<Utc>) -> Option<BearerToken> {
        if self.access_token.trim().is_empty() || self.is_expired(now) {
            return None;
        }
        Some(BearerToken::new(self.access_token.clone()))
    }
}

/// Session keys for authentication data.
pub mod keys {
    /// Key for the signed-in principal.
    pub const PRINCIPAL: &str = "principal";
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn principal(expires_at: Option<DateTime<Utc>>) -> SignedInPrincipal {
        SignedInPrincipal {
            login_id: Uuid::new_v4(),
            subject: "user_123".to_string(),
            display_name: Some("Jane's Cafe".to_string()),
            email: None,
            access_token: "tok_secret".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", principal(None));
        assert!(!debug.contains("tok_secret"));
        assert!(debug.contains("user_123"));
    }

    #[test]
    fn test_token_without_expiry_is_usable() {
        let token = principal(None).usable_token(Utc::now()).unwrap();
        assert_eq!(token.expose(), "tok_secret");
    }

    #[test]
    fn test_expired_token_is_not_usable() {
        let now = Utc::now();
        assert!(principal(Some(now - Duration::minutes(1))).usable_token(now).is_none());
        assert!(principal(Some(now + Duration::seconds(10))).usable_token(now).is_none());
        assert!(principal(Some(now + Duration::minutes(5))).usable_token(now).is_some());
    }

    #[test]
    fn test_empty_token_is_not_usable() {
        let mut principal = principal(None);
        principal.access_token = "  ".to_string();
        assert!(principal.usable_token(Utc::now()).is_none());
    }
}

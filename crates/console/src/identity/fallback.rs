//! Customer ID binding with the development fallback.
//!
//! Local development sometimes runs against a backend that cannot resolve
//! identities yet. A configured fallback customer ID keeps command-line tooling usable
//! in that case, but it is never trusted and never used once the backend has
//! explicitly refused the principal's credentials.

use punchcard_core::{CustomerId, IdentityRecord};

use super::ResolveError;

/// Which customer the console acts on behalf of, and how it was determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerBinding {
    /// Taken from a successfully resolved identity.
    Trusted(CustomerId),
    /// Development fallback; identity resolution did not succeed.
    Fallback(CustomerId),
}

impl CustomerBinding {
    /// Bind a customer from a resolution result.
    ///
    /// Falls back only for `TokenUnavailable` and non-authorization backend
    /// failures. Authorization failures, malformed payloads and cancelled
    /// resolutions yield `None`.
    #[must_use]
    pub fn from_resolution(
        result: &Result<IdentityRecord, ResolveError>,
        fallback: Option<&CustomerId>,
    ) -> Option<Self> {
        match result {
            Ok(record) => Some(Self::Trusted(record.customer_id.clone())),
            Err(err) if err.is_authorization_failure() => None,
            Err(err @ (ResolveError::TokenUnavailable { .. } | ResolveError::ResolutionFailed(_))) => {
                let id = fallback?;
                tracing::warn!(customer_id = %id, error = %err, "using fallback customer id");
                Some(Self::Fallback(id.clone()))
            }
            Err(ResolveError::InvalidShape(_) | ResolveError::Cancelled) => None,
        }
    }

    /// The bound customer ID.
    #[must_use]
    pub const fn customer_id(&self) -> &CustomerId {
        match self {
            Self::Trusted(id) | Self::Fallback(id) => id,
        }
    }

    /// Whether the binding came from a real resolution.
    #[must_use]
    pub const fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted(_))
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use punchcard_core::{MerchantId, ShapeError};

    use super::*;
    use crate::identity::FailureReason;

    fn fallback() -> CustomerId {
        CustomerId::new("c_dev")
    }

    #[test]
    fn test_success_is_trusted() {
        let record = IdentityRecord {
            merchant_id: MerchantId::new("m1"),
            customer_id: CustomerId::new("c1"),
            name: None,
            tax_id: None,
            phone: None,
            address: None,
            website_url: None,
            onboarding_completed: true,
        };
        let binding = CustomerBinding::from_resolution(&Ok(record), Some(&fallback()));
        assert_eq!(binding, Some(CustomerBinding::Trusted(CustomerId::new("c1"))));
    }

    #[test]
    fn test_token_unavailable_uses_fallback() {
        let result = Err(ResolveError::TokenUnavailable { attempts: 6 });
        let binding = CustomerBinding::from_resolution(&result, Some(&fallback())).map(|b| {
            assert!(!b.is_trusted());
            b.customer_id().clone()
        });
        assert_eq!(binding, Some(fallback()));
    }

    #[test]
    fn test_server_error_uses_fallback() {
        let result = Err(ResolveError::ResolutionFailed(FailureReason::Status(
            StatusCode::SERVICE_UNAVAILABLE,
        )));
        assert_eq!(
            CustomerBinding::from_resolution(&result, Some(&fallback())),
            Some(CustomerBinding::Fallback(fallback()))
        );
    }

    #[test]
    fn test_authorization_failure_never_uses_fallback() {
        let result = Err(ResolveError::ResolutionFailed(FailureReason::Unauthorized(
            StatusCode::FORBIDDEN,
        )));
        assert_eq!(CustomerBinding::from_resolution(&result, Some(&fallback())), None);
    }

    #[test]
    fn test_invalid_shape_never_uses_fallback() {
        let result = Err(ResolveError::InvalidShape(ShapeError::NotAnObject));
        assert_eq!(CustomerBinding::from_resolution(&result, Some(&fallback())), None);
    }

    #[test]
    fn test_no_fallback_configured() {
        let result = Err(ResolveError::TokenUnavailable { attempts: 6 });
        assert_eq!(CustomerBinding::from_resolution(&result, None), None);
    }
}

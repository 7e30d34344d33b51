//! Identity diagnostics.
//!
//! # Usage
//!
//! ```bash
//! punchcard-cli whoami --token "$TOKEN" --route /cards
//! ```
//!
//! # Environment Variables
//!
//! - `PUNCHCARD_TOKEN` - Bearer token (instead of `--token`)
//! - `PUNCHCARD_API_BASE_URL` - Backend base URL (instead of `--api`)
//! - `CONSOLE_FALLBACK_CUSTOMER_ID` - Development-only customer ID fallback
//!
//! Resolving an unprovisioned identity provisions it, exactly like the
//! console does on first sign-in.

use std::fmt::Write as _;
use std::sync::Arc;

use punchcard_console::config::GateRoutes;
use punchcard_console::gate::{IdentityStatus, normalize_route, transition};
use punchcard_console::identity::{
    ApiClient, BearerToken, CustomerBinding, IdentityCache, IdentityResolver, PrincipalProfile,
    ResolveError, SessionProvider, TokenRetryPolicy,
};
use punchcard_core::{CustomerId, GateDecision, IdentityRecord};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Errors that can occur while running `whoami`.
#[derive(Debug, Error)]
pub enum WhoamiError {
    /// The token argument is blank.
    #[error("Token must not be empty")]
    EmptyToken,

    /// Interrupted before the identity was resolved.
    #[error("Interrupted")]
    Interrupted,

    /// The record could not be printed.
    #[error("Failed to render identity: {0}")]
    Render(#[from] serde_json::Error),
}

/// Arguments of the `whoami` command.
#[derive(Debug)]
pub struct WhoamiArgs {
    /// Bearer token.
    pub token: String,
    /// Route to evaluate.
    pub route: String,
    /// Backend base URL.
    pub api: Url,
    /// Display name for provisioning.
    pub display_name: Option<String>,
    /// Development-only customer ID fallback.
    pub fallback_customer_id: Option<String>,
}

/// A signed-in session with a fixed token.
struct StaticSession {
    token: BearerToken,
    profile: PrincipalProfile,
}

impl StaticSession {
    fn new(token: &str, display_name: Option<String>) -> Result<Self, WhoamiError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(WhoamiError::EmptyToken);
        }
        Ok(Self {
            token: BearerToken::new(token),
            profile: PrincipalProfile {
                display_name,
                email: None,
            },
        })
    }
}

impl SessionProvider for StaticSession {
    fn is_ready(&self) -> bool {
        true
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn profile(&self) -> PrincipalProfile {
        self.profile.clone()
    }

    async fn acquire_token(&self) -> Option<BearerToken> {
        Some(self.token.clone())
    }
}

/// Resolve the identity and print the gate decision.
///
/// # Errors
///
/// Returns `WhoamiError` for a blank token, an interrupt, or a record that
/// cannot be rendered. Resolution failures are part of the report.
pub async fn run(args: WhoamiArgs) -> Result<(), WhoamiError> {
    let session = StaticSession::new(&args.token, args.display_name)?;
    let resolver = IdentityResolver::new(
        ApiClient::new(&args.api),
        Arc::new(IdentityCache::default()),
        TokenRetryPolicy::default(),
    );

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    tracing::info!(api = %args.api, "resolving identity");
    let result = resolver.resolve(&session, &cancel).await;
    interrupt.abort();

    if matches!(result, Err(ResolveError::Cancelled)) {
        return Err(WhoamiError::Interrupted);
    }

    let on_onboarding =
        normalize_route(&args.route) == normalize_route(&GateRoutes::default().onboarding);
    let status = match &result {
        Ok(record) => IdentityStatus::Resolved(record),
        Err(_) => IdentityStatus::Failed,
    };
    let decision = transition(session.snapshot(), on_onboarding, status);

    let fallback = args.fallback_customer_id.map(CustomerId::new);
    let binding = CustomerBinding::from_resolution(&result, fallback.as_ref());

    let report = render(&args.route, decision, &result, binding.as_ref())?;
    #[allow(clippy::print_stdout)]
    {
        print!("{report}");
    }
    Ok(())
}

fn render(
    route: &str,
    decision: GateDecision,
    result: &Result<IdentityRecord, ResolveError>,
    binding: Option<&CustomerBinding>,
) -> Result<String, WhoamiError> {
    let mut out = String::new();
    let _ = writeln!(out, "route:    {route}");
    let _ = writeln!(out, "decision: {decision}");

    match result {
        Ok(record) => {
            let _ = writeln!(out, "identity:");
            let _ = writeln!(out, "{}", serde_json::to_string_pretty(record)?);
        }
        Err(err) => {
            let _ = writeln!(out, "identity: unresolved ({err})");
        }
    }

    match binding {
        Some(CustomerBinding::Trusted(id)) => {
            let _ = writeln!(out, "customer: {id}");
        }
        Some(CustomerBinding::Fallback(id)) => {
            let _ = writeln!(out, "customer: {id} (development fallback, UNTRUSTED)");
        }
        None => {
            let _ = writeln!(out, "customer: none");
        }
    }

    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use punchcard_console::identity::{FailureReason, StatusCode};
    use punchcard_core::MerchantId;

    use super::*;

    fn record() -> IdentityRecord {
        IdentityRecord {
            merchant_id: MerchantId::new("m1"),
            customer_id: CustomerId::new("c1"),
            name: Some("Jane's Cafe".to_string()),
            tax_id: None,
            phone: None,
            address: None,
            website_url: None,
            onboarding_completed: false,
        }
    }

    #[test]
    fn test_blank_token_is_rejected() {
        assert!(matches!(
            StaticSession::new("  ", None),
            Err(WhoamiError::EmptyToken)
        ));
    }

    #[tokio::test]
    async fn test_static_session_always_has_token() {
        let session = StaticSession::new(" tok ", Some("Jane's Cafe".to_string())).unwrap();
        assert!(session.snapshot().is_signed_in());
        assert_eq!(session.acquire_token().await.unwrap().expose(), "tok");
    }

    #[test]
    fn test_render_resolved_identity() {
        let result = Ok(record());
        let binding = CustomerBinding::Trusted(CustomerId::new("c1"));

        let out = render("/dashboard", GateDecision::Onboarding, &result, Some(&binding)).unwrap();

        assert!(out.contains("decision: onboarding"));
        assert!(out.contains("\"merchantId\": \"m1\""));
        assert!(out.contains("customer: c1\n"));
    }

    #[test]
    fn test_render_labels_fallback_untrusted() {
        let result = Err(ResolveError::ResolutionFailed(FailureReason::Status(
            StatusCode::SERVICE_UNAVAILABLE,
        )));
        let binding = CustomerBinding::Fallback(CustomerId::new("c_dev"));

        let out = render("/cards", GateDecision::SignIn, &result, Some(&binding)).unwrap();

        assert!(out.contains("decision: sign_in"));
        assert!(out.contains("identity: unresolved"));
        assert!(out.contains("c_dev (development fallback, UNTRUSTED)"));
    }
}

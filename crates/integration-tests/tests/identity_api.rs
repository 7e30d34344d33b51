//! Identity resolution against the HTTP backend API.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use punchcard_console::identity::{
    ApiClient, BearerToken, EnsureIdentityRequest, EnsureOutcome, IdentityBackend,
    IdentityCache, IdentityResolver, LookupOutcome, OnboardingRequest, PrincipalProfile,
    ResolveError, SessionProvider, StatusCode, TokenRetryPolicy,
};
use punchcard_integration_tests::{FakeBackend, identity_payload};
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct TokenSession {
    token: Option<&'static str>,
    display_name: Option<&'static str>,
}

impl SessionProvider for TokenSession {
    fn is_ready(&self) -> bool {
        true
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn profile(&self) -> PrincipalProfile {
        PrincipalProfile {
            display_name: self.display_name.map(str::to_string),
            email: None,
        }
    }

    async fn acquire_token(&self) -> Option<BearerToken> {
        self.token.map(BearerToken::new)
    }
}

fn resolver(backend: &FakeBackend) -> IdentityResolver<ApiClient> {
    IdentityResolver::new(
        ApiClient::new(backend.base_url()),
        Arc::new(IdentityCache::default()),
        TokenRetryPolicy {
            attempts: 6,
            delay: std::time::Duration::from_millis(5),
        },
    )
}

#[tokio::test]
async fn test_lookup_outcomes() {
    let backend = FakeBackend::spawn().await;
    backend.allow("new");
    backend.provision("known", identity_payload("m1", Some("Cafe"), true));
    let client = ApiClient::new(backend.base_url());

    let found = client.fetch_identity(&BearerToken::new("known")).await.unwrap();
    assert!(matches!(found, LookupOutcome::Found(ref body) if body["merchantId"] == "m1"));

    let missing = client.fetch_identity(&BearerToken::new("new")).await.unwrap();
    assert_eq!(missing, LookupOutcome::NotProvisioned);

    let rejected = client.fetch_identity(&BearerToken::new("stranger")).await.unwrap();
    assert_eq!(rejected, LookupOutcome::Rejected(StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn test_ensure_conflict_is_already_provisioned() {
    let backend = FakeBackend::spawn().await;
    backend.provision("known", identity_payload("m1", Some("Cafe"), true));
    let client = ApiClient::new(backend.base_url());

    let request = EnsureIdentityRequest::from_profile(PrincipalProfile::default());
    let outcome = client
        .ensure_identity(&BearerToken::new("known"), &request)
        .await
        .unwrap();

    assert_eq!(outcome, EnsureOutcome::AlreadyProvisioned);
}

#[tokio::test]
async fn test_first_contact_provisions_with_profile_name() {
    let backend = FakeBackend::spawn().await;
    backend.allow("tok");
    let resolver = resolver(&backend);
    let session = TokenSession {
        token: Some("tok"),
        display_name: Some("Jane's Cafe"),
    };

    let record = resolver
        .resolve(&session, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!record.onboarding_completed);
    assert_eq!(record.name.as_deref(), Some("Jane's Cafe"));
    assert_eq!(
        backend.ensure_requests(),
        vec![json!({"displayName": "Jane's Cafe", "email": null})]
    );
    assert_eq!(
        resolver.cache().read(std::time::Duration::from_secs(60)),
        Some(record)
    );
}

#[tokio::test]
async fn test_repeated_resolution_creates_one_record() {
    let backend = FakeBackend::spawn().await;
    backend.allow("tok");
    let resolver = resolver(&backend);
    let session = TokenSession {
        token: Some("tok"),
        display_name: None,
    };
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        resolver.resolve(&session, &cancel),
        resolver.resolve(&session, &cancel)
    );
    let third = resolver.resolve(&session, &cancel).await.unwrap();

    assert_eq!(first.unwrap(), third);
    assert_eq!(second.unwrap(), third);
    assert_eq!(backend.ensures(), 1);
    assert_eq!(third.name.as_deref(), Some("New business"));
}

#[tokio::test]
async fn test_rejected_token_is_not_retried() {
    let backend = FakeBackend::spawn().await;
    let resolver = resolver(&backend);
    let session = TokenSession {
        token: Some("stranger"),
        display_name: None,
    };

    let err = resolver
        .resolve(&session, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_authorization_failure());
    assert_eq!(backend.lookups(), 1);
    assert_eq!(backend.ensures(), 0);
    assert!(resolver.cache().entry().is_none());
}

#[tokio::test]
async fn test_missing_token_makes_no_backend_call() {
    let backend = FakeBackend::spawn().await;
    let resolver = resolver(&backend);
    let session = TokenSession {
        token: None,
        display_name: None,
    };

    let err = resolver
        .resolve(&session, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::TokenUnavailable { attempts: 6 }));
    assert_eq!(backend.lookups(), 0);
}

#[tokio::test]
async fn test_malformed_record_is_rejected() {
    let backend = FakeBackend::spawn().await;
    backend.provision("tok", json!({"merchantId": "m1", "customerId": "c1"}));
    let resolver = resolver(&backend);
    let session = TokenSession {
        token: Some("tok"),
        display_name: None,
    };

    let err = resolver
        .resolve(&session, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::InvalidShape(_)));
    assert!(resolver.cache().entry().is_none());
}

#[tokio::test]
async fn test_complete_onboarding() {
    let backend = FakeBackend::spawn().await;
    backend.provision("tok", identity_payload("m1", None, false));
    let client = ApiClient::new(backend.base_url());

    client
        .complete_onboarding(
            &BearerToken::new("tok"),
            &OnboardingRequest {
                name: "Jane's Cafe".to_string(),
                email: Some("jane@example.com".to_string()),
            },
        )
        .await
        .unwrap();

    let record = backend.record("tok").unwrap();
    assert_eq!(record["onboardingCompleted"], true);
    assert_eq!(record["name"], "Jane's Cafe");
    assert_eq!(
        backend.onboarding_requests(),
        vec![json!({"name": "Jane's Cafe", "email": "jane@example.com"})]
    );
}

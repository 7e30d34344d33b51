//! Identity resolution with create-on-missing semantics.
//!
//! # Algorithm
//!
//! 1. Acquire a bearer token, retrying a bounded number of times while the
//!    session provider warms up.
//! 2. Look the identity up. A well-formed record is cached and returned; 404
//!    means "not provisioned yet"; any other status fails.
//! 3. Provision ("ensure") the identity with a display name taken from the
//!    principal's profile. A 409 means a concurrent resolution won the race and
//!    the record is looked up once more.
//!
//! A resolution makes at most two backend calls (lookup, ensure), except on
//! the 409 path, which adds a third: the second lookup.
//!
//! Every suspension point races the caller's cancellation token. Lookup and
//! provisioning for one resolver are serialized so two overlapping
//! resolutions for an unprovisioned principal create a single record.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use punchcard_core::IdentityRecord;

use super::backend::{EnsureIdentityRequest, EnsureOutcome, IdentityBackend, LookupOutcome};
use super::cache::IdentityCache;
use super::{BearerToken, FailureReason, ResolveError, SessionProvider};

/// Bounded retry for token acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl TokenRetryPolicy {
    /// Default number of attempts.
    pub const DEFAULT_ATTEMPTS: u32 = 6;
    /// Default pause between attempts, in milliseconds.
    pub const DEFAULT_DELAY_MS: u64 = 300;
}

impl Default for TokenRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: Self::DEFAULT_ATTEMPTS,
            delay: Duration::from_millis(Self::DEFAULT_DELAY_MS),
        }
    }
}

/// Resolves (and on first contact provisions) the principal's identity.
pub struct IdentityResolver<B> {
    backend: B,
    cache: Arc<IdentityCache>,
    retry: TokenRetryPolicy,
    provisioning: Mutex<()>,
}

impl<B> std::fmt::Debug for IdentityResolver<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<B: IdentityBackend> IdentityResolver<B> {
    /// Create a resolver writing successful results to `cache`.
    #[must_use]
    pub fn new(backend: B, cache: Arc<IdentityCache>, retry: TokenRetryPolicy) -> Self {
        Self {
            backend,
            cache,
            retry,
            provisioning: Mutex::new(()),
        }
    }

    /// The cache this resolver writes to.
    #[must_use]
    pub const fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    /// The backend this resolver talks to.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve the identity of the principal behind `session`.
    ///
    /// # Errors
    ///
    /// - `TokenUnavailable` if no token was issued within the retry bound
    ///   (no backend call is made)
    /// - `ResolutionFailed` for error statuses and transport failures
    /// - `InvalidShape` for payloads that are not well-formed records
    /// - `Cancelled` if `cancel` fired at a suspension point
    #[instrument(skip_all)]
    pub async fn resolve<S: SessionProvider>(
        &self,
        session: &S,
        cancel: &CancellationToken,
    ) -> Result<IdentityRecord, ResolveError> {
        let token = self.acquire_token(session, cancel).await?;
        let _provisioning = until_cancelled(cancel, self.provisioning.lock()).await?;

        match self.lookup(&token, cancel).await? {
            LookupOutcome::Found(payload) => return self.accept(&payload),
            LookupOutcome::NotProvisioned => {}
            LookupOutcome::Rejected(status) => {
                return Err(FailureReason::from_status(status).into());
            }
        }

        let request = EnsureIdentityRequest::from_profile(session.profile());
        info!(display_name = %request.display_name, "provisioning identity");

        let outcome = until_cancelled(cancel, self.backend.ensure_identity(&token, &request))
            .await?
            .map_err(FailureReason::from)?;

        match outcome {
            EnsureOutcome::Created(payload) => self.accept(&payload),
            EnsureOutcome::AlreadyProvisioned => match self.lookup(&token, cancel).await? {
                LookupOutcome::Found(payload) => self.accept(&payload),
                LookupOutcome::NotProvisioned => {
                    warn!("identity reported as provisioned but lookup still 404s");
                    Err(FailureReason::Status(reqwest::StatusCode::NOT_FOUND).into())
                }
                LookupOutcome::Rejected(status) => Err(FailureReason::from_status(status).into()),
            },
            EnsureOutcome::Rejected(status) => Err(FailureReason::from_status(status).into()),
        }
    }

    async fn acquire_token<S: SessionProvider>(
        &self,
        session: &S,
        cancel: &CancellationToken,
    ) -> Result<BearerToken, ResolveError> {
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            if let Some(token) = until_cancelled(cancel, session.acquire_token()).await? {
                if attempt > 1 {
                    debug!(attempt, "session token became available");
                }
                return Ok(token);
            }
            if attempt < attempts {
                until_cancelled(cancel, tokio::time::sleep(self.retry.delay)).await?;
            }
        }

        warn!(attempts, "session token unavailable");
        Err(ResolveError::TokenUnavailable { attempts })
    }

    async fn lookup(
        &self,
        token: &BearerToken,
        cancel: &CancellationToken,
    ) -> Result<LookupOutcome, ResolveError> {
        let outcome = until_cancelled(cancel, self.backend.fetch_identity(token))
            .await?
            .map_err(FailureReason::from)?;
        Ok(outcome)
    }

    /// Validate, cache and return a payload. Malformed payloads are never cached.
    fn accept(&self, payload: &Value) -> Result<IdentityRecord, ResolveError> {
        match IdentityRecord::from_payload(payload) {
            Ok(record) => {
                debug!(merchant_id = %record.merchant_id, "identity resolved");
                self.cache.write(record.clone());
                Ok(record)
            }
            Err(err) => {
                warn!(error = %err, "identity payload failed validation");
                Err(err.into())
            }
        }
    }
}

/// Race `future` against cancellation.
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, ResolveError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ResolveError::Cancelled),
        output = future => Ok(output),
    }
}

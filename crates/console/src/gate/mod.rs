//! Access gate: decides what a signed-in principal may see on a route.
//!
//! The decision logic is a single pure function, [`transition`], over the
//! session snapshot, whether the route is the onboarding route, and the
//! identity resolution status. [`AccessGate`] drives it: it consults the
//! identity cache, resolves on a miss and maps every failure to
//! [`GateDecision::SignIn`].
//!
//! The onboarding route is reachable without a resolved identity. On a cache
//! hit the record still decides, so a merchant who already finished onboarding
//! is sent to the dashboard.

mod controller;

pub use controller::{GateController, GateInputs};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use punchcard_core::{GateDecision, IdentityRecord};

use crate::config::{GateConfig, GateRoutes};
use crate::identity::{
    IdentityBackend, IdentityCache, IdentityResolver, ResolveError, SessionProvider,
    SessionSnapshot,
};

/// Where identity resolution stands for the current evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStatus<'a> {
    /// Not resolved yet.
    Pending,
    /// A well-formed record is available.
    Resolved(&'a IdentityRecord),
    /// Resolution failed.
    Failed,
}

/// The gate's state transition.
#[must_use]
pub const fn transition(
    session: SessionSnapshot,
    on_onboarding: bool,
    identity: IdentityStatus<'_>,
) -> GateDecision {
    if !session.ready {
        return GateDecision::Checking;
    }
    if !session.authenticated {
        return GateDecision::SignIn;
    }
    match identity {
        IdentityStatus::Resolved(record) => decide_from_record(record, on_onboarding),
        _ if on_onboarding => GateDecision::Allow,
        IdentityStatus::Pending => GateDecision::Checking,
        IdentityStatus::Failed => GateDecision::SignIn,
    }
}

/// Route a principal with a known identity record.
#[must_use]
pub const fn decide_from_record(record: &IdentityRecord, on_onboarding: bool) -> GateDecision {
    match (record.onboarding_completed, on_onboarding) {
        (false, false) => GateDecision::Onboarding,
        (true, true) => GateDecision::Dashboard,
        _ => GateDecision::Allow,
    }
}

/// Strip a trailing slash so `/onboarding/` matches `/onboarding`.
#[must_use]
pub fn normalize_route(route: &str) -> &str {
    let trimmed = route.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// Result of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Terminal decision (or `Checking` while the session loads).
    pub decision: GateDecision,
    /// The record the decision was based on, if any.
    pub identity: Option<IdentityRecord>,
}

impl Evaluation {
    const fn without_identity(decision: GateDecision) -> Self {
        Self {
            decision,
            identity: None,
        }
    }
}

/// Evaluates the gate for one principal.
pub struct AccessGate<B> {
    resolver: Arc<IdentityResolver<B>>,
    max_age: Duration,
    routes: GateRoutes,
}

impl<B> std::fmt::Debug for AccessGate<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("resolver", &self.resolver)
            .field("max_age", &self.max_age)
            .field("routes", &self.routes)
            .finish()
    }
}

impl<B: IdentityBackend> AccessGate<B> {
    /// Create a gate over `resolver` using the configured max age and routes.
    #[must_use]
    pub fn new(resolver: Arc<IdentityResolver<B>>, config: &GateConfig) -> Self {
        Self {
            resolver,
            max_age: config.cache_max_age,
            routes: config.routes.clone(),
        }
    }

    /// The identity cache behind this gate.
    #[must_use]
    pub fn cache(&self) -> &Arc<IdentityCache> {
        self.resolver.cache()
    }

    /// The resolver behind this gate.
    #[must_use]
    pub const fn resolver(&self) -> &Arc<IdentityResolver<B>> {
        &self.resolver
    }

    /// The routes this gate redirects to.
    #[must_use]
    pub const fn routes(&self) -> &GateRoutes {
        &self.routes
    }

    /// Fresh cached record, if any.
    #[must_use]
    pub fn cached(&self) -> Option<IdentityRecord> {
        self.cache().read(self.max_age)
    }

    /// Whether `route` is the onboarding route.
    #[must_use]
    pub fn is_onboarding(&self, route: &str) -> bool {
        normalize_route(route) == normalize_route(&self.routes.onboarding)
    }

    /// Run one evaluation.
    ///
    /// Returns `None` when `cancel` fired before a decision was reached; the
    /// caller must then leave its published state untouched.
    #[instrument(skip(self, session, cancel))]
    pub async fn evaluate<S: SessionProvider>(
        &self,
        session: &S,
        route: &str,
        cancel: &CancellationToken,
    ) -> Option<Evaluation> {
        let snapshot = session.snapshot();
        let on_onboarding = self.is_onboarding(route);

        if !snapshot.is_signed_in() {
            let decision = transition(snapshot, on_onboarding, IdentityStatus::Pending);
            return Some(Evaluation::without_identity(decision));
        }

        if let Some(record) = self.cached() {
            let decision = transition(snapshot, on_onboarding, IdentityStatus::Resolved(&record));
            debug!(%decision, "decided from cached identity");
            return Some(Evaluation {
                decision,
                identity: Some(record),
            });
        }

        if on_onboarding {
            return Some(Evaluation::without_identity(GateDecision::Allow));
        }

        let result = self.resolver.resolve(session, cancel).await;
        if cancel.is_cancelled() {
            debug!("evaluation superseded; discarding result");
            return None;
        }

        match result {
            Ok(record) => {
                let decision =
                    transition(snapshot, on_onboarding, IdentityStatus::Resolved(&record));
                Some(Evaluation {
                    decision,
                    identity: Some(record),
                })
            }
            Err(ResolveError::Cancelled) => None,
            Err(err) => {
                if err.invalidates_trust() {
                    self.cache().clear();
                }
                warn!(error = %err, "identity resolution failed");
                let decision = transition(snapshot, on_onboarding, IdentityStatus::Failed);
                Some(Evaluation::without_identity(decision))
            }
        }
    }
}

//! Reactive gate evaluation for long-lived consumers.
//!
//! A [`GateController`] owns the evaluation task for one principal. Each
//! change of inputs cancels the running task, publishes
//! [`GateDecision::Checking`] and spawns a fresh evaluation. A task only
//! publishes while it is still the current one, so late results from
//! superseded evaluations never reach subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use punchcard_core::{GateDecision, IdentityRecord};

use super::{AccessGate, normalize_route};
use crate::identity::{IdentityBackend, SessionProvider, SessionSnapshot};

/// The inputs one evaluation is computed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GateInputs {
    /// Session readiness and sign-in state.
    pub session: SessionSnapshot,
    /// Requested route, trailing slash removed.
    pub route: String,
}

struct Running {
    inputs: GateInputs,
    generation: u64,
    cancel: CancellationToken,
}

struct Shared {
    decisions: watch::Sender<GateDecision>,
    current: Mutex<Option<Running>>,
    generations: AtomicU64,
}

impl Shared {
    /// Publish `decision` only if `generation` is still the running evaluation.
    fn publish(&self, decision: GateDecision, generation: u64) -> bool {
        let current = self.current.lock();
        let is_current = current.as_ref().is_some_and(|running| {
            running.generation == generation && !running.cancel.is_cancelled()
        });
        if is_current {
            self.decisions.send_replace(decision);
        }
        is_current
    }
}

/// Drives an [`AccessGate`] from changing inputs and publishes decisions.
pub struct GateController<S, B> {
    gate: Arc<AccessGate<B>>,
    session: Arc<S>,
    shared: Arc<Shared>,
}

impl<S, B> std::fmt::Debug for GateController<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateController")
            .field("decision", &*self.shared.decisions.borrow())
            .finish_non_exhaustive()
    }
}

impl<S, B> GateController<S, B>
where
    S: SessionProvider + 'static,
    B: IdentityBackend + 'static,
{
    /// Create a controller in the `Checking` state. Nothing runs until
    /// [`update`](Self::update) is called.
    #[must_use]
    pub fn new(gate: Arc<AccessGate<B>>, session: Arc<S>) -> Self {
        let (decisions, _) = watch::channel(GateDecision::Checking);
        Self {
            gate,
            session,
            shared: Arc::new(Shared {
                decisions,
                current: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Re-evaluate for `route` with the session's current state.
    ///
    /// Identical consecutive inputs are a no-op.
    pub fn update(&self, route: &str) {
        let inputs = GateInputs {
            session: self.session.snapshot(),
            route: normalize_route(route).to_string(),
        };
        self.restart(inputs, false);
    }

    /// Clear the identity cache and re-evaluate the current inputs.
    pub fn invalidate(&self) {
        self.gate.cache().clear();
        let inputs = self
            .shared
            .current
            .lock()
            .as_ref()
            .map(|running| running.inputs.clone());
        if let Some(inputs) = inputs {
            self.restart(inputs, true);
        }
    }

    /// Latest published decision.
    #[must_use]
    pub fn decision(&self) -> GateDecision {
        *self.shared.decisions.borrow()
    }

    /// Subscribe to decision changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<GateDecision> {
        self.shared.decisions.subscribe()
    }

    /// Read access to the cached identity record.
    #[must_use]
    pub fn identity(&self) -> Option<IdentityRecord> {
        self.gate.cached()
    }

    fn restart(&self, inputs: GateInputs, force: bool) {
        let cancel = CancellationToken::new();
        let generation = self.shared.generations.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut current = self.shared.current.lock();
            if !force && current.as_ref().is_some_and(|running| running.inputs == inputs) {
                return;
            }
            if let Some(previous) = current.take() {
                previous.cancel.cancel();
            }
            *current = Some(Running {
                inputs: inputs.clone(),
                generation,
                cancel: cancel.clone(),
            });
            self.shared.decisions.send_replace(GateDecision::Checking);
        }

        let gate = Arc::clone(&self.gate);
        let session = Arc::clone(&self.session);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let Some(evaluation) = gate.evaluate(&*session, &inputs.route, &cancel).await else {
                return;
            };
            if !shared.publish(evaluation.decision, generation) {
                debug!(route = %inputs.route, "discarding superseded decision");
            }
        });
    }
}

impl<S, B> Drop for GateController<S, B> {
    fn drop(&mut self) {
        if let Some(running) = self.shared.current.lock().take() {
            running.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::GateConfig;
    use crate::identity::testing::{FakeBackend, ScriptedSession, payload};
    use crate::identity::{
        BackendError, BearerToken, EnsureIdentityRequest, EnsureOutcome, IdentityCache,
        IdentityResolver, LookupOutcome, TokenRetryPolicy,
    };

    /// Backend that answers after a fixed delay.
    struct SlowBackend {
        inner: FakeBackend,
        delay: Duration,
    }

    impl IdentityBackend for SlowBackend {
        async fn fetch_identity(&self, token: &BearerToken) -> Result<LookupOutcome, BackendError> {
            tokio::time::sleep(self.delay).await;
            self.inner.fetch_identity(token).await
        }

        async fn ensure_identity(
            &self,
            token: &BearerToken,
            request: &EnsureIdentityRequest,
        ) -> Result<EnsureOutcome, BackendError> {
            self.inner.ensure_identity(token, request).await
        }
    }

    fn gate<B: IdentityBackend>(backend: B) -> Arc<AccessGate<B>> {
        let resolver = IdentityResolver::new(
            backend,
            Arc::new(IdentityCache::default()),
            TokenRetryPolicy::default(),
        );
        Arc::new(AccessGate::new(Arc::new(resolver), &GateConfig::default()))
    }

    async fn settled<B: IdentityBackend + 'static>(
        controller: &GateController<ScriptedSession, B>,
    ) -> GateDecision {
        let mut rx = controller.subscribe();
        *rx.wait_for(|decision| decision.is_terminal()).await.unwrap()
    }

    #[tokio::test]
    async fn test_starts_checking_and_settles() {
        let gate = gate(FakeBackend::provisioned(payload(true)));
        let controller = GateController::new(gate, Arc::new(ScriptedSession::with_token()));
        assert_eq!(controller.decision(), GateDecision::Checking);

        controller.update("/dashboard");

        assert_eq!(settled(&controller).await, GateDecision::Allow);
        assert!(controller.identity().is_some());
    }

    #[tokio::test]
    async fn test_identical_inputs_resolve_once() {
        let gate = gate(FakeBackend::provisioned(payload(true)));
        let controller = GateController::new(gate.clone(), Arc::new(ScriptedSession::with_token()));

        controller.update("/dashboard");
        controller.update("/dashboard/");
        settled(&controller).await;
        controller.update("/dashboard");
        tokio::task::yield_now().await;

        assert_eq!(controller.decision(), GateDecision::Allow);
        assert_eq!(gate.resolver().backend().lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_change_discards_late_result() {
        let backend = SlowBackend {
            inner: FakeBackend::default(),
            delay: Duration::from_secs(5),
        };
        let gate = gate(backend);
        let controller = GateController::new(gate.clone(), Arc::new(ScriptedSession::with_token()));

        controller.update("/dashboard");
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.update("/onboarding");

        assert_eq!(settled(&controller).await, GateDecision::Allow);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(controller.decision(), GateDecision::Allow);
        assert_eq!(gate.resolver().backend().inner.lookups.load(Ordering::SeqCst), 0);
        assert!(gate.cache().entry().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_rereads_identity() {
        let gate = gate(FakeBackend::provisioned(payload(true)));
        let controller = GateController::new(gate.clone(), Arc::new(ScriptedSession::with_token()));

        controller.update("/dashboard");
        assert_eq!(settled(&controller).await, GateDecision::Allow);

        *gate.resolver().backend().record.lock() = Some(payload(false));
        controller.invalidate();

        assert_eq!(controller.decision(), GateDecision::Checking);
        assert_eq!(settled(&controller).await, GateDecision::Onboarding);
        assert_eq!(gate.resolver().backend().lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_running_evaluation() {
        let backend = SlowBackend {
            inner: FakeBackend::provisioned(payload(true)),
            delay: Duration::from_secs(5),
        };
        let gate = gate(backend);
        let controller = GateController::new(gate.clone(), Arc::new(ScriptedSession::with_token()));
        let rx = controller.subscribe();

        controller.update("/dashboard");
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(controller);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(*rx.borrow(), GateDecision::Checking);
        assert!(gate.cache().entry().is_none());
    }
}

//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;
use uuid::Uuid;

use punchcard_core::IdentityRecord;

use crate::config::ConsoleConfig;
use crate::gate::AccessGate;
use crate::identity::{ApiClient, Clock, IdentityCache, IdentityResolver, SystemClock};

/// Identity slots idle longer than this are dropped.
const SLOT_TIME_TO_IDLE: Duration = Duration::from_secs(30 * 60);

/// Upper bound on concurrently tracked logins.
const SLOT_CAPACITY: u64 = 10_000;

/// The access gate for one login, with its own cache and resolver.
pub type PrincipalGate = AccessGate<ApiClient>;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ConsoleConfig,
    api: ApiClient,
    clock: Arc<dyn Clock>,
    slots: Cache<Uuid, Arc<PrincipalGate>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("api", &self.inner.api)
            .field("slots", &self.inner.slots.entry_count())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create a new application state using the wall clock.
    #[must_use]
    pub fn new(config: ConsoleConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new application state reading cache time from `clock`.
    #[must_use]
    pub fn with_clock(config: ConsoleConfig, clock: Arc<dyn Clock>) -> Self {
        let api = ApiClient::new(&config.api.base_url);
        let slots = Cache::builder()
            .max_capacity(SLOT_CAPACITY)
            .time_to_idle(SLOT_TIME_TO_IDLE)
            .build();

        Self {
            inner: Arc::new(AppStateInner {
                config,
                api,
                clock,
                slots,
            }),
        }
    }

    /// Get a reference to the console configuration.
    #[must_use]
    pub fn config(&self) -> &ConsoleConfig {
        &self.inner.config
    }

    /// Get a reference to the backend API client.
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// The identity slot for sign-in `login`, created on first use.
    ///
    /// Slots belong to a single login rather than a subject: the cached
    /// record was resolved with that login's token and is never shared with
    /// another session claiming the same subject.
    pub async fn gate_for(&self, login: Uuid) -> Arc<PrincipalGate> {
        self.inner
            .slots
            .get_with(login, async {
                debug!(%login, "creating identity slot");
                let cache = Arc::new(IdentityCache::new(Arc::clone(&self.inner.clock)));
                let resolver = IdentityResolver::new(
                    self.inner.api.clone(),
                    cache,
                    self.inner.config.gate.token_retry,
                );
                Arc::new(AccessGate::new(Arc::new(resolver), &self.inner.config.gate))
            })
            .await
    }

    /// Fresh cached identity for `login`, without resolving.
    pub async fn cached_identity(&self, login: Uuid) -> Option<IdentityRecord> {
        self.inner.slots.get(&login).await?.cached()
    }

    /// Clear the cached identity for `login` so the next evaluation resolves.
    pub async fn invalidate_identity(&self, login: Uuid) {
        if let Some(gate) = self.inner.slots.get(&login).await {
            gate.cache().clear();
        }
    }

    /// Drop the identity slot for `login` entirely.
    pub async fn forget_login(&self, login: Uuid) {
        self.inner.slots.invalidate(&login).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use punchcard_core::{CustomerId, MerchantId};

    use super::*;
    use crate::identity::ManualClock;

    fn state() -> AppState {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CONSOLE_BASE_URL", "http://localhost:3000"),
            ("PUNCHCARD_API_BASE_URL", "http://localhost:4000"),
        ]);
        let config = ConsoleConfig::from_lookup(|key| vars.get(key).map(ToString::to_string)).unwrap();
        AppState::with_clock(config, Arc::new(ManualClock::starting_at(0)))
    }

    fn record() -> IdentityRecord {
        IdentityRecord {
            merchant_id: MerchantId::new("m1"),
            customer_id: CustomerId::new("c1"),
            name: None,
            tax_id: None,
            phone: None,
            address: None,
            website_url: None,
            onboarding_completed: true,
        }
    }

    #[tokio::test]
    async fn test_slots_are_per_login() {
        let state = state();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let first = state.gate_for(alice).await;
        let again = state.gate_for(alice).await;
        let other = state.gate_for(bob).await;

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));

        first.cache().write(record());
        assert!(state.cached_identity(alice).await.is_some());
        assert!(state.cached_identity(bob).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_identity_clears_only_cache() {
        let state = state();
        let login = Uuid::new_v4();
        let gate = state.gate_for(login).await;
        gate.cache().write(record());

        state.invalidate_identity(login).await;

        assert!(state.cached_identity(login).await.is_none());
        assert!(Arc::ptr_eq(&gate, &state.gate_for(login).await));
    }

    #[tokio::test]
    async fn test_forget_login_drops_slot() {
        let state = state();
        let login = Uuid::new_v4();
        let gate = state.gate_for(login).await;
        gate.cache().write(record());

        state.forget_login(login).await;

        assert!(state.cached_identity(login).await.is_none());
        assert!(!Arc::ptr_eq(&gate, &state.gate_for(login).await));
    }
}

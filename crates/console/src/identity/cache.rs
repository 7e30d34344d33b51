//! Single-slot, time-bound identity cache.
//!
//! Staleness is evaluated at read time against the caller's maximum age; there
//! is no background eviction. Each cache is an explicitly constructed object
//! shared by `Arc`, so tests get a fresh one and the console gets one per
//! sign-in.

use std::fmt;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use punchcard_core::IdentityRecord;

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds.
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

#[cfg(test)]
impl ManualClock {
    /// Start at `now_millis`.
    #[must_use]
    pub const fn starting_at(now_millis: i64) -> Self {
        Self(AtomicI64::new(now_millis))
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_millis: i64) {
        self.0.store(now_millis, Ordering::SeqCst);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(duration_millis(by), Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A cached record with the time it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The resolved identity.
    pub record: IdentityRecord,
    /// Write time in milliseconds.
    pub created_at_ms: i64,
}

impl CacheEntry {
    /// Whether the entry is still valid at `now_ms` for the given maximum age.
    #[must_use]
    pub const fn is_fresh(&self, now_ms: i64, max_age_ms: i64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) <= max_age_ms
    }
}

/// Time-bound memo of the last successfully resolved identity.
pub struct IdentityCache {
    clock: Arc<dyn Clock>,
    slot: RwLock<Option<CacheEntry>>,
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("clock", &self.clock)
            .field("occupied", &self.slot.read().is_some())
            .finish()
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl IdentityCache {
    /// Create an empty cache reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slot: RwLock::new(None),
        }
    }

    /// Return the cached record if it was written no more than `max_age` ago.
    ///
    /// Never blocks on I/O and never mutates the slot.
    #[must_use]
    pub fn read(&self, max_age: Duration) -> Option<IdentityRecord> {
        let now = self.clock.now_millis();
        self.slot
            .read()
            .as_ref()
            .filter(|entry| entry.is_fresh(now, duration_millis(max_age)))
            .map(|entry| entry.record.clone())
    }

    /// Replace the slot, stamping the current time. Last writer wins.
    pub fn write(&self, record: IdentityRecord) {
        let entry = CacheEntry {
            record,
            created_at_ms: self.clock.now_millis(),
        };
        *self.slot.write() = Some(entry);
    }

    /// Empty the slot.
    pub fn clear(&self) {
        self.slot.write().take();
    }

    /// Raw entry regardless of age.
    #[must_use]
    pub fn entry(&self) -> Option<CacheEntry> {
        self.slot.read().clone()
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use punchcard_core::{CustomerId, MerchantId};

    use super::*;

    const MAX_AGE: Duration = Duration::from_millis(60_000);

    fn record(name: &str) -> IdentityRecord {
        IdentityRecord {
            merchant_id: MerchantId::new("m1"),
            customer_id: CustomerId::new("c1"),
            name: Some(name.to_string()),
            tax_id: None,
            phone: None,
            address: None,
            website_url: None,
            onboarding_completed: true,
        }
    }

    fn cache_at(t0: i64) -> (Arc<ManualClock>, IdentityCache) {
        let clock = Arc::new(ManualClock::starting_at(t0));
        let cache = IdentityCache::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_empty_cache_misses() {
        let (_, cache) = cache_at(0);
        assert!(cache.read(MAX_AGE).is_none());
    }

    #[test]
    fn test_read_within_max_age_hits() {
        let t0 = 1_700_000_000_000;
        let (clock, cache) = cache_at(t0);
        cache.write(record("Cafe"));

        clock.set(t0 + 60_000 - 1);
        assert_eq!(cache.read(MAX_AGE), Some(record("Cafe")));
    }

    #[test]
    fn test_read_exactly_at_max_age_hits() {
        let (clock, cache) = cache_at(0);
        cache.write(record("Cafe"));

        clock.set(60_000);
        assert!(cache.read(MAX_AGE).is_some());
    }

    #[test]
    fn test_read_after_max_age_misses() {
        let t0 = 1_700_000_000_000;
        let (clock, cache) = cache_at(t0);
        cache.write(record("Cafe"));

        clock.set(t0 + 60_000 + 1);
        assert!(cache.read(MAX_AGE).is_none());
        // Stale entries are not evicted, only ignored.
        assert!(cache.entry().is_some());
    }

    #[test]
    fn test_max_age_is_chosen_by_reader() {
        let (clock, cache) = cache_at(0);
        cache.write(record("Cafe"));
        clock.advance(Duration::from_secs(10));

        assert!(cache.read(Duration::from_secs(5)).is_none());
        assert!(cache.read(Duration::from_secs(30)).is_some());
    }

    #[test]
    fn test_write_is_last_writer_wins_and_restamps() {
        let (clock, cache) = cache_at(0);
        cache.write(record("First"));
        clock.advance(Duration::from_secs(50));
        cache.write(record("Second"));
        clock.advance(Duration::from_secs(50));

        assert_eq!(cache.read(MAX_AGE), Some(record("Second")));
        assert_eq!(cache.entry().unwrap().created_at_ms, 50_000);
    }

    #[test]
    fn test_clear_empties_slot() {
        let (_, cache) = cache_at(0);
        cache.write(record("Cafe"));
        cache.clear();

        assert!(cache.read(MAX_AGE).is_none());
        assert!(cache.entry().is_none());
    }
}

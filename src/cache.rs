use crate::errors::{DashboardError, DashboardResult};
use crate::models::{QueryResult, SegmentFilter};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: QueryResult,
    expires_at: Instant,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Per-filter TTL cache. Misses on one key are serialized so the loader runs once.
pub struct ResultCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<SegmentFilter, Slot>>,
}

/// Whether a lookup was answered from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl ResultCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get_or_try_insert_with<F>(&self, filter: SegmentFilter, load: F) -> DashboardResult<(QueryResult, CacheOutcome)>
    where
        F: FnOnce() -> DashboardResult<QueryResult>,
    {
        let slot = self.slot(filter)?;
        let mut entry = lock_slot(&slot);

        let now = self.clock.now();
        if let Some(cached) = entry.as_ref() {
            if now < cached.expires_at {
                return Ok((cached.result.clone(), CacheOutcome::Hit));
            }
        }

        *entry = None;
        let result = load()?;
        if !self.ttl.is_zero() {
            *entry = Some(CacheEntry {
                result: result.clone(),
                expires_at: self.clock.now() + self.ttl,
            });
        }
        Ok((result, CacheOutcome::Miss))
    }

    pub fn invalidate(&self, filter: SegmentFilter) -> DashboardResult<()> {
        let slot = {
            let slots = self.slots.lock().map_err(|_| poisoned())?;
            slots.get(&filter).cloned()
        };
        if let Some(slot) = slot {
            *lock_slot(&slot) = None;
        }
        Ok(())
    }

    pub fn clear(&self) -> DashboardResult<()> {
        let slots = self.slots.lock().map_err(|_| poisoned())?.values().cloned().collect::<Vec<_>>();
        for slot in slots {
            *lock_slot(&slot) = None;
        }
        Ok(())
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> DashboardResult<usize> {
        let now = self.clock.now();
        let slots = self.slots.lock().map_err(|_| poisoned())?.values().cloned().collect::<Vec<_>>();
        let mut live = 0;
        for slot in slots {
            // A slot held by an in-flight load is not counted.
            let entry = match slot.try_lock() {
                Ok(entry) => entry,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            };
            if entry.as_ref().is_some_and(|cached| now < cached.expires_at) {
                live += 1;
            }
        }
        Ok(live)
    }

    pub fn is_empty(&self) -> DashboardResult<bool> {
        Ok(self.len()? == 0)
    }

    fn slot(&self, filter: SegmentFilter) -> DashboardResult<Slot> {
        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        Ok(slots.entry(filter).or_default().clone())
    }
}

/// A loader that panicked leaves its slot poisoned, but the entry was cleared before the
/// load started, so the data behind the lock is still consistent.
fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<CacheEntry>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn poisoned() -> DashboardError {
    DashboardError::Internal("result cache mutex poisoned".to_string())
}

//! Alarm id allocation.
//!
//! The next id is one past the largest id found among the store's keys. On
//! top of that the allocator remembers the highest id it has seen listed,
//! handed out or deleted, so removing the newest alarm and creating another
//! never reissues its id while the process lives.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    error::{AlarmError, Result},
    store::KeyStore,
};

#[derive(Clone)]
pub struct IdAllocator {
    store: Arc<dyn KeyStore>,
    /// lowest id that may still be issued
    floor: Arc<AtomicU64>,
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("floor", &self.floor.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Parses every key as a decimal id.
///
/// A key that is not a decimal id means something else wrote into the alarm
/// store; skipping it could hand out an id that collides with data we do not
/// understand, so it is an error.
pub fn parse_keys<S: AsRef<str>>(keys: &[S]) -> Result<Vec<u64>> {
    keys.iter()
        .map(|key| {
            let key = key.as_ref();
            // `u64::from_str` accepts a leading '+'
            if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
                return Err(AlarmError::CorruptKey(key.to_string()));
            }
            key.parse::<u64>()
                .map_err(|_| AlarmError::CorruptKey(key.to_string()))
        })
        .collect()
}

impl IdAllocator {
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            floor: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The id the next created alarm gets. Does not reserve it; call
    /// [`IdAllocator::mark_issued`] once the record is written.
    ///
    /// Callers must hold the repository's create lock so two creates never
    /// see the same listing.
    pub async fn next_id(&self) -> Result<u64> {
        let keys = self
            .store
            .get_all_keys()
            .await
            .map_err(AlarmError::StoreUnavailable)?;
        let ids = parse_keys(&keys)?;
        let from_store = match ids.iter().max() {
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| AlarmError::CorruptKey(max.to_string()))?,
            None => 0,
        };
        let next = self.floor.fetch_max(from_store, Ordering::AcqRel).max(from_store);
        log::debug!("next alarm id is {next} ({} stored)", ids.len());
        Ok(next)
    }

    /// Keeps `id` from being handed out again.
    pub fn mark_issued(&self, id: u64) {
        self.floor.fetch_max(id.saturating_add(1), Ordering::AcqRel);
    }
}

//! Keyed, reference-counted pool of shared values.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::module::BoxError;
use crate::observability::metrics;

/// A pooled value that must be torn down when its last user lets go.
pub trait Destructor: Send + Sync {
    fn destruct(&self) -> Result<(), BoxError>;
}

#[derive(Debug, Error)]
pub enum PoolError {
    /// The constructor for a new key failed; no entry was kept.
    #[error("constructing pooled value '{key}': {source}")]
    Construct {
        key: String,
        #[source]
        source: BoxError,
    },

    /// Another caller was constructing the value and failed.
    #[error("pooled value '{key}' was not constructed: {reason}")]
    Abandoned { key: String, reason: String },

    /// The value's destructor failed after the last release.
    #[error("destructing pooled value '{key}': {source}")]
    Destruct {
        key: String,
        #[source]
        source: BoxError,
    },
}

enum CellState<V> {
    Pending,
    Ready(Arc<V>),
    Failed(String),
}

struct Slot<V> {
    refs: usize,
    cell: Arc<Mutex<CellState<V>>>,
}

/// Pool of values shared by key.
///
/// The first `acquire` of a key constructs the value while holding that
/// key's cell lock; concurrent acquirers of the same key count themselves in
/// and then block on the cell until construction settles. Other keys are not
/// held up. The constructor must not acquire its own key.
pub struct UsagePool<V> {
    name: &'static str,
    entries: Mutex<HashMap<String, Slot<V>>>,
}

impl<V: Destructor> UsagePool<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the value for `key`, constructing it if absent.
    ///
    /// Returns the value and whether it already existed. Every successful
    /// call must be matched by one `release`.
    pub fn acquire<F>(&self, key: &str, construct: F) -> Result<(Arc<V>, bool), PoolError>
    where
        F: FnOnce() -> Result<V, BoxError>,
    {
        let mut entries = self.entries.lock();

        if let Some(slot) = entries.get_mut(key) {
            slot.refs += 1;
            let cell = Arc::clone(&slot.cell);
            drop(entries);

            let state = cell.lock();
            return match &*state {
                CellState::Ready(value) => Ok((Arc::clone(value), true)),
                CellState::Failed(reason) => Err(PoolError::Abandoned {
                    key: key.to_string(),
                    reason: reason.clone(),
                }),
                CellState::Pending => Err(PoolError::Abandoned {
                    key: key.to_string(),
                    reason: "constructor did not finish".to_string(),
                }),
            };
        }

        let cell = Arc::new(Mutex::new(CellState::Pending));
        let mut state = cell.lock();
        entries.insert(
            key.to_string(),
            Slot {
                refs: 1,
                cell: Arc::clone(&cell),
            },
        );
        metrics::record_pool_size(self.name, entries.len());
        drop(entries);

        let constructed = match panic::catch_unwind(AssertUnwindSafe(construct)) {
            Ok(constructed) => constructed,
            Err(payload) => {
                *state = CellState::Failed("constructor panicked".to_string());
                drop(state);
                self.forget(key, &cell);
                panic::resume_unwind(payload);
            }
        };

        match constructed {
            Ok(value) => {
                let value = Arc::new(value);
                *state = CellState::Ready(Arc::clone(&value));
                tracing::debug!(pool = self.name, key, "Pooled value constructed");
                Ok((value, false))
            }
            Err(source) => {
                *state = CellState::Failed(source.to_string());
                drop(state);
                self.forget(key, &cell);

                Err(PoolError::Construct {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }

    /// Drop the entry for `key` if it still holds `cell`.
    fn forget(&self, key: &str, cell: &Arc<Mutex<CellState<V>>>) {
        let mut entries = self.entries.lock();
        let ours = entries
            .get(key)
            .is_some_and(|slot| Arc::ptr_eq(&slot.cell, cell));
        if ours {
            entries.remove(key);
            metrics::record_pool_size(self.name, entries.len());
        }
    }

    /// Drop one reference to `key`.
    ///
    /// Returns true if this was the last reference, in which case the entry
    /// is removed and its value destructed. Unknown keys return false.
    pub fn release(&self, key: &str) -> Result<bool, PoolError> {
        let mut entries = self.entries.lock();

        let Some(slot) = entries.get_mut(key) else {
            return Ok(false);
        };
        slot.refs -= 1;
        if slot.refs > 0 {
            return Ok(false);
        }

        let Some(slot) = entries.remove(key) else {
            return Ok(false);
        };
        metrics::record_pool_size(self.name, entries.len());
        drop(entries);

        let state = slot.cell.lock();
        if let CellState::Ready(value) = &*state {
            value.destruct().map_err(|source| PoolError::Destruct {
                key: key.to_string(),
                source,
            })?;
            tracing::debug!(pool = self.name, key, "Pooled value destructed");
        }
        Ok(true)
    }

    /// Outstanding references to `key`, if present.
    pub fn references(&self, key: &str) -> Option<usize> {
        self.entries.lock().get(key).map(|slot| slot.refs)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Sorted keys currently in the pool.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl<V> fmt::Debug for UsagePool<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsagePool")
            .field("name", &self.name)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default, Debug)]
    struct Counted {
        destructs: Arc<AtomicUsize>,
    }

    impl Destructor for Counted {
        fn destruct(&self) -> Result<(), BoxError> {
            self.destructs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_acquire_reuses_existing() {
        let pool = UsagePool::new("test");
        let destructs = Arc::new(AtomicUsize::new(0));

        let (first, existed) = pool
            .acquire("k", || {
                Ok(Counted {
                    destructs: Arc::clone(&destructs),
                })
            })
            .unwrap();
        assert!(!existed);

        let (second, existed) = pool
            .acquire("k", || -> Result<Counted, BoxError> { panic!("constructed twice") })
            .unwrap();
        assert!(existed);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.references("k"), Some(2));
    }

    #[test]
    fn test_release_destructs_at_zero() {
        let pool = UsagePool::new("test");
        let destructs = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            pool.acquire("k", || {
                Ok(Counted {
                    destructs: Arc::clone(&destructs),
                })
            })
            .unwrap();
        }

        assert!(!pool.release("k").unwrap());
        assert!(!pool.release("k").unwrap());
        assert_eq!(destructs.load(Ordering::SeqCst), 0);

        assert!(pool.release("k").unwrap());
        assert_eq!(destructs.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty());
        assert!(!pool.release("k").unwrap());
    }

    #[test]
    fn test_failed_construct_leaves_no_entry() {
        let pool: UsagePool<Counted> = UsagePool::new("test");
        let err = pool.acquire("k", || Err("disk full".into())).unwrap_err();
        assert!(matches!(err, PoolError::Construct { ref key, .. } if key == "k"));
        assert!(pool.is_empty());

        let (_, existed) = pool.acquire("k", || Ok(Counted::default())).unwrap();
        assert!(!existed);
    }

    #[test]
    fn test_panicking_construct_leaves_no_entry() {
        let pool: UsagePool<Counted> = UsagePool::new("test");
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.acquire("k", || -> Result<Counted, BoxError> { panic!("boom") })
        }));
        assert!(unwound.is_err());
        assert!(pool.is_empty());
        assert_eq!(pool.references("k"), None);

        let (_, existed) = pool.acquire("k", || Ok(Counted::default())).unwrap();
        assert!(!existed);
        assert_eq!(pool.references("k"), Some(1));
    }

    #[test]
    fn test_destruct_error_surfaces() {
        struct Stuck;
        impl Destructor for Stuck {
            fn destruct(&self) -> Result<(), BoxError> {
                Err("stuck".into())
            }
        }

        let pool = UsagePool::new("test");
        pool.acquire("k", || Ok(Stuck)).unwrap();
        let err = pool.release("k").unwrap_err();
        assert_eq!(err.to_string(), "destructing pooled value 'k': stuck");
        assert!(pool.is_empty());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Registry of open native queries and counters.
//!
//! Every native handle lives here. Callers address queries by a string key
//! they choose (usually the category name) and counters by the
//! [`CounterHandle`] returned from [`QueryHandleRegistry::add_counter`].
//!
//! ## Locking
//!
//! One map from key to entry, guarded by an `RwLock`, and one `Mutex` per
//! entry. The map lock is never held while waiting on an entry lock, so the
//! only nesting is entry → map (when a query closes and detaches itself).
//! Different keys never contend beyond the brief map lookup.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::source::{NativeCounterSource, NativeHandle};
use crate::error::{PerfError, Result};

/// An open native query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHandle {
    native: NativeHandle,
    key: String,
}

impl QueryHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn native(&self) -> NativeHandle {
        self.native
    }
}

/// A counter registered under a query key. Equality is by counter path.
#[derive(Clone)]
pub struct CounterHandle {
    path: String,
    key: String,
}

impl CounterHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for CounterHandle {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for CounterHandle {}

impl Hash for CounterHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Debug for CounterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CounterHandle({} @ {})", self.path, self.key)
    }
}

struct RegisteredCounter {
    handle: CounterHandle,
    native: NativeHandle,
    // Adds of this path under the key not yet matched by a remove.
    refs: usize,
}

struct QueryEntry {
    query: NativeHandle,
    counters: Vec<RegisteredCounter>,
    closed: bool,
}

type SharedEntry = Arc<Mutex<QueryEntry>>;

/// Owner of all native query and counter handles.
///
/// Build one per process and share it through an `Arc`. Dropping the last
/// reference releases whatever is still open.
pub struct QueryHandleRegistry {
    source: Arc<dyn NativeCounterSource>,
    queries: RwLock<HashMap<String, SharedEntry>>,
}

impl QueryHandleRegistry {
    pub fn new(source: Arc<dyn NativeCounterSource>) -> Self {
        Self {
            source,
            queries: RwLock::new(HashMap::new()),
        }
    }

    /// Existing query for `key`, or a freshly opened one.
    pub fn open_or_get_query(&self, key: &str) -> Result<QueryHandle> {
        let (entry, _) = self.entry_or_open(key)?;
        let query = lock(&entry).query;
        Ok(QueryHandle {
            native: query,
            key: key.to_string(),
        })
    }

    /// Add the counter at `path` to the query for `key`, opening the query if
    /// needed. A path already registered under `key` returns its handle and
    /// takes another reference; each add is undone by one `remove_counter`.
    pub fn add_counter(&self, path: &str, key: &str) -> Result<CounterHandle> {
        loop {
            let (entry, opened) = self.entry_or_open(key)?;
            let mut guard = lock(&entry);
            if guard.closed {
                // Closed and detached between lookup and lock; open a new one.
                continue;
            }

            if let Some(existing) = guard.counters.iter_mut().find(|c| c.handle.path == path) {
                existing.refs += 1;
                return Ok(existing.handle.clone());
            }

            let Some(native) = self.source.add_counter(guard.query, path) else {
                log::debug!("Native source rejected counter {} for '{}'", path, key);
                // Leave no query behind that this call opened.
                if opened && guard.counters.is_empty() {
                    self.release(&mut guard, key);
                    self.detach(key, &entry);
                }
                return Err(PerfError::NativeSource(format!(
                    "failed to add counter {}",
                    path
                )));
            };

            let handle = CounterHandle {
                path: path.to_string(),
                key: key.to_string(),
            };
            guard.counters.push(RegisteredCounter {
                handle: handle.clone(),
                native,
                refs: 1,
            });
            log::debug!("Added counter {} to '{}'", path, key);
            return Ok(handle);
        }
    }

    /// Drop one reference to a counter; the native counter goes with the last
    /// one, and the query closes when its last counter goes. Returns false
    /// when the counter was not registered under `key`.
    pub fn remove_counter(&self, handle: &CounterHandle, key: &str) -> bool {
        let Some(entry) = self.entry(key) else {
            return false;
        };
        let mut guard = lock(&entry);
        if guard.closed {
            return false;
        }

        let Some(pos) = guard.counters.iter().position(|c| c.handle == *handle) else {
            return false;
        };
        guard.counters[pos].refs -= 1;
        if guard.counters[pos].refs > 0 {
            return true;
        }
        let removed = guard.counters.remove(pos);
        self.source.remove_counter(removed.native);
        log::debug!("Removed counter {} from '{}'", handle.path, key);

        if guard.counters.is_empty() {
            self.release(&mut guard, key);
            self.detach(key, &entry);
        }
        true
    }

    /// Remove every counter under `key` and close its query.
    pub fn remove_all_counters(&self, key: &str) {
        let Some(entry) = self.entry(key) else {
            return;
        };
        let mut guard = lock(&entry);
        if guard.closed {
            return;
        }
        self.release(&mut guard, key);
        self.detach(key, &entry);
    }

    /// Release every query in the registry. Safe to call more than once.
    pub fn shutdown(&self) {
        let drained: Vec<(String, SharedEntry)> = {
            let mut map = self.queries.write().unwrap_or_else(PoisonError::into_inner);
            map.drain().collect()
        };
        if drained.is_empty() {
            return;
        }

        log::info!("Releasing {} performance counter queries", drained.len());
        for (key, entry) in drained {
            let mut guard = lock(&entry);
            if !guard.closed {
                self.release(&mut guard, &key);
            }
        }
    }

    /// Collect a fresh sample for `key`. Returns the collection timestamp in
    /// epoch milliseconds, or 0 when `key` is unknown or the update failed.
    pub fn update(&self, key: &str) -> u64 {
        let Some(entry) = self.entry(key) else {
            log::debug!("Update of unknown query '{}'", key);
            return 0;
        };
        let guard = lock(&entry);
        if guard.closed {
            return 0;
        }

        let timestamp = self.source.update_query(guard.query);
        if timestamp == 0 {
            log::warn!("Failed to update performance counter query '{}'", key);
        }
        timestamp
    }

    /// Raw value of the counter's last sample; 0 if the counter is unknown
    /// or the native read reports an error.
    pub fn read(&self, handle: &CounterHandle) -> i64 {
        let Some(entry) = self.entry(&handle.key) else {
            log::debug!("Read of counter {} with no open query", handle.path);
            return 0;
        };
        let guard = lock(&entry);
        let Some(native) = guard
            .counters
            .iter()
            .find(|c| c.handle.path == handle.path)
            .map(|c| c.native)
        else {
            log::debug!("Read of unregistered counter {}", handle.path);
            return 0;
        };

        let value = self.source.read_counter(native);
        if value < 0 {
            log::warn!("Failed to read counter {} (status {})", handle.path, value);
            return 0;
        }
        value
    }

    /// Live instances of a (localized) category, straight from the native source.
    pub fn list_instances(&self, category: &str) -> Option<Vec<String>> {
        self.source.list_instances(category)
    }

    /// Localized category name, falling back to the English one.
    pub fn localize_category(&self, english: &str) -> String {
        match self.source.localize_category(english) {
            Some(localized) => {
                if localized != english {
                    log::debug!("Localized category '{}' as '{}'", english, localized);
                }
                localized
            }
            None => english.to_string(),
        }
    }

    pub fn contains_query(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    /// Number of counters registered under `key`.
    pub fn counter_count(&self, key: &str) -> usize {
        match self.entry(key) {
            Some(entry) => {
                let guard = lock(&entry);
                guard.counters.len()
            }
            None => 0,
        }
    }

    /// Keys with an open query, sorted.
    pub fn query_keys(&self) -> Vec<String> {
        let map = self.queries.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn entry(&self, key: &str) -> Option<SharedEntry> {
        let map = self.queries.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    /// Entry for `key`, and whether this call opened it.
    fn entry_or_open(&self, key: &str) -> Result<(SharedEntry, bool)> {
        if let Some(entry) = self.entry(key) {
            return Ok((entry, false));
        }

        let mut map = self.queries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = map.get(key) {
            return Ok((Arc::clone(entry), false));
        }

        let query = self.source.open_query().ok_or_else(|| {
            PerfError::NativeSource(format!("failed to open query for '{}'", key))
        })?;
        log::debug!("Opened performance counter query '{}'", key);

        let entry = Arc::new(Mutex::new(QueryEntry {
            query,
            counters: Vec::new(),
            closed: false,
        }));
        map.insert(key.to_string(), Arc::clone(&entry));
        Ok((entry, true))
    }

    fn release(&self, entry: &mut QueryEntry, key: &str) {
        for counter in entry.counters.drain(..) {
            self.source.remove_counter(counter.native);
        }
        self.source.close_query(entry.query);
        entry.closed = true;
        log::debug!("Closed performance counter query '{}'", key);
    }

    // Called with the entry lock held.
    fn detach(&self, key: &str, entry: &SharedEntry) {
        let mut map = self.queries.write().unwrap_or_else(PoisonError::into_inner);
        if map.get(key).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            map.remove(key);
        }
    }
}

impl Drop for QueryHandleRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for QueryHandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandleRegistry")
            .field("queries", &self.query_keys())
            .finish()
    }
}

fn lock(entry: &Mutex<QueryEntry>) -> MutexGuard<'_, QueryEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perfmon::fake::FakeNativeSource;

    fn registry() -> (Arc<FakeNativeSource>, QueryHandleRegistry) {
        let fake = Arc::new(FakeNativeSource::new());
        let registry = QueryHandleRegistry::new(fake.clone());
        (fake, registry)
    }

    #[test]
    fn test_open_or_get_reuses_query() {
        let (fake, registry) = registry();
        let a = registry.open_or_get_query("K").unwrap();
        let b = registry.open_or_get_query("K").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), "K");
        assert_eq!(fake.open_calls(), 1);
    }

    #[test]
    fn test_open_failure() {
        let (fake, registry) = registry();
        fake.fail_open(true);
        assert!(matches!(
            registry.open_or_get_query("K"),
            Err(PerfError::NativeSource(_))
        ));
        assert!(!registry.contains_query("K"));
    }

    #[test]
    fn test_add_then_remove_closes_query() {
        let (fake, registry) = registry();
        let handle = registry.add_counter("\\Memory\\Pages/sec", "K").unwrap();
        assert!(registry.contains_query("K"));
        assert!(registry.remove_counter(&handle, "K"));
        assert!(!registry.contains_query("K"));
        assert_eq!(registry.counter_count("K"), 0);
        assert_eq!(fake.open_queries(), 0);
        assert_eq!(fake.live_counters(), 0);
    }

    #[test]
    fn test_query_stays_open_until_last_counter() {
        let (fake, registry) = registry();
        let a = registry.add_counter("\\Memory\\A", "K").unwrap();
        let b = registry.add_counter("\\Memory\\B", "K").unwrap();
        assert_eq!(registry.counter_count("K"), 2);

        assert!(registry.remove_counter(&a, "K"));
        assert!(registry.contains_query("K"));
        assert_eq!(fake.open_queries(), 1);

        assert!(registry.remove_counter(&b, "K"));
        assert!(!registry.contains_query("K"));
        assert_eq!(fake.open_queries(), 0);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let (_fake, registry) = registry();
        let handle = registry.add_counter("\\Memory\\A", "K").unwrap();
        assert!(!registry.remove_counter(&handle, "other"));
        assert!(registry.remove_counter(&handle, "K"));
        assert!(!registry.remove_counter(&handle, "K"));
    }

    #[test]
    fn test_add_failure_leaves_counters_untouched() {
        let (fake, registry) = registry();
        registry.add_counter("\\Memory\\A", "K").unwrap();
        fake.fail_counter("\\Memory\\Bad");
        assert!(registry.add_counter("\\Memory\\Bad", "K").is_err());
        assert_eq!(registry.counter_count("K"), 1);
        assert_eq!(fake.live_counters(), 1);
    }

    #[test]
    fn test_failed_first_add_closes_new_query() {
        let (fake, registry) = registry();
        fake.fail_counter("\\Memory\\Bad");
        assert!(registry.add_counter("\\Memory\\Bad", "K").is_err());
        assert!(!registry.contains_query("K"));
        assert_eq!(fake.open_queries(), 0);
        assert_eq!(fake.close_calls(), 1);
    }

    #[test]
    fn test_failed_add_keeps_explicitly_opened_query() {
        let (fake, registry) = registry();
        registry.open_or_get_query("K").unwrap();
        fake.fail_counter("\\Memory\\Bad");
        assert!(registry.add_counter("\\Memory\\Bad", "K").is_err());
        assert!(registry.contains_query("K"));
        assert_eq!(fake.open_queries(), 1);
    }

    #[test]
    fn test_duplicate_path_shares_handle() {
        let (fake, registry) = registry();
        let a = registry.add_counter("\\Memory\\A", "K").unwrap();
        let b = registry.add_counter("\\Memory\\A", "K").unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.counter_count("K"), 1);
        assert_eq!(fake.add_calls(), 1);

        // Two adds, two removes before the native counter goes.
        assert!(registry.remove_counter(&a, "K"));
        assert_eq!(fake.live_counters(), 1);
        assert!(registry.contains_query("K"));
        assert!(registry.remove_counter(&b, "K"));
        assert_eq!(fake.live_counters(), 0);
        assert!(!registry.contains_query("K"));
    }

    #[test]
    fn test_remove_all_counters() {
        let (fake, registry) = registry();
        registry.add_counter("\\Memory\\A", "K").unwrap();
        registry.add_counter("\\Memory\\B", "K").unwrap();
        registry.add_counter("\\Memory\\A", "L").unwrap();

        registry.remove_all_counters("K");
        assert!(!registry.contains_query("K"));
        assert!(registry.contains_query("L"));
        assert_eq!(fake.live_counters(), 1);

        registry.remove_all_counters("K");
        assert_eq!(registry.query_keys(), vec!["L".to_string()]);
    }

    #[test]
    fn test_update_and_read() {
        let (fake, registry) = registry();
        fake.set_value("\\Memory\\A", 42);
        let handle = registry.add_counter("\\Memory\\A", "K").unwrap();

        let first = registry.update("K");
        let second = registry.update("K");
        assert!(first > 0);
        assert!(second > first);
        assert_eq!(registry.read(&handle), 42);
    }

    #[test]
    fn test_update_unknown_or_failing() {
        let (fake, registry) = registry();
        assert_eq!(registry.update("missing"), 0);
        registry.add_counter("\\Memory\\A", "K").unwrap();
        fake.fail_updates(true);
        assert_eq!(registry.update("K"), 0);
    }

    #[test]
    fn test_read_error_sentinel_is_zero() {
        let (fake, registry) = registry();
        fake.set_value("\\Memory\\A", -7);
        let handle = registry.add_counter("\\Memory\\A", "K").unwrap();
        registry.update("K");
        assert_eq!(registry.read(&handle), 0);

        registry.remove_counter(&handle, "K");
        assert_eq!(registry.read(&handle), 0);
    }

    #[test]
    fn test_shutdown_idempotent() {
        let (fake, registry) = registry();
        registry.add_counter("\\Memory\\A", "K").unwrap();
        registry.add_counter("\\Memory\\B", "L").unwrap();
        registry.remove_all_counters("L");

        registry.shutdown();
        assert!(registry.query_keys().is_empty());
        assert_eq!(fake.open_queries(), 0);
        assert_eq!(fake.live_counters(), 0);

        registry.shutdown();
        assert_eq!(fake.close_calls(), 2);
    }

    #[test]
    fn test_drop_releases_handles() {
        let (fake, registry) = registry();
        registry.add_counter("\\Memory\\A", "K").unwrap();
        drop(registry);
        assert_eq!(fake.open_queries(), 0);
    }

    #[test]
    fn test_counter_handle_equality_by_path() {
        let (_fake, registry) = registry();
        let a = registry.add_counter("\\Memory\\A", "K").unwrap();
        let b = registry.add_counter("\\Memory\\A", "L").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), "K");
        assert_eq!(b.key(), "L");
    }

    #[test]
    fn test_concurrent_keys() {
        let (fake, registry) = registry();
        let registry = Arc::new(registry);

        let workers: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let key = format!("K{}", t % 4);
                    for i in 0..50 {
                        let path = format!("\\Thread({}_{})\\Counter", t, i);
                        let handle = registry.add_counter(&path, &key).unwrap();
                        registry.update(&key);
                        registry.read(&handle);
                        assert!(registry.remove_counter(&handle, &key));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        registry.shutdown();
        assert_eq!(fake.live_counters(), 0);
        assert_eq!(fake.open_queries(), 0);
    }
}

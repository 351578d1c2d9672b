//! Scripted in-memory backends.
//!
//! Used by the test suites and by callers that want to exercise counter
//! groups without a live host. Both fakes are thread-safe and record every
//! call so tests can assert on how a group drove them.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::decoder::Cell;
use super::source::{ManagementQuerySource, ManagementRow, NativeCounterSource, NativeHandle};

const FAKE_EPOCH_MS: u64 = 1_700_000_000_000;

#[derive(Default)]
struct NativeState {
    next_handle: usize,
    queries: HashSet<usize>,
    counters: HashMap<usize, String>,
    values: HashMap<String, i64>,
    failing_paths: HashSet<String>,
    instances: HashMap<String, Vec<String>>,
    localized: HashMap<String, String>,
    fail_open: bool,
    fail_updates: bool,
    clock: u64,
    open_calls: usize,
    add_calls: usize,
    update_calls: usize,
    close_calls: usize,
    list_calls: usize,
}

/// Fake native counter source.
#[derive(Default)]
pub struct FakeNativeSource {
    state: Mutex<NativeState>,
}

impl FakeNativeSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NativeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Value returned for every counter added at `path`. Negative values act
    /// as native error sentinels.
    pub fn set_value(&self, path: &str, value: i64) {
        self.state().values.insert(path.to_string(), value);
    }

    /// Make `add_counter` fail for `path`.
    pub fn fail_counter(&self, path: &str) {
        self.state().failing_paths.insert(path.to_string());
    }

    pub fn fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// Make `update_query` report exhausted retries.
    pub fn fail_updates(&self, fail: bool) {
        self.state().fail_updates = fail;
    }

    /// Instances reported for `category`. Unknown categories fail enumeration.
    pub fn set_instances(&self, category: &str, instances: &[&str]) {
        self.state().instances.insert(
            category.to_string(),
            instances.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn set_localized(&self, english: &str, localized: &str) {
        self.state()
            .localized
            .insert(english.to_string(), localized.to_string());
    }

    pub fn open_queries(&self) -> usize {
        self.state().queries.len()
    }

    pub fn live_counters(&self) -> usize {
        self.state().counters.len()
    }

    /// Paths of the live counters, sorted.
    pub fn live_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state().counters.values().cloned().collect();
        paths.sort();
        paths
    }

    pub fn open_calls(&self) -> usize {
        self.state().open_calls
    }

    pub fn add_calls(&self) -> usize {
        self.state().add_calls
    }

    pub fn update_calls(&self) -> usize {
        self.state().update_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }
}

impl NativeCounterSource for FakeNativeSource {
    fn open_query(&self) -> Option<NativeHandle> {
        let mut state = self.state();
        state.open_calls += 1;
        if state.fail_open {
            return None;
        }
        state.next_handle += 1;
        let handle = state.next_handle;
        state.queries.insert(handle);
        Some(NativeHandle(handle))
    }

    fn add_counter(&self, query: NativeHandle, path: &str) -> Option<NativeHandle> {
        let mut state = self.state();
        state.add_calls += 1;
        if !state.queries.contains(&query.0) || state.failing_paths.contains(path) {
            return None;
        }
        state.next_handle += 1;
        let handle = state.next_handle;
        state.counters.insert(handle, path.to_string());
        Some(NativeHandle(handle))
    }

    fn update_query(&self, query: NativeHandle) -> u64 {
        let mut state = self.state();
        state.update_calls += 1;
        if state.fail_updates || !state.queries.contains(&query.0) {
            return 0;
        }
        state.clock += 1000;
        FAKE_EPOCH_MS + state.clock
    }

    fn read_counter(&self, counter: NativeHandle) -> i64 {
        let state = self.state();
        match state.counters.get(&counter.0) {
            Some(path) => state.values.get(path).copied().unwrap_or(0),
            None => -1,
        }
    }

    fn remove_counter(&self, counter: NativeHandle) {
        self.state().counters.remove(&counter.0);
    }

    fn close_query(&self, query: NativeHandle) {
        let mut state = self.state();
        state.close_calls += 1;
        state.queries.remove(&query.0);
    }

    fn list_instances(&self, category: &str) -> Option<Vec<String>> {
        let mut state = self.state();
        state.list_calls += 1;
        state.instances.get(category).cloned()
    }

    fn localize_category(&self, english: &str) -> Option<String> {
        self.state().localized.get(english).cloned()
    }
}

#[derive(Default)]
struct ManagementState {
    rows: HashMap<String, Vec<ManagementRow>>,
    executions: Vec<(String, Vec<String>)>,
}

/// Fake management query source. Returns the rows scripted for a class
/// string, or nothing.
#[derive(Default)]
pub struct FakeManagementSource {
    state: Mutex<ManagementState>,
}

impl FakeManagementSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManagementState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_rows(&self, class: &str, rows: Vec<ManagementRow>) {
        self.state().rows.insert(class.to_string(), rows);
    }

    /// Number of `execute` calls so far.
    pub fn executions(&self) -> usize {
        self.state().executions.len()
    }

    /// Class and properties of the most recent `execute` call.
    pub fn last_execution(&self) -> Option<(String, Vec<String>)> {
        self.state().executions.last().cloned()
    }
}

impl ManagementQuerySource for FakeManagementSource {
    fn execute(&self, class: &str, properties: &[&str]) -> Vec<ManagementRow> {
        let mut state = self.state();
        state.executions.push((
            class.to_string(),
            properties.iter().map(|p| p.to_string()).collect(),
        ));
        state.rows.get(class).cloned().unwrap_or_default()
    }
}

/// Build a management row from `(property, cell)` pairs.
pub fn row(cells: &[(&str, Cell)]) -> ManagementRow {
    cells
        .iter()
        .map(|(name, cell)| (name.to_string(), cell.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_lifecycle() {
        let fake = FakeNativeSource::new();
        let query = fake.open_query().unwrap();
        let counter = fake.add_counter(query, "\\Memory\\A").unwrap();
        fake.set_value("\\Memory\\A", 9);
        assert!(fake.update_query(query) > FAKE_EPOCH_MS);
        assert_eq!(fake.read_counter(counter), 9);

        fake.remove_counter(counter);
        assert_eq!(fake.read_counter(counter), -1);
        fake.close_query(query);
        assert!(fake.add_counter(query, "\\Memory\\A").is_none());
        assert_eq!(fake.update_query(query), 0);
    }

    #[test]
    fn test_management_records_calls() {
        let fake = FakeManagementSource::new();
        fake.set_rows("Win32_Foo", vec![row(&[("Bar", Cell::U32(3))])]);
        assert_eq!(fake.execute("Win32_Foo", &["Bar"]).len(), 1);
        assert!(fake.execute("Win32_Missing", &["Bar"]).is_empty());
        assert_eq!(fake.executions(), 2);
        assert_eq!(
            fake.last_execution(),
            Some(("Win32_Missing".to_string(), vec!["Bar".to_string()]))
        );
    }
}

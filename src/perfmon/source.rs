//! Backend contracts for the two metric sources.
//!
//! [`NativeCounterSource`] wraps the fast counter API (PDH on Windows) and
//! [`ManagementQuerySource`] the structured query API (WMI). Both are
//! blocking, infallible at the type level, and report failure through
//! sentinels the registry and groups know how to read.

use std::collections::HashMap;

use super::decoder::Cell;

/// Opaque native handle. Only the source that issued it can interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub usize);

/// One management result row: property name to typed cell.
pub type ManagementRow = HashMap<String, Cell>;

/// Fast, low-level counter source.
pub trait NativeCounterSource: Send + Sync {
    /// Open an empty query, `None` on failure.
    fn open_query(&self) -> Option<NativeHandle>;

    /// Add the counter at `path` to `query`, `None` on failure.
    fn add_counter(&self, query: NativeHandle, path: &str) -> Option<NativeHandle>;

    /// Collect fresh samples for every counter in `query`. Returns the
    /// collection timestamp in epoch milliseconds, or 0 once the source's own
    /// retries are exhausted.
    fn update_query(&self, query: NativeHandle) -> u64;

    /// Raw value of the last collected sample; negative on error.
    fn read_counter(&self, counter: NativeHandle) -> i64;

    fn remove_counter(&self, counter: NativeHandle);

    fn close_query(&self, query: NativeHandle);

    /// Live instance names of `category` (already localized), `None` on failure.
    fn list_instances(&self, category: &str) -> Option<Vec<String>>;

    /// Localized name of an English category, when it can be resolved.
    fn localize_category(&self, _english: &str) -> Option<String> {
        None
    }
}

/// Slower, structured query source.
pub trait ManagementQuerySource: Send + Sync {
    /// Run `SELECT <properties> FROM <class>`. `class` may carry a `WHERE`
    /// clause. An empty result means failure or no data.
    fn execute(&self, class: &str, properties: &[&str]) -> Vec<ManagementRow>;
}

/// Native source for platforms without one. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableNativeSource;

impl NativeCounterSource for UnavailableNativeSource {
    fn open_query(&self) -> Option<NativeHandle> {
        None
    }

    fn add_counter(&self, _query: NativeHandle, _path: &str) -> Option<NativeHandle> {
        None
    }

    fn update_query(&self, _query: NativeHandle) -> u64 {
        0
    }

    fn read_counter(&self, _counter: NativeHandle) -> i64 {
        -1
    }

    fn remove_counter(&self, _counter: NativeHandle) {}

    fn close_query(&self, _query: NativeHandle) {}

    fn list_instances(&self, _category: &str) -> Option<Vec<String>> {
        None
    }
}

/// Management source for platforms without one. Always empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableManagementSource;

impl ManagementQuerySource for UnavailableManagementSource {
    fn execute(&self, _class: &str, _properties: &[&str]) -> Vec<ManagementRow> {
        Vec::new()
    }
}

/// `SELECT` text for a management query.
pub fn select_statement(class: &str, properties: &[&str]) -> String {
    if properties.is_empty() {
        format!("SELECT * FROM {}", class)
    } else {
        format!("SELECT {} FROM {}", properties.join(", "), class)
    }
}

/// Cell for `property`, matching the name case-insensitively when no exact
/// key exists (management property names are case-insensitive).
pub fn lookup_cell<'a>(row: &'a ManagementRow, property: &str) -> Option<&'a Cell> {
    row.get(property).or_else(|| {
        row.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(property))
            .map(|(_, cell)| cell)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_statement() {
        assert_eq!(
            select_statement("Win32_PerfRawData_PerfOS_Memory", &["PagesPersec", "PoolPagedBytes"]),
            "SELECT PagesPersec, PoolPagedBytes FROM Win32_PerfRawData_PerfOS_Memory"
        );
        assert_eq!(
            select_statement("Win32_PerfRawData_PerfOS_Processor WHERE Name=\"_Total\"", &[]),
            "SELECT * FROM Win32_PerfRawData_PerfOS_Processor WHERE Name=\"_Total\""
        );
    }

    #[test]
    fn test_lookup_cell_case_insensitive() {
        let mut row = ManagementRow::new();
        row.insert("PercentIdleTime".to_string(), Cell::U64(5));
        assert_eq!(lookup_cell(&row, "PercentIdleTime"), Some(&Cell::U64(5)));
        assert_eq!(lookup_cell(&row, "percentidletime"), Some(&Cell::U64(5)));
        assert_eq!(lookup_cell(&row, "Name"), None);
    }

    #[test]
    fn test_unavailable_sources() {
        let native = UnavailableNativeSource;
        assert!(native.open_query().is_none());
        assert_eq!(native.update_query(NativeHandle(1)), 0);
        assert!(native.read_counter(NativeHandle(1)) < 0);
        assert!(native.localize_category("Processor").is_none());
        assert!(UnavailableManagementSource.execute("Win32_Foo", &["Bar"]).is_empty());
    }
}

//! WMI management query source.

use std::collections::HashMap;

use wmi::{COMLibrary, Variant, WMIConnection};

use crate::perfmon::decoder::{parse_cim_datetime, Cell};
use crate::perfmon::source::{select_statement, ManagementQuerySource, ManagementRow};

/// Create WMI connection with robust COM initialization
/// Handles cases where COM is already initialized by the host application
fn create_wmi_connection(namespace: &str) -> Option<WMIConnection> {
    // Strategy 1: Fresh COM initialization (works best in background threads)
    if let Ok(com) = COMLibrary::new() {
        if let Ok(conn) = WMIConnection::with_namespace_path(namespace, com) {
            return Some(conn);
        }
    }

    // Strategy 2: COM without security init
    if let Ok(com) = COMLibrary::without_security() {
        if let Ok(conn) = WMIConnection::with_namespace_path(namespace, com) {
            return Some(conn);
        }
    }

    // Strategy 3: Assume COM is already initialized on this thread
    let com = unsafe { COMLibrary::assume_initialized() };
    match WMIConnection::with_namespace_path(namespace, com) {
        Ok(conn) => Some(conn),
        Err(e) => {
            log::warn!("Cannot connect to WMI namespace {}: {}", namespace, e);
            None
        }
    }
}

/// Management source over WMI. Connections are per call since COM state is
/// per thread.
pub struct WmiQuerySource {
    namespace: String,
}

impl WmiQuerySource {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }
}

impl ManagementQuerySource for WmiQuerySource {
    fn execute(&self, class: &str, properties: &[&str]) -> Vec<ManagementRow> {
        let Some(conn) = create_wmi_connection(&self.namespace) else {
            return Vec::new();
        };

        let query = select_statement(class, properties);
        match conn.raw_query::<HashMap<String, Variant>>(&query) {
            Ok(results) => results
                .into_iter()
                .map(|item| {
                    item.into_iter()
                        .filter_map(|(name, value)| variant_cell(value).map(|cell| (name, cell)))
                        .collect()
                })
                .collect(),
            Err(e) => {
                log::warn!("WMI query failed ({}): {}", query, e);
                Vec::new()
            }
        }
    }
}

fn variant_cell(value: Variant) -> Option<Cell> {
    Some(match value {
        Variant::Empty | Variant::Null => return None,
        Variant::I2(v) => Cell::I16(v),
        Variant::UI2(v) => Cell::U16(v),
        Variant::I4(v) => Cell::I32(v),
        Variant::UI4(v) => Cell::U32(v),
        Variant::I8(v) => Cell::I64(v),
        Variant::UI8(v) => Cell::U64(v),
        Variant::String(s) => match parse_cim_datetime(&s) {
            Some(ms) => Cell::DateTime(ms),
            None => Cell::Str(s),
        },
        Variant::I1(_) => Cell::Unsupported("I1".into()),
        Variant::UI1(_) => Cell::Unsupported("UI1".into()),
        Variant::R4(_) => Cell::Unsupported("R4".into()),
        Variant::R8(_) => Cell::Unsupported("R8".into()),
        Variant::Bool(_) => Cell::Unsupported("Bool".into()),
        Variant::Array(_) => Cell::Unsupported("Array".into()),
        _ => Cell::Unsupported("Object".into()),
    })
}

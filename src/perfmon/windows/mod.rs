// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Windows counter backends
//!
//! - [`PdhCounterSource`]: Performance Data Helper queries and counters
//! - [`WmiQuerySource`]: `Win32_PerfRawData_*` classes over WMI

mod pdh;
mod wbem;

pub use self::pdh::PdhCounterSource;
pub use self::wbem::WmiQuerySource;

/// Null-terminated UTF-16 copy of `s`.
pub(crate) fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Split a double-null-terminated UTF-16 string list.
pub(crate) fn split_multi_sz(buf: &[u16]) -> Vec<String> {
    buf.split(|&c| c == 0)
        .take_while(|s| !s.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

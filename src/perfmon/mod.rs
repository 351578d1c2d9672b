//! Performance counter acquisition
//!
//! Reads live host metrics through one of two sources and normalizes them to
//! `i64`:
//!
//! - **Native** counters (PDH on Windows): fast, handle-based, refreshed per query
//! - **Management** queries (WMI on Windows): slower tabular fallback
//!
//! # Architecture
//!
//! - [`PropertyDescriptor`]: static field table for one category
//! - [`QueryHandleRegistry`]: owns every native query and counter handle
//! - [`CounterGroup`]: one value per field, native first, management fallback
//! - [`WildcardCounterGroup`]: one value list per field across every instance
//!   matching a [`WildcardMatcher`] pattern
//! - [`decoder`]: typed management cells to `i64`
//!
//! # Example
//!
//! ```no_run
//! use simonperf::config::PerfConfig;
//! use simonperf::perfmon::{PerfContext, PropertyDescriptor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Memory {
//!     PagesPerSec,
//! }
//!
//! let ctx = PerfContext::system(PerfConfig::default());
//! let descriptor = PropertyDescriptor::builder("Memory")
//!     .counter(Memory::PagesPerSec, None, "Pages/sec", "PagesPersec")
//!     .build()?;
//! let mut group = ctx.counter_group(descriptor, "Win32_PerfRawData_PerfOS_Memory")?;
//!
//! if let Some(pages) = group.query()?.get(&Memory::PagesPerSec) {
//!     println!("pages/sec ticks: {}", pages);
//! }
//! ctx.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod decoder;
pub mod descriptor;
pub mod fake;
pub mod group;
pub mod matcher;
pub mod registry;
pub mod source;
pub mod wildcard;

#[cfg(windows)]
pub mod windows;

pub use context::PerfContext;
pub use decoder::{decode, Cell};
pub use descriptor::{counter_path, DescriptorKind, FieldId, FieldSource, FieldSpec, PropertyDescriptor};
pub use group::{CounterGroup, CounterSource};
pub use matcher::WildcardMatcher;
pub use registry::{CounterHandle, QueryHandle, QueryHandleRegistry};
pub use source::{
    ManagementQuerySource, ManagementRow, NativeCounterSource, NativeHandle,
    UnavailableManagementSource, UnavailableNativeSource,
};
pub use wildcard::WildcardCounterGroup;

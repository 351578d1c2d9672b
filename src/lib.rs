//! Silicon Monitor performance counters
//!
//! The counter acquisition layer behind the Windows CPU, disk, process,
//! thread, memory and network collectors. See [`perfmon`] for the model.

pub mod config;
pub mod error;
pub mod perfmon;

pub use config::PerfConfig;
pub use error::{PerfError, Result};
pub use perfmon::{
    CounterGroup, CounterSource, PerfContext, PropertyDescriptor, QueryHandleRegistry,
    WildcardCounterGroup,
};

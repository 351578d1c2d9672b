//! Counter groups: one descriptor bound to one active source.
//!
//! A group starts on the native source when it can. The first time a native
//! update fails it releases its counters and moves to the management source
//! for good; only [`CounterGroup::set_source`] brings it back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::context::PerfContext;
use super::decoder::decode;
use super::descriptor::{counter_path, DescriptorKind, FieldId, PropertyDescriptor};
use super::registry::{CounterHandle, QueryHandleRegistry};
use super::source::{lookup_cell, ManagementQuerySource};
use crate::error::Result;

/// Which backend a group reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterSource {
    Native,
    Management,
}

impl fmt::Display for CounterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Management => write!(f, "management"),
        }
    }
}

/// Group of fixed counters returning one value per field.
pub struct CounterGroup<F: FieldId> {
    descriptor: PropertyDescriptor<F>,
    registry: Arc<QueryHandleRegistry>,
    management: Arc<dyn ManagementQuerySource>,
    management_class: String,
    query_key: String,
    native_allowed: bool,
    source: CounterSource,
    handles: Vec<(F, CounterHandle)>,
    last_timestamp: u64,
}

impl<F: FieldId> CounterGroup<F> {
    /// Group whose query key is the descriptor's category.
    pub fn new(
        ctx: &PerfContext,
        descriptor: PropertyDescriptor<F>,
        management_class: &str,
    ) -> Result<Self> {
        let key = descriptor.category().to_string();
        Self::with_query_key(ctx, descriptor, management_class, &key)
    }

    /// Group with an explicit query key. Groups sharing a key share one native
    /// query; each releases only the counters it added.
    pub fn with_query_key(
        ctx: &PerfContext,
        descriptor: PropertyDescriptor<F>,
        management_class: &str,
        query_key: &str,
    ) -> Result<Self> {
        descriptor.expect_kind(DescriptorKind::Plain)?;

        let native_allowed = ctx.config().native_allowed(descriptor.category());
        let mut group = Self {
            descriptor,
            registry: Arc::clone(ctx.registry()),
            management: Arc::clone(ctx.management()),
            management_class: management_class.to_string(),
            query_key: query_key.to_string(),
            native_allowed,
            source: CounterSource::Management,
            handles: Vec::new(),
            last_timestamp: 0,
        };

        if !native_allowed {
            log::info!(
                "Native counters disabled for '{}', using management source",
                group.descriptor.category()
            );
        } else if group.init_native() {
            group.source = CounterSource::Native;
        } else {
            log::warn!(
                "Native counters unavailable for '{}', using management source",
                group.descriptor.category()
            );
        }
        Ok(group)
    }

    pub fn source(&self) -> CounterSource {
        self.source
    }

    pub fn query_key(&self) -> &str {
        &self.query_key
    }

    pub fn descriptor(&self) -> &PropertyDescriptor<F> {
        &self.descriptor
    }

    pub fn management_class(&self) -> &str {
        &self.management_class
    }

    /// Timestamp of the last native sample, 0 when the last query used the
    /// management source.
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    /// Switch sources explicitly. Switching to native re-runs native setup
    /// once and falls back to management if it fails (returning false).
    pub fn set_source(&mut self, source: CounterSource) -> bool {
        if source == self.source {
            return true;
        }
        match source {
            CounterSource::Management => {
                self.release_native();
                self.source = CounterSource::Management;
                log::info!(
                    "Counter group '{}' switched to management source",
                    self.query_key
                );
                true
            }
            CounterSource::Native => {
                if !self.native_allowed {
                    log::debug!("Native counters disabled for '{}'", self.query_key);
                    return false;
                }
                if self.init_native() {
                    self.source = CounterSource::Native;
                    log::info!("Counter group '{}' switched to native source", self.query_key);
                    true
                } else {
                    log::warn!(
                        "Counter group '{}' could not switch to native source",
                        self.query_key
                    );
                    false
                }
            }
        }
    }

    /// Read one value per field. Fields with no data are absent.
    pub fn query(&mut self) -> Result<HashMap<F, i64>> {
        if self.source == CounterSource::Native {
            let timestamp = self.registry.update(&self.query_key);
            if timestamp > 0 {
                self.last_timestamp = timestamp;
                return Ok(self
                    .handles
                    .iter()
                    .map(|(field, handle)| (field.clone(), self.registry.read(handle)))
                    .collect());
            }
            log::warn!(
                "Native update failed for '{}', falling back to management source",
                self.query_key
            );
            self.set_source(CounterSource::Management);
        }
        self.query_management()
    }

    fn query_management(&mut self) -> Result<HashMap<F, i64>> {
        self.last_timestamp = 0;
        let properties = self.descriptor.properties();
        let rows = self.management.execute(&self.management_class, &properties);

        let mut values = HashMap::new();
        let Some(row) = rows.first() else {
            log::debug!("No management data for {}", self.management_class);
            return Ok(values);
        };
        for field in self.descriptor.counter_fields() {
            if let Some(cell) = lookup_cell(row, &field.property) {
                values.insert(field.id.clone(), decode(cell)?);
            }
        }
        Ok(values)
    }

    // On failure the counters added by this attempt are rolled back.
    fn init_native(&mut self) -> bool {
        let category = self.descriptor.category();
        let mut handles: Vec<(F, CounterHandle)> =
            Vec::with_capacity(self.descriptor.counter_fields().len());

        for field in self.descriptor.counter_fields() {
            let Some(counter) = field.counter_name() else {
                continue;
            };
            let path = counter_path(category, field.instance(), counter);
            match self.registry.add_counter(&path, &self.query_key) {
                Ok(handle) => handles.push((field.id.clone(), handle)),
                Err(e) => {
                    log::warn!("Failed to add counter {}: {}", path, e);
                    for (_, handle) in &handles {
                        self.registry.remove_counter(handle, &self.query_key);
                    }
                    return false;
                }
            }
        }

        self.handles = handles;
        true
    }

    fn release_native(&mut self) {
        for (_, handle) in self.handles.drain(..) {
            self.registry.remove_counter(&handle, &self.query_key);
        }
    }
}

impl<F: FieldId> Drop for CounterGroup<F> {
    fn drop(&mut self) {
        self.release_native();
    }
}

impl<F: FieldId> fmt::Debug for CounterGroup<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterGroup")
            .field("category", &self.descriptor.category())
            .field("query_key", &self.query_key)
            .field("source", &self.source)
            .finish()
    }
}

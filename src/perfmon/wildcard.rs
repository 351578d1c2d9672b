//! Wildcard counter groups.
//!
//! The instance set is discovered on every query: the live instances of the
//! category are listed, filtered through the descriptor's field-0 pattern,
//! and each remaining counter field is fanned out across the survivors. The
//! result holds one list per field, aligned with
//! [`WildcardCounterGroup::last_matched_instances`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::context::PerfContext;
use super::decoder::{decode, Cell};
use super::descriptor::{counter_path, DescriptorKind, FieldId, PropertyDescriptor};
use super::group::CounterSource;
use super::matcher::WildcardMatcher;
use super::registry::{CounterHandle, QueryHandleRegistry};
use super::source::{lookup_cell, ManagementQuerySource};
use crate::error::{PerfError, Result};

pub struct WildcardCounterGroup<F: FieldId> {
    descriptor: PropertyDescriptor<F>,
    registry: Arc<QueryHandleRegistry>,
    management: Arc<dyn ManagementQuerySource>,
    management_class: String,
    query_key: String,
    native_allowed: bool,
    source: CounterSource,
    localized_category: String,
    matcher: WildcardMatcher,
    handles: Vec<(F, Vec<CounterHandle>)>,
    instances: Vec<String>,
    last_timestamp: u64,
}

impl<F: FieldId> WildcardCounterGroup<F> {
    /// Group keyed by [`default_query_key`] of its category, apart from the
    /// plain groups over the same category.
    pub fn new(
        ctx: &PerfContext,
        descriptor: PropertyDescriptor<F>,
        management_class: &str,
    ) -> Result<Self> {
        let key = default_query_key(descriptor.category());
        Self::with_query_key(ctx, descriptor, management_class, &key)
    }

    /// Group with an explicit query key. Groups sharing a key share one
    /// native query; each releases only the counters it added.
    pub fn with_query_key(
        ctx: &PerfContext,
        descriptor: PropertyDescriptor<F>,
        management_class: &str,
        query_key: &str,
    ) -> Result<Self> {
        descriptor.expect_kind(DescriptorKind::Wildcard)?;
        let pattern = descriptor.filter_pattern().ok_or_else(|| {
            PerfError::Configuration(format!(
                "wildcard descriptor for '{}' has no instance filter",
                descriptor.category()
            ))
        })?;
        let matcher = WildcardMatcher::new(pattern);

        let registry = Arc::clone(ctx.registry());
        let native_allowed = ctx.config().native_allowed(descriptor.category());
        let localized_category = if native_allowed && ctx.config().native.localize {
            registry.localize_category(descriptor.category())
        } else {
            descriptor.category().to_string()
        };

        let mut group = Self {
            descriptor,
            registry,
            management: Arc::clone(ctx.management()),
            management_class: management_class.to_string(),
            query_key: query_key.to_string(),
            native_allowed,
            source: CounterSource::Management,
            localized_category,
            matcher,
            handles: Vec::new(),
            instances: Vec::new(),
            last_timestamp: 0,
        };

        if !native_allowed {
            log::info!(
                "Native counters disabled for '{}', using management source",
                group.descriptor.category()
            );
        } else if group.refresh_instances() {
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

    /// Category name used for instance enumeration.
    pub fn localized_category(&self) -> &str {
        &self.localized_category
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    /// Instance names of the last successful query, in result order.
    pub fn last_matched_instances(&self) -> &[String] {
        &self.instances
    }

    pub fn set_source(&mut self, source: CounterSource) -> bool {
        if source == self.source {
            return true;
        }
        match source {
            CounterSource::Management => {
                self.release_native();
                self.source = CounterSource::Management;
                log::info!(
                    "Wildcard group '{}' switched to management source",
                    self.query_key
                );
                true
            }
            CounterSource::Native => {
                if !self.native_allowed {
                    log::debug!("Native counters disabled for '{}'", self.query_key);
                    return false;
                }
                self.instances.clear();
                if self.refresh_instances() {
                    self.source = CounterSource::Native;
                    log::info!("Wildcard group '{}' switched to native source", self.query_key);
                    true
                } else {
                    log::warn!(
                        "Wildcard group '{}' could not switch to native source",
                        self.query_key
                    );
                    false
                }
            }
        }
    }

    /// Rebuild the instance list and counter set from the live instances.
    /// Returns false (with nothing registered under the key) when the listing
    /// fails, nothing matches, or any counter cannot be added.
    pub fn refresh_instances(&mut self) -> bool {
        let Some(raw) = self.registry.list_instances(&self.localized_category) else {
            log::warn!("Cannot list instances of '{}'", self.localized_category);
            self.discard();
            return false;
        };

        let matched = self.matcher.filter(&raw);
        if matched.is_empty() {
            log::debug!(
                "No instances of '{}' match the filter ({} listed)",
                self.localized_category,
                raw.len()
            );
            self.discard();
            return false;
        }

        if matched == self.instances && !self.handles.is_empty() {
            return true;
        }
        self.release_native();

        let category = self.descriptor.category();
        let mut handles: Vec<(F, Vec<CounterHandle>)> =
            Vec::with_capacity(self.descriptor.counter_fields().len());
        for field in self.descriptor.counter_fields() {
            let Some(counter) = field.counter_name() else {
                continue;
            };
            let mut per_instance: Vec<CounterHandle> = Vec::with_capacity(matched.len());
            for instance in &matched {
                let path = counter_path(category, Some(instance.as_str()), counter);
                match self.registry.add_counter(&path, &self.query_key) {
                    Ok(handle) => per_instance.push(handle),
                    Err(e) => {
                        log::warn!("Failed to add counter {}: {}", path, e);
                        for handle in handles.iter().flat_map(|(_, hs)| hs).chain(&per_instance) {
                            self.registry.remove_counter(handle, &self.query_key);
                        }
                        self.instances.clear();
                        return false;
                    }
                }
            }
            handles.push((field.id.clone(), per_instance));
        }

        log::debug!(
            "Wildcard group '{}' tracking {} instance(s)",
            self.query_key,
            matched.len()
        );
        self.handles = handles;
        self.instances = matched;
        true
    }

    /// Read one value per (field, instance). Instance names are available
    /// from [`Self::last_matched_instances`] afterwards.
    pub fn query_wildcard(&mut self) -> Result<HashMap<F, Vec<i64>>> {
        if self.source == CounterSource::Native {
            if self.refresh_instances() {
                let timestamp = self.registry.update(&self.query_key);
                if timestamp > 0 {
                    self.last_timestamp = timestamp;
                    return Ok(self
                        .handles
                        .iter()
                        .map(|(field, handles)| {
                            let values: Vec<i64> =
                                handles.iter().map(|h| self.registry.read(h)).collect();
                            (field.clone(), values)
                        })
                        .collect());
                }
            }
            log::warn!(
                "Native refresh failed for '{}', falling back to management source",
                self.query_key
            );
            self.set_source(CounterSource::Management);
        }
        self.query_management()
    }

    fn query_management(&mut self) -> Result<HashMap<F, Vec<i64>>> {
        self.last_timestamp = 0;
        self.instances.clear();

        let Some(instance_field) = self.descriptor.instance_field() else {
            return Ok(HashMap::new());
        };
        let properties = self.descriptor.properties();
        let rows = self.management.execute(&self.management_class, &properties);

        let counter_fields = self.descriptor.counter_fields();
        let mut instances = Vec::with_capacity(rows.len());
        let mut columns: Vec<Vec<i64>> = vec![Vec::with_capacity(rows.len()); counter_fields.len()];

        for row in &rows {
            let Some(name) = lookup_cell(row, &instance_field.property).and_then(Cell::as_str)
            else {
                log::debug!("Skipping {} row without an instance name", self.management_class);
                continue;
            };
            for (field, column) in counter_fields.iter().zip(columns.iter_mut()) {
                let value = match lookup_cell(row, &field.property) {
                    Some(cell) => decode(cell)?,
                    None => 0,
                };
                column.push(value);
            }
            instances.push(name.to_string());
        }

        if instances.is_empty() {
            log::debug!("No management data for {}", self.management_class);
            return Ok(HashMap::new());
        }

        let values: HashMap<F, Vec<i64>> = counter_fields
            .iter()
            .map(|f| f.id.clone())
            .zip(columns)
            .collect();
        self.instances = instances;
        Ok(values)
    }

    fn discard(&mut self) {
        self.release_native();
        self.instances.clear();
    }

    fn release_native(&mut self) {
        for (_, handles) in self.handles.drain(..) {
            for handle in &handles {
                self.registry.remove_counter(handle, &self.query_key);
            }
        }
    }
}

/// Default query key of a wildcard group over `category`.
pub fn default_query_key(category: &str) -> String {
    format!("{}Wildcard", category)
}

impl<F: FieldId> Drop for WildcardCounterGroup<F> {
    fn drop(&mut self) {
        self.release_native();
    }
}

impl<F: FieldId> fmt::Debug for WildcardCounterGroup<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WildcardCounterGroup")
            .field("category", &self.descriptor.category())
            .field("query_key", &self.query_key)
            .field("source", &self.source)
            .field("instances", &self.instances)
            .finish()
    }
}

//! Shared acquisition context.
//!
//! Build one [`PerfContext`] at startup and hand it to every counter group.
//! It owns the registry (and through it every native handle), the management
//! source, and the configuration the groups consult.

use std::sync::Arc;

use super::descriptor::{FieldId, PropertyDescriptor};
use super::group::CounterGroup;
use super::registry::QueryHandleRegistry;
use super::source::{ManagementQuerySource, NativeCounterSource};
use super::wildcard::WildcardCounterGroup;
use crate::config::PerfConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct PerfContext {
    registry: Arc<QueryHandleRegistry>,
    management: Arc<dyn ManagementQuerySource>,
    config: PerfConfig,
}

impl PerfContext {
    pub fn new(
        native: Arc<dyn NativeCounterSource>,
        management: Arc<dyn ManagementQuerySource>,
        config: PerfConfig,
    ) -> Self {
        Self {
            registry: Arc::new(QueryHandleRegistry::new(native)),
            management,
            config,
        }
    }

    /// Context over the host's own sources: PDH and WMI on Windows, sources
    /// that always come back empty elsewhere.
    #[cfg(windows)]
    pub fn system(config: PerfConfig) -> Self {
        use super::windows::{PdhCounterSource, WmiQuerySource};

        let native = Arc::new(PdhCounterSource::new(config.native.localize));
        let management = Arc::new(WmiQuerySource::new(&config.management.namespace));
        Self::new(native, management, config)
    }

    #[cfg(not(windows))]
    pub fn system(config: PerfConfig) -> Self {
        use super::source::{UnavailableManagementSource, UnavailableNativeSource};

        log::debug!("No native performance counters on this platform");
        Self::new(
            Arc::new(UnavailableNativeSource),
            Arc::new(UnavailableManagementSource),
            config,
        )
    }

    pub fn registry(&self) -> &Arc<QueryHandleRegistry> {
        &self.registry
    }

    pub fn management(&self) -> &Arc<dyn ManagementQuerySource> {
        &self.management
    }

    pub fn config(&self) -> &PerfConfig {
        &self.config
    }

    /// Counter group keyed by its category.
    pub fn counter_group<F: FieldId>(
        &self,
        descriptor: PropertyDescriptor<F>,
        management_class: &str,
    ) -> Result<CounterGroup<F>> {
        CounterGroup::new(self, descriptor, management_class)
    }

    /// Counter group under an explicit query key.
    pub fn counter_group_with_key<F: FieldId>(
        &self,
        descriptor: PropertyDescriptor<F>,
        management_class: &str,
        query_key: &str,
    ) -> Result<CounterGroup<F>> {
        CounterGroup::with_query_key(self, descriptor, management_class, query_key)
    }

    /// Wildcard counter group keyed by `<category>Wildcard`.
    pub fn wildcard_group<F: FieldId>(
        &self,
        descriptor: PropertyDescriptor<F>,
        management_class: &str,
    ) -> Result<WildcardCounterGroup<F>> {
        WildcardCounterGroup::new(self, descriptor, management_class)
    }

    /// Wildcard counter group under an explicit query key.
    pub fn wildcard_group_with_key<F: FieldId>(
        &self,
        descriptor: PropertyDescriptor<F>,
        management_class: &str,
        query_key: &str,
    ) -> Result<WildcardCounterGroup<F>> {
        WildcardCounterGroup::with_query_key(self, descriptor, management_class, query_key)
    }

    /// Release every native handle. Idempotent; groups created afterwards
    /// open fresh queries.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

impl std::fmt::Debug for PerfContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfContext")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

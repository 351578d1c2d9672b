//! Property descriptors: the static field table behind a counter group.
//!
//! A descriptor names one category and an ordered list of fields. Plain
//! descriptors map every field to a `(instance, counter)` pair. Wildcard
//! descriptors reserve field 0 for the instance filter pattern; the remaining
//! fields name counters that are fanned out across every matching instance.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use crate::error::{PerfError, Result};

/// Bounds for a field identifier. Any small `Copy`-able enum qualifies, and so
/// does `String` for descriptors assembled at runtime.
pub trait FieldId: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> FieldId for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// What a descriptor field reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// A counter, optionally pinned to one instance.
    Counter {
        instance: Option<String>,
        counter: String,
    },
    /// Field 0 of a wildcard descriptor: the instance filter.
    InstanceFilter { pattern: String },
}

/// One row of the descriptor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec<F> {
    pub id: F,
    pub source: FieldSource,
    /// Column name used by the management source.
    pub property: String,
}

impl<F> FieldSpec<F> {
    pub fn counter_name(&self) -> Option<&str> {
        match &self.source {
            FieldSource::Counter { counter, .. } => Some(counter),
            FieldSource::InstanceFilter { .. } => None,
        }
    }

    pub fn instance(&self) -> Option<&str> {
        match &self.source {
            FieldSource::Counter { instance, .. } => instance.as_deref(),
            FieldSource::InstanceFilter { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Plain,
    Wildcard,
}

/// Immutable field table for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor<F> {
    category: String,
    kind: DescriptorKind,
    fields: Vec<FieldSpec<F>>,
}

impl<F: FieldId> PropertyDescriptor<F> {
    /// Start a plain descriptor.
    pub fn builder(category: impl Into<String>) -> DescriptorBuilder<F> {
        DescriptorBuilder {
            category: category.into(),
            kind: DescriptorKind::Plain,
            fields: Vec::new(),
        }
    }

    /// Start a wildcard descriptor whose field 0 is the instance filter.
    pub fn wildcard(
        category: impl Into<String>,
        instance_field: F,
        pattern: impl Into<String>,
        instance_property: impl Into<String>,
    ) -> DescriptorBuilder<F> {
        DescriptorBuilder {
            category: category.into(),
            kind: DescriptorKind::Wildcard,
            fields: vec![FieldSpec {
                id: instance_field,
                source: FieldSource::InstanceFilter {
                    pattern: pattern.into(),
                },
                property: instance_property.into(),
            }],
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldSpec<F>] {
        &self.fields
    }

    /// Fields that name a counter (all fields for plain descriptors, fields 1.. for wildcard ones).
    pub fn counter_fields(&self) -> &[FieldSpec<F>] {
        match self.kind {
            DescriptorKind::Plain => &self.fields,
            DescriptorKind::Wildcard => &self.fields[1..],
        }
    }

    /// Field 0 of a wildcard descriptor.
    pub fn instance_field(&self) -> Option<&FieldSpec<F>> {
        match self.kind {
            DescriptorKind::Plain => None,
            DescriptorKind::Wildcard => self.fields.first(),
        }
    }

    /// The instance filter pattern of a wildcard descriptor.
    pub fn filter_pattern(&self) -> Option<&str> {
        match self.instance_field().map(|f| &f.source) {
            Some(FieldSource::InstanceFilter { pattern }) => Some(pattern),
            _ => None,
        }
    }

    /// Management property names, in field order.
    pub fn properties(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.property.as_str()).collect()
    }

    pub(crate) fn expect_kind(&self, kind: DescriptorKind) -> Result<()> {
        if self.kind != kind {
            return Err(PerfError::Configuration(format!(
                "{} descriptor for '{}' used where a {:?} descriptor is required",
                match self.kind {
                    DescriptorKind::Plain => "plain",
                    DescriptorKind::Wildcard => "wildcard",
                },
                self.category,
                kind
            )));
        }
        Ok(())
    }
}

/// Builder returned by [`PropertyDescriptor::builder`] and [`PropertyDescriptor::wildcard`].
#[derive(Debug)]
pub struct DescriptorBuilder<F> {
    category: String,
    kind: DescriptorKind,
    fields: Vec<FieldSpec<F>>,
}

impl<F: FieldId> DescriptorBuilder<F> {
    /// Add a counter field. `instance` is ignored by wildcard descriptors,
    /// which take their instances from the filter.
    pub fn counter(
        mut self,
        id: F,
        instance: Option<&str>,
        counter: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        let instance = match self.kind {
            DescriptorKind::Plain => instance.map(str::to_string),
            DescriptorKind::Wildcard => None,
        };
        self.fields.push(FieldSpec {
            id,
            source: FieldSource::Counter {
                instance,
                counter: counter.into(),
            },
            property: property.into(),
        });
        self
    }

    pub fn build(self) -> Result<PropertyDescriptor<F>> {
        if self.category.is_empty() {
            return Err(PerfError::Configuration("empty category name".into()));
        }
        let min_fields = match self.kind {
            DescriptorKind::Plain => 1,
            DescriptorKind::Wildcard => 2,
        };
        if self.fields.len() < min_fields {
            return Err(PerfError::Configuration(format!(
                "descriptor for '{}' needs at least {} field(s), got {}",
                self.category,
                min_fields,
                self.fields.len()
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(&field.id) {
                return Err(PerfError::Configuration(format!(
                    "duplicate field {:?} in descriptor for '{}'",
                    field.id, self.category
                )));
            }
            if let FieldSource::Counter { counter, .. } = &field.source {
                if counter.is_empty() {
                    return Err(PerfError::Configuration(format!(
                        "field {:?} in '{}' has an empty counter name",
                        field.id, self.category
                    )));
                }
            }
        }

        Ok(PropertyDescriptor {
            category: self.category,
            kind: self.kind,
            fields: self.fields,
        })
    }
}

/// Compose the native path `\Category(Instance)\Counter`.
pub fn counter_path(category: &str, instance: Option<&str>, counter: &str) -> String {
    match instance {
        Some(instance) if !instance.is_empty() => {
            format!("\\{}({})\\{}", category, instance, counter)
        }
        _ => format!("\\{}\\{}", category, counter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum CpuField {
        Name,
        User,
        Idle,
    }

    #[test]
    fn test_counter_path_format() {
        assert_eq!(
            counter_path("Processor", Some("_Total"), "% Idle Time"),
            "\\Processor(_Total)\\% Idle Time"
        );
        assert_eq!(counter_path("Memory", None, "Pages/sec"), "\\Memory\\Pages/sec");
        assert_eq!(counter_path("Memory", Some(""), "Pages/sec"), "\\Memory\\Pages/sec");
    }

    #[test]
    fn test_plain_descriptor() {
        let desc = PropertyDescriptor::builder("Processor")
            .counter(CpuField::User, Some("_Total"), "% User Time", "PercentUserTime")
            .counter(CpuField::Idle, Some("_Total"), "% Idle Time", "PercentIdleTime")
            .build()
            .unwrap();
        assert_eq!(desc.kind(), DescriptorKind::Plain);
        assert_eq!(desc.counter_fields().len(), 2);
        assert_eq!(desc.fields()[0].instance(), Some("_Total"));
        assert!(desc.filter_pattern().is_none());
        assert_eq!(desc.properties(), vec!["PercentUserTime", "PercentIdleTime"]);
    }

    #[test]
    fn test_wildcard_descriptor() {
        let desc = PropertyDescriptor::wildcard("Processor", CpuField::Name, "^*_Total", "Name")
            .counter(CpuField::User, Some("ignored"), "% User Time", "PercentUserTime")
            .build()
            .unwrap();
        assert_eq!(desc.kind(), DescriptorKind::Wildcard);
        assert_eq!(desc.filter_pattern(), Some("^*_Total"));
        assert_eq!(desc.counter_fields().len(), 1);
        assert_eq!(desc.counter_fields()[0].instance(), None);
        assert_eq!(desc.instance_field().unwrap().id, CpuField::Name);
    }

    #[test]
    fn test_empty_plain_rejected() {
        let err = PropertyDescriptor::<CpuField>::builder("Processor").build().unwrap_err();
        assert!(matches!(err, PerfError::Configuration(_)));
    }

    #[test]
    fn test_wildcard_needs_two_fields() {
        let err = PropertyDescriptor::wildcard("Processor", CpuField::Name, "*", "Name")
            .build()
            .unwrap_err();
        assert!(matches!(err, PerfError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = PropertyDescriptor::builder("Processor")
            .counter(CpuField::User, None, "% User Time", "PercentUserTime")
            .counter(CpuField::User, None, "% Idle Time", "PercentIdleTime")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_kind_mismatch() {
        let desc = PropertyDescriptor::builder("Memory")
            .counter(CpuField::User, None, "Pages/sec", "PagesPersec")
            .build()
            .unwrap();
        assert!(desc.expect_kind(DescriptorKind::Plain).is_ok());
        assert!(desc.expect_kind(DescriptorKind::Wildcard).is_err());
    }
}

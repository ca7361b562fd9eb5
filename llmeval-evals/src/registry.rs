// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Metric registry: maps metric names to factories building configured instances.

use crate::params::MetricBuildError;
use crate::{Metric, MetricDescriptor};
use llmeval_core::MetricParams;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Builds a metric instance from its construction parameters
pub trait MetricFactory: Send + Sync {
    fn build(&self, params: &MetricParams) -> Result<Arc<dyn Metric>, MetricBuildError>;
}

impl<F> MetricFactory for F
where
    F: Fn(&MetricParams) -> Result<Arc<dyn Metric>, MetricBuildError> + Send + Sync,
{
    fn build(&self, params: &MetricParams) -> Result<Arc<dyn Metric>, MetricBuildError> {
        self(params)
    }
}

struct Entry {
    factory: Arc<dyn MetricFactory>,
    descriptor: MetricDescriptor,
}

/// Name-keyed catalogue of metric factories.
///
/// Populated once at startup and then only read; the runner borrows it for
/// the duration of a run.
#[derive(Default)]
pub struct MetricRegistry {
    entries: BTreeMap<String, Entry>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name` with a minimal descriptor
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<(), RegistryError>
    where
        F: MetricFactory + 'static,
    {
        self.register_with_descriptor(MetricDescriptor::new(name, ""), factory)
    }

    /// Register a factory, taking the name from the descriptor
    pub fn register_with_descriptor<F>(
        &mut self,
        descriptor: MetricDescriptor,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: MetricFactory + 'static,
    {
        let name = descriptor.name.clone();
        validate_name(&name)?;

        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        info!(metric = %name, "Registering metric");
        self.entries.insert(
            name,
            Entry {
                factory: Arc::new(factory),
                descriptor,
            },
        );
        Ok(())
    }

    /// Look up the factory registered under `name`
    pub fn get(&self, name: &str) -> Result<Arc<dyn MetricFactory>, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| Arc::clone(&entry.factory))
            .ok_or_else(|| self.unknown(name))
    }

    pub fn descriptor(&self, name: &str) -> Result<&MetricDescriptor, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| self.unknown(name))
    }

    /// Build a configured instance; `params` are forwarded verbatim
    pub fn create(
        &self,
        name: &str,
        params: &MetricParams,
    ) -> Result<Arc<dyn Metric>, RegistryError> {
        let factory = self.get(name)?;
        let metric = factory
            .build(params)
            .map_err(|source| RegistryError::Construction {
                metric: name.to_string(),
                source,
            })?;

        if metric.name() != name {
            return Err(RegistryError::InvalidMetric {
                name: name.to_string(),
                reason: format!("factory built an instance named '{}'", metric.name()),
            });
        }

        debug!(metric = name, params = params.len(), "Built metric instance");
        Ok(metric)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Descriptors of all registered metrics, sorted by name
    pub fn descriptors(&self) -> Vec<MetricDescriptor> {
        self.entries.values().map(|e| e.descriptor.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn unknown(&self, name: &str) -> RegistryError {
        RegistryError::UnknownMetric {
            name: name.to_string(),
            available: self.names(),
        }
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        "name must only contain lowercase letters, digits and underscores"
    } else {
        return Ok(());
    };

    Err(RegistryError::InvalidMetric {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Metric '{0}' is already registered")]
    DuplicateName(String),

    #[error("Invalid metric '{name}': {reason}")]
    InvalidMetric { name: String, reason: String },

    #[error("Unknown metric '{name}'. Available metrics: {}", available.join(", "))]
    UnknownMetric { name: String, available: Vec<String> },

    #[error("Failed to construct metric '{metric}': {source}")]
    Construction {
        metric: String,
        #[source]
        source: MetricBuildError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmeval_core::{DatasetRow, MetricResult, PredictionRow};
    use parking_lot::Mutex;
    use serde_json::json;

    struct NamedMetric(&'static str);

    #[async_trait]
    impl Metric for NamedMetric {
        fn name(&self) -> &str {
            self.0
        }

        async fn compute(
            &self,
            _example: &DatasetRow,
            _prediction: &PredictionRow,
        ) -> MetricResult {
            MetricResult::scored(1.0)
        }
    }

    fn factory(name: &'static str) -> impl MetricFactory {
        move |_: &MetricParams| -> Result<Arc<dyn Metric>, MetricBuildError> {
            Ok(Arc::new(NamedMetric(name)))
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = MetricRegistry::new();
        registry.register("exact", factory("exact")).unwrap();

        let metric = registry.create("exact", &MetricParams::new()).unwrap();
        assert_eq!(metric.name(), "exact");
        assert!(registry.contains("exact"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = MetricRegistry::new();
        registry.register("exact", factory("exact")).unwrap();

        let err = registry.register("exact", factory("exact")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(ref n) if n == "exact"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut registry = MetricRegistry::new();
        for name in ["", "Exact", "exact-match", "exact match"] {
            let err = registry.register(name, factory("exact")).unwrap_err();
            assert!(matches!(err, RegistryError::InvalidMetric { .. }), "{name:?}");
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_metric_lists_available() {
        let mut registry = MetricRegistry::new();
        registry.register("rouge_l", factory("rouge_l")).unwrap();
        registry.register("bleu", factory("bleu")).unwrap();

        let err = registry.create("nonexistent", &MetricParams::new()).err().unwrap();
        match &err {
            RegistryError::UnknownMetric { name, available } => {
                assert_eq!(name, "nonexistent");
                assert_eq!(available, &vec!["bleu".to_string(), "rouge_l".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            err.to_string(),
            "Unknown metric 'nonexistent'. Available metrics: bleu, rouge_l"
        );
    }

    #[test]
    fn test_params_forwarded_verbatim() {
        let seen = Arc::new(Mutex::new(None));
        let recorder = Arc::clone(&seen);

        let mut registry = MetricRegistry::new();
        registry
            .register(
                "bleu",
                move |params: &MetricParams| -> Result<Arc<dyn Metric>, MetricBuildError> {
                    *recorder.lock() = Some(params.clone());
                    Ok(Arc::new(NamedMetric("bleu")))
                },
            )
            .unwrap();

        let params = json!({"n_gram": 2, "extra": [1, 2]}).as_object().cloned().unwrap();
        registry.create("bleu", &params).unwrap();

        assert_eq!(seen.lock().as_ref(), Some(&params));
    }

    #[test]
    fn test_construction_failure_wrapped() {
        let mut registry = MetricRegistry::new();
        registry
            .register("bleu", |_: &MetricParams| -> Result<Arc<dyn Metric>, MetricBuildError> {
                Err(MetricBuildError::InvalidParam {
                    param: "n_gram".to_string(),
                    reason: "must be between 1 and 4".to_string(),
                })
            })
            .unwrap();

        let err = registry.create("bleu", &MetricParams::new()).err().unwrap();
        assert!(matches!(err, RegistryError::Construction { ref metric, .. } if metric == "bleu"));
        assert!(err.to_string().contains("n_gram"));
    }

    #[test]
    fn test_instance_name_must_match_registration() {
        let mut registry = MetricRegistry::new();
        registry.register("bleu", factory("rouge_l")).unwrap();

        let err = registry.create("bleu", &MetricParams::new()).err().unwrap();
        assert!(matches!(err, RegistryError::InvalidMetric { .. }));
    }

    #[test]
    fn test_descriptors_sorted() {
        let mut registry = MetricRegistry::new();
        registry
            .register_with_descriptor(
                MetricDescriptor::new("faithfulness", "claims supported by context")
                    .requires_context(),
                factory("faithfulness"),
            )
            .unwrap();
        registry.register("bleu", factory("bleu")).unwrap();

        let names: Vec<_> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["bleu", "faithfulness"]);
        assert!(registry.descriptor("faithfulness").unwrap().requires_context);
    }
}

//! Reconciler and controller-loop configuration.

use std::sync::Arc;
use std::time::Duration;

use refract_backrefs::{
    AnnotationReferences, BackReferenceStrategy, CombinedReferences, OwnerReferences,
};
use refract_core::API_GROUP;
use serde::{Deserialize, Serialize};

/// Finalizer guarding back-reference cleanup.
pub const DEFAULT_FINALIZER: &str = "refract.dev/clearbackrefs";

/// How back-references are written onto inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceStrategyKind {
    /// Non-controller owner references; deleting the transform cascades.
    #[default]
    Owner,
    /// Marker annotations; never cascades.
    Annotation,
    /// Owner references in the same namespace, annotations otherwise.
    Combined,
}

/// Configuration for one reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Evaluation budget for a single field query.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Requeue delay while an input does not exist.
    #[serde(default = "default_missing_input_requeue_secs")]
    pub missing_input_requeue_secs: u64,

    /// Finalizer token added to every transform.
    #[serde(default = "default_finalizer")]
    pub finalizer: String,

    /// API group used in annotation back-references.
    #[serde(default = "default_api_group")]
    pub api_group: String,

    #[serde(default)]
    pub reference_strategy: ReferenceStrategyKind,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            missing_input_requeue_secs: default_missing_input_requeue_secs(),
            finalizer: default_finalizer(),
            api_group: default_api_group(),
            reference_strategy: ReferenceStrategyKind::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.query_timeout_ms == 0 {
            return Err("query_timeout_ms must be greater than 0".to_string());
        }
        if self.finalizer.is_empty() || !self.finalizer.contains('/') {
            return Err(format!(
                "finalizer must be a domain-qualified token, got {:?}",
                self.finalizer
            ));
        }
        if self.api_group.is_empty() || self.api_group.contains('/') {
            return Err(format!("api_group is not a valid group: {:?}", self.api_group));
        }
        Ok(())
    }

    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    #[must_use]
    pub const fn missing_input_delay(&self) -> Duration {
        Duration::from_secs(self.missing_input_requeue_secs)
    }

    /// The configured linking strategy.
    #[must_use]
    pub fn strategy(&self) -> Arc<dyn BackReferenceStrategy> {
        match self.reference_strategy {
            ReferenceStrategyKind::Owner => Arc::new(OwnerReferences),
            ReferenceStrategyKind::Annotation => {
                Arc::new(AnnotationReferences::new(self.api_group.clone()))
            }
            ReferenceStrategyKind::Combined => {
                Arc::new(CombinedReferences::new(self.api_group.clone()))
            }
        }
    }
}

/// Configuration for the controller loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Concurrent reconciliation workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// First backoff delay after a failed pass.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
        }
    }
}

impl LoopConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.retry_base_delay_ms == 0 {
            return Err("retry_base_delay_ms must be greater than 0".to_string());
        }
        if self.retry_base_delay() > self.retry_max_delay() {
            return Err("retry_base_delay_ms must not exceed retry_max_delay_secs".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    #[must_use]
    pub const fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }
}

const fn default_query_timeout_ms() -> u64 {
    5_000
}

const fn default_missing_input_requeue_secs() -> u64 {
    30
}

fn default_finalizer() -> String {
    DEFAULT_FINALIZER.to_string()
}

fn default_api_group() -> String {
    API_GROUP.to_string()
}

const fn default_workers() -> usize {
    2
}

const fn default_retry_base_delay_ms() -> u64 {
    5
}

const fn default_retry_max_delay_secs() -> u64 {
    60
}

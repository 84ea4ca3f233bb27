//! Provider Registry
//!
//! Static per-provider metadata (pricing, timeout, retry budget), validated
//! once at startup and read-only afterwards.

use costroute_core::{Error, Result, retry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Provider descriptor as supplied by configuration.
///
/// Required fields are optional here so a missing value surfaces as a
/// configuration error naming the field rather than a generic parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub cost_per_1k_tokens: Option<f64>,

    /// Overrides `cost_per_1k_tokens` for prompt tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_cost_per_1k_tokens: Option<f64>,

    /// Overrides `cost_per_1k_tokens` for completion tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_cost_per_1k_tokens: Option<f64>,

    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProviderDescriptor {
    fn default() -> Self {
        Self {
            name: None,
            cost_per_1k_tokens: None,
            prompt_cost_per_1k_tokens: None,
            completion_cost_per_1k_tokens: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, cost_per_1k_tokens: f64) -> Self {
        Self {
            name: Some(name.into()),
            cost_per_1k_tokens: Some(cost_per_1k_tokens),
            ..Default::default()
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    1
}

/// A validated, immutable provider entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderProfile {
    pub id: String,
    pub cost_per_1k_tokens: f64,
    pub prompt_cost_per_1k_tokens: f64,
    pub completion_cost_per_1k_tokens: f64,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl ProviderProfile {
    /// Upper bound on one logical attempt: every try the connector may make
    /// plus the longest sleeps it may take between them
    pub fn attempt_deadline(&self) -> Duration {
        self.timeout
            .saturating_mul(self.max_retries.saturating_add(1))
            .saturating_add(retry::max_total_delay(self.max_retries))
    }

    fn from_descriptor(descriptor: &ProviderDescriptor, index: usize) -> Result<Self> {
        let id = descriptor
            .name
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| {
                Error::Config(format!("provider #{} is missing required field 'name'", index))
            })?;
        if id.is_empty() {
            return Err(Error::Config(format!(
                "provider #{} has an empty 'name'",
                index
            )));
        }

        let cost = descriptor.cost_per_1k_tokens.ok_or_else(|| {
            Error::Config(format!(
                "provider '{}' is missing required field 'cost_per_1k_tokens'",
                id
            ))
        })?;
        check_rate(id, "cost_per_1k_tokens", cost)?;

        let prompt_rate = descriptor.prompt_cost_per_1k_tokens.unwrap_or(cost);
        check_rate(id, "prompt_cost_per_1k_tokens", prompt_rate)?;
        let completion_rate = descriptor.completion_cost_per_1k_tokens.unwrap_or(cost);
        check_rate(id, "completion_cost_per_1k_tokens", completion_rate)?;

        if descriptor.timeout_secs == 0 {
            return Err(Error::Config(format!(
                "provider '{}' has timeout_secs = 0",
                id
            )));
        }

        Ok(Self {
            id: id.to_string(),
            cost_per_1k_tokens: cost,
            prompt_cost_per_1k_tokens: prompt_rate,
            completion_cost_per_1k_tokens: completion_rate,
            timeout: Duration::from_secs(descriptor.timeout_secs),
            max_retries: descriptor.max_retries,
        })
    }
}

fn check_rate(id: &str, field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::Config(format!(
            "provider '{}' has invalid {} {} (must be a non-negative number)",
            id, field, value
        )));
    }
    Ok(())
}

/// The set of configured providers, in configuration order
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<ProviderProfile>>,
}

impl ProviderRegistry {
    /// Validate descriptors and build the registry
    pub fn load(descriptors: &[ProviderDescriptor]) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(Error::Config("no providers configured".to_string()));
        }

        let mut seen = HashSet::new();
        let mut providers = Vec::with_capacity(descriptors.len());

        for (index, descriptor) in descriptors.iter().enumerate() {
            let profile = ProviderProfile::from_descriptor(descriptor, index)?;
            if !seen.insert(profile.id.clone()) {
                return Err(Error::Config(format!(
                    "duplicate provider name '{}'",
                    profile.id
                )));
            }
            providers.push(Arc::new(profile));
        }

        tracing::info!(count = providers.len(), "Loaded provider registry");
        Ok(Self { providers })
    }

    /// All providers, in the order they were configured
    pub fn list(&self) -> &[Arc<ProviderProfile>] {
        &self.providers
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ProviderProfile>> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

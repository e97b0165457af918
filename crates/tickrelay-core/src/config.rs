//! Relay configuration: built-in defaults, an optional TOML file, then `TICKRELAY__*`
//! environment overrides.
//!
//! Backend API keys are read from `<NAME>_API_KEY` when the file does not carry one, and a
//! key written as `${VAR}` is substituted from the environment.

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheTtl, DEFAULT_MAX_ENTRIES};
use crate::cooldown::MAX_COOLDOWN;
use crate::error::ConfigError;
use crate::{ProviderId, ValidationError};

/// One backend entry: whether to register it, its key and its priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    pub name: ProviderId,
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub priority: i32,
}

impl ProviderDescriptor {
    pub fn new(name: ProviderId) -> Self {
        Self {
            priority: name.default_priority(),
            name,
            enabled: true,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayConfig {
    pub providers: Vec<ProviderDescriptor>,
    pub default_cooldown_secs: u64,
    pub request_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub cache: CacheTtl,
    pub cache_max_entries: usize,
}

impl Default for RelayConfig {
    /// Yahoo only; keyed backends need a key to be useful.
    fn default() -> Self {
        Self {
            providers: vec![ProviderDescriptor::new(ProviderId::YAHOO)],
            default_cooldown_secs: 60,
            request_timeout_ms: 10_000,
            health_timeout_ms: 5_000,
            cache: CacheTtl::default(),
            cache_max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    providers: Vec<RawProvider>,
    default_cooldown_secs: u64,
    request_timeout_ms: u64,
    health_timeout_ms: u64,
    #[serde(default)]
    cache: CacheTtl,
    cache_max_entries: usize,
}

#[derive(Debug, Deserialize)]
struct RawProvider {
    name: String,
    enabled: Option<bool>,
    api_key: Option<String>,
    priority: Option<i32>,
}

impl RelayConfig {
    /// Loads configuration against the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Same as [`Self::load`] with an explicit lookup for API keys and `${VAR}` references.
    pub fn load_with<E>(path: Option<&Path>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder()
            .set_default("default_cooldown_secs", 60)?
            .set_default("request_timeout_ms", 10_000)?
            .set_default("health_timeout_ms", 5_000)?
            .set_default("cache_max_entries", DEFAULT_MAX_ENTRIES as u64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (TICKRELAY__REQUEST_TIMEOUT_MS, etc.)
        let raw: RawConfig = builder
            .add_source(
                Environment::with_prefix("TICKRELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        raw.validate()?;

        let providers = if raw.providers.is_empty() {
            discover_providers(&env)
        } else {
            raw.providers
                .into_iter()
                .map(|provider| resolve_provider(provider, &env))
                .collect::<Result<_, _>>()?
        };

        Ok(Self {
            providers,
            default_cooldown_secs: raw.default_cooldown_secs,
            request_timeout_ms: raw.request_timeout_ms,
            health_timeout_ms: raw.health_timeout_ms,
            cache: raw.cache.validate()?,
            cache_max_entries: raw.cache_max_entries,
        })
    }

    pub fn provider(&self, id: &ProviderId) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|descriptor| descriptor.name == *id)
    }
}

impl RawConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let max_cooldown = MAX_COOLDOWN.as_secs();
        if self.default_cooldown_secs > max_cooldown {
            return Err(ValidationError::TooLarge {
                field: "default_cooldown_secs",
                max: max_cooldown,
            });
        }
        let must_be_positive = [
            ("request_timeout_ms", self.request_timeout_ms),
            ("health_timeout_ms", self.health_timeout_ms),
            ("cache_max_entries", self.cache_max_entries as u64),
        ];
        for (field, value) in must_be_positive {
            if value == 0 {
                return Err(ValidationError::ZeroValue { field });
            }
        }
        Ok(())
    }
}

/// Yahoo plus every keyed backend whose key is present in the environment.
fn discover_providers(env: &impl Fn(&str) -> Option<String>) -> Vec<ProviderDescriptor> {
    ProviderId::BUILTIN
        .into_iter()
        .filter_map(|id| {
            if !id.requires_api_key() {
                return Some(ProviderDescriptor::new(id));
            }
            let key = non_blank(env(&id.api_key_env()))?;
            debug!(provider = %id, "api key found in environment");
            Some(ProviderDescriptor::new(id).with_api_key(key))
        })
        .collect()
}

fn resolve_provider(
    raw: RawProvider,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<ProviderDescriptor, ConfigError> {
    let name: ProviderId = raw.name.parse()?;
    if !name.is_builtin() {
        return Err(ConfigError::UnknownProvider {
            name: name.to_string(),
        });
    }

    let api_key = match raw.api_key {
        Some(value) => expand_env_reference(&value, env),
        None if name.requires_api_key() => non_blank(env(&name.api_key_env())),
        None => None,
    };

    Ok(ProviderDescriptor {
        enabled: raw.enabled.unwrap_or(true),
        priority: raw.priority.unwrap_or_else(|| name.default_priority()),
        api_key,
        name,
    })
}

/// `${VAR}` is looked up; anything else is taken literally.
fn expand_env_reference(value: &str, env: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let trimmed = value.trim();
    match trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => non_blank(env(var.trim())),
        None => non_blank(Some(trimmed.to_string())),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

use crate::error::RuntimeError;
use cloudrt_core::CapabilityKind;
use cloudrt_providers::ProviderType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CEILING_TIMEOUT_MS: u64 = 30_000;

pub const ENV_CEILING_TIMEOUT_MS: &str = "CLOUDRT_CEILING_TIMEOUT_MS";
pub const ENV_DEFAULT_CALL_TIMEOUT_MS: &str = "CLOUDRT_DEFAULT_CALL_TIMEOUT_MS";
pub const ENV_PROVIDERS_FILE: &str = "CLOUDRT_PROVIDERS_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound the dispatcher puts on every adapter call.
    pub ceiling_timeout: Duration,
    /// Call timeout for adapters registered without one.
    pub default_call_timeout: Option<Duration>,
    pub providers_file: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ceiling_timeout: Duration::from_millis(DEFAULT_CEILING_TIMEOUT_MS),
            default_call_timeout: None,
            providers_file: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparsable values fall back to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let ceiling_ms = parse_millis(&lookup, ENV_CEILING_TIMEOUT_MS)
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_CEILING_TIMEOUT_MS);

        Self {
            ceiling_timeout: Duration::from_millis(ceiling_ms),
            default_call_timeout: parse_millis(&lookup, ENV_DEFAULT_CALL_TIMEOUT_MS)
                .map(Duration::from_millis),
            providers_file: lookup(ENV_PROVIDERS_FILE)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from),
        }
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(key, value = %raw, error = %error, "Ignoring invalid duration setting");
            None
        }
    }
}

/// Providers to register at startup, usually loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub kind: ProviderType,
    /// Defaults to `<kind>:<service_name>`.
    #[serde(default)]
    pub provider_id: Option<String>,
    pub service_name: String,
    #[serde(default)]
    pub setting_id: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Subset of the adapter's capabilities to register; all when absent.
    #[serde(default)]
    pub capabilities: Option<Vec<CapabilityKind>>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl ProviderEntry {
    pub fn new(kind: ProviderType, service_name: impl Into<String>) -> Self {
        Self {
            kind,
            provider_id: None,
            service_name: service_name.into(),
            setting_id: String::new(),
            default: false,
            timeout_ms: None,
            capabilities: None,
            settings: serde_json::Value::Null,
        }
    }

    pub fn with_setting_id(mut self, setting_id: impl Into<String>) -> Self {
        self.setting_id = setting_id.into();
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<CapabilityKind>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn provider_id(&self) -> String {
        self.provider_id.clone().unwrap_or_else(|| {
            let kind = serde_json::to_value(self.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{:?}", self.kind));
            format!("{kind}:{}", self.service_name)
        })
    }
}

impl ProvidersConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RuntimeError::ProvidersFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

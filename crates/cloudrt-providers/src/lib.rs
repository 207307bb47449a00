pub mod features;
pub mod retry;

pub use features::crypto_provider::LocalCryptoProvider;
pub use features::im_provider::InMemoryImProvider;
pub use features::telemetry_provider::OpenTelemetryProvider;

use cloudrt_core::{
    CapabilityKind, ProviderIdentity, RawError, RegistrationOptions, RegistryBuilder, Result,
    UnifiedError,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A backend able to fulfil one or more capabilities.
pub trait ProviderAdapter: Send + Sync {
    fn metadata(&self) -> ProviderMetadata;

    /// Every capability kind this adapter can serve.
    fn capabilities(&self) -> Vec<CapabilityKind>;

    /// Register the handler and default validator for each of `kinds` under
    /// `identity`. A kind outside [`capabilities`](Self::capabilities) fails
    /// with `InvalidRequest`.
    fn register_into(
        self: Arc<Self>,
        builder: &mut RegistryBuilder,
        identity: &ProviderIdentity,
        options: &RegistrationOptions,
        kinds: &[CapabilityKind],
    ) -> Result<()>;

    /// Register every supported capability.
    fn register_all(
        self: Arc<Self>,
        builder: &mut RegistryBuilder,
        identity: &ProviderIdentity,
        options: &RegistrationOptions,
    ) -> Result<()> {
        let kinds = self.capabilities();
        self.register_into(builder, identity, options, &kinds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    InMemoryIm,
    LocalCrypto,
    Opentelemetry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub provider_id: String,
    pub provider_type: ProviderType,
    pub version: String,
}

impl ProviderMetadata {
    pub fn new(provider_id: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            provider_id: provider_id.into(),
            provider_type,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Failure while constructing an adapter from its settings block.
#[derive(Debug, Error)]
pub enum ProviderSetupError {
    #[error("Invalid settings for provider '{provider_id}': {source}")]
    InvalidSettings {
        provider_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid key '{key_id}': {reason}")]
    InvalidKey { key_id: String, reason: String },

    #[error("Unsupported propagator: {0}")]
    UnsupportedPropagator(String),

    #[error("Provider state lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<ProviderSetupError> for UnifiedError {
    fn from(err: ProviderSetupError) -> Self {
        UnifiedError::InvalidRequest(err.to_string())
    }
}

pub(crate) fn parse_settings<T>(
    provider_id: &str,
    settings: &serde_json::Value,
) -> std::result::Result<T, ProviderSetupError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if settings.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(settings.clone()).map_err(|source| ProviderSetupError::InvalidSettings {
        provider_id: provider_id.to_string(),
        source,
    })
}

/// Bound an adapter operation by the per-call timeout from its envelope.
pub(crate) async fn within_call_timeout<T, F>(
    timeout: Option<Duration>,
    operation: &str,
    fut: F,
) -> std::result::Result<T, RawError>
where
    F: Future<Output = std::result::Result<T, RawError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            RawError::deadline(format!(
                "{operation} exceeded call timeout of {}ms",
                limit.as_millis()
            ))
        })?,
        None => fut.await,
    }
}

pub(crate) fn unsupported_kind(metadata: &ProviderMetadata, kind: CapabilityKind) -> UnifiedError {
    UnifiedError::InvalidRequest(format!(
        "provider '{}' ({:?}) does not implement {kind}",
        metadata.provider_id, metadata.provider_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        limit: u32,
    }

    #[test]
    fn test_parse_settings_null_uses_default() {
        let parsed: Sample = parse_settings("p", &serde_json::Value::Null).unwrap();
        assert_eq!(parsed, Sample::default());
    }

    #[test]
    fn test_parse_settings_reports_provider() {
        let err = parse_settings::<Sample>("im-1", &serde_json::json!({ "limit": "many" }))
            .unwrap_err();
        assert!(err.to_string().contains("im-1"));

        let unified: UnifiedError = err.into();
        assert_eq!(unified.kind(), cloudrt_core::ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_within_call_timeout_elapses() {
        let err = within_call_timeout(Some(Duration::from_millis(10)), "slow op", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, RawError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err.signal, cloudrt_core::FailureSignal::DeadlineExceeded));
        assert!(err.message.contains("slow op"));
    }

    #[tokio::test]
    async fn test_within_call_timeout_without_limit() {
        let value = within_call_timeout(None, "op", async { Ok::<_, RawError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_provider_type_serde() {
        let value = serde_json::to_value(ProviderType::InMemoryIm).unwrap();
        assert_eq!(value, serde_json::json!("in_memory_im"));
        let parsed: ProviderType = serde_json::from_value(serde_json::json!("opentelemetry")).unwrap();
        assert_eq!(parsed, ProviderType::Opentelemetry);
    }
}

//! Builds the registry and facade from configuration.
//!
//! All-or-nothing: any failing entry aborts startup and nothing is installed.

use crate::config::{ProviderEntry, ProvidersConfig, RuntimeConfig};
use crate::error::RuntimeError;
use crate::runtime::CloudRuntimes;
use cloudrt_core::{DispatchRegistry, ProviderIdentity, RegistrationOptions};
use cloudrt_providers::{
    InMemoryImProvider, LocalCryptoProvider, OpenTelemetryProvider, ProviderAdapter, ProviderType,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub fn build_adapter(entry: &ProviderEntry) -> Result<Arc<dyn ProviderAdapter>, RuntimeError> {
    let provider_id = entry.provider_id();
    let adapter: Arc<dyn ProviderAdapter> = match entry.kind {
        ProviderType::InMemoryIm => Arc::new(InMemoryImProvider::from_settings(
            provider_id,
            &entry.settings,
        )?),
        ProviderType::LocalCrypto => Arc::new(LocalCryptoProvider::from_settings(
            provider_id,
            &entry.settings,
        )?),
        ProviderType::Opentelemetry => Arc::new(OpenTelemetryProvider::from_settings(
            provider_id,
            &entry.settings,
        )?),
    };
    Ok(adapter)
}

pub fn build_registry(config: &ProvidersConfig) -> Result<DispatchRegistry, RuntimeError> {
    let mut builder = DispatchRegistry::builder();

    for entry in &config.providers {
        let adapter = build_adapter(entry).map_err(|err| {
            error!(provider_id = %entry.provider_id(), error = %err, "Provider setup failed");
            err
        })?;

        let identity = ProviderIdentity::new(entry.service_name.clone(), entry.setting_id.clone());
        let options = RegistrationOptions {
            default: entry.default,
            timeout: entry.timeout_ms.map(Duration::from_millis),
        };
        let kinds = entry
            .capabilities
            .clone()
            .unwrap_or_else(|| adapter.capabilities());

        adapter
            .register_into(&mut builder, &identity, &options, &kinds)
            .map_err(|err| {
                error!(provider = %identity, error = %err, "Provider registration failed");
                err
            })?;
    }

    Ok(builder.build())
}

/// Loads `providers_file` when set; otherwise starts with no providers.
pub fn build_runtime(config: RuntimeConfig) -> Result<CloudRuntimes, RuntimeError> {
    let providers = match &config.providers_file {
        Some(path) => ProvidersConfig::from_file(path)?,
        None => ProvidersConfig::default(),
    };
    build_runtime_with(config, &providers)
}

pub fn build_runtime_with(
    config: RuntimeConfig,
    providers: &ProvidersConfig,
) -> Result<CloudRuntimes, RuntimeError> {
    let registry = build_registry(providers)?;
    info!(
        providers = providers.providers.len(),
        registrations = registry.len(),
        ceiling_ms = config.ceiling_timeout.as_millis() as u64,
        "Cloud runtimes ready"
    );
    Ok(CloudRuntimes::new(registry, config))
}

use cloudrt_core::domain::crypto::{CryptRequest, KeyInfo};
use cloudrt_core::domain::im::{ImAddress, ImContent, SendImRequest};
use cloudrt_providers::ProviderType;
use cloudrt_runtime::bootstrap;
use cloudrt_runtime::global;
use cloudrt_runtime::{ProviderEntry, ProvidersConfig, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn demo_providers() -> ProvidersConfig {
    ProvidersConfig {
        providers: vec![
            ProviderEntry::new(ProviderType::InMemoryIm, "dingtalk")
                .as_default()
                .with_timeout_ms(2_000),
            ProviderEntry::new(ProviderType::LocalCrypto, "local-kms").with_settings(json!({
                "keys": [{ "key_id": "dek" }, { "key_id": "kek" }]
            })),
            ProviderEntry::new(ProviderType::Opentelemetry, "otel"),
        ],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cloudrt_runtime=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RuntimeConfig::from_env();
    let runtimes = match &config.providers_file {
        Some(path) => {
            info!(path = %path.display(), "Loading providers file");
            bootstrap::build_runtime(config)?
        }
        None => {
            info!("No providers file configured, using built-in demo providers");
            bootstrap::build_runtime_with(config, &demo_providers())?
        }
    };
    let runtimes = Arc::new(runtimes);
    global::install(runtimes.clone())?;

    for registration in runtimes.registrations() {
        info!(
            capability = %registration.capability,
            provider = %registration.identity,
            default = registration.is_default,
            "Registered"
        );
    }

    match runtimes
        .send_im(SendImRequest::new(
            "dingtalk",
            ImContent::text("cloudrt runtime started"),
            ImAddress::receivers(["ops"]),
        ))
        .await
    {
        Ok(response) => info!(message_id = %response.message_id, "Startup notice sent"),
        Err(error) => warn!(error = %error, code = error.code(), "Startup notice failed"),
    }

    let keys = vec![KeyInfo::new("dek"), KeyInfo::new("kek")];
    match runtimes
        .encrypt(CryptRequest::new(keys, b"cloudrt".to_vec()))
        .await
    {
        Ok(sealed) => {
            let opened = runtimes
                .decrypt(CryptRequest::new(sealed.key_chain, sealed.payload))
                .await?;
            info!(bytes = opened.payload.len(), "Crypto self-check passed");
        }
        Err(error) => warn!(error = %error, code = error.code(), "Crypto self-check skipped"),
    }

    if let Err(error) = runtimes.build_tracer("cloudrt-runtime").await {
        warn!(error = %error, "Tracer unavailable");
    }

    global::teardown();
    info!("Cloud runtimes shut down");
    Ok(())
}

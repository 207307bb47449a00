pub mod controller;
pub mod repo;
pub mod service;

use crate::{
    parse_settings, unsupported_kind, ProviderAdapter, ProviderMetadata, ProviderSetupError,
    ProviderType,
};
use cloudrt_core::domain::crypto::{validate_crypt, Decrypt, Encrypt};
use cloudrt_core::{
    CapabilityKind, PayloadValidator, ProviderIdentity, RegistrationOptions, RegistryBuilder,
    Result,
};
use controller::CryptoProviderController;
use repo::{InMemoryKeyRing, KeyRingRepository};
use serde::Deserialize;
use service::CryptoService;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CryptoProviderSettings {
    pub keys: Vec<KeySetting>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeySetting {
    pub key_id: String,
    #[serde(default = "default_key_version")]
    pub version: String,
    /// Hex-encoded 32 bytes; a random key is generated when absent.
    #[serde(default)]
    pub material: Option<String>,
}

fn default_key_version() -> String {
    "1".to_string()
}

/// Crypto provider backed by a process-local key ring.
pub struct LocalCryptoProvider {
    controller: Arc<CryptoProviderController>,
    metadata: ProviderMetadata,
}

impl LocalCryptoProvider {
    pub fn new(provider_id: impl Into<String>, ring: Arc<dyn KeyRingRepository>) -> Self {
        Self {
            controller: Arc::new(CryptoProviderController::new(CryptoService::new(ring))),
            metadata: ProviderMetadata::new(provider_id, ProviderType::LocalCrypto),
        }
    }

    pub fn from_settings(
        provider_id: impl Into<String>,
        settings: &serde_json::Value,
    ) -> std::result::Result<Self, ProviderSetupError> {
        let provider_id = provider_id.into();
        let settings: CryptoProviderSettings = parse_settings(&provider_id, settings)?;

        let ring = InMemoryKeyRing::new();
        for key in &settings.keys {
            match &key.material {
                Some(material) => ring.insert_hex(&key.key_id, &key.version, material)?,
                None => {
                    ring.generate(&key.key_id, &key.version)?;
                    info!(
                        provider_id = %provider_id,
                        key_id = %key.key_id,
                        version = %key.version,
                        "Generated ephemeral key"
                    );
                }
            }
        }

        Ok(Self::new(provider_id, Arc::new(ring)))
    }
}

impl ProviderAdapter for LocalCryptoProvider {
    fn metadata(&self) -> ProviderMetadata {
        self.metadata.clone()
    }

    fn capabilities(&self) -> Vec<CapabilityKind> {
        vec![CapabilityKind::ENCRYPT, CapabilityKind::DECRYPT]
    }

    fn register_into(
        self: Arc<Self>,
        builder: &mut RegistryBuilder,
        identity: &ProviderIdentity,
        options: &RegistrationOptions,
        kinds: &[CapabilityKind],
    ) -> Result<()> {
        for kind in kinds {
            if *kind == CapabilityKind::ENCRYPT {
                builder.register::<Encrypt>(
                    identity.clone(),
                    PayloadValidator::new(validate_crypt),
                    self.controller.clone(),
                    options.clone(),
                )?;
            } else if *kind == CapabilityKind::DECRYPT {
                builder.register::<Decrypt>(
                    identity.clone(),
                    PayloadValidator::new(validate_crypt),
                    self.controller.clone(),
                    options.clone(),
                )?;
            } else {
                return Err(unsupported_kind(&self.metadata, *kind));
            }
        }
        Ok(())
    }
}

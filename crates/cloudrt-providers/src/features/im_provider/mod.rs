pub mod controller;
pub mod repo;
pub mod service;

use crate::{
    parse_settings, unsupported_kind, ProviderAdapter, ProviderMetadata, ProviderSetupError,
    ProviderType,
};
use cloudrt_core::domain::im::{validate_send_im, SendIm};
use cloudrt_core::{
    CapabilityKind, PayloadValidator, ProviderIdentity, RegistrationOptions, RegistryBuilder,
    Result, RetryPolicy,
};
use controller::ImProviderController;
use repo::{ImDeliveryRepository, InMemoryImRepository, DEFAULT_MAX_INBOX};
use serde::Deserialize;
use service::{ImDeliveryService, DEFAULT_MAX_RECEIVERS};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImProviderSettings {
    pub max_receivers: usize,
    pub max_inbox: usize,
    pub retry: RetryPolicy,
}

impl Default for ImProviderSettings {
    fn default() -> Self {
        Self {
            max_receivers: DEFAULT_MAX_RECEIVERS,
            max_inbox: DEFAULT_MAX_INBOX,
            retry: RetryPolicy::never(),
        }
    }
}

/// IM provider that delivers into in-process mailboxes.
pub struct InMemoryImProvider {
    controller: Arc<ImProviderController>,
    metadata: ProviderMetadata,
}

impl InMemoryImProvider {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self::with_repository(
            provider_id,
            Arc::new(InMemoryImRepository::new()),
            ImProviderSettings::default(),
        )
    }

    pub fn from_settings(
        provider_id: impl Into<String>,
        settings: &serde_json::Value,
    ) -> std::result::Result<Self, ProviderSetupError> {
        let provider_id = provider_id.into();
        let settings: ImProviderSettings = parse_settings(&provider_id, settings)?;
        let repo = Arc::new(InMemoryImRepository::with_capacity(settings.max_inbox));
        Ok(Self::with_repository(provider_id, repo, settings))
    }

    pub fn with_repository(
        provider_id: impl Into<String>,
        repo: Arc<dyn ImDeliveryRepository>,
        settings: ImProviderSettings,
    ) -> Self {
        let metadata = ProviderMetadata::new(provider_id, ProviderType::InMemoryIm);
        let service = ImDeliveryService::with_policy(repo, settings.retry, settings.max_receivers);
        Self {
            controller: Arc::new(ImProviderController::new(
                service,
                metadata.provider_id.clone(),
            )),
            metadata,
        }
    }

    pub fn controller(&self) -> &ImProviderController {
        &self.controller
    }
}

impl ProviderAdapter for InMemoryImProvider {
    fn metadata(&self) -> ProviderMetadata {
        self.metadata.clone()
    }

    fn capabilities(&self) -> Vec<CapabilityKind> {
        vec![CapabilityKind::SEND_IM]
    }

    fn register_into(
        self: Arc<Self>,
        builder: &mut RegistryBuilder,
        identity: &ProviderIdentity,
        options: &RegistrationOptions,
        kinds: &[CapabilityKind],
    ) -> Result<()> {
        for kind in kinds {
            if *kind != CapabilityKind::SEND_IM {
                return Err(unsupported_kind(&self.metadata, *kind));
            }
            builder.register::<SendIm>(
                identity.clone(),
                PayloadValidator::new(validate_send_im),
                self.controller.clone(),
                options.clone(),
            )?;
        }
        Ok(())
    }
}

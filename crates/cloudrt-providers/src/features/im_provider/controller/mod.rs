use crate::features::im_provider::service::ImDeliveryService;
use crate::within_call_timeout;
use async_trait::async_trait;
use cloudrt_core::domain::im::{SendIm, SendImRequest, SendImResponse};
use cloudrt_core::{CapabilityHandler, RawError, RequestEnvelope};
use tracing::debug;

pub struct ImProviderController {
    service: ImDeliveryService,
    fallback_service_name: String,
}

impl ImProviderController {
    pub fn new(service: ImDeliveryService, fallback_service_name: impl Into<String>) -> Self {
        Self {
            service,
            fallback_service_name: fallback_service_name.into(),
        }
    }

    pub fn service(&self) -> &ImDeliveryService {
        &self.service
    }

    /// The routed identity wins over the payload's own service name.
    fn service_name<'a>(&'a self, envelope: &'a RequestEnvelope<SendImRequest>) -> &'a str {
        [
            envelope.provider.service_name.as_str(),
            envelope.payload.service_name.as_str(),
        ]
        .into_iter()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .unwrap_or(self.fallback_service_name.as_str())
    }
}

#[async_trait]
impl CapabilityHandler<SendIm> for ImProviderController {
    async fn execute(
        &self,
        envelope: RequestEnvelope<SendImRequest>,
    ) -> Result<SendImResponse, RawError> {
        let service_name = self.service_name(&envelope);
        debug!(
            request_id = %envelope.request_id,
            service_name,
            setting_id = %envelope.provider.setting_id,
            "Handling SendIM"
        );

        within_call_timeout(
            envelope.call_timeout,
            "IM delivery",
            self.service.send(
                service_name,
                &envelope.provider.setting_id,
                &envelope.payload,
                &envelope.metadata,
            ),
        )
        .await
    }
}

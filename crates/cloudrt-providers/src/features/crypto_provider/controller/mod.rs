use crate::features::crypto_provider::service::CryptoService;
use crate::within_call_timeout;
use async_trait::async_trait;
use cloudrt_core::domain::crypto::{CryptRequest, CryptResponse, Decrypt, Encrypt};
use cloudrt_core::{CapabilityHandler, RawError, RequestEnvelope};
use std::sync::Arc;
use tracing::debug;

pub struct CryptoProviderController {
    service: Arc<CryptoService>,
}

impl CryptoProviderController {
    pub fn new(service: CryptoService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    /// Key lookups and cipher work are synchronous, so they run on the
    /// blocking pool and stay preemptible by the call timeout.
    async fn run_blocking<F>(
        &self,
        envelope: RequestEnvelope<CryptRequest>,
        operation: &'static str,
        work: F,
    ) -> Result<CryptResponse, RawError>
    where
        F: FnOnce(&CryptoService, &CryptRequest) -> Result<CryptResponse, RawError>
            + Send
            + 'static,
    {
        let service = Arc::clone(&self.service);
        let request = envelope.payload;
        let task = tokio::task::spawn_blocking(move || work(&service, &request));
        within_call_timeout(envelope.call_timeout, operation, async move {
            task.await.map_err(|join_err| {
                RawError::unknown(format!("{operation} task failed: {join_err}"))
            })?
        })
        .await
    }
}

#[async_trait]
impl CapabilityHandler<Encrypt> for CryptoProviderController {
    async fn execute(
        &self,
        envelope: RequestEnvelope<CryptRequest>,
    ) -> Result<CryptResponse, RawError> {
        debug!(
            request_id = %envelope.request_id,
            layers = envelope.payload.infos.len(),
            "Encrypting payload"
        );
        self.run_blocking(envelope, "crypto.encrypt", |service, request| {
            service.encrypt(request)
        })
        .await
    }
}

#[async_trait]
impl CapabilityHandler<Decrypt> for CryptoProviderController {
    async fn execute(
        &self,
        envelope: RequestEnvelope<CryptRequest>,
    ) -> Result<CryptResponse, RawError> {
        debug!(
            request_id = %envelope.request_id,
            layers = envelope.payload.infos.len(),
            "Decrypting payload"
        );
        self.run_blocking(envelope, "crypto.decrypt", |service, request| {
            service.decrypt(request)
        })
        .await
    }
}

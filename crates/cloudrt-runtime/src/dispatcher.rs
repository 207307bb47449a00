use crate::call::{Call, CancelHandle};
use crate::config::RuntimeConfig;
use cloudrt_core::{
    normalize, Capability, DispatchRegistry, EnvelopeBuilder, ProviderIdentity, UnifiedError,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Routes typed capability requests through the registry to their adapter.
///
/// Holds no locks: the registry is immutable and shared by `Arc`.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<DispatchRegistry>,
    ceiling_timeout: Duration,
    default_call_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: Arc<DispatchRegistry>, config: &RuntimeConfig) -> Self {
        Self {
            registry,
            ceiling_timeout: config.ceiling_timeout,
            default_call_timeout: config.default_call_timeout,
        }
    }

    pub fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    pub fn ceiling_timeout(&self) -> Duration {
        self.ceiling_timeout
    }

    /// Build the lazy call for `C`.
    ///
    /// On first poll: cancellation check, resolve, envelope validation, then
    /// the adapter call under the ceiling timeout. Adapter failures are
    /// normalized against the resolved provider.
    pub fn dispatch<C: Capability>(
        &self,
        identity: ProviderIdentity,
        payload: C::Request,
        metadata: BTreeMap<String, String>,
    ) -> Call<C::Response> {
        let cancel = CancelHandle::new();
        let token = cancel.token();
        let registry = Arc::clone(&self.registry);
        let ceiling = self.ceiling_timeout;
        let default_call_timeout = self.default_call_timeout;

        Call::new(C::KIND, cancel, async move {
            if token.is_cancelled() {
                debug!(capability = %C::KIND, provider = %identity, "Cancelled before dispatch");
                return Err(UnifiedError::Cancelled(format!(
                    "{} cancelled before dispatch",
                    C::KIND
                )));
            }

            let handle = registry.resolve::<C>(&identity)?;
            let resolved = handle.identity().clone();
            // An empty service name is filled from the resolved registration;
            // the requested setting id is kept for the adapter.
            let routed = if identity.is_underspecified() {
                ProviderIdentity::new(resolved.service_name.clone(), identity.setting_id)
            } else {
                identity
            };
            let envelope = EnvelopeBuilder::new(C::KIND)
                .provider(routed)
                .payload(payload)
                .extend_metadata(metadata)
                .call_timeout(handle.timeout().or(default_call_timeout))
                .build(handle.validator())?;

            let request_id = envelope.request_id;
            debug!(
                capability = %C::KIND,
                request_id = %request_id,
                provider = %resolved,
                "Dispatching to adapter"
            );

            let handler = handle.handler();
            let execution = tokio::time::timeout(ceiling, handler.execute(envelope));
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(capability = %C::KIND, request_id = %request_id, "Abandoned in-flight call");
                    Err(UnifiedError::Cancelled(format!(
                        "{} via {resolved} cancelled after dispatch",
                        C::KIND
                    )))
                }
                outcome = execution => match outcome {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(raw)) => {
                        let err = normalize(&raw, C::KIND, &resolved);
                        debug!(
                            capability = %C::KIND,
                            request_id = %request_id,
                            error_code = err.code(),
                            error = %raw,
                            "Adapter call failed"
                        );
                        Err(err)
                    }
                    Err(_) => {
                        warn!(
                            capability = %C::KIND,
                            request_id = %request_id,
                            provider = %resolved,
                            ceiling_ms = ceiling.as_millis() as u64,
                            "Adapter call exceeded ceiling timeout"
                        );
                        Err(UnifiedError::Timeout(format!(
                            "{} via {resolved} exceeded ceiling of {}ms",
                            C::KIND,
                            ceiling.as_millis()
                        )))
                    }
                },
            }
        })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("ceiling_timeout", &self.ceiling_timeout)
            .field("default_call_timeout", &self.default_call_timeout)
            .finish()
    }
}

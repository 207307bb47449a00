use crate::call::Call;
use crate::config::RuntimeConfig;
use crate::dispatcher::Dispatcher;
use cloudrt_core::domain::crypto::{CryptRequest, CryptResponse, Decrypt, Encrypt};
use cloudrt_core::domain::im::{SendIm, SendImRequest, SendImResponse};
use cloudrt_core::domain::telemetry::{
    BuildMeter, BuildTracer, ContextPropagators, GetPropagators, InstrumentationScope, Meter,
    Tracer,
};
use cloudrt_core::{DispatchRegistry, ProviderIdentity, RegistrationInfo};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Entry point for every capability.
///
/// Each method returns a lazy [`Call`]; the bare forms resolve the provider
/// with an empty identity (single or default adapter), the `_with` forms
/// route to an explicit service and setting.
#[derive(Clone)]
pub struct CloudRuntimes {
    dispatcher: Dispatcher,
    config: RuntimeConfig,
}

impl CloudRuntimes {
    pub fn new(registry: DispatchRegistry, config: RuntimeConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::new(registry), &config),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registrations(&self) -> Vec<RegistrationInfo> {
        self.dispatcher.registry().registrations().cloned().collect()
    }

    pub fn build_tracer(&self, name: impl Into<String>) -> Call<Tracer> {
        self.build_tracer_with(ProviderIdentity::any(), InstrumentationScope::new(name))
    }

    pub fn build_tracer_versioned(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Call<Tracer> {
        self.build_tracer_with(
            ProviderIdentity::any(),
            InstrumentationScope::new(name).with_version(version),
        )
    }

    pub fn build_tracer_with_schema(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        schema_url: impl Into<String>,
    ) -> Call<Tracer> {
        self.build_tracer_with(
            ProviderIdentity::any(),
            InstrumentationScope::new(name)
                .with_version(version)
                .with_schema_url(schema_url),
        )
    }

    pub fn build_tracer_with(
        &self,
        provider: ProviderIdentity,
        scope: InstrumentationScope,
    ) -> Call<Tracer> {
        self.dispatcher
            .dispatch::<BuildTracer>(provider, scope, BTreeMap::new())
    }

    pub fn build_meter(&self, name: impl Into<String>) -> Call<Meter> {
        self.build_meter_with(ProviderIdentity::any(), InstrumentationScope::new(name))
    }

    pub fn build_meter_versioned(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Call<Meter> {
        self.build_meter_with(
            ProviderIdentity::any(),
            InstrumentationScope::new(name).with_version(version),
        )
    }

    pub fn build_meter_with_schema(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        schema_url: impl Into<String>,
    ) -> Call<Meter> {
        self.build_meter_with(
            ProviderIdentity::any(),
            InstrumentationScope::new(name)
                .with_version(version)
                .with_schema_url(schema_url),
        )
    }

    pub fn build_meter_with(
        &self,
        provider: ProviderIdentity,
        scope: InstrumentationScope,
    ) -> Call<Meter> {
        self.dispatcher
            .dispatch::<BuildMeter>(provider, scope, BTreeMap::new())
    }

    pub fn get_context_propagators(&self) -> Call<ContextPropagators> {
        self.get_context_propagators_with(ProviderIdentity::any())
    }

    pub fn get_context_propagators_with(
        &self,
        provider: ProviderIdentity,
    ) -> Call<ContextPropagators> {
        self.dispatcher
            .dispatch::<GetPropagators>(provider, (), BTreeMap::new())
    }

    /// Routed by the request's own service name and setting id.
    pub fn send_im(&self, request: SendImRequest) -> Call<SendImResponse> {
        let provider = request.provider_identity();
        let metadata = request.metadata.clone();
        self.dispatcher
            .dispatch::<SendIm>(provider, request, metadata)
    }

    pub fn encrypt(&self, request: CryptRequest) -> Call<CryptResponse> {
        self.encrypt_with(ProviderIdentity::any(), request)
    }

    pub fn encrypt_with(
        &self,
        provider: ProviderIdentity,
        request: CryptRequest,
    ) -> Call<CryptResponse> {
        let metadata = request.metadata.clone();
        self.dispatcher
            .dispatch::<Encrypt>(provider, request, metadata)
    }

    pub fn decrypt(&self, request: CryptRequest) -> Call<CryptResponse> {
        self.decrypt_with(ProviderIdentity::any(), request)
    }

    pub fn decrypt_with(
        &self,
        provider: ProviderIdentity,
        request: CryptRequest,
    ) -> Call<CryptResponse> {
        let metadata = request.metadata.clone();
        self.dispatcher
            .dispatch::<Decrypt>(provider, request, metadata)
    }
}

impl fmt::Debug for CloudRuntimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudRuntimes")
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .finish()
    }
}

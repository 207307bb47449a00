//! Telemetry provider over the OpenTelemetry global tracer and meter providers.
//!
//! Tracers and meters are whatever the process installed globally (no-op
//! until an SDK pipeline is set up); this adapter only scopes them.

use crate::{
    parse_settings, unsupported_kind, ProviderAdapter, ProviderMetadata, ProviderSetupError,
    ProviderType,
};
use async_trait::async_trait;
use cloudrt_core::domain::telemetry::{
    validate_scope, BuildMeter, BuildTracer, ContextPropagators, GetPropagators,
    InstrumentationScope, Meter, Tracer,
};
use cloudrt_core::{
    CapabilityHandler, CapabilityKind, PayloadValidator, ProviderIdentity, RawError,
    RegistrationOptions, RegistryBuilder, RequestEnvelope, Result,
};
use opentelemetry::global;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryProviderSettings {
    /// Propagator names in `OTEL_PROPAGATORS` style.
    pub propagators: Vec<String>,
}

impl Default for TelemetryProviderSettings {
    fn default() -> Self {
        Self {
            propagators: vec!["tracecontext".to_string(), "baggage".to_string()],
        }
    }
}

pub struct OpenTelemetryProvider {
    propagators: ContextPropagators,
    metadata: ProviderMetadata,
}

impl OpenTelemetryProvider {
    pub fn new(provider_id: impl Into<String>) -> Self {
        let w3c: Vec<Box<dyn TextMapPropagator + Send + Sync>> = vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ];
        Self {
            propagators: ContextPropagators::new(TextMapCompositePropagator::new(w3c)),
            metadata: ProviderMetadata::new(provider_id, ProviderType::Opentelemetry),
        }
    }

    pub fn from_settings(
        provider_id: impl Into<String>,
        settings: &serde_json::Value,
    ) -> std::result::Result<Self, ProviderSetupError> {
        let provider_id = provider_id.into();
        let settings: TelemetryProviderSettings = parse_settings(&provider_id, settings)?;
        Ok(Self {
            propagators: ContextPropagators::new(composite(&settings.propagators)?),
            metadata: ProviderMetadata::new(provider_id, ProviderType::Opentelemetry),
        })
    }
}

fn composite(
    names: &[String],
) -> std::result::Result<TextMapCompositePropagator, ProviderSetupError> {
    let mut propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = Vec::new();
    for name in names {
        match name.trim().to_ascii_lowercase().as_str() {
            "tracecontext" => propagators.push(Box::new(TraceContextPropagator::new())),
            "baggage" => propagators.push(Box::new(BaggagePropagator::new())),
            "none" => {}
            other => return Err(ProviderSetupError::UnsupportedPropagator(other.to_string())),
        }
    }
    Ok(TextMapCompositePropagator::new(propagators))
}

#[async_trait]
impl CapabilityHandler<BuildTracer> for OpenTelemetryProvider {
    async fn execute(
        &self,
        envelope: RequestEnvelope<InstrumentationScope>,
    ) -> std::result::Result<Tracer, RawError> {
        let scope = envelope.payload;
        debug!(scope = %scope.name, version = ?scope.version, "Building tracer");
        Ok(global::tracer_provider().versioned_tracer(
            scope.name,
            scope.version,
            scope.schema_url,
            None,
        ))
    }
}

#[async_trait]
impl CapabilityHandler<BuildMeter> for OpenTelemetryProvider {
    async fn execute(
        &self,
        envelope: RequestEnvelope<InstrumentationScope>,
    ) -> std::result::Result<Meter, RawError> {
        let scope = envelope.payload;
        debug!(scope = %scope.name, version = ?scope.version, "Building meter");
        Ok(global::meter_provider().versioned_meter(
            scope.name,
            scope.version,
            scope.schema_url,
            None,
        ))
    }
}

#[async_trait]
impl CapabilityHandler<GetPropagators> for OpenTelemetryProvider {
    async fn execute(
        &self,
        _envelope: RequestEnvelope<()>,
    ) -> std::result::Result<ContextPropagators, RawError> {
        Ok(self.propagators.clone())
    }
}

impl ProviderAdapter for OpenTelemetryProvider {
    fn metadata(&self) -> ProviderMetadata {
        self.metadata.clone()
    }

    fn capabilities(&self) -> Vec<CapabilityKind> {
        vec![
            CapabilityKind::BUILD_TRACER,
            CapabilityKind::BUILD_METER,
            CapabilityKind::GET_PROPAGATORS,
        ]
    }

    fn register_into(
        self: Arc<Self>,
        builder: &mut RegistryBuilder,
        identity: &ProviderIdentity,
        options: &RegistrationOptions,
        kinds: &[CapabilityKind],
    ) -> Result<()> {
        for kind in kinds {
            if *kind == CapabilityKind::BUILD_TRACER {
                builder.register::<BuildTracer>(
                    identity.clone(),
                    PayloadValidator::new(validate_scope),
                    self.clone(),
                    options.clone(),
                )?;
            } else if *kind == CapabilityKind::BUILD_METER {
                builder.register::<BuildMeter>(
                    identity.clone(),
                    PayloadValidator::new(validate_scope),
                    self.clone(),
                    options.clone(),
                )?;
            } else if *kind == CapabilityKind::GET_PROPAGATORS {
                builder.register::<GetPropagators>(
                    identity.clone(),
                    PayloadValidator::accept_all(),
                    self.clone(),
                    options.clone(),
                )?;
            } else {
                return Err(unsupported_kind(&self.metadata, *kind));
            }
        }
        Ok(())
    }
}

use crate::capability::{Capability, CapabilityKind};
use opentelemetry::propagation::TextMapPropagator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type Tracer = opentelemetry::global::BoxedTracer;
pub type Meter = opentelemetry::metrics::Meter;

/// `Telemetry.BuildTracer`
pub struct BuildTracer;

impl Capability for BuildTracer {
    const KIND: CapabilityKind = CapabilityKind::BUILD_TRACER;
    type Request = InstrumentationScope;
    type Response = Tracer;
}

/// `Telemetry.BuildMeter`
pub struct BuildMeter;

impl Capability for BuildMeter {
    const KIND: CapabilityKind = CapabilityKind::BUILD_METER;
    type Request = InstrumentationScope;
    type Response = Meter;
}

/// `Telemetry.GetPropagators`
pub struct GetPropagators;

impl Capability for GetPropagators {
    const KIND: CapabilityKind = CapabilityKind::GET_PROPAGATORS;
    type Request = ();
    type Response = ContextPropagators;
}

/// Name, version and schema url identifying the instrumentation library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationScope {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub schema_url: Option<String>,
}

impl InstrumentationScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            schema_url: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_schema_url(mut self, schema_url: impl Into<String>) -> Self {
        self.schema_url = Some(schema_url.into());
        self
    }
}

/// Composite text-map propagator handed back by telemetry adapters.
#[derive(Clone)]
pub struct ContextPropagators {
    text_map: Arc<dyn TextMapPropagator + Send + Sync>,
}

impl ContextPropagators {
    pub fn new(propagator: impl TextMapPropagator + Send + Sync + 'static) -> Self {
        Self {
            text_map: Arc::new(propagator),
        }
    }

    pub fn text_map_propagator(&self) -> &(dyn TextMapPropagator + Send + Sync) {
        self.text_map.as_ref()
    }

    /// Header names the propagator reads and writes.
    pub fn fields(&self) -> Vec<String> {
        self.text_map.fields().map(str::to_string).collect()
    }
}

impl fmt::Debug for ContextPropagators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPropagators")
            .field("fields", &self.fields())
            .finish()
    }
}

/// Default payload check for [`BuildTracer`] and [`BuildMeter`].
pub fn validate_scope(scope: &InstrumentationScope) -> Result<(), String> {
    if scope.name.trim().is_empty() {
        return Err("instrumentation scope name must not be empty".to_string());
    }
    if scope
        .schema_url
        .as_deref()
        .is_some_and(|url| url.trim().is_empty())
    {
        return Err("schema url, when given, must not be empty".to_string());
    }
    Ok(())
}

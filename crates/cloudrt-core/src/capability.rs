use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Tag naming one operation category, rendered as `Domain.Operation`.
///
/// The set is open: a new capability is a new constant plus a [`Capability`]
/// marker type, existing adapters are untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityKind {
    domain: &'static str,
    operation: &'static str,
}

impl CapabilityKind {
    pub const BUILD_TRACER: Self = Self::new("Telemetry", "BuildTracer");
    pub const BUILD_METER: Self = Self::new("Telemetry", "BuildMeter");
    pub const GET_PROPAGATORS: Self = Self::new("Telemetry", "GetPropagators");
    pub const ENCRYPT: Self = Self::new("Crypto", "Encrypt");
    pub const DECRYPT: Self = Self::new("Crypto", "Decrypt");
    pub const SEND_IM: Self = Self::new("Messaging", "SendIM");

    /// Kinds shipped with the core, used when parsing configuration.
    pub const BUILTIN: [CapabilityKind; 6] = [
        Self::BUILD_TRACER,
        Self::BUILD_METER,
        Self::GET_PROPAGATORS,
        Self::ENCRYPT,
        Self::DECRYPT,
        Self::SEND_IM,
    ];

    pub const fn new(domain: &'static str, operation: &'static str) -> Self {
        Self { domain, operation }
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Parse a built-in kind from its `Domain.Operation` name.
    pub fn parse(name: &str) -> Option<Self> {
        let (domain, operation) = name.trim().split_once('.')?;
        Self::BUILTIN
            .iter()
            .copied()
            .find(|kind| kind.domain == domain && kind.operation == operation)
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.operation)
    }
}

impl Serialize for CapabilityKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CapabilityKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        CapabilityKind::parse(&name)
            .ok_or_else(|| de::Error::custom(format!("unknown capability kind '{name}'")))
    }
}

/// Which configured backend instance should serve a request.
///
/// `setting_id` disambiguates several configurations of the same service
/// (e.g. two tenants of `dingtalk`). An empty `service_name` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub service_name: String,
    #[serde(default)]
    pub setting_id: String,
}

impl ProviderIdentity {
    pub fn new(service_name: impl Into<String>, setting_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            setting_id: setting_id.into(),
        }
    }

    pub fn service(service_name: impl Into<String>) -> Self {
        Self::new(service_name, "")
    }

    /// Identity that lets the registry pick the capability-wide provider.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_underspecified(&self) -> bool {
        self.service_name.trim().is_empty()
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_underspecified() {
            return f.write_str("<any>");
        }
        if self.setting_id.is_empty() {
            f.write_str(&self.service_name)
        } else {
            write!(f, "{}/{}", self.service_name, self.setting_id)
        }
    }
}

/// Typed view of a capability: its tag plus request and response shapes.
pub trait Capability: Send + Sync + 'static {
    const KIND: CapabilityKind;
    type Request: Send + Sync + 'static;
    type Response: Send + 'static;
}

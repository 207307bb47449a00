use crate::capability::{CapabilityKind, ProviderIdentity};
use crate::{Result, UnifiedError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const MAX_METADATA_KEY_LEN: usize = 128;

/// Capability-specific payload check supplied at registration time.
pub struct PayloadValidator<P> {
    check: Arc<dyn Fn(&P) -> std::result::Result<(), String> + Send + Sync>,
}

impl<P> PayloadValidator<P> {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&P) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
        }
    }

    pub fn accept_all() -> Self {
        Self::new(|_| Ok(()))
    }

    pub fn validate(&self, payload: &P) -> std::result::Result<(), String> {
        (self.check)(payload)
    }
}

impl<P> Clone for PayloadValidator<P> {
    fn clone(&self) -> Self {
        Self {
            check: Arc::clone(&self.check),
        }
    }
}

impl<P> fmt::Debug for PayloadValidator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadValidator")
    }
}

/// Validated request handed to an adapter.
#[derive(Debug, Clone)]
pub struct RequestEnvelope<P> {
    pub request_id: Uuid,
    pub capability: CapabilityKind,
    pub provider: ProviderIdentity,
    pub payload: P,
    /// Opaque passthrough, never interpreted by the dispatch core.
    pub metadata: BTreeMap<String, String>,
    /// Per-adapter call timeout configured at registration.
    pub call_timeout: Option<Duration>,
}

pub struct EnvelopeBuilder<P> {
    capability: CapabilityKind,
    provider: ProviderIdentity,
    payload: Option<P>,
    metadata: BTreeMap<String, String>,
    call_timeout: Option<Duration>,
}

impl<P> EnvelopeBuilder<P> {
    pub fn new(capability: CapabilityKind) -> Self {
        Self {
            capability,
            provider: ProviderIdentity::any(),
            payload: None,
            metadata: BTreeMap::new(),
            call_timeout: None,
        }
    }

    pub fn provider(mut self, provider: ProviderIdentity) -> Self {
        self.provider = provider;
        self
    }

    pub fn payload(mut self, payload: P) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn extend_metadata<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Check metadata keys, then run the capability validator over the payload.
    pub fn build(self, validator: &PayloadValidator<P>) -> Result<RequestEnvelope<P>> {
        let payload = self.payload.ok_or_else(|| {
            UnifiedError::InvalidRequest(format!("{}: payload is missing", self.capability))
        })?;

        if let Some(key) = self.metadata.keys().find(|k| !is_valid_metadata_key(k)) {
            return Err(UnifiedError::InvalidRequest(format!(
                "{}: metadata key '{}' is not a valid identifier",
                self.capability, key
            )));
        }

        validator
            .validate(&payload)
            .map_err(|reason| UnifiedError::InvalidRequest(format!("{}: {reason}", self.capability)))?;

        Ok(RequestEnvelope {
            request_id: Uuid::new_v4(),
            capability: self.capability,
            provider: self.provider,
            payload,
            metadata: self.metadata,
            call_timeout: self.call_timeout,
        })
    }
}

/// `[A-Za-z_][A-Za-z0-9_.-]*`, at most 128 bytes.
pub fn is_valid_metadata_key(key: &str) -> bool {
    if key.is_empty() || key.len() > MAX_METADATA_KEY_LEN {
        return false;
    }
    let mut chars = key.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    first_ok && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

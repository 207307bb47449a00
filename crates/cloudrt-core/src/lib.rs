pub mod capability;
pub mod domain;
pub mod envelope;
pub mod normalize;
pub mod registry;

pub use capability::{Capability, CapabilityKind, ProviderIdentity};
pub use envelope::{EnvelopeBuilder, PayloadValidator, RequestEnvelope};
pub use normalize::{normalize, FailureSignal, RawError};
pub use registry::{
    AdapterHandle, CapabilityHandler, DispatchRegistry, RegistrationInfo, RegistrationOptions,
    RegistryBuilder,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Unified error taxonomy every capability call terminates with.
#[derive(Debug, Clone, Error)]
pub enum UnifiedError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),
    #[error("Ambiguous provider: {0}")]
    AmbiguousProvider(String),
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Provider error: {cause}")]
    ProviderError {
        #[source]
        cause: ProviderCause,
    },
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Fieldless discriminant of [`UnifiedError`], handy for assertions and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ProviderNotFound,
    AmbiguousProvider,
    DuplicateRegistration,
    InvalidRequest,
    ProviderError,
    Timeout,
    Cancelled,
}

impl UnifiedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnifiedError::ProviderNotFound(_) => ErrorKind::ProviderNotFound,
            UnifiedError::AmbiguousProvider(_) => ErrorKind::AmbiguousProvider,
            UnifiedError::DuplicateRegistration(_) => ErrorKind::DuplicateRegistration,
            UnifiedError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            UnifiedError::ProviderError { .. } => ErrorKind::ProviderError,
            UnifiedError::Timeout(_) => ErrorKind::Timeout,
            UnifiedError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ProviderNotFound => "PROVIDER_NOT_FOUND",
            ErrorKind::AmbiguousProvider => "AMBIGUOUS_PROVIDER",
            ErrorKind::DuplicateRegistration => "DUPLICATE_REGISTRATION",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::ProviderError => "PROVIDER_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    pub fn provider_error(cause: ProviderCause) -> Self {
        UnifiedError::ProviderError { cause }
    }
}

/// Backend failure details preserved inside [`UnifiedError::ProviderError`].
#[derive(Debug, Clone)]
pub struct ProviderCause {
    pub capability: CapabilityKind,
    pub service_name: String,
    pub setting_id: String,
    /// Rendered form of the raw failure signal, if the adapter reported one.
    pub signal: Option<String>,
    pub message: String,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ProviderCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via '{}'", self.capability, self.service_name)?;
        if !self.setting_id.is_empty() {
            write!(f, "/'{}'", self.setting_id)?;
        }
        if let Some(signal) = &self.signal {
            write!(f, " [{signal}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ProviderCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, UnifiedError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<UnifiedError> for ErrorResponse {
    fn from(err: UnifiedError) -> Self {
        let code = err.code();
        match err {
            UnifiedError::ProviderError { cause } => {
                let mut details = HashMap::new();
                details.insert("capability".to_string(), cause.capability.to_string());
                details.insert("service_name".to_string(), cause.service_name.clone());
                if !cause.setting_id.is_empty() {
                    details.insert("setting_id".to_string(), cause.setting_id.clone());
                }
                if let Some(signal) = &cause.signal {
                    details.insert("signal".to_string(), signal.clone());
                }
                ErrorResponse::new(code, cause.message).with_details(details)
            }
            UnifiedError::ProviderNotFound(msg)
            | UnifiedError::AmbiguousProvider(msg)
            | UnifiedError::DuplicateRegistration(msg)
            | UnifiedError::InvalidRequest(msg)
            | UnifiedError::Timeout(msg)
            | UnifiedError::Cancelled(msg) => ErrorResponse::new(code, msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicyType {
    Never,
    Fixed,
}

/// Adapter-local retry policy. The dispatch core never retries on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub policy_type: RetryPolicyType,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::never()
    }
}

impl RetryPolicy {
    pub fn never() -> Self {
        Self {
            policy_type: RetryPolicyType::Never,
            max_retries: None,
            backoff_ms: None,
        }
    }

    pub fn fixed(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            policy_type: RetryPolicyType::Fixed,
            max_retries: Some(max_retries),
            backoff_ms: Some(backoff_ms),
        }
    }

    /// Total attempts allowed, including the first one.
    pub fn max_attempts(&self) -> u32 {
        match self.policy_type {
            RetryPolicyType::Never => 1,
            RetryPolicyType::Fixed => self.max_retries.unwrap_or(0).saturating_add(1),
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms.unwrap_or(0))
    }
}

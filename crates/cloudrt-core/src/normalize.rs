//! Mapping of backend failures onto [`UnifiedError`].
//!
//! Adapters report failures as [`RawError`]: whatever signal the backend gave
//! them (an HTTP status, a vendor error code, an I/O error kind) plus a
//! message. [`normalize`] is a pure table lookup over that signal; anything it
//! does not recognise becomes `ProviderError` with the raw details preserved.

use crate::capability::{CapabilityKind, ProviderIdentity};
use crate::{ProviderCause, UnifiedError};
use std::fmt;
use std::io;
use std::sync::Arc;

const INVALID_REQUEST_CODES: &[&str] = &["InvalidParameter", "MissingParameter", "InvalidArgument"];
const TIMEOUT_CODES: &[&str] = &["RequestTimeout", "DeadlineExceeded"];
const CANCELLED_CODES: &[&str] = &["RequestCancelled"];

/// What the backend told the adapter.
#[derive(Debug, Clone)]
pub enum FailureSignal {
    HttpStatus(u16),
    VendorCode(String),
    Io(io::ErrorKind),
    DeadlineExceeded,
    Cancelled,
    /// Backend refused the request as malformed.
    Rejected,
    /// Adapter already produced a unified error; kept as is.
    Unified(Box<UnifiedError>),
    Unknown,
}

impl fmt::Display for FailureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureSignal::HttpStatus(status) => write!(f, "http {status}"),
            FailureSignal::VendorCode(code) => write!(f, "vendor {code}"),
            FailureSignal::Io(kind) => write!(f, "io {kind:?}"),
            FailureSignal::DeadlineExceeded => f.write_str("deadline exceeded"),
            FailureSignal::Cancelled => f.write_str("cancelled"),
            FailureSignal::Rejected => f.write_str("rejected"),
            FailureSignal::Unified(err) => write!(f, "unified {}", err.code()),
            FailureSignal::Unknown => f.write_str("unknown"),
        }
    }
}

/// Adapter-side failure before normalization.
#[derive(Debug, Clone)]
pub struct RawError {
    pub signal: FailureSignal,
    pub message: String,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RawError {
    pub fn new(signal: FailureSignal, message: impl Into<String>) -> Self {
        Self {
            signal,
            message: message.into(),
            source: None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(FailureSignal::HttpStatus(status), message)
    }

    pub fn vendor(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FailureSignal::VendorCode(code.into()), message)
    }

    pub fn deadline(message: impl Into<String>) -> Self {
        Self::new(FailureSignal::DeadlineExceeded, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureSignal::Cancelled, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureSignal::Rejected, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureSignal::Unknown, message)
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.signal, self.message)
    }
}

impl std::error::Error for RawError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl From<UnifiedError> for RawError {
    fn from(err: UnifiedError) -> Self {
        let message = err.to_string();
        Self::new(FailureSignal::Unified(Box::new(err)), message)
    }
}

impl From<io::Error> for RawError {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();
        Self {
            signal: FailureSignal::Io(err.kind()),
            message,
            source: Some(Arc::new(err)),
        }
    }
}

/// Map a raw adapter failure onto the unified taxonomy. Pure: no I/O, no retries.
pub fn normalize(
    raw: &RawError,
    capability: CapabilityKind,
    provider: &ProviderIdentity,
) -> UnifiedError {
    let context = || format!("{capability} via {provider}: {}", raw.message);

    match &raw.signal {
        FailureSignal::Unified(err) => return (**err).clone(),
        FailureSignal::Rejected => return UnifiedError::InvalidRequest(context()),
        FailureSignal::DeadlineExceeded => return UnifiedError::Timeout(context()),
        FailureSignal::Cancelled => return UnifiedError::Cancelled(context()),
        FailureSignal::HttpStatus(status) => match status {
            400 | 404 | 409 | 413 | 422 => return UnifiedError::InvalidRequest(context()),
            408 | 504 => return UnifiedError::Timeout(context()),
            499 => return UnifiedError::Cancelled(context()),
            _ => {}
        },
        FailureSignal::VendorCode(code) => {
            if matches_code(INVALID_REQUEST_CODES, code) {
                return UnifiedError::InvalidRequest(context());
            }
            if matches_code(TIMEOUT_CODES, code) {
                return UnifiedError::Timeout(context());
            }
            if matches_code(CANCELLED_CODES, code) {
                return UnifiedError::Cancelled(context());
            }
        }
        FailureSignal::Io(kind) => match kind {
            io::ErrorKind::TimedOut => return UnifiedError::Timeout(context()),
            io::ErrorKind::Interrupted => return UnifiedError::Cancelled(context()),
            _ => {}
        },
        FailureSignal::Unknown => {}
    }

    UnifiedError::provider_error(ProviderCause {
        capability,
        service_name: provider.service_name.clone(),
        setting_id: provider.setting_id.clone(),
        signal: Some(raw.signal.to_string()),
        message: raw.message.clone(),
        source: raw.source.clone(),
    })
}

fn matches_code(table: &[&str], code: &str) -> bool {
    table.iter().any(|known| known.eq_ignore_ascii_case(code))
}

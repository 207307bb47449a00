use cloudrt_core::{ErrorResponse, UnifiedError};
use cloudrt_providers::ProviderSetupError;
use std::path::PathBuf;
use thiserror::Error;

/// Startup and process-wide state failures. Per-request failures are
/// [`UnifiedError`]s.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to read providers file {path}: {source}")]
    ProvidersFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid providers configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("Provider setup failed: {0}")]
    ProviderSetup(#[from] ProviderSetupError),

    #[error("Registration failed: {0}")]
    Registration(#[from] UnifiedError),

    #[error("A runtime is already installed")]
    AlreadyInstalled,
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::ProvidersFile { .. } => "PROVIDERS_FILE",
            RuntimeError::InvalidConfig(_) => "INVALID_CONFIG",
            RuntimeError::ProviderSetup(_) => "PROVIDER_SETUP",
            RuntimeError::Registration(err) => err.code(),
            RuntimeError::AlreadyInstalled => "ALREADY_INSTALLED",
        }
    }
}

impl From<RuntimeError> for ErrorResponse {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Registration(err) => err.into(),
            other => ErrorResponse::new(other.code(), other.to_string()),
        }
    }
}

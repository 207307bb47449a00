//! Cloud runtime facade.
//!
//! Applications build a [`CloudRuntimes`] once at startup (see
//! [`bootstrap`]) and call capabilities through it. Every call is a lazy
//! [`Call`] that resolves to one value or one [`cloudrt_core::UnifiedError`].

pub mod bootstrap;
pub mod call;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod global;
pub mod runtime;

pub use call::{Call, CancelHandle, SpawnedCall};
pub use config::{ProviderEntry, ProvidersConfig, RuntimeConfig};
pub use dispatcher::Dispatcher;
pub use error::RuntimeError;
pub use runtime::CloudRuntimes;

pub mod crypto_provider;
pub mod im_provider;
pub mod telemetry_provider;

//! Capability-specific request and response shapes.
//!
//! The dispatch core treats these as opaque payloads; only the default
//! validators here and the resolved adapter look inside them.

pub mod crypto;
pub mod im;
pub mod telemetry;

pub use crypto::{validate_crypt, CryptRequest, CryptResponse, Decrypt, Encrypt, KeyInfo};
pub use im::{
    validate_send_im, ImAddress, ImContent, ImTemplate, SendIm, SendImRequest, SendImResponse,
};
pub use telemetry::{
    validate_scope, BuildMeter, BuildTracer, ContextPropagators, GetPropagators,
    InstrumentationScope, Meter, Tracer,
};

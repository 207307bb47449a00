use crate::capability::{Capability, CapabilityKind, ProviderIdentity};
use crate::envelope::{PayloadValidator, RequestEnvelope};
use crate::normalize::RawError;
use crate::{Result, UnifiedError};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Execution entry point an adapter exposes for one capability.
#[async_trait]
pub trait CapabilityHandler<C: Capability>: Send + Sync {
    async fn execute(
        &self,
        envelope: RequestEnvelope<C::Request>,
    ) -> std::result::Result<C::Response, RawError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationOptions {
    /// Serve requests for this service whose setting id is empty or unmatched.
    pub default: bool,
    /// Per-call timeout handed to the adapter through the envelope.
    pub timeout: Option<Duration>,
}

impl RegistrationOptions {
    pub fn as_default() -> Self {
        Self {
            default: true,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Type-free description of one registration, for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub capability: CapabilityKind,
    pub identity: ProviderIdentity,
    pub is_default: bool,
    pub timeout: Option<Duration>,
}

struct Registration<C: Capability> {
    info: RegistrationInfo,
    validator: PayloadValidator<C::Request>,
    handler: Arc<dyn CapabilityHandler<C>>,
}

/// Resolved adapter for capability `C`. Clones share the same registration.
pub struct AdapterHandle<C: Capability> {
    inner: Arc<Registration<C>>,
}

impl<C: Capability> AdapterHandle<C> {
    pub fn info(&self) -> &RegistrationInfo {
        &self.inner.info
    }

    pub fn identity(&self) -> &ProviderIdentity {
        &self.inner.info.identity
    }

    pub fn is_default(&self) -> bool {
        self.inner.info.is_default
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.info.timeout
    }

    pub fn validator(&self) -> &PayloadValidator<C::Request> {
        &self.inner.validator
    }

    pub fn handler(&self) -> Arc<dyn CapabilityHandler<C>> {
        Arc::clone(&self.inner.handler)
    }

    /// True when both handles come from the same registration.
    pub fn same_as(&self, other: &AdapterHandle<C>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<C: Capability> Clone for AdapterHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Capability> fmt::Debug for AdapterHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("info", &self.inner.info)
            .finish()
    }
}

type RegistryKey = (CapabilityKind, String, String);

struct Entry {
    info: RegistrationInfo,
    registration: Arc<dyn Any + Send + Sync>,
}

/// Startup-time, single-threaded registration phase.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<RegistryKey, Entry>,
    defaults: HashMap<(CapabilityKind, String), RegistryKey>,
    order: Vec<RegistryKey>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `(C::KIND, identity)`.
    ///
    /// A triple already present, or a second default for the same
    /// (capability, service), fails with `DuplicateRegistration`. Earlier
    /// registrations of the batch stay in place.
    pub fn register<C: Capability>(
        &mut self,
        identity: ProviderIdentity,
        validator: PayloadValidator<C::Request>,
        handler: Arc<dyn CapabilityHandler<C>>,
        options: RegistrationOptions,
    ) -> Result<()> {
        if identity.is_underspecified() {
            return Err(UnifiedError::InvalidRequest(format!(
                "{}: registration requires a service name",
                C::KIND
            )));
        }

        let key = (
            C::KIND,
            identity.service_name.clone(),
            identity.setting_id.clone(),
        );
        if self.entries.contains_key(&key) {
            return Err(UnifiedError::DuplicateRegistration(format!(
                "{} already registered for {}",
                C::KIND,
                identity
            )));
        }

        let default_key = (C::KIND, identity.service_name.clone());
        if options.default {
            if let Some(existing) = self.defaults.get(&default_key) {
                return Err(UnifiedError::DuplicateRegistration(format!(
                    "{} already has default '{}' for service '{}'",
                    C::KIND,
                    existing.2,
                    identity.service_name
                )));
            }
        }

        let info = RegistrationInfo {
            capability: C::KIND,
            identity,
            is_default: options.default,
            timeout: options.timeout,
        };
        let registration: Arc<Registration<C>> = Arc::new(Registration {
            info: info.clone(),
            validator,
            handler,
        });

        info!(
            capability = %info.capability,
            provider = %info.identity,
            default = info.is_default,
            "Registered provider adapter"
        );

        if options.default {
            self.defaults.insert(default_key, key.clone());
        }
        self.order.push(key.clone());
        self.entries.insert(
            key,
            Entry {
                info,
                registration,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze into the read-only registry served at steady state.
    pub fn build(self) -> DispatchRegistry {
        let mut by_capability: HashMap<CapabilityKind, Vec<RegistryKey>> = HashMap::new();
        for key in &self.order {
            by_capability.entry(key.0).or_default().push(key.clone());
        }

        DispatchRegistry {
            entries: self.entries,
            defaults: self.defaults,
            by_capability,
            order: self.order,
        }
    }
}

/// Read-only lookup table from (capability, service, setting) to adapter.
///
/// Never mutated after [`RegistryBuilder::build`], so concurrent resolves
/// need no synchronization.
pub struct DispatchRegistry {
    entries: HashMap<RegistryKey, Entry>,
    defaults: HashMap<(CapabilityKind, String), RegistryKey>,
    by_capability: HashMap<CapabilityKind, Vec<RegistryKey>>,
    order: Vec<RegistryKey>,
}

impl DispatchRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Resolve the adapter serving `C` for `identity`.
    ///
    /// * empty service name: the only candidate, else the single default
    ///   among candidates, else `AmbiguousProvider`;
    /// * otherwise: the exact (service, setting) entry, else the service's
    ///   default, else `ProviderNotFound`.
    pub fn resolve<C: Capability>(&self, identity: &ProviderIdentity) -> Result<AdapterHandle<C>> {
        let entry = self.resolve_entry(C::KIND, identity)?;
        let registration = Arc::clone(&entry.registration)
            .downcast::<Registration<C>>()
            .map_err(|_| {
                UnifiedError::ProviderNotFound(format!(
                    "{} for {} is registered with a different payload type",
                    C::KIND,
                    entry.info.identity
                ))
            })?;
        Ok(AdapterHandle {
            inner: registration,
        })
    }

    /// Untyped variant of [`resolve`](Self::resolve).
    pub fn resolve_info(
        &self,
        capability: CapabilityKind,
        identity: &ProviderIdentity,
    ) -> Result<&RegistrationInfo> {
        self.resolve_entry(capability, identity)
            .map(|entry| &entry.info)
    }

    fn resolve_entry(&self, capability: CapabilityKind, identity: &ProviderIdentity) -> Result<&Entry> {
        if identity.is_underspecified() {
            return self.resolve_any(capability);
        }

        let exact = (
            capability,
            identity.service_name.clone(),
            identity.setting_id.clone(),
        );
        if let Some(entry) = self.entries.get(&exact) {
            return Ok(entry);
        }

        let default_key = (capability, identity.service_name.clone());
        if let Some(entry) = self
            .defaults
            .get(&default_key)
            .and_then(|key| self.entries.get(key))
        {
            debug!(
                capability = %capability,
                requested = %identity,
                resolved = %entry.info.identity,
                "Falling back to default provider"
            );
            return Ok(entry);
        }

        Err(UnifiedError::ProviderNotFound(format!(
            "no adapter registered for {capability} via {identity}"
        )))
    }

    fn resolve_any(&self, capability: CapabilityKind) -> Result<&Entry> {
        let candidates = self
            .by_capability
            .get(&capability)
            .map(Vec::as_slice)
            .unwrap_or_default();

        match candidates {
            [] => Err(UnifiedError::ProviderNotFound(format!(
                "no adapter registered for {capability}"
            ))),
            [only] => self.entry(only, capability),
            many => {
                let mut defaults = many
                    .iter()
                    .filter_map(|key| self.entries.get(key))
                    .filter(|entry| entry.info.is_default);
                match (defaults.next(), defaults.next()) {
                    (Some(entry), None) => Ok(entry),
                    _ => Err(UnifiedError::AmbiguousProvider(format!(
                        "{} adapters registered for {capability} and no single default; specify a service name",
                        many.len()
                    ))),
                }
            }
        }
    }

    fn entry(&self, key: &RegistryKey, capability: CapabilityKind) -> Result<&Entry> {
        self.entries.get(key).ok_or_else(|| {
            UnifiedError::ProviderNotFound(format!("no adapter registered for {capability}"))
        })
    }

    /// Registrations in the order they were made.
    pub fn registrations(&self) -> impl Iterator<Item = &RegistrationInfo> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .map(|entry| &entry.info)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("registrations", &self.registrations().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::crypto::{CryptRequest, CryptResponse, Encrypt, KeyInfo};
    use crate::domain::im::{
        validate_send_im, ImAddress, ImContent, SendIm, SendImRequest, SendImResponse,
    };
    use crate::envelope::EnvelopeBuilder;
    use crate::ErrorKind;
    use proptest::prelude::*;

    struct StubIm {
        name: &'static str,
    }

    #[async_trait]
    impl CapabilityHandler<SendIm> for StubIm {
        async fn execute(
            &self,
            envelope: RequestEnvelope<SendImRequest>,
        ) -> std::result::Result<SendImResponse, RawError> {
            Ok(SendImResponse {
                message_id: format!("{}-{}", self.name, envelope.request_id),
                service_name: self.name.to_string(),
                accepted_receivers: envelope.payload.address.receivers.clone(),
                sent_at: chrono::Utc::now(),
            })
        }
    }

    struct StubCrypt;

    #[async_trait]
    impl CapabilityHandler<Encrypt> for StubCrypt {
        async fn execute(
            &self,
            envelope: RequestEnvelope<CryptRequest>,
        ) -> std::result::Result<CryptResponse, RawError> {
            Ok(CryptResponse {
                payload: envelope.payload.payload,
                key_chain: envelope.payload.infos,
            })
        }
    }

    fn register_im(
        builder: &mut RegistryBuilder,
        service: &'static str,
        setting: &str,
        options: RegistrationOptions,
    ) -> Result<()> {
        builder.register::<SendIm>(
            ProviderIdentity::new(service, setting),
            PayloadValidator::new(validate_send_im),
            Arc::new(StubIm { name: service }),
            options,
        )
    }

    #[test]
    fn test_register_and_resolve_exact() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "tenant-a", RegistrationOptions::default()).unwrap();
        register_im(&mut builder, "wechat", "", RegistrationOptions::default()).unwrap();
        let registry = builder.build();

        let handle = registry
            .resolve::<SendIm>(&ProviderIdentity::new("dingtalk", "tenant-a"))
            .unwrap();
        assert_eq!(handle.identity().service_name, "dingtalk");
        assert!(!handle.is_default());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_resolve_not_found() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "tenant-a", RegistrationOptions::default()).unwrap();
        let registry = builder.build();

        let err = registry
            .resolve::<SendIm>(&ProviderIdentity::service("wechat"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderNotFound);

        // no default, so an unknown tenant does not fall back
        let err = registry
            .resolve::<SendIm>(&ProviderIdentity::new("dingtalk", "tenant-b"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderNotFound);

        let err = registry
            .resolve::<Encrypt>(&ProviderIdentity::any())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderNotFound);
    }

    #[test]
    fn test_default_fallback_returns_same_handle() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "", RegistrationOptions::as_default()).unwrap();
        let registry = builder.build();

        let plain = registry
            .resolve::<SendIm>(&ProviderIdentity::new("dingtalk", ""))
            .unwrap();
        let tenant = registry
            .resolve::<SendIm>(&ProviderIdentity::new("dingtalk", "tenant-a"))
            .unwrap();
        assert!(plain.same_as(&tenant));
        assert!(plain.is_default());
    }

    #[test]
    fn test_exact_match_wins_over_default() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "", RegistrationOptions::as_default()).unwrap();
        register_im(&mut builder, "dingtalk", "tenant-a", RegistrationOptions::default()).unwrap();
        let registry = builder.build();

        let default = registry
            .resolve::<SendIm>(&ProviderIdentity::service("dingtalk"))
            .unwrap();
        let tenant = registry
            .resolve::<SendIm>(&ProviderIdentity::new("dingtalk", "tenant-a"))
            .unwrap();
        assert!(!default.same_as(&tenant));
        assert_eq!(tenant.identity().setting_id, "tenant-a");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "tenant-a", RegistrationOptions::default()).unwrap();
        let err = register_im(&mut builder, "dingtalk", "tenant-a", RegistrationOptions::as_default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateRegistration);
        // the first registration is untouched
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_second_default_for_service_rejected() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "tenant-a", RegistrationOptions::as_default()).unwrap();
        let err = register_im(&mut builder, "dingtalk", "tenant-b", RegistrationOptions::as_default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateRegistration);
    }

    #[test]
    fn test_same_triple_different_capability_allowed() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "aliyun", "", RegistrationOptions::default()).unwrap();
        builder
            .register::<Encrypt>(
                ProviderIdentity::service("aliyun"),
                PayloadValidator::accept_all(),
                Arc::new(StubCrypt),
                RegistrationOptions::default(),
            )
            .unwrap();
        let registry = builder.build();
        assert_eq!(registry.len(), 2);
        assert!(registry
            .resolve::<Encrypt>(&ProviderIdentity::service("aliyun"))
            .is_ok());
    }

    #[test]
    fn test_registration_requires_service_name() {
        let mut builder = RegistryBuilder::new();
        let err = register_im(&mut builder, "", "tenant-a", RegistrationOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(builder.is_empty());
    }

    #[test]
    fn test_resolve_any_single_candidate() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "wechat", "", RegistrationOptions::default()).unwrap();
        let registry = builder.build();

        let handle = registry.resolve::<SendIm>(&ProviderIdentity::any()).unwrap();
        assert_eq!(handle.identity().service_name, "wechat");
    }

    #[test]
    fn test_resolve_any_ambiguous_without_default() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "", RegistrationOptions::default()).unwrap();
        register_im(&mut builder, "wechat", "", RegistrationOptions::default()).unwrap();
        let registry = builder.build();

        let err = registry
            .resolve::<SendIm>(&ProviderIdentity::any())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousProvider);
    }

    #[test]
    fn test_resolve_any_picks_single_default() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "", RegistrationOptions::default()).unwrap();
        register_im(&mut builder, "wechat", "", RegistrationOptions::as_default()).unwrap();
        let registry = builder.build();

        let handle = registry.resolve::<SendIm>(&ProviderIdentity::any()).unwrap();
        assert_eq!(handle.identity().service_name, "wechat");
    }

    #[test]
    fn test_resolve_any_two_defaults_is_ambiguous() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "", RegistrationOptions::as_default()).unwrap();
        register_im(&mut builder, "wechat", "", RegistrationOptions::as_default()).unwrap();
        let registry = builder.build();

        let err = registry
            .resolve::<SendIm>(&ProviderIdentity::any())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousProvider);
    }

    #[test]
    fn test_registrations_keep_order_and_timeout() {
        let mut builder = RegistryBuilder::new();
        register_im(
            &mut builder,
            "wechat",
            "",
            RegistrationOptions::default().with_timeout(Duration::from_secs(3)),
        )
        .unwrap();
        register_im(&mut builder, "dingtalk", "", RegistrationOptions::default()).unwrap();
        let registry = builder.build();

        let services: Vec<&str> = registry
            .registrations()
            .map(|info| info.identity.service_name.as_str())
            .collect();
        assert_eq!(services, vec!["wechat", "dingtalk"]);

        let info = registry
            .resolve_info(CapabilityKind::SEND_IM, &ProviderIdentity::service("wechat"))
            .unwrap();
        assert_eq!(info.timeout, Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_resolved_handler_executes() {
        let mut builder = RegistryBuilder::new();
        register_im(&mut builder, "dingtalk", "", RegistrationOptions::as_default()).unwrap();
        let registry = builder.build();

        let handle = registry
            .resolve::<SendIm>(&ProviderIdentity::new("dingtalk", "tenant-x"))
            .unwrap();
        let envelope = EnvelopeBuilder::new(CapabilityKind::SEND_IM)
            .provider(ProviderIdentity::new("dingtalk", "tenant-x"))
            .payload(SendImRequest::new(
                "dingtalk",
                ImContent::text("hi"),
                ImAddress::receivers(["u-1", "u-2"]),
            ))
            .build(handle.validator())
            .unwrap();

        let response = handle.handler().execute(envelope).await.unwrap();
        assert_eq!(response.service_name, "dingtalk");
        assert_eq!(response.accepted_receivers, vec!["u-1", "u-2"]);
    }

    #[test]
    fn test_key_chain_order_does_not_affect_resolution() {
        let mut builder = RegistryBuilder::new();
        builder
            .register::<Encrypt>(
                ProviderIdentity::service("local"),
                PayloadValidator::accept_all(),
                Arc::new(StubCrypt),
                RegistrationOptions::default(),
            )
            .unwrap();
        let registry = builder.build();

        let a = CryptRequest::new(vec![KeyInfo::new("a"), KeyInfo::new("b")], b"x".to_vec());
        let b = CryptRequest::new(vec![KeyInfo::new("b"), KeyInfo::new("a")], b"x".to_vec());
        assert_ne!(a, b);

        let first = registry.resolve::<Encrypt>(&ProviderIdentity::any()).unwrap();
        let second = registry.resolve::<Encrypt>(&ProviderIdentity::any()).unwrap();
        assert!(first.same_as(&second));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn property_resolve_is_idempotent(
            settings in prop::collection::hash_set("[a-z]{1,6}", 1..8),
            lookups in 1usize..5,
        ) {
            let mut builder = RegistryBuilder::new();
            for setting in &settings {
                builder.register::<SendIm>(
                    ProviderIdentity::new("dingtalk", setting.clone()),
                    PayloadValidator::accept_all(),
                    Arc::new(StubIm { name: "dingtalk" }),
                    RegistrationOptions::default(),
                ).unwrap();
            }
            let registry = builder.build();

            for setting in &settings {
                let identity = ProviderIdentity::new("dingtalk", setting.clone());
                let first = registry.resolve::<SendIm>(&identity).unwrap();
                for _ in 0..lookups {
                    let again = registry.resolve::<SendIm>(&identity).unwrap();
                    prop_assert!(first.same_as(&again));
                }
            }
        }

        #[test]
        fn property_duplicate_triple_always_rejected(
            services in prop::collection::vec("[a-z]{1,4}", 1..6),
            dup_index in any::<prop::sample::Index>(),
            dup_first_default in any::<bool>(),
        ) {
            let mut builder = RegistryBuilder::new();
            let dup = dup_index.get(&services).clone();
            let mut seen = std::collections::HashSet::new();
            let mut rejected = 0;

            let mut sequence = services.clone();
            sequence.push(dup.clone());
            for (i, service) in sequence.iter().enumerate() {
                let options = RegistrationOptions {
                    default: dup_first_default && i == 0,
                    timeout: None,
                };
                let result = builder.register::<SendIm>(
                    ProviderIdentity::service(service.clone()),
                    PayloadValidator::accept_all(),
                    Arc::new(StubIm { name: "x" }),
                    options,
                );
                if seen.insert(service.clone()) {
                    prop_assert!(result.is_ok());
                } else {
                    rejected += 1;
                    prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::DuplicateRegistration);
                }
            }
            prop_assert!(rejected >= 1);
        }

        #[test]
        fn property_underspecified_resolution(
            services in prop::collection::hash_set("[a-z]{1,6}", 2..6),
            default_index in proptest::option::of(any::<prop::sample::Index>()),
        ) {
            let services: Vec<String> = services.into_iter().collect();
            let default_service = default_index.map(|idx| idx.get(&services).clone());

            let mut builder = RegistryBuilder::new();
            for service in &services {
                let options = RegistrationOptions {
                    default: default_service.as_ref() == Some(service),
                    timeout: None,
                };
                builder.register::<SendIm>(
                    ProviderIdentity::service(service.clone()),
                    PayloadValidator::accept_all(),
                    Arc::new(StubIm { name: "x" }),
                    options,
                ).unwrap();
            }
            let registry = builder.build();

            match (registry.resolve::<SendIm>(&ProviderIdentity::any()), default_service) {
                (Ok(handle), Some(expected)) => {
                    prop_assert_eq!(&handle.identity().service_name, &expected);
                }
                (Err(err), None) => {
                    prop_assert_eq!(err.kind(), ErrorKind::AmbiguousProvider);
                }
                (result, expected) => {
                    prop_assert!(false, "unexpected {:?} for default {:?}", result.map(|h| h.info().clone()), expected);
                }
            }
        }
    }
}

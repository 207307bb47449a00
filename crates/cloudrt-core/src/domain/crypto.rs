use crate::capability::{Capability, CapabilityKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `Crypto.Encrypt`
pub struct Encrypt;

impl Capability for Encrypt {
    const KIND: CapabilityKind = CapabilityKind::ENCRYPT;
    type Request = CryptRequest;
    type Response = CryptResponse;
}

/// `Crypto.Decrypt`
pub struct Decrypt;

impl Capability for Decrypt {
    const KIND: CapabilityKind = CapabilityKind::DECRYPT;
    type Request = CryptRequest;
    type Response = CryptResponse;
}

/// Reference to one key held by the crypto backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_id: String,
    #[serde(default)]
    pub key_version: Option<String>,
}

impl KeyInfo {
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.key_version = Some(version.into());
        self
    }
}

/// Encrypt or decrypt request.
///
/// `infos` is an ordered key chain: reordering it changes the meaning of the
/// request, so equality compares it positionally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptRequest {
    pub infos: Vec<KeyInfo>,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CryptRequest {
    pub fn new(infos: Vec<KeyInfo>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            infos,
            payload: payload.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptResponse {
    pub payload: Vec<u8>,
    /// Keys applied, in request order.
    pub key_chain: Vec<KeyInfo>,
}

/// Default payload check for [`Encrypt`] and [`Decrypt`].
pub fn validate_crypt(request: &CryptRequest) -> Result<(), String> {
    if request.infos.is_empty() {
        return Err("crypt request requires at least one key info".to_string());
    }
    if let Some(pos) = request
        .infos
        .iter()
        .position(|info| info.key_id.trim().is_empty())
    {
        return Err(format!("key info at position {pos} has an empty key id"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_crypt_ok() {
        let req = CryptRequest::new(vec![KeyInfo::new("k1")], b"secret".to_vec());
        assert!(validate_crypt(&req).is_ok());
    }

    #[test]
    fn test_validate_crypt_requires_keys() {
        let req = CryptRequest::new(vec![], b"secret".to_vec());
        assert!(validate_crypt(&req).is_err());
    }

    #[test]
    fn test_validate_crypt_rejects_blank_key_id() {
        let req = CryptRequest::new(
            vec![KeyInfo::new("k1"), KeyInfo::new(" ")],
            b"secret".to_vec(),
        );
        let err = validate_crypt(&req).unwrap_err();
        assert!(err.contains("position 1"));
    }

    #[test]
    fn test_key_chain_order_is_significant() {
        let forward = CryptRequest::new(
            vec![KeyInfo::new("kek"), KeyInfo::new("dek")],
            b"secret".to_vec(),
        );
        let reversed = CryptRequest::new(
            vec![KeyInfo::new("dek"), KeyInfo::new("kek")],
            b"secret".to_vec(),
        );
        assert_ne!(forward, reversed);
    }

    #[test]
    fn test_key_info_version() {
        let info = KeyInfo::new("k1").with_version("3");
        assert_eq!(info.key_version.as_deref(), Some("3"));
    }
}

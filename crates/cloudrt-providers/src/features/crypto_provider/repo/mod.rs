use crate::ProviderSetupError;
use cloudrt_core::domain::crypto::KeyInfo;
use cloudrt_core::RawError;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

pub const KEY_LEN: usize = 32;

/// One 256-bit key version. Key bytes never show up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub key_id: String,
    pub version: String,
    pub bytes: [u8; KEY_LEN],
}

impl KeyMaterial {
    pub fn key_info(&self) -> KeyInfo {
        KeyInfo::new(self.key_id.clone()).with_version(self.version.clone())
    }

    /// Associated data binding a ciphertext layer to this key version.
    pub fn binding(&self) -> Vec<u8> {
        format!("{}:{}", self.key_id, self.version).into_bytes()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait KeyRingRepository: Send + Sync {
    /// Look up `info`; a missing version means the key's current version.
    fn resolve(&self, info: &KeyInfo) -> Result<Option<KeyMaterial>, RawError>;
}

struct KeyVersions {
    current: String,
    versions: BTreeMap<String, [u8; KEY_LEN]>,
}

/// Process-local key ring. The most recently inserted version of a key is current.
pub struct InMemoryKeyRing {
    keys: Arc<RwLock<HashMap<String, KeyVersions>>>,
}

impl InMemoryKeyRing {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert(
        &self,
        key_id: &str,
        version: &str,
        bytes: [u8; KEY_LEN],
    ) -> Result<(), ProviderSetupError> {
        if key_id.trim().is_empty() {
            return Err(ProviderSetupError::InvalidKey {
                key_id: key_id.to_string(),
                reason: "key id must not be empty".to_string(),
            });
        }
        let mut keys = self
            .keys
            .write()
            .map_err(|_| ProviderSetupError::LockPoisoned("key ring".to_string()))?;
        let entry = keys.entry(key_id.to_string()).or_insert_with(|| KeyVersions {
            current: version.to_string(),
            versions: BTreeMap::new(),
        });
        entry.versions.insert(version.to_string(), bytes);
        entry.current = version.to_string();
        Ok(())
    }

    pub fn insert_hex(
        &self,
        key_id: &str,
        version: &str,
        material: &str,
    ) -> Result<(), ProviderSetupError> {
        let invalid = |reason: String| ProviderSetupError::InvalidKey {
            key_id: key_id.to_string(),
            reason,
        };
        let decoded = hex::decode(material.trim()).map_err(|e| invalid(e.to_string()))?;
        let bytes = <[u8; KEY_LEN]>::try_from(decoded.as_slice()).map_err(|_| {
            invalid(format!(
                "expected {KEY_LEN} bytes of key material, got {}",
                decoded.len()
            ))
        })?;
        self.insert(key_id, version, bytes)
    }

    pub fn generate(&self, key_id: &str, version: &str) -> Result<(), ProviderSetupError> {
        self.insert(key_id, version, rand::random())
    }

    pub fn key_count(&self) -> usize {
        self.keys.read().map(|keys| keys.len()).unwrap_or(0)
    }
}

impl Default for InMemoryKeyRing {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyRingRepository for InMemoryKeyRing {
    fn resolve(&self, info: &KeyInfo) -> Result<Option<KeyMaterial>, RawError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| RawError::unknown("key ring lock poisoned"))?;
        let Some(entry) = keys.get(&info.key_id) else {
            return Ok(None);
        };
        let version = info.key_version.as_deref().unwrap_or(&entry.current);
        Ok(entry.versions.get(version).map(|bytes| KeyMaterial {
            key_id: info.key_id.clone(),
            version: version.to_string(),
            bytes: *bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_version_is_current() {
        let ring = InMemoryKeyRing::new();
        ring.insert("kek", "1", [1; KEY_LEN]).unwrap();
        ring.insert("kek", "2", [2; KEY_LEN]).unwrap();

        let current = ring.resolve(&KeyInfo::new("kek")).unwrap().unwrap();
        assert_eq!(current.version, "2");
        assert_eq!(current.bytes, [2; KEY_LEN]);

        let pinned = ring
            .resolve(&KeyInfo::new("kek").with_version("1"))
            .unwrap()
            .unwrap();
        assert_eq!(pinned.bytes, [1; KEY_LEN]);
        assert_eq!(ring.key_count(), 1);
    }

    #[test]
    fn test_unknown_key_or_version_resolves_to_none() {
        let ring = InMemoryKeyRing::new();
        ring.generate("kek", "1").unwrap();
        assert!(ring.resolve(&KeyInfo::new("dek")).unwrap().is_none());
        assert!(ring
            .resolve(&KeyInfo::new("kek").with_version("9"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_insert_hex_validates_length() {
        let ring = InMemoryKeyRing::new();
        assert!(ring.insert_hex("kek", "1", &"ab".repeat(KEY_LEN)).is_ok());

        let short = ring.insert_hex("dek", "1", "abcd").unwrap_err();
        assert!(short.to_string().contains("expected 32 bytes"));

        let not_hex = ring.insert_hex("dek", "1", "zz").unwrap_err();
        assert!(matches!(not_hex, ProviderSetupError::InvalidKey { .. }));
    }

    #[test]
    fn test_debug_hides_key_bytes() {
        let material = KeyMaterial {
            key_id: "kek".to_string(),
            version: "1".to_string(),
            bytes: [0xAB; KEY_LEN],
        };
        let rendered = format!("{material:?}");
        assert!(rendered.contains("kek"));
        assert!(!rendered.contains("171"));
    }
}

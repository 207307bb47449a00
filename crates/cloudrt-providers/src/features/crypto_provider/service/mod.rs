use crate::features::crypto_provider::repo::{KeyMaterial, KeyRingRepository};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use cloudrt_core::domain::crypto::{CryptRequest, CryptResponse, KeyInfo};
use cloudrt_core::RawError;
use std::sync::Arc;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Layered AES-256-GCM over an ordered key chain.
///
/// Encryption seals with `infos[0]` first and the last key outermost;
/// decryption peels layers in reverse. Each layer is `nonce || ciphertext`.
pub struct CryptoService {
    ring: Arc<dyn KeyRingRepository>,
}

impl CryptoService {
    pub fn new(ring: Arc<dyn KeyRingRepository>) -> Self {
        Self { ring }
    }

    pub fn encrypt(&self, request: &CryptRequest) -> Result<CryptResponse, RawError> {
        let chain = self.resolve_chain(&request.infos)?;
        let mut data = request.payload.clone();
        for key in &chain {
            data = seal(key, &data)?;
        }
        Ok(CryptResponse {
            payload: data,
            key_chain: chain.iter().map(KeyMaterial::key_info).collect(),
        })
    }

    pub fn decrypt(&self, request: &CryptRequest) -> Result<CryptResponse, RawError> {
        let chain = self.resolve_chain(&request.infos)?;
        let mut data = request.payload.clone();
        for (layer, key) in chain.iter().enumerate().rev() {
            data = open(key, &data, layer)?;
        }
        Ok(CryptResponse {
            payload: data,
            key_chain: chain.iter().map(KeyMaterial::key_info).collect(),
        })
    }

    fn resolve_chain(&self, infos: &[KeyInfo]) -> Result<Vec<KeyMaterial>, RawError> {
        infos
            .iter()
            .map(|info| {
                self.ring.resolve(info)?.ok_or_else(|| {
                    RawError::http(
                        404,
                        format!(
                            "key '{}' version {} not found",
                            info.key_id,
                            info.key_version.as_deref().unwrap_or("<current>")
                        ),
                    )
                })
            })
            .collect()
    }
}

fn cipher(key: &KeyMaterial) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.bytes))
}

fn seal(key: &KeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>, RawError> {
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let aad = key.binding();
    let ciphertext = cipher(key)
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| RawError::unknown(format!("sealing with key '{}' failed", key.key_id)))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open(key: &KeyMaterial, sealed: &[u8], layer: usize) -> Result<Vec<u8>, RawError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(RawError::vendor(
            "InvalidParameter",
            format!("ciphertext layer {layer} is truncated"),
        ));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let aad = key.binding();
    cipher(key)
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| {
            RawError::vendor(
                "InvalidParameter",
                format!(
                    "ciphertext layer {layer} failed authentication with key '{}'",
                    key.key_id
                ),
            )
        })
}

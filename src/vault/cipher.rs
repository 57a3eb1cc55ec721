//! Symmetric encryption of upstream IMAP passwords (spec §4.1).
//!
//! Ciphertext format: `salt:iv:tag:ct`, each segment base64-standard
//! encoded. Key derivation is `scrypt(master_secret, salt, 32)`, run
//! fresh for every encryption so a leaked key never lets an attacker
//! correlate two ciphertexts produced with the same salt.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use scrypt::Params;
use secrecy::{ExposeSecret, Secret};
use zeroize::Zeroize;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("master secret must be at least 32 characters")]
    WeakMasterSecret,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(&'static str),
    #[error("credential tampered: authentication tag mismatch")]
    CredentialTampered,
}

/// Derives the 32-byte AES key from the master secret and a per-call
/// salt via scrypt.
fn derive_key(master_secret: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], VaultError> {
    let params = Params::recommended();
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(master_secret.as_bytes(), salt, &params, &mut key)
        .map_err(|_| VaultError::KeyDerivation)?;
    Ok(key)
}

/// Holds the master secret used to derive per-call encryption keys.
/// Validated once at construction (spec: `ConfigError` is fatal at
/// startup if the secret is too short).
pub struct Vault {
    master_secret: Secret<String>,
}

impl Vault {
    pub fn new(master_secret: String) -> Result<Self, VaultError> {
        if master_secret.len() < 32 {
            return Err(VaultError::WeakMasterSecret);
        }
        Ok(Self {
            master_secret: Secret::new(master_secret),
        })
    }

    /// Encrypts `plaintext`, returning the `salt:iv:tag:ct` encoded
    /// ciphertext. Fresh salt and IV are generated on every call.
    #[tracing::instrument(skip_all)]
    pub fn encrypt(&self, plaintext: &Secret<String>) -> Result<String, VaultError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut key = derive_key(self.master_secret.expose_secret(), &salt)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| VaultError::KeyDerivation)?;
        key.zeroize();

        let nonce = Nonce::from_slice(&iv);
        let mut sealed = cipher
            .encrypt(nonce, plaintext.expose_secret().as_bytes())
            .map_err(|_| VaultError::KeyDerivation)?;

        // `aes-gcm` appends the 16-byte tag to the ciphertext; split it
        // out so the wire format carries the four segments separately.
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        let encoded = format!(
            "{}:{}:{}:{}",
            BASE64.encode(salt),
            BASE64.encode(iv),
            BASE64.encode(tag),
            BASE64.encode(sealed),
        );
        tracing::debug!(bytes = encoded.len(), "encrypted credential");
        Ok(encoded)
    }

    /// Decrypts a `salt:iv:tag:ct` string produced by [`Vault::encrypt`].
    /// Returns [`VaultError::CredentialTampered`] on authentication
    /// failure (corrupted or tampered ciphertext).
    #[tracing::instrument(skip_all)]
    pub fn decrypt(&self, encoded: &str) -> Result<Secret<String>, VaultError> {
        let parts: Vec<&str> = encoded.split(':').collect();
        let [salt_b64, iv_b64, tag_b64, ct_b64] = parts[..] else {
            return Err(VaultError::MalformedCiphertext(
                "expected four colon-separated segments",
            ));
        };

        let salt = BASE64
            .decode(salt_b64)
            .map_err(|_| VaultError::MalformedCiphertext("salt"))?;
        let iv = BASE64
            .decode(iv_b64)
            .map_err(|_| VaultError::MalformedCiphertext("iv"))?;
        let tag = BASE64
            .decode(tag_b64)
            .map_err(|_| VaultError::MalformedCiphertext("tag"))?;
        let ct = BASE64
            .decode(ct_b64)
            .map_err(|_| VaultError::MalformedCiphertext("ciphertext"))?;

        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(VaultError::MalformedCiphertext("segment length"));
        }

        let mut key = derive_key(self.master_secret.expose_secret(), &salt)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| VaultError::KeyDerivation)?;
        key.zeroize();

        let mut sealed = ct;
        sealed.extend_from_slice(&tag);

        let nonce = Nonce::from_slice(&iv);
        let plaintext = cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| VaultError::CredentialTampered)?;

        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| VaultError::MalformedCiphertext("plaintext not utf-8"))?;
        Ok(Secret::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        Vault::new("x".repeat(32)).unwrap()
    }

    #[test]
    fn roundtrip_preserves_plaintext() {
        let vault = vault();
        let secret = Secret::new("hello:world".to_string());
        let encrypted = vault.encrypt(&secret).unwrap();
        let decrypted = vault.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted.expose_secret(), "hello:world");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let vault = vault();
        let secret = Secret::new("app-password".to_string());
        let encrypted = vault.encrypt(&secret).unwrap();
        // swap the last character of the ciphertext segment for a
        // different valid base64 character
        let mut chars: Vec<char> = encrypted.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        let result = vault.decrypt(&tampered);
        assert!(matches!(result, Err(VaultError::CredentialTampered)));
    }

    #[test]
    fn rejects_weak_master_secret() {
        assert!(matches!(
            Vault::new("too short".to_string()),
            Err(VaultError::WeakMasterSecret)
        ));
    }

    #[test]
    fn unique_salt_and_iv_per_call() {
        let vault = vault();
        let secret = Secret::new("same plaintext".to_string());
        let a = vault.encrypt(&secret).unwrap();
        let b = vault.encrypt(&secret).unwrap();
        assert_ne!(a, b);
    }
}

//! Cryptographic utilities for the account store
//!
//! - AES-256-GCM for tokens at rest
//! - Master key derivation from the configured store secret (HKDF-SHA256)
//! - Store secret generation

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use super::StoreError;

/// AES-256-GCM nonce size (96 bits)
const NONCE_SIZE: usize = 12;
/// AES-256 key size (256 bits)
pub const KEY_SIZE: usize = 32;

const KDF_SALT: &[u8] = b"connected-accounts";
const KDF_INFO: &[u8] = b"account-store-v1";

/// Encrypt plaintext bytes with AES-256-GCM.
/// Returns: nonce (12 bytes) || ciphertext+tag
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| StoreError::Crypto(format!("encryption failed: {}", e)))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt data produced by `encrypt()`.
pub fn decrypt(key: &[u8; KEY_SIZE], data: &[u8]) -> Result<Vec<u8>, StoreError> {
    if data.len() < NONCE_SIZE {
        return Err(StoreError::Crypto("ciphertext too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| StoreError::Crypto(format!("decryption failed (wrong store secret?): {}", e)))
}

/// Derive the store's master key from its secret.
pub fn derive_master_key(secret: &str) -> Result<[u8; KEY_SIZE], StoreError> {
    if secret.is_empty() {
        return Err(StoreError::Crypto("store secret is empty".to_string()));
    }

    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), secret.as_bytes());
    let mut key = [0u8; KEY_SIZE];
    hk.expand(KDF_INFO, &mut key)
        .map_err(|e| StoreError::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// Generate a random store secret.
/// Returns a 64-character hex string (256 bits of entropy).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = derive_master_key("correct horse").unwrap();
        let encrypted = encrypt(&key, b"oauth_token=abc").unwrap();
        assert_ne!(&encrypted[NONCE_SIZE..], b"oauth_token=abc");
        assert_eq!(decrypt(&key, &encrypted).unwrap(), b"oauth_token=abc");
    }

    #[test]
    fn test_wrong_secret_fails() {
        let encrypted = encrypt(&derive_master_key("one").unwrap(), b"secret").unwrap();
        let err = decrypt(&derive_master_key("two").unwrap(), &encrypted).unwrap_err();
        assert!(matches!(err, StoreError::Crypto(_)));
    }

    #[test]
    fn test_truncated_ciphertext() {
        let key = derive_master_key("k").unwrap();
        assert!(decrypt(&key, &[0u8; 4]).is_err());
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        assert_eq!(derive_master_key("s").unwrap(), derive_master_key("s").unwrap());
        assert_ne!(derive_master_key("s").unwrap(), derive_master_key("t").unwrap());
        assert!(derive_master_key("").is_err());
    }

    #[test]
    fn test_generated_secret() {
        let s = generate_secret();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(s, generate_secret());
    }
}

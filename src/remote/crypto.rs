//! Crypto helpers for the upload protocol.
//!
//! The shared secret is never sent: the passphrase is stretched with
//! SHA-256 and the first 32 hex characters become the AES-256-CBC key.
//! Every request authenticates itself with a freshly encrypted local
//! timestamp token.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use openssl::error::ErrorStack;
use openssl::symm::{decrypt, encrypt, Cipher};
use rand::RngCore;
use sha2::{Digest, Sha256};

pub type AesKey = [u8; 32];

/// Stretch a passphrase into the 32-byte AES key: the first 32 characters
/// of the hex SHA-256, used as raw bytes.
pub fn derive_key(passphrase: &str) -> AesKey {
    let hex = format!("{:x}", Sha256::digest(passphrase.as_bytes()));
    let mut key = [0u8; 32];
    key.copy_from_slice(&hex.as_bytes()[..32]);
    key
}

/// AES-256-CBC with PKCS#7 padding and a random IV.
pub fn encrypt_aes(key: &AesKey, data: &[u8]) -> Result<([u8; 16], Vec<u8>), ErrorStack> {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let ciphertext = encrypt(Cipher::aes_256_cbc(), key, Some(&iv), data)?;
    Ok((iv, ciphertext))
}

pub fn decrypt_aes(key: &AesKey, iv: &[u8], data: &[u8]) -> Result<Vec<u8>, ErrorStack> {
    decrypt(Cipher::aes_256_cbc(), key, Some(iv), data)
}

/// The `token`/`token_iv` pair carried by every request, both base64.
pub struct RequestToken {
    pub token: String,
    pub iv: String,
}

pub fn request_token(key: &AesKey) -> Result<RequestToken, ErrorStack> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let (iv, ciphertext) = encrypt_aes(key, stamp.as_bytes())?;
    Ok(RequestToken {
        token: BASE64.encode(ciphertext),
        iv: BASE64.encode(iv),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_is_hex_prefix() {
        let key = derive_key("secret");
        let hex = format!("{:x}", Sha256::digest(b"secret"));
        assert_eq!(&key[..], &hex.as_bytes()[..32]);
        assert!(key.iter().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_encrypt_roundtrip() {
        let key = derive_key("secret");
        let plain = b"some eml content, long enough to span blocks...".to_vec();
        let (iv, ciphertext) = encrypt_aes(&key, &plain).unwrap();
        assert_ne!(ciphertext, plain);
        assert_eq!(ciphertext.len() % 16, 0);
        let recovered = decrypt_aes(&key, &iv, &ciphertext).unwrap();
        assert_eq!(recovered, plain);
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let key = derive_key("secret");
        let (iv1, _) = encrypt_aes(&key, b"x").unwrap();
        let (iv2, _) = encrypt_aes(&key, b"x").unwrap();
        assert_ne!(iv1, iv2);
    }

    #[test]
    fn test_token_fields_are_base64() {
        let key = derive_key("secret");
        let token = request_token(&key).unwrap();
        let iv = BASE64.decode(&token.iv).unwrap();
        assert_eq!(iv.len(), 16);
        let ciphertext = BASE64.decode(&token.token).unwrap();
        let stamp = decrypt_aes(&key, &iv, &ciphertext).unwrap();
        // YYYYMMDD_HHMMSS
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp[8], b'_');
    }
}

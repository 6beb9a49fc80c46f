//! Per-connection symmetric encryption

use crate::error::{AuthError, AuthResult};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

const NONCE_LEN: usize = 12;
const KEY_INFO: &[u8] = b"burrow/v1 session key";

/// AES-256-GCM keyed from the handshake secret
///
/// Sealed layout is `nonce || ciphertext`, with a fresh random nonce for
/// every message. Associated data passed to [`seal_with`](Self::seal_with)
/// is authenticated but not carried; `open_with` must be given the same bytes.
#[derive(Clone)]
pub struct SessionCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher")
    }
}

impl SessionCipher {
    /// Derive the AES key from secret material of any length
    pub fn from_secret(secret: &[u8]) -> AuthResult<Self> {
        if secret.is_empty() {
            return Err(AuthError::Cipher("empty session secret".to_string()));
        }

        let hkdf = Hkdf::<Sha256>::new(None, secret);
        let mut key = [0u8; 32];
        hkdf.expand(KEY_INFO, &mut key)
            .map_err(|e| AuthError::Cipher(format!("HKDF expansion failed: {}", e)))?;

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AuthError::Cipher(format!("Failed to create cipher: {}", e)))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &[u8]) -> AuthResult<Vec<u8>> {
        self.seal_with(plaintext, &[])
    }

    pub fn open(&self, sealed: &[u8]) -> AuthResult<Vec<u8>> {
        self.open_with(sealed, &[])
    }

    /// Encrypt `plaintext` and bind `aad` to the tag
    pub fn seal_with(&self, plaintext: &[u8], aad: &[u8]) -> AuthResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|e| AuthError::Cipher(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open_with(&self, sealed: &[u8], aad: &[u8]) -> AuthResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(AuthError::Cipher("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| AuthError::Cipher("Invalid nonce length".to_string()))?;

        self.cipher
            .decrypt(&Nonce::from(nonce_bytes), Payload { msg: ciphertext, aad })
            .map_err(|e| AuthError::Cipher(format!("Decryption failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_secret_same_key() {
        let left = SessionCipher::from_secret(b"shared secret").unwrap();
        let right = SessionCipher::from_secret(b"shared secret").unwrap();

        let sealed = left.seal(b"hello").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"hello");
        assert_eq!(right.open(&sealed).unwrap(), b"hello");
    }

    #[test]
    fn test_nonce_is_fresh_per_message() {
        let cipher = SessionCipher::from_secret(&[7u8; 32]).unwrap();
        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_secret_is_stretched() {
        // A one byte secret must still yield a working 256-bit key
        let cipher = SessionCipher::from_secret(&[1]).unwrap();
        let sealed = cipher.seal(b"x").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), b"x");
        assert!(SessionCipher::from_secret(&[]).is_err());
    }

    #[test]
    fn test_open_rejects_tampering_and_foreign_keys() {
        let cipher = SessionCipher::from_secret(b"one").unwrap();
        let other = SessionCipher::from_secret(b"two").unwrap();
        let mut sealed = cipher.seal(b"payload").unwrap();

        assert!(other.open(&sealed).is_err());
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(cipher.open(&sealed).is_err());
        assert!(cipher.open(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = SessionCipher::from_secret(b"k").unwrap();
        let sealed = cipher.seal(&[]).unwrap();
        assert!(cipher.open(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_associated_data_must_match() {
        let cipher = SessionCipher::from_secret(b"k").unwrap();
        let sealed = cipher.seal_with(b"payload", b"data|s1|web").unwrap();

        assert_eq!(cipher.open_with(&sealed, b"data|s1|web").unwrap(), b"payload");
        assert!(cipher.open_with(&sealed, b"data|s2|web").is_err());
        assert!(cipher.open(&sealed).is_err());
    }
}

//! RSA key pairs, their wire encoding and fingerprints

use crate::error::{AuthError, AuthResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_KEY_BITS: usize = 2048;

const PRIVATE_KEY_FILE: &str = "private.pem";

/// Source of the local peer's RSA key pair
pub trait KeyPairProvider: Send + Sync {
    fn private_key(&self) -> AuthResult<RsaPrivateKey>;

    fn public_key(&self) -> AuthResult<RsaPublicKey> {
        Ok(self.private_key()?.to_public_key())
    }
}

/// In-memory key pair
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("fingerprint", &fingerprint(&self.private.to_public_key()))
            .finish()
    }
}

impl KeyPair {
    pub fn generate(bits: usize) -> AuthResult<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)?;
        Ok(Self { private })
    }

    pub fn from_pem(pem: &str) -> AuthResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| AuthError::KeyEncoding(e.to_string()))?;
        Ok(Self { private })
    }

    /// PKCS#8 PEM encoding of the private key
    pub fn to_pem(&self) -> AuthResult<String> {
        let pem = self
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::KeyEncoding(e.to_string()))?;
        Ok(pem.to_string())
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.private.to_public_key())
    }
}

impl KeyPairProvider for KeyPair {
    fn private_key(&self) -> AuthResult<RsaPrivateKey> {
        Ok(self.private.clone())
    }
}

/// Key pair persisted as `private.pem` inside a directory
///
/// The key is generated and written on first use.
#[derive(Debug, Clone)]
pub struct StoredKeyPairProvider {
    path: PathBuf,
    keys: KeyPair,
}

impl StoredKeyPairProvider {
    pub fn open(directory: impl AsRef<Path>) -> AuthResult<Self> {
        Self::open_with_bits(directory, DEFAULT_KEY_BITS)
    }

    pub fn open_with_bits(directory: impl AsRef<Path>, bits: usize) -> AuthResult<Self> {
        let directory = directory.as_ref();
        let path = directory.join(PRIVATE_KEY_FILE);

        let keys = if path.is_file() {
            KeyPair::from_pem(&fs::read_to_string(&path)?)?
        } else {
            fs::create_dir_all(directory)?;
            let keys = KeyPair::generate(bits)?;
            write_private(&path, &keys.to_pem()?)?;
            info!(
                "Generated new key pair {} at {}",
                keys.fingerprint(),
                path.display()
            );
            keys
        };

        Ok(Self { path, keys })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self) -> String {
        self.keys.fingerprint()
    }
}

impl KeyPairProvider for StoredKeyPairProvider {
    fn private_key(&self) -> AuthResult<RsaPrivateKey> {
        self.keys.private_key()
    }
}

#[cfg(unix)]
fn write_private(path: &Path, pem: &str) -> AuthResult<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(pem.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, pem: &str) -> AuthResult<()> {
    fs::write(path, pem)?;
    Ok(())
}

/// Base64 of the SPKI DER encoding, as carried by `RSA-PING`
pub fn encode_public_key(key: &RsaPublicKey) -> AuthResult<String> {
    let der = key
        .to_public_key_der()
        .map_err(|e| AuthError::KeyEncoding(e.to_string()))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

pub fn decode_public_key(encoded: &[u8]) -> AuthResult<RsaPublicKey> {
    let der = STANDARD.decode(encoded)?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| AuthError::KeyEncoding(e.to_string()))
}

/// Short human-comparable key identity
///
/// SHA-256 over the big-endian modulus; the first eight digest bytes in
/// decimal, joined with `::`.
pub fn fingerprint(key: &RsaPublicKey) -> String {
    let digest = Sha256::digest(key.n().to_bytes_be());
    digest[..8]
        .iter()
        .map(|byte| byte.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

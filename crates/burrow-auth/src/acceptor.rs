//! Trust decisions for the handshake's responder side

use crate::error::AuthResult;
use crate::keys::fingerprint;
use async_trait::async_trait;
use rsa::RsaPublicKey;
use std::collections::HashSet;
use tracing::{info, warn};

/// Decides whether a connecting peer's public key is trusted
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn is_trusted(&self, key: &RsaPublicKey) -> AuthResult<bool>;
}

/// Trusts every key. Encryption still applies, authentication does not.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl Acceptor for AcceptAll {
    async fn is_trusted(&self, key: &RsaPublicKey) -> AuthResult<bool> {
        info!("Accepting key {} without verification", fingerprint(key));
        Ok(true)
    }
}

/// Trusts keys whose fingerprint is on a fixed list
#[derive(Debug, Clone, Default)]
pub struct FingerprintAllowlist {
    allowed: HashSet<String>,
}

impl FingerprintAllowlist {
    pub fn new<I, S>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: fingerprints.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

#[async_trait]
impl Acceptor for FingerprintAllowlist {
    async fn is_trusted(&self, key: &RsaPublicKey) -> AuthResult<bool> {
        let fp = fingerprint(key);
        let trusted = self.allowed.contains(&fp);
        if !trusted {
            warn!("Rejecting key {}, not on the allowlist", fp);
        }
        Ok(trusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyPair, KeyPairProvider};

    #[tokio::test]
    async fn test_allowlist() {
        let known = KeyPair::generate(1024).unwrap();
        let stranger = KeyPair::generate(1024).unwrap();
        let acceptor = FingerprintAllowlist::new([known.fingerprint()]);

        assert!(acceptor
            .is_trusted(&known.public_key().unwrap())
            .await
            .unwrap());
        assert!(!acceptor
            .is_trusted(&stranger.public_key().unwrap())
            .await
            .unwrap());
        assert!(AcceptAll
            .is_trusted(&stranger.public_key().unwrap())
            .await
            .unwrap());
    }
}

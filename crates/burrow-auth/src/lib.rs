//! Authenticated transports for Burrow
//!
//! Every new transport runs a short key exchange before any application
//! message is accepted:
//!
//! 1. The initiator sends its RSA public key (`RSA-PING`).
//! 2. The responder asks its [`Acceptor`] whether the key is trusted, draws a
//!    random session secret, encrypts it to the initiator's key with
//!    RSA-OAEP and replies with `RSA-PONG`.
//! 3. The initiator decrypts the secret.
//!
//! Both sides derive an AES-256-GCM key from the secret with HKDF-SHA256 and
//! [`AuthenticatedTransport`] seals every message body from then on. A
//! failed step closes the underlying transport; there is no plaintext
//! fallback.

pub mod acceptor;
pub mod cipher;
pub mod error;
pub mod factory;
pub mod keys;
pub mod transport;

pub use acceptor::{AcceptAll, Acceptor, FingerprintAllowlist};
pub use cipher::SessionCipher;
pub use error::{AuthError, AuthResult};
pub use factory::AuthenticatedTransportFactory;
pub use keys::{
    decode_public_key, encode_public_key, fingerprint, KeyPair, KeyPairProvider,
    StoredKeyPairProvider, DEFAULT_KEY_BITS,
};
pub use transport::{
    accept_authenticated, connect_authenticated, AuthenticatedTransport, HandshakeConfig,
};

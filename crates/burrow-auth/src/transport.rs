//! Handshake and the encrypting transport decorator

use crate::acceptor::Acceptor;
use crate::cipher::SessionCipher;
use crate::error::{AuthError, AuthResult};
use crate::keys::{decode_public_key, encode_public_key, fingerprint, KeyPairProvider};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use burrow_proto::{Message, MessageType};
use burrow_transport::{
    channel, MessageStream, Publisher, Transport, TransportError, TransportResult,
    DEFAULT_CHANNEL_CAPACITY,
};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::Oaep;
use sha2::Sha256;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Upper bound for each wait on the remote side
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl HandshakeConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Run the initiator side of the handshake over `child`
///
/// On failure `child` is closed before the error is returned.
pub async fn connect_authenticated(
    child: Arc<dyn Transport>,
    keys: &dyn KeyPairProvider,
    config: &HandshakeConfig,
) -> AuthResult<AuthenticatedTransport> {
    match initiate(child.as_ref(), keys, config).await {
        Ok((stream, cipher)) => {
            debug!("[{}] Handshake complete (initiator)", child.id());
            Ok(AuthenticatedTransport::new(child, stream, cipher, None))
        }
        Err(e) => {
            warn!("[{}] Handshake failed: {}", child.id(), e);
            let _ = child.close().await;
            Err(e)
        }
    }
}

/// Run the responder side of the handshake over `child`
///
/// On failure `child` is closed before the error is returned.
pub async fn accept_authenticated(
    child: Arc<dyn Transport>,
    acceptor: &dyn Acceptor,
    config: &HandshakeConfig,
) -> AuthResult<AuthenticatedTransport> {
    match respond(child.as_ref(), acceptor, config).await {
        Ok((stream, cipher, remote)) => {
            info!("[{}] Peer key {} authenticated", child.id(), remote);
            Ok(AuthenticatedTransport::new(child, stream, cipher, Some(remote)))
        }
        Err(e) => {
            warn!("[{}] Handshake failed: {}", child.id(), e);
            let _ = child.close().await;
            Err(e)
        }
    }
}

async fn initiate(
    child: &dyn Transport,
    keys: &dyn KeyPairProvider,
    config: &HandshakeConfig,
) -> AuthResult<(MessageStream, SessionCipher)> {
    let stream = child.receive().await?;
    let public = keys.public_key()?;
    child.send(Message::rsa_ping(encode_public_key(&public)?)).await?;

    let reply = expect_message(&stream, MessageType::RsaPong, config).await?;
    let ciphertext = STANDARD.decode(&reply.body)?;
    let secret = keys
        .private_key()?
        .decrypt(Oaep::new::<Sha256>(), &ciphertext)?;

    Ok((stream, SessionCipher::from_secret(&secret)?))
}

async fn respond(
    child: &dyn Transport,
    acceptor: &dyn Acceptor,
    config: &HandshakeConfig,
) -> AuthResult<(MessageStream, SessionCipher, String)> {
    let stream = child.receive().await?;

    let hello = expect_message(&stream, MessageType::RsaPing, config).await?;
    let remote_key = decode_public_key(&hello.body)?;
    let remote = fingerprint(&remote_key);
    if !acceptor.is_trusted(&remote_key).await? {
        return Err(AuthError::Untrusted {
            fingerprint: remote,
        });
    }

    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    let ciphertext = remote_key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), &secret)?;
    child
        .send(Message::rsa_pong(STANDARD.encode(ciphertext)))
        .await?;

    Ok((stream, SessionCipher::from_secret(&secret)?, remote))
}

async fn expect_message(
    stream: &MessageStream,
    expected: MessageType,
    config: &HandshakeConfig,
) -> AuthResult<Message> {
    let message = tokio::time::timeout(config.timeout, stream.recv())
        .await
        .map_err(|_| AuthError::Timeout)?
        .ok_or(AuthError::ConnectionClosed)?;

    if message.message_type != expected {
        return Err(AuthError::UnexpectedMessage {
            expected,
            got: message.message_type,
        });
    }
    Ok(message)
}

/// Envelope fields that travel in clear, bound to the sealed body
///
/// Each field is length-prefixed so that moving bytes between fields changes
/// the associated data.
fn envelope_aad(message: &Message) -> Vec<u8> {
    let fields = [
        message.message_type.as_str(),
        message.session_id.as_str(),
        message.app_name.as_str(),
    ];
    let mut aad = Vec::with_capacity(fields.iter().map(|f| 4 + f.len()).sum());
    for field in fields {
        aad.extend_from_slice(&(field.len() as u32).to_be_bytes());
        aad.extend_from_slice(field.as_bytes());
    }
    aad
}

/// Transport decorator sealing every message body with the session cipher
///
/// Envelope fields (session id, app name, type) travel in clear; bodies
/// that fail to decrypt are logged and dropped.
pub struct AuthenticatedTransport {
    id: String,
    child: Arc<dyn Transport>,
    child_stream: MessageStream,
    cipher: Arc<SessionCipher>,
    inbound: Mutex<Option<MessageStream>>,
    remote_fingerprint: Option<String>,
}

impl std::fmt::Debug for AuthenticatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedTransport")
            .field("id", &self.id)
            .field("remote_fingerprint", &self.remote_fingerprint)
            .finish()
    }
}

impl AuthenticatedTransport {
    fn new(
        child: Arc<dyn Transport>,
        child_stream: MessageStream,
        cipher: SessionCipher,
        remote_fingerprint: Option<String>,
    ) -> Self {
        Self {
            id: format!("auth-{}", child.id()),
            child,
            child_stream,
            cipher: Arc::new(cipher),
            inbound: Mutex::new(None),
            remote_fingerprint,
        }
    }

    /// Fingerprint of the remote key, known on the responder side
    pub fn remote_fingerprint(&self) -> Option<&str> {
        self.remote_fingerprint.as_deref()
    }

    async fn decrypt_loop(
        id: String,
        source: MessageStream,
        cipher: Arc<SessionCipher>,
        publisher: Publisher<Message>,
    ) {
        while let Some(message) = source.recv().await {
            match cipher.open_with(&message.body, &envelope_aad(&message)) {
                Ok(plaintext) => {
                    if !publisher.publish(message.with_body(plaintext)).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("[{}] Dropping {}: {}", id, message.message_type, e);
                }
            }
        }
        debug!("[{}] Decrypt loop ended", id);
        publisher.close();
    }
}

#[async_trait]
impl Transport for AuthenticatedTransport {
    async fn send(&self, message: Message) -> TransportResult<()> {
        let sealed = self
            .cipher
            .seal_with(&message.body, &envelope_aad(&message))
            .map_err(|e| TransportError::Encryption(e.to_string()))?;
        self.child.send(message.with_body(sealed)).await
    }

    async fn receive(&self) -> TransportResult<MessageStream> {
        let mut inbound = self
            .inbound
            .lock()
            .map_err(|_| TransportError::ProtocolError("inbound lock poisoned".to_string()))?;
        if let Some(stream) = inbound.as_ref() {
            return Ok(stream.clone());
        }

        let (publisher, stream) = channel(DEFAULT_CHANNEL_CAPACITY);
        tokio::spawn(Self::decrypt_loop(
            self.id.clone(),
            self.child_stream.clone(),
            self.cipher.clone(),
            publisher,
        ));
        *inbound = Some(stream.clone());
        Ok(stream)
    }

    async fn close(&self) -> TransportResult<()> {
        if let Ok(inbound) = self.inbound.lock() {
            if let Some(stream) = inbound.as_ref() {
                stream.close();
            }
        }
        self.child.close().await
    }

    fn id(&self) -> &str {
        &self.id
    }
}

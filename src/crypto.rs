//! Per-connection security envelope: an X25519 + HKDF-SHA-256 handshake
//! followed by AES-256-GCM frame encryption.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::errors::CryptoError;

const HKDF_INFO: &[u8] = b"handshake data";
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeServerHello {
    pub server_public_key: String,
    pub salt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeClientHello {
    pub client_public_key: String,
}

/// A frame on the wire once the handshake has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub nonce: String,
    pub ciphertext: String,
    pub tag: String,
}

pub struct CryptoEnvelope {
    cipher: Option<Aes256Gcm>,
}

impl CryptoEnvelope {
    pub fn new() -> Self {
        CryptoEnvelope { cipher: None }
    }

    /// Step 1: generate this side's ephemeral keypair and the hello to send.
    pub fn start_handshake() -> (EphemeralSecret, HandshakeServerHello) {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        (
            secret,
            HandshakeServerHello {
                server_public_key: B64.encode(public.as_bytes()),
                salt: B64.encode(salt),
            },
        )
    }

    /// Step 2: consume the client's hello, derive the shared key, and
    /// install it. The salt must be the one generated in `start_handshake`.
    pub fn complete_handshake(
        &mut self,
        secret: EphemeralSecret,
        salt: &[u8],
        client_hello: &HandshakeClientHello,
    ) -> Result<(), CryptoError> {
        let client_key_bytes: [u8; 32] = B64
            .decode(&client_hello.client_public_key)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or(CryptoError::MalformedHandshake)?;
        let client_public = PublicKey::from(client_key_bytes);
        let shared = secret.diffie_hellman(&client_public);

        let hk = Hkdf::<Sha256>::new(Some(salt), shared.as_bytes());
        let mut key_bytes = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key_bytes)
            .map_err(|_| CryptoError::MalformedHandshake)?;

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        self.cipher = Some(Aes256Gcm::new(key));
        Ok(())
    }

    pub fn is_established(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<WireFrame, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::DecryptFailed)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut sealed = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
            .map_err(|_| CryptoError::DecryptFailed)?;
        // aes-gcm appends the 16-byte tag to the ciphertext; split it so the
        // wire format carries the two fields the spec names separately.
        let tag = sealed.split_off(sealed.len() - 16);

        Ok(WireFrame {
            nonce: B64.encode(nonce_bytes),
            ciphertext: B64.encode(sealed),
            tag: B64.encode(tag),
        })
    }

    pub fn decrypt(&self, frame: &WireFrame) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::DecryptFailed)?;
        let nonce_bytes = B64
            .decode(&frame.nonce)
            .map_err(|_| CryptoError::DecryptFailed)?;
        let mut ciphertext = B64
            .decode(&frame.ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)?;
        let tag = B64
            .decode(&frame.tag)
            .map_err(|_| CryptoError::DecryptFailed)?;
        if nonce_bytes.len() != NONCE_LEN || tag.len() != 16 {
            return Err(CryptoError::DecryptFailed);
        }
        ciphertext.extend_from_slice(&tag);
        let nonce = Nonce::from_slice(&nonce_bytes);
        cipher
            .decrypt(nonce, Payload { msg: &ciphertext, aad: &[] })
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

impl Default for CryptoEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_pair() -> (CryptoEnvelope, CryptoEnvelope) {
        let (server_secret, server_hello) = CryptoEnvelope::start_handshake();
        let (client_secret, client_hello) = CryptoEnvelope::start_handshake();
        let salt = B64.decode(&server_hello.salt).unwrap();

        let mut server_env = CryptoEnvelope::new();
        server_env
            .complete_handshake(
                server_secret,
                &salt,
                &HandshakeClientHello {
                    client_public_key: client_hello.server_public_key.clone(),
                },
            )
            .unwrap();

        let mut client_env = CryptoEnvelope::new();
        client_env
            .complete_handshake(
                client_secret,
                &salt,
                &HandshakeClientHello {
                    client_public_key: server_hello.server_public_key.clone(),
                },
            )
            .unwrap();

        (server_env, client_env)
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let (server_env, client_env) = handshake_pair();
        let plaintext = b"{\"msg_type\":\"ping\"}";
        let frame = server_env.encrypt(plaintext).unwrap();
        let decrypted = client_env.decrypt(&frame).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_before_handshake_fails() {
        let env = CryptoEnvelope::new();
        let frame = WireFrame {
            nonce: B64.encode([0u8; NONCE_LEN]),
            ciphertext: B64.encode(b"x"),
            tag: B64.encode([0u8; 16]),
        };
        assert!(matches!(env.decrypt(&frame), Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let (server_env, client_env) = handshake_pair();
        let mut frame = server_env.encrypt(b"hello").unwrap();
        let mut bytes = B64.decode(&frame.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        frame.ciphertext = B64.encode(bytes);
        assert!(client_env.decrypt(&frame).is_err());
    }
}

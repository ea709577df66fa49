//! End-to-end encryption for published files: an ephemeral X25519 key
//! agreement wrapping an XChaCha20-Poly1305 bundle. One bundle per (file,
//! recipient); the ephemeral secret is discarded after use.

use chacha20poly1305::aead::{Aead, KeyInit, OsRng as AeadOsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{ChiralError, ChiralResult};

/// An X25519 keypair, long-lived for a recipient identity.
pub struct KeyPair {
    pub secret: StaticSecret,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        KeyPair { secret, public }
    }
}

/// Exactly one per (file, recipient); see the `EncryptionBundle` entity.
pub struct EncryptionBundle {
    pub ephemeral_public: [u8; 32],
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
}

/// Encrypt `data` for the recipient's X25519 public key. Generates a fresh
/// ephemeral keypair, derives a shared secret via Diffie-Hellman, and uses
/// it directly as the XChaCha20-Poly1305 key.
pub fn encrypt_for(recipient_public: &PublicKey, data: &[u8]) -> ChiralResult<EncryptionBundle> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let shared_secret = ephemeral_secret.diffie_hellman(recipient_public);

    let cipher = XChaCha20Poly1305::new(shared_secret.as_bytes().into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| ChiralError::Generic(format!("encryption failed: {e}")))?;

    Ok(EncryptionBundle {
        ephemeral_public: ephemeral_public.to_bytes(),
        nonce: nonce.into(),
        ciphertext,
    })
}

/// Decrypt a bundle with the recipient's static secret.
pub fn decrypt_with(recipient_secret: &StaticSecret, bundle: &EncryptionBundle) -> ChiralResult<Vec<u8>> {
    let ephemeral_public = PublicKey::from(bundle.ephemeral_public);
    let shared_secret = recipient_secret.diffie_hellman(&ephemeral_public);

    let cipher = XChaCha20Poly1305::new(shared_secret.as_bytes().into());
    let nonce = XNonce::from_slice(&bundle.nonce);
    cipher
        .decrypt(nonce, bundle.ciphertext.as_ref())
        .map_err(|_| ChiralError::Unauthorized("decryption failed: bad key or corrupted bundle".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let recipient = KeyPair::generate();
        let data = b"a hosting proposal, signed and sealed".to_vec();

        let bundle = encrypt_for(&recipient.public, &data).unwrap();
        let decrypted = decrypt_with(&recipient.secret, &bundle).unwrap();

        assert_eq!(decrypted, data);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let recipient = KeyPair::generate();
        let attacker = KeyPair::generate();
        let bundle = encrypt_for(&recipient.public, b"secret payload").unwrap();

        let result = decrypt_with(&attacker.secret, &bundle);
        assert!(matches!(result, Err(ChiralError::Unauthorized(_))));
    }
}

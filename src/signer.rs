//! Narrow signer interface decoupling the core from wallet/mnemonic logic.
//! Callers bring their own key representation; the core only ever needs
//! `sign` and `address`. This breaks the dependency on any one blockchain
//! library's key type.

use crate::error::ChiralResult;

/// Opaque signature bytes; format is left to the signer implementation.
pub type Signature = Vec<u8>;

pub trait Signer: Send + Sync {
    /// Sign an arbitrary byte string (e.g. a KAD record or control message).
    fn sign(&self, bytes: &[u8]) -> ChiralResult<Signature>;
    /// The signer's address/identity, opaque to the core.
    fn address(&self) -> String;
}

/// An in-memory Ed25519-backed signer, suitable for tests and for nodes
/// that manage their own keys outside a wallet integration.
pub struct LocalSigner {
    keypair: libp2p::identity::Keypair,
}

impl LocalSigner {
    pub fn generate() -> Self {
        LocalSigner {
            keypair: libp2p::identity::Keypair::generate_ed25519(),
        }
    }

    pub fn from_keypair(keypair: libp2p::identity::Keypair) -> Self {
        LocalSigner { keypair }
    }

    pub fn keypair(&self) -> &libp2p::identity::Keypair {
        &self.keypair
    }

    /// Load the node's network identity from `path`, generating and
    /// persisting a fresh one if none exists yet. Keeps the local peer id
    /// stable across CLI invocations without touching wallet/mnemonic
    /// material, which stays out of this interface.
    pub async fn load_or_generate(path: &std::path::Path) -> ChiralResult<Self> {
        use crate::error::ChiralError;

        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let keypair = libp2p::identity::Keypair::from_protobuf_encoding(&bytes)
                    .map_err(|e| ChiralError::Config(format!("corrupt node identity at {path:?}: {e}")))?;
                Ok(LocalSigner { keypair })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let keypair = libp2p::identity::Keypair::generate_ed25519();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let encoded = keypair
                    .to_protobuf_encoding()
                    .map_err(|e| ChiralError::Generic(format!("failed to encode node identity: {e}")))?;
                tokio::fs::write(path, encoded).await?;
                Ok(LocalSigner { keypair })
            }
            Err(e) => Err(ChiralError::from(e)),
        }
    }
}

impl Signer for LocalSigner {
    fn sign(&self, bytes: &[u8]) -> ChiralResult<Signature> {
        self.keypair
            .sign(bytes)
            .map_err(|e| crate::error::ChiralError::Unauthorized(format!("signing failed: {e}")))
    }

    fn address(&self) -> String {
        self.keypair.public().to_peer_id().to_string()
    }
}

/// Verify a signature produced by a `Signer` against a raw public key, used
/// by KAD record validation.
pub fn verify(public_key: &libp2p::identity::PublicKey, bytes: &[u8], signature: &[u8]) -> bool {
    public_key.verify(bytes, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trips() {
        let signer = LocalSigner::generate();
        let message = b"propose agreement abc123";
        let signature = signer.sign(message).unwrap();

        assert!(verify(&signer.keypair.public(), message, &signature));
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let signer = LocalSigner::generate();
        let signature = signer.sign(b"original").unwrap();

        assert!(!verify(&signer.keypair.public(), b"tampered", &signature));
    }

    #[tokio::test]
    async fn load_or_generate_keeps_identity_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_identity.key");

        let first = LocalSigner::load_or_generate(&path).await.unwrap();
        let second = LocalSigner::load_or_generate(&path).await.unwrap();

        assert_eq!(first.address(), second.address());
    }
}

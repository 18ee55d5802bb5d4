use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

/// A compact 64-byte ECDSA signature (r ‖ s). The recovery id is not carried
/// on the wire; verification recovers over all four candidates.
pub type Signature64 = [u8; 64];

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid secret key material")]
    InvalidSecretKey,
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
}

/// A secp256k1 keypair used to sign blocks and identify the node.
pub struct KeyPair {
    secp: Secp256k1<All>,
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        Self { secp, secret, public }
    }

    /// Restores a keypair from raw 32-byte secret material.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        let public = secret.public_key(&secp);
        Ok(Self { secp, secret, public })
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The 33-byte compressed public key.
    pub fn compressed_public(&self) -> [u8; 33] {
        self.public.serialize()
    }

    /// The 65-byte uncompressed public key (0x04-prefixed).
    pub fn uncompressed_public(&self) -> [u8; 65] {
        self.public.serialize_uncompressed()
    }

    /// The x coordinate and parity bit, as stored in a block's public-key field.
    pub fn public_xonly(&self) -> ([u8; 32], bool) {
        let compressed = self.public.serialize();
        let mut x = [0u8; 32];
        x.copy_from_slice(&compressed[1..]);
        (x, compressed[0] == 0x03)
    }

    /// Signs a 32-byte digest, returning the compact 64-byte form.
    pub fn sign(&self, digest: &[u8; 32]) -> Signature64 {
        let msg = Message::from_digest(*digest);
        let sig: RecoverableSignature = self.secp.sign_ecdsa_recoverable(&msg, &self.secret);
        let (_, compact) = sig.serialize_compact();
        compact
    }
}

/// Recovers the compressed public key from a compact signature by trying every
/// recovery id and returning the candidate that matches `expected`.
///
/// Returns true iff some recovery id yields `expected`.
pub fn recover_compressed(digest: &[u8; 32], sig: &Signature64, expected: &[u8; 33]) -> bool {
    let secp = Secp256k1::new();
    let msg = Message::from_digest(*digest);
    for rec_id in 0..4 {
        let Ok(id) = RecoveryId::from_i32(rec_id) else {
            continue;
        };
        let Ok(recoverable) = RecoverableSignature::from_compact(sig, id) else {
            continue;
        };
        if let Ok(recovered) = secp.recover_ecdsa(&msg, &recoverable) {
            if &recovered.serialize() == expected {
                return true;
            }
        }
    }
    false
}

/// Verifies a compact signature directly against a known compressed key.
pub fn verify_with_key(digest: &[u8; 32], sig: &Signature64, key: &[u8; 33]) -> bool {
    let Ok(public) = PublicKey::from_slice(key) else {
        return false;
    };
    let Ok(signature) = secp256k1::ecdsa::Signature::from_compact(sig) else {
        return false;
    };
    let msg = Message::from_digest(*digest);
    Secp256k1::verification_only()
        .verify_ecdsa(&msg, &signature, &public)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashes::double_sha256;

    #[test]
    fn sign_and_recover_roundtrip() {
        let pair = KeyPair::generate();
        let digest = double_sha256(b"block body");
        let sig = pair.sign(&digest);
        assert!(recover_compressed(&digest, &sig, &pair.compressed_public()));
    }

    #[test]
    fn recover_rejects_wrong_key() {
        let signer = KeyPair::generate();
        let other = KeyPair::generate();
        let digest = double_sha256(b"block body");
        let sig = signer.sign(&digest);
        assert!(!recover_compressed(&digest, &sig, &other.compressed_public()));
    }

    #[test]
    fn verify_with_key_matches_signer() {
        let pair = KeyPair::generate();
        let digest = double_sha256(b"payload");
        let sig = pair.sign(&digest);
        assert!(verify_with_key(&digest, &sig, &pair.compressed_public()));
        assert!(!verify_with_key(&double_sha256(b"other"), &sig, &pair.compressed_public()));
    }

    #[test]
    fn secret_roundtrip_preserves_public() {
        let pair = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(&pair.secret_bytes()).unwrap();
        assert_eq!(pair.compressed_public(), restored.compressed_public());
    }

    #[test]
    fn xonly_matches_compressed() {
        let pair = KeyPair::generate();
        let (x, odd) = pair.public_xonly();
        let compressed = pair.compressed_public();
        assert_eq!(&compressed[1..], &x[..]);
        assert_eq!(odd, compressed[0] == 0x03);
    }
}

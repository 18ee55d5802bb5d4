//! Cryptographic primitives for the XDAG node: the SHA-256 family used for
//! block identity, Keccak-256 for node identity, and recoverable secp256k1
//! signatures for block authentication.

pub mod hashes;
pub mod keys;

pub use hashes::{double_sha256, hash160, hmac_sha512, keccak256, sha256};
pub use keys::{KeyError, KeyPair, Signature64, recover_compressed, verify_with_key};

//! # Cryptographic Primitives
//!
//! Everything the non-repudiation exchange signs, hashes, or encrypts goes
//! through here:
//!
//! - **SHA-256** over canonical JSON for message digests.
//! - **Textbook RSA** over those digests for proofs of origin, reception,
//!   key origin, and key publication.
//! - **RSA blind signatures** for signing requests the signer cannot read.
//! - **AES-256-CBC** for the challenge ciphertext.
//!
//! Primitive math (prime generation, modular exponentiation, the block
//! cipher itself) comes from audited crates. This module only decides what
//! gets fed to them and in which order.

pub mod blind;
pub mod hash;
pub mod keys;
pub mod signatures;
pub mod symmetric;

pub use hash::{canonical_json, digest_json, sha256, Digest};
pub use keys::{KeyError, PublicKeyHex, RsaKeyPair, RsaPublicKey};
pub use signatures::{matches_digest, recover_digest, sign_digest, Signature, SignatureError};
pub use symmetric::{Iv, SessionKey, SymmetricError};

//! # Hashing and Canonical Digests
//!
//! Proofs in this protocol are RSA signatures over a SHA-256 digest of a
//! message body. Both ends compute that digest independently, so the bytes
//! being hashed must be identical on both sides. We fix them as the
//! **canonical JSON** of the body: compact, no whitespace, object keys in
//! lexicographic order at every nesting level.
//!
//! The canonicalizer walks the `serde_json::Value` itself rather than
//! trusting the map type's iteration order, so enabling `preserve_order`
//! anywhere in the dependency graph cannot change a digest.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::config::DIGEST_LENGTH;

/// Compute the SHA-256 hash of the input data.
pub fn sha256(data: &[u8]) -> [u8; DIGEST_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; DIGEST_LENGTH];
    output.copy_from_slice(&result);
    output
}

/// Serialize a JSON value with sorted object keys and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars have exactly one compact rendering.
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 over the canonical JSON form of `value`.
pub fn digest_json(value: &Value) -> Digest {
    Digest(sha256(canonical_json(value).as_bytes()))
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// Error returned when parsing a digest from hex.
#[derive(Debug, Error)]
#[error("invalid digest: expected {DIGEST_LENGTH} hex-encoded bytes")]
pub struct InvalidDigest;

/// A 32-byte SHA-256 digest. Displayed and serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes, big-endian when read as an integer.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    /// Lowercase hex rendering (always 64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Result<Self, InvalidDigest> {
        let bytes = hex::decode(s).map_err(|_| InvalidDigest)?;
        let array: [u8; DIGEST_LENGTH] = bytes.try_into().map_err(|_| InvalidDigest)?;
        Ok(Self(array))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl TryFrom<String> for Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_hex()
    }
}

//! # Digest Signatures
//!
//! Turns raw RSA into the two operations the protocol actually needs:
//!
//! - [`sign_digest`]: read a SHA-256 digest as a big-endian integer `m`
//!   and produce `s = m^d mod n`.
//! - [`recover_digest`]: compute `s^e mod n` and hand back the digest that
//!   was signed.
//!
//! Note what is missing: there is no `verify(...) -> bool`. Verification is
//! "recover, then compare with a digest you computed yourself". Callers keep
//! the signature afterwards because it *is* the evidence; a later dispute is
//! settled by showing it to a third party, who repeats the same two steps.

use std::fmt;

use num_bigint_dig::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DIGEST_LENGTH;

use super::hash::Digest;
use super::keys::{biguint_from_hex, biguint_to_hex, RsaError, RsaKeyPair, RsaPublicKey};

/// Errors during digest signing and recovery.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// The digest read as an integer is not below the signer's modulus.
    /// Fatal for that digest: signing it again cannot succeed.
    #[error("digest {digest} is not below the signing modulus")]
    DomainError { digest: String },

    #[error("signature out of range for this modulus")]
    OutOfRange,

    /// `s^e mod n` produced a value wider than a SHA-256 digest.
    #[error("recovered value is not a {DIGEST_LENGTH}-byte digest")]
    NotADigest,

    #[error("invalid signature encoding: {0:?}")]
    InvalidEncoding(String),
}

/// An RSA signature over a digest. Serialized as a bare hex string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature(BigUint);

impl Signature {
    /// Wrap a raw signature integer.
    pub fn from_biguint(value: BigUint) -> Self {
        Self(value)
    }

    /// The signature integer.
    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    /// Lowercase hex, no leading zeros.
    pub fn to_hex(&self) -> String {
        biguint_to_hex(&self.0)
    }

    /// Parse the hex wire form.
    pub fn from_hex(s: &str) -> Result<Self, SignatureError> {
        biguint_from_hex(s)
            .map(Self)
            .ok_or_else(|| SignatureError::InvalidEncoding(s.to_string()))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        if hex.len() > 16 {
            write!(f, "Signature({}…)", &hex[..16])
        } else {
            write!(f, "Signature({hex})")
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Signature {
    type Error = SignatureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Signature> for String {
    fn from(sig: Signature) -> Self {
        sig.to_hex()
    }
}

/// Sign a digest with the keypair's private exponent.
///
/// # Errors
///
/// [`SignatureError::DomainError`] if the digest, as an integer, is not
/// below the modulus. With any modulus of 512 bits or more this cannot
/// happen for a SHA-256 digest, but the check is what keeps it that way.
pub fn sign_digest(keypair: &RsaKeyPair, digest: &Digest) -> Result<Signature, SignatureError> {
    let m = BigUint::from_bytes_be(digest.as_bytes());
    match keypair.raw_sign(&m) {
        Ok(s) => Ok(Signature(s)),
        Err(_) => Err(SignatureError::DomainError {
            digest: digest.to_hex(),
        }),
    }
}

/// Recover the digest a signature was made over.
///
/// This does not say whether the signature is *valid*; compare the result
/// with the digest of the body you expect.
pub fn recover_digest(
    public_key: &RsaPublicKey,
    signature: &Signature,
) -> Result<Digest, SignatureError> {
    let m = public_key
        .raw_verify(&signature.0)
        .map_err(|e| match e {
            RsaError::SignatureOutOfRange | RsaError::DomainError => SignatureError::OutOfRange,
        })?;

    let bytes = m.to_bytes_be();
    if bytes.len() > DIGEST_LENGTH {
        return Err(SignatureError::NotADigest);
    }
    // Left-pad: digests with leading zero bytes come back shorter.
    let mut out = [0u8; DIGEST_LENGTH];
    out[DIGEST_LENGTH - bytes.len()..].copy_from_slice(&bytes);
    Ok(Digest::from_bytes(out))
}

/// `true` if `signature` recovers exactly `expected` under `public_key`.
pub fn matches_digest(public_key: &RsaPublicKey, signature: &Signature, expected: &Digest) -> bool {
    matches!(recover_digest(public_key, signature), Ok(d) if &d == expected)
}

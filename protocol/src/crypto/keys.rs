//! # RSA Keys
//!
//! Textbook RSA keypairs for proof signing. Key generation is delegated to
//! the `rsa` crate (prime generation is not something we write ourselves);
//! we then keep the raw `(e, n, d)` integers because the protocol signs a
//! digest *as an integer*, `s = m^d mod n`, without any padding scheme.
//! That is what the counterparts expect on the wire, and it is also what
//! makes blind signatures possible.
//!
//! ## Wire format
//!
//! Public keys travel as `{ "e": hex, "n": hex }`: lowercase hex, no `0x`
//! prefix, no leading zeros. Signatures travel as a bare hex string.
//!
//! ## Security considerations
//!
//! - The private exponent is never serialized and never shows up in
//!   `Debug` output.
//! - Unpadded RSA is malleable. That is acceptable here only because every
//!   signed integer is a SHA-256 digest that the verifier recomputes from
//!   the body, never a value chosen by the counterpart.

use std::fmt;

use num_bigint_dig::BigUint;
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MAX_RSA_BITS, MIN_RSA_BITS};

use super::hash::sha256;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key generation failed: {0}")]
    Generation(String),

    #[error("modulus too small: {bits} bits (minimum {MIN_RSA_BITS})")]
    ModulusTooSmall { bits: usize },

    #[error("modulus too large: {bits} bits (maximum {MAX_RSA_BITS})")]
    ModulusTooLarge { bits: usize },

    #[error("invalid public key encoding: {0}")]
    InvalidEncoding(String),
}

/// Errors from raw RSA operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RsaError {
    /// The value to sign is not strictly below the modulus.
    #[error("value does not fit below the modulus")]
    DomainError,

    /// A signature is not strictly below the modulus, so no keypair with
    /// this public key could have produced it.
    #[error("signature out of range for this modulus")]
    SignatureOutOfRange,
}

// ---------------------------------------------------------------------------
// Hex helpers
// ---------------------------------------------------------------------------

/// Lowercase hex without leading zeros (`"0"` for zero).
pub(crate) fn biguint_to_hex(value: &BigUint) -> String {
    value.to_str_radix(16)
}

/// Parse bare lowercase or uppercase hex digits. Signs, `_` separators and
/// a `0x` prefix are rejected so the wire text re-encodes to itself.
pub(crate) fn biguint_from_hex(s: &str) -> Option<BigUint> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    BigUint::parse_bytes(s.as_bytes(), 16)
}

// ---------------------------------------------------------------------------
// Public key
// ---------------------------------------------------------------------------

/// The public half of an RSA keypair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PublicKeyHex", into = "PublicKeyHex")]
pub struct RsaPublicKey {
    e: BigUint,
    n: BigUint,
}

/// `{e, n}` as hex strings, exactly as exchanged with peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyHex {
    pub e: String,
    pub n: String,
}

impl RsaPublicKey {
    /// Build a public key from its components.
    pub fn new(e: BigUint, n: BigUint) -> Self {
        Self { e, n }
    }

    /// Public exponent.
    pub fn e(&self) -> &BigUint {
        &self.e
    }

    /// Modulus.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.n.bits()
    }

    /// Short identifier for logs: the first 8 bytes of SHA-256 over the
    /// modulus, hex-encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(&sha256(&self.n.to_bytes_be())[..8])
    }

    /// `s^e mod n`. Rejects `s >= n`.
    pub fn raw_verify(&self, signature: &BigUint) -> Result<BigUint, RsaError> {
        if signature >= &self.n {
            return Err(RsaError::SignatureOutOfRange);
        }
        Ok(signature.modpow(&self.e, &self.n))
    }

    /// Hex wire form.
    pub fn to_hex(&self) -> PublicKeyHex {
        PublicKeyHex {
            e: biguint_to_hex(&self.e),
            n: biguint_to_hex(&self.n),
        }
    }

    /// Parse the hex wire form.
    ///
    /// The modulus may be at most [`MAX_RSA_BITS`] and the exponent must
    /// lie strictly between 1 and `n`, which bounds the cost of every
    /// later `modpow` under this key.
    pub fn from_hex(e: &str, n: &str) -> Result<Self, KeyError> {
        let e = biguint_from_hex(e)
            .ok_or_else(|| KeyError::InvalidEncoding(format!("e is not hex: {e:?}")))?;
        let n = biguint_from_hex(n)
            .ok_or_else(|| KeyError::InvalidEncoding(format!("n is not hex: {n:?}")))?;
        if n <= BigUint::from(1u32) || e <= BigUint::from(1u32) {
            return Err(KeyError::InvalidEncoding(
                "e and n must both be greater than 1".to_string(),
            ));
        }
        if n.bits() > MAX_RSA_BITS {
            return Err(KeyError::ModulusTooLarge { bits: n.bits() });
        }
        if e >= n {
            return Err(KeyError::InvalidEncoding(
                "e must be smaller than n".to_string(),
            ));
        }
        Ok(Self { e, n })
    }
}

impl TryFrom<PublicKeyHex> for RsaPublicKey {
    type Error = KeyError;

    fn try_from(value: PublicKeyHex) -> Result<Self, Self::Error> {
        Self::from_hex(&value.e, &value.n)
    }
}

impl From<RsaPublicKey> for PublicKeyHex {
    fn from(key: RsaPublicKey) -> Self {
        key.to_hex()
    }
}

impl fmt::Debug for RsaPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPublicKey")
            .field("bits", &self.bits())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

/// An RSA keypair owned by exactly one peer.
///
/// Deliberately not `Serialize` and not `Clone`: share it behind an `Arc`
/// when several protocol runs need it.
pub struct RsaKeyPair {
    public: RsaPublicKey,
    d: BigUint,
}

impl RsaKeyPair {
    /// Generate a fresh keypair with a modulus of `bits` bits.
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        if bits < MIN_RSA_BITS {
            return Err(KeyError::ModulusTooSmall { bits });
        }
        if bits > MAX_RSA_BITS {
            return Err(KeyError::ModulusTooLarge { bits });
        }
        let key = rsa::RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| KeyError::Generation(e.to_string()))?;

        Ok(Self {
            public: RsaPublicKey::new(key.e().clone(), key.n().clone()),
            d: key.d().clone(),
        })
    }

    /// Assemble a keypair from known components. Test vectors only.
    #[cfg(test)]
    pub(crate) fn from_components(e: BigUint, n: BigUint, d: BigUint) -> Self {
        Self {
            public: RsaPublicKey::new(e, n),
            d,
        }
    }

    /// The public half, safe to hand to anyone.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// `m^d mod n`. Rejects `m >= n`.
    pub fn raw_sign(&self, message: &BigUint) -> Result<BigUint, RsaError> {
        if message >= &self.public.n {
            return Err(RsaError::DomainError);
        }
        Ok(message.modpow(&self.d, &self.public.n))
    }
}

impl fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> RsaKeyPair {
        RsaKeyPair::generate(1024).expect("keygen")
    }

    #[test]
    fn test_raw_sign_then_verify_recovers_message() {
        let kp = keypair();
        let m = BigUint::from(0xC0FFEEu32);
        let s = kp.raw_sign(&m).unwrap();
        assert_eq!(kp.public_key().raw_verify(&s).unwrap(), m);
    }

    #[test]
    fn test_raw_sign_rejects_value_at_modulus() {
        let kp = keypair();
        let n = kp.public_key().n().clone();
        assert_eq!(kp.raw_sign(&n), Err(RsaError::DomainError));
    }

    #[test]
    fn test_raw_verify_rejects_out_of_range_signature() {
        let kp = keypair();
        let too_big = kp.public_key().n() + BigUint::from(1u32);
        assert_eq!(
            kp.public_key().raw_verify(&too_big),
            Err(RsaError::SignatureOutOfRange)
        );
    }

    #[test]
    fn test_generate_rejects_small_modulus() {
        assert!(matches!(
            RsaKeyPair::generate(256),
            Err(KeyError::ModulusTooSmall { bits: 256 })
        ));
    }

    #[test]
    fn test_public_key_json_shape() {
        let kp = keypair();
        let json = serde_json::to_value(kp.public_key()).unwrap();
        assert_eq!(json["e"], "10001");
        assert!(json["n"].as_str().unwrap().len() >= 255);

        let back: RsaPublicKey = serde_json::from_value(json).unwrap();
        assert_eq!(&back, kp.public_key());
    }

    #[test]
    fn test_public_key_rejects_non_hex() {
        let result: Result<RsaPublicKey, _> =
            serde_json::from_str(r#"{"e": "10001", "n": "xyz"}"#);
        assert!(result.is_err());

        let result: Result<RsaPublicKey, _> = serde_json::from_str(r#"{"e": "", "n": "ff"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(biguint_to_hex(&BigUint::from(255u32)), "ff");
        assert_eq!(biguint_from_hex("FF"), Some(BigUint::from(255u32)));
        assert_eq!(biguint_from_hex(""), None);
        assert_eq!(biguint_from_hex("g1"), None);
        assert_eq!(biguint_from_hex("+ab"), None);
        assert_eq!(biguint_from_hex("a_b"), None);
        assert_eq!(biguint_from_hex("0x"), None);
        assert_eq!(biguint_from_hex("0xff"), None);
        assert_eq!(biguint_from_hex(" ff"), None);
    }

    #[test]
    fn test_public_key_rejects_oversized_components() {
        let kp = keypair();
        let n = biguint_to_hex(kp.public_key().n());

        // Exponent as large as the modulus.
        assert!(matches!(
            RsaPublicKey::from_hex(&n, &n),
            Err(KeyError::InvalidEncoding(_))
        ));

        let huge_n = "f".repeat(MAX_RSA_BITS / 4 + 1);
        assert!(matches!(
            RsaPublicKey::from_hex("10001", &huge_n),
            Err(KeyError::ModulusTooLarge { .. })
        ));

        let at_limit = "f".repeat(MAX_RSA_BITS / 4);
        assert!(RsaPublicKey::from_hex("10001", &at_limit).is_ok());
    }

    #[test]
    fn test_generate_rejects_huge_modulus() {
        assert!(matches!(
            RsaKeyPair::generate(MAX_RSA_BITS + 8),
            Err(KeyError::ModulusTooLarge { .. })
        ));
    }

    #[test]
    fn test_debug_does_not_leak_private_exponent() {
        let kp = keypair();
        let rendered = format!("{kp:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&biguint_to_hex(&kp.d)));
    }
}

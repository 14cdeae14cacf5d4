//! # RSA Blind Signatures
//!
//! Lets a signer put its signature on a message it never sees.
//!
//! ```text
//!   requester                              signer
//!   m, r ← random, gcd(r, n) = 1
//!   b = m · r^e mod n   ───────────────►
//!                       ◄───────────────   s' = b^d mod n
//!   s = s' · r⁻¹ mod n
//!   check: s^e mod n == m
//! ```
//!
//! The blinding factor must stay with the requester; anyone holding it can
//! link the blinded request to the final signature.

use std::fmt;

use num_bigint_dig::{BigUint, ModInverse, RandBigInt, ToBigUint};
use rand::rngs::OsRng;

use super::keys::{RsaKeyPair, RsaPublicKey};
use super::signatures::{Signature, SignatureError};

/// The random factor `r` used to blind one message, kept with its inverse.
pub struct BlindingFactor {
    r: BigUint,
    r_inv: BigUint,
}

impl fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindingFactor(<redacted>)")
    }
}

/// Blind `message` (read as a big-endian integer) for `signer`.
///
/// Returns the blinded value to send and the factor needed to unblind the
/// answer.
///
/// # Errors
///
/// [`SignatureError::DomainError`] if the message integer is not below the
/// signer's modulus.
pub fn blind(
    signer: &RsaPublicKey,
    message: &[u8],
) -> Result<(BigUint, BlindingFactor), SignatureError> {
    let n = signer.n();
    let m = BigUint::from_bytes_be(message);
    if &m >= n {
        return Err(SignatureError::DomainError {
            digest: hex::encode(message),
        });
    }

    let one = BigUint::from(1u32);
    let mut rng = OsRng;
    let factor = loop {
        let r = rng.gen_biguint_below(n);
        if r <= one {
            continue;
        }
        // No inverse means r shares a factor with n; draw again.
        if let Some(r_inv) = r.clone().mod_inverse(n).and_then(|v| v.to_biguint()) {
            break BlindingFactor { r, r_inv };
        }
    };

    let blinded = (factor.r.modpow(signer.e(), n) * m) % n;
    Ok((blinded, factor))
}

/// Signer side: sign a blinded value as-is.
pub fn sign_blinded(signer: &RsaKeyPair, blinded: &BigUint) -> Result<Signature, SignatureError> {
    signer
        .raw_sign(blinded)
        .map(Signature::from_biguint)
        .map_err(|_| SignatureError::DomainError {
            digest: blinded.to_str_radix(16),
        })
}

/// Strip the blinding factor from a blind signature.
pub fn unblind(
    signer: &RsaPublicKey,
    blind_signature: &Signature,
    factor: &BlindingFactor,
) -> Result<Signature, SignatureError> {
    let n = signer.n();
    if blind_signature.as_biguint() >= n {
        return Err(SignatureError::OutOfRange);
    }
    Ok(Signature::from_biguint(
        (blind_signature.as_biguint() * &factor.r_inv) % n,
    ))
}

/// Recover the message integer from an (unblinded) signature and compare
/// it with `message`.
pub fn verify_message(signer: &RsaPublicKey, message: &[u8], signature: &Signature) -> bool {
    match signer.raw_verify(signature.as_biguint()) {
        Ok(m) => m == BigUint::from_bytes_be(message),
        Err(_) => false,
    }
}

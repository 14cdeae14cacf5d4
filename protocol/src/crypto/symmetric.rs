//! # AES-256-CBC Session Encryption
//!
//! The challenge Peer A sends to Peer B is the plaintext encrypted under a
//! session key that B does not have yet. B signs a receipt for the
//! ciphertext; only afterwards does the key go to the TTP, which publishes
//! it. That ordering is the whole point of the protocol, and it only needs
//! confidentiality from the cipher, so we use the same AES-256-CBC + PKCS#7
//! construction the counterparts speak.
//!
//! ## Key and IV handling
//!
//! - One [`SessionKey`] per client session, exported to hex exactly once
//!   per key disclosure.
//! - A fresh random [`Iv`] for every encryption. Reusing an IV under CBC
//!   leaks equality of plaintext prefixes.

use std::fmt;

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_IV_LENGTH, AES_KEY_LENGTH};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Errors that can occur during encryption/decryption.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymmetricError {
    #[error("invalid key: expected {AES_KEY_LENGTH} hex-encoded bytes")]
    InvalidKey,

    #[error("invalid IV: expected {AES_IV_LENGTH} hex-encoded bytes")]
    InvalidIv,

    #[error("decryption failed -- wrong key, wrong IV, or corrupted ciphertext")]
    DecryptFailed,
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// A 256-bit AES key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; AES_KEY_LENGTH]);

impl SessionKey {
    /// Generate a key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.0
    }

    /// Raw export, as disclosed to the TTP.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, SymmetricError> {
        let bytes = hex::decode(s).map_err(|_| SymmetricError::InvalidKey)?;
        let array: [u8; AES_KEY_LENGTH] =
            bytes.try_into().map_err(|_| SymmetricError::InvalidKey)?;
        Ok(Self(array))
    }
}

// Key bytes never go to logs.
impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// A CBC initialization vector.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; AES_IV_LENGTH]);

impl Iv {
    /// A fresh random IV.
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_IV_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; AES_IV_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; AES_IV_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, SymmetricError> {
        let bytes = hex::decode(s).map_err(|_| SymmetricError::InvalidIv)?;
        let array: [u8; AES_IV_LENGTH] = bytes.try_into().map_err(|_| SymmetricError::InvalidIv)?;
        Ok(Self(array))
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Encrypt / decrypt
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under `key` with a freshly generated IV.
///
/// Returns the IV together with the PKCS#7-padded ciphertext. The IV is
/// not secret but must travel with the key for decryption.
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> (Iv, Vec<u8>) {
    let iv = Iv::generate();
    let ciphertext = encrypt_with_iv(key, &iv, plaintext);
    (iv, ciphertext)
}

/// Encrypt under an explicit IV. Prefer [`encrypt`].
pub fn encrypt_with_iv(key: &SessionKey, iv: &Iv, plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.as_bytes().into(), iv.as_bytes().into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt data produced by [`encrypt`].
///
/// We don't distinguish "wrong key" from "corrupted ciphertext": both
/// surface as bad padding.
pub fn decrypt(key: &SessionKey, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>, SymmetricError> {
    Aes256CbcDec::new(key.as_bytes().into(), iv.as_bytes().into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| SymmetricError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SessionKey {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        SessionKey::from_bytes(key)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let plaintext = b"the quick brown fox jumps over the lazy dog";

        let (iv, ciphertext) = encrypt(&key, plaintext);
        assert_eq!(decrypt(&key, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_ciphertext_is_padded_to_block() {
        let key = test_key();
        let (_, empty) = encrypt(&key, b"");
        assert_eq!(empty.len(), 16);

        // A full block of input gets a full block of padding.
        let (_, one_block) = encrypt(&key, &[0x41; 16]);
        assert_eq!(one_block.len(), 32);
    }

    #[test]
    fn test_known_answer() {
        // NIST SP 800-38A F.2.5, CBC-AES256 first block, followed by the
        // PKCS#7 padding block.
        let key = SessionKey::from_hex(
            "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4",
        )
        .unwrap();
        let iv = Iv::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        let plaintext = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let ciphertext = encrypt_with_iv(&key, &iv, &plaintext);
        assert_eq!(
            hex::encode(&ciphertext[..16]),
            "f58c4c04d6e5f1ba779eabfb5f7bfbd6"
        );
    }

    #[test]
    fn test_unique_ivs() {
        let key = test_key();
        let (iv1, c1) = encrypt(&key, b"message");
        let (iv2, c2) = encrypt(&key, b"message");
        assert_ne!(iv1, iv2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_wrong_key_fails_or_garbles() {
        let key = test_key();
        let (iv, ciphertext) = encrypt(&key, b"secret");

        let mut wrong = *key.as_bytes();
        wrong[0] ^= 0xFF;
        let result = decrypt(&SessionKey::from_bytes(wrong), &iv, &ciphertext);

        // CBC has no authentication: a wrong key usually breaks the padding,
        // but when it doesn't the output is still not the plaintext.
        assert_ne!(result, Ok(b"secret".to_vec()));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = test_key();
        let (iv, ciphertext) = encrypt(&key, b"secret message here");
        assert_eq!(
            decrypt(&key, &iv, &ciphertext[..ciphertext.len() - 1]),
            Err(SymmetricError::DecryptFailed)
        );
    }

    #[test]
    fn test_hex_parsing() {
        let key = test_key();
        assert_eq!(SessionKey::from_hex(&key.to_hex()).unwrap(), key);
        assert_eq!(SessionKey::from_hex("abcd"), Err(SymmetricError::InvalidKey));
        assert_eq!(Iv::from_hex("zz"), Err(SymmetricError::InvalidIv));
    }

    #[test]
    fn test_debug_redacts_key() {
        assert_eq!(format!("{:?}", test_key()), "SessionKey(<redacted>)");
    }
}

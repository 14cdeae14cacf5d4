//! Proof construction and checking.
//!
//! A proof is a signature over [`MessageBody::digest`]. Checking one means
//! recovering the signed digest with the signer's public key and comparing
//! it to the digest we compute from the body ourselves.

use thiserror::Error;

use crate::crypto::{
    recover_digest, sign_digest, Digest, RsaKeyPair, RsaPublicKey, Signature, SignatureError,
};

use super::error::NrError;
use super::message::{Envelope, MessageBody};

/// Why a proof did not check out.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("signature cannot be recovered: {0}")]
    Signature(#[from] SignatureError),

    #[error("recovered digest {recovered} does not match body digest {expected}")]
    Mismatch { expected: Digest, recovered: Digest },
}

/// Sign `body` with `keypair`.
pub fn prove(keypair: &RsaKeyPair, body: &MessageBody) -> Result<Signature, NrError> {
    Ok(sign_digest(keypair, &body.digest())?)
}

/// Check that `signature` is `signer`'s proof over `body`.
///
/// Returns the verified digest.
pub fn check_proof(
    signer: &RsaPublicKey,
    body: &MessageBody,
    signature: &Signature,
) -> Result<Digest, ProofError> {
    let expected = body.digest();
    let recovered = recover_digest(signer, signature)?;
    if recovered != expected {
        return Err(ProofError::Mismatch {
            expected,
            recovered,
        });
    }
    Ok(expected)
}

impl Envelope {
    /// Sign `body` and wrap it with our public key.
    pub fn seal(keypair: &RsaKeyPair, body: MessageBody) -> Result<Self, NrError> {
        let signature = prove(keypair, &body)?;
        Ok(Self {
            body,
            signature,
            sender: keypair.public_key().clone(),
        })
    }

    /// Check the envelope's signature against its own body and sender.
    pub fn check(&self) -> Result<Digest, ProofError> {
        check_proof(&self.sender, &self.body, &self.signature)
    }
}

//! # Evidence Bundle
//!
//! What a completed run leaves behind: four signed bodies that together
//! prove A sent the ciphertext, B received it, A handed the key to the
//! TTP, and the TTP published it.
//!
//! The bundle is self-contained. A disputing third party needs nothing but
//! the JSON to re-check every signature ([`Evidence::verify`]) and to
//! decrypt what B acknowledged ([`Evidence::reveal`]).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::symmetric::{self, Iv, SessionKey};
use crate::crypto::{Digest, RsaPublicKey, Signature};

use super::error::NrError;
use super::message::{CiphertextBody, Envelope, KeyBody, MessageBody};
use super::proof::{check_proof, ProofError};

/// One signed body and the key that signed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProof {
    pub body: MessageBody,
    pub signature: Signature,
    pub signer: RsaPublicKey,
}

impl SignedProof {
    /// Recompute the body digest and compare it to the recovered one.
    pub fn check(&self) -> Result<Digest, ProofError> {
        check_proof(&self.signer, &self.body, &self.signature)
    }
}

impl From<Envelope> for SignedProof {
    fn from(envelope: Envelope) -> Self {
        Self {
            body: envelope.body,
            signature: envelope.signature,
            signer: envelope.sender,
        }
    }
}

impl From<SignedProof> for Envelope {
    fn from(proof: SignedProof) -> Self {
        Self {
            body: proof.body,
            signature: proof.signature,
            sender: proof.signer,
        }
    }
}

/// The four proofs of one completed run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub run_id: Uuid,
    /// A's signature over the type 1 challenge.
    pub origin: SignedProof,
    /// B's signature over the type 2 receipt.
    pub reception: SignedProof,
    /// A's signature over the type 3 key disclosure.
    pub key_origin: SignedProof,
    /// The TTP's signature over the type 4 key publication.
    pub key_publication: SignedProof,
}

impl Evidence {
    /// Re-check all four signatures and the links between the bodies.
    pub fn verify(&self) -> Result<(), NrError> {
        for (name, proof) in [
            ("proof of origin", &self.origin),
            ("proof of reception", &self.reception),
            ("proof of key origin", &self.key_origin),
            ("proof of key publication", &self.key_publication),
        ] {
            proof
                .check()
                .map_err(|e| NrError::InvalidEvidence(format!("{name}: {e}")))?;
        }

        let challenge = self.challenge()?;
        let receipt = match &self.reception.body {
            MessageBody::Receipt(b) => b,
            other => return Err(wrong_type("proof of reception", 2, other)),
        };
        let disclosure = self.disclosure()?;
        let publication = self.publication()?;

        if self.origin.signer != self.key_origin.signer {
            return Err(NrError::InvalidEvidence(
                "challenge and key disclosure were signed by different keys".to_string(),
            ));
        }
        if !receipt.msg.eq_ignore_ascii_case(&challenge.msg) {
            return Err(NrError::InvalidEvidence(
                "receipt acknowledges a different ciphertext".to_string(),
            ));
        }
        if !publication.msg.eq_ignore_ascii_case(&disclosure.msg)
            || !publication.iv.eq_ignore_ascii_case(&disclosure.iv)
        {
            return Err(NrError::InvalidEvidence(
                "publication does not match the disclosed key".to_string(),
            ));
        }
        Ok(())
    }

    /// Verify the bundle, then decrypt the acknowledged ciphertext with the
    /// published key.
    pub fn reveal(&self) -> Result<Vec<u8>, NrError> {
        self.verify()?;
        let publication = self.publication()?;
        let key = SessionKey::from_hex(&publication.msg)?;
        let iv = Iv::from_hex(&publication.iv)?;
        let ciphertext = hex::decode(&self.challenge()?.msg)
            .map_err(|e| NrError::InvalidEvidence(format!("ciphertext is not hex: {e}")))?;
        Ok(symmetric::decrypt(&key, &iv, &ciphertext)?)
    }

    /// B's public key, as recorded in the receipt.
    pub fn peer_key(&self) -> &RsaPublicKey {
        &self.reception.signer
    }

    /// The TTP's public key, as recorded in the publication.
    pub fn ttp_key(&self) -> &RsaPublicKey {
        &self.key_publication.signer
    }

    fn challenge(&self) -> Result<&CiphertextBody, NrError> {
        match &self.origin.body {
            MessageBody::Challenge(b) => Ok(b),
            other => Err(wrong_type("proof of origin", 1, other)),
        }
    }

    fn disclosure(&self) -> Result<&KeyBody, NrError> {
        match &self.key_origin.body {
            MessageBody::KeyDisclosure(b) => Ok(b),
            other => Err(wrong_type("proof of key origin", 3, other)),
        }
    }

    fn publication(&self) -> Result<&KeyBody, NrError> {
        match &self.key_publication.body {
            MessageBody::KeyPublication(b) => Ok(b),
            other => Err(wrong_type("proof of key publication", 4, other)),
        }
    }
}

fn wrong_type(name: &str, expected: u8, got: &MessageBody) -> NrError {
    NrError::InvalidEvidence(format!(
        "{name} carries a type {} body, expected type {expected}",
        got.type_tag()
    ))
}

//! Error types for the non-repudiation exchange.
//!
//! Every engine operation that can fail returns an [`NrError`]. A failed
//! run also records the [`ProtocolStep`] it was in, so callers can tell a
//! forged receipt from a TTP that never answered.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{SignatureError, SymmetricError};
use crate::transport::TransportError;

/// The point of the exchange a run had reached, named after the proof
/// being produced or awaited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolStep {
    /// Encrypting the plaintext and signing the type 1 challenge.
    Origin,
    /// Exchanging with Peer B and checking its type 2 receipt.
    Reception,
    /// Signing the type 3 key disclosure.
    KeyOrigin,
    /// Exchanging with the TTP and checking its type 4 publication.
    KeyPublication,
}

impl fmt::Display for ProtocolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Origin => "proof of origin",
            Self::Reception => "proof of reception",
            Self::KeyOrigin => "proof of key origin",
            Self::KeyPublication => "proof of key publication",
        })
    }
}

/// Errors that can occur while running or auditing the exchange.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NrError {
    /// A wire payload is missing fields, carries non-hex values, or uses
    /// an unknown body `type`.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Peer B's reply does not prove reception of our ciphertext.
    #[error("bad proof of reception: {0}")]
    BadReceptionProof(String),

    /// The TTP's reply does not prove publication of our key.
    #[error("bad proof of key publication: {0}")]
    BadPublicationProof(String),

    /// A received timestamp lies outside the freshness window.
    #[error("stale timestamp in {step}: {timestamp} is more than {window_ms}ms away from {now}")]
    StaleTimestamp {
        /// Step whose reply carried the timestamp.
        step: ProtocolStep,
        /// The timestamp we received (Unix ms).
        timestamp: u64,
        /// Our clock when we checked it (Unix ms).
        now: u64,
        /// Accepted distance in either direction.
        window_ms: u64,
    },

    /// The digest to sign does not fit below our modulus.
    #[error("signing domain error: {0}")]
    Domain(String),

    /// A counterpart did not answer within the step timeout.
    #[error("{step} timed out after {timeout_ms}ms")]
    Timeout {
        /// Step that was waiting.
        step: ProtocolStep,
        /// Configured bound in milliseconds.
        timeout_ms: u64,
    },

    /// The transport failed. Passed through unchanged.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Key generation, encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// An evidence bundle failed offline verification.
    #[error("invalid evidence: {0}")]
    InvalidEvidence(String),
}

impl From<SignatureError> for NrError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::DomainError { .. } => Self::Domain(err.to_string()),
            other => Self::Crypto(other.to_string()),
        }
    }
}

impl From<SymmetricError> for NrError {
    fn from(err: SymmetricError) -> Self {
        Self::Crypto(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_maps_to_domain() {
        let err: NrError = SignatureError::DomainError {
            digest: "ff".to_string(),
        }
        .into();
        assert!(matches!(err, NrError::Domain(_)));

        let err: NrError = SignatureError::OutOfRange.into();
        assert!(matches!(err, NrError::Crypto(_)));
    }

    #[test]
    fn test_stale_timestamp_message_names_step() {
        let err = NrError::StaleTimestamp {
            step: ProtocolStep::Reception,
            timestamp: 1,
            now: 600_001,
            window_ms: 300_000,
        };
        let rendered = err.to_string();
        assert!(rendered.contains("proof of reception"));
        assert!(rendered.contains("300000ms"));
    }

    #[test]
    fn test_transport_error_passes_through() {
        let inner = TransportError::Closed("ttp".to_string());
        let err = NrError::from(inner.clone());
        assert_eq!(err, NrError::Transport(inner));
    }
}

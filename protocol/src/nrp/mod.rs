//! # Non-Repudiation Protocol (NRP)
//!
//! The exchange Peer A runs against Peer B and the TTP. Four signed
//! bodies, four proofs:
//!
//! ```text
//!   ┌──────────┐              ┌──────────┐              ┌──────────┐
//!   │  Peer A  │              │  Peer B  │              │   TTP    │
//!   └────┬─────┘              └────┬─────┘              └────┬─────┘
//!        │                         │                         │
//!        │ 1. Challenge  (c)       │                         │
//!        ├────────────────────────►│                         │
//!        │    proof of origin      │                         │
//!        │                         │                         │
//!        │ 2. Receipt    (c)       │                         │
//!        │◄────────────────────────┤                         │
//!        │    proof of reception   │                         │
//!        │                         │                         │
//!        │ 3. KeyDisclosure (k, iv)                          │
//!        ├──────────────────────────────────────────────────►│
//!        │    proof of key origin                            │
//!        │                                                   │
//!        │ 4. KeyPublication (k, iv)                         │
//!        │◄──────────────────────────────────────────────────┤
//!        │    proof of key publication                       │
//!        │                                                   │
//!        │          "key" channel (pub/sub, advisory)        │
//!        │◄ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─┤
//! ```
//!
//! ### Bodies (`message.rs`)
//! A numeric `type` tag on the wire, an exhaustive [`MessageBody`] enum in
//! Rust. Envelopes carry the body, the signature and the signer's key.
//!
//! ### Proofs (`proof.rs`)
//! RSA over the SHA-256 of the body's canonical JSON. Checked by
//! recovering the digest and comparing it to our own.
//!
//! ### Engine (`engine.rs`)
//! `Idle → AwaitingReception → AwaitingKeyPublication → Completed`, with
//! `Failed` reachable from every non-terminal state.
//!
//! ### Evidence (`evidence.rs`)
//! The four proofs of a completed run, verifiable offline.

pub mod engine;
pub mod evidence;
pub mod message;
pub mod proof;
pub mod timestamp;

mod error;

pub use engine::{NonRepudiationClient, ProtocolRun, RunState};
pub use error::{NrError, ProtocolStep};
pub use evidence::{Evidence, SignedProof};
pub use message::{decode, encode, CiphertextBody, Envelope, KeyBody, MessageBody};
pub use proof::{check_proof, prove, ProofError};
pub use timestamp::{check_timestamp, check_timestamp_at, now_millis};

// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Non-Repudiation Protocol: Core Library
//!
//! Peer A's half of a three-party fair exchange. A sends Peer B an
//! encrypted message, B signs for what it received, and only then does A
//! hand the decryption key to a Trusted Third Party that publishes it.
//! Every step is signed, so afterwards nobody can credibly claim they
//! didn't send, didn't receive, or didn't publish.
//!
//! ## Architecture
//!
//! - **crypto**: SHA-256 canonical digests, textbook RSA proofs, blind
//!   signatures, AES-256-CBC. Primitive math comes from audited crates.
//! - **nrp**: The protocol itself: message bodies, envelopes, the run
//!   state machine, and the evidence bundle it produces.
//! - **transport**: The seams to Peer B and the TTP (request/response and
//!   publish/subscribe), with HTTP and WebSocket implementations.
//! - **config**: Protocol constants and the runtime client configuration.
//!
//! ## Design Philosophy
//!
//! 1. A proof is kept, not just checked. Signatures are evidence.
//! 2. Verification is recover-then-compare against a digest we computed.
//! 3. Every network step has a deadline; nothing retries behind your back.

pub mod config;
pub mod crypto;
pub mod nrp;
pub mod transport;

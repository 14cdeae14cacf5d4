//! # Protocol Configuration & Constants
//!
//! Every magic number of the non-repudiation exchange lives here, next to
//! the runtime [`ClientConfig`] that points Peer A at its counterparts.
//!
//! Constants describe the protocol itself (party labels, key sizes, the
//! freshness window). `ClientConfig` describes one deployment: where Peer B
//! and the TTP live, how long to wait for them, and how big our RSA modulus
//! should be. It loads from TOML and is validated before anything uses it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Party Labels
// ---------------------------------------------------------------------------

/// Label this client puts in the `src` field of everything it sends.
pub const PEER_A: &str = "A";

/// Label of the message recipient.
pub const PEER_B: &str = "B";

/// Label of the trusted third party.
pub const TTP: &str = "TTP";

/// Pub/sub channel on which the TTP announces published keys.
pub const KEY_CHANNEL: &str = "key";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Default RSA modulus size. Same as the browser client this protocol grew
/// out of; peers reject nothing smaller than the digest anyway.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Smallest modulus we agree to generate. A SHA-256 digest must fit below
/// `n`, so anything under 512 bits is pointless.
pub const MIN_RSA_BITS: usize = 512;

/// Largest modulus we generate or accept from a peer.
pub const MAX_RSA_BITS: usize = 8192;

/// AES-256-CBC key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// CBC initialization vector length (one AES block).
pub const AES_IV_LENGTH: usize = 16;

/// SHA-256 output length in bytes.
pub const DIGEST_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Maximum distance between a received timestamp and our clock, in either
/// direction. Five minutes covers clock skew without turning old proofs
/// into replay material.
pub const FRESHNESS_WINDOW_MS: u64 = 300_000;

/// Upper bound for a single request/response step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the notification broadcast buffer. Slow subscribers lose
/// the oldest frames first.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Peer B's non-repudiation endpoint.
pub const DEFAULT_PEER_B_URL: &str = "http://localhost:50000/nr";

/// The TTP's key-disclosure endpoint.
pub const DEFAULT_TTP_URL: &str = "http://localhost:50001/nr";

/// The TTP's publish/subscribe WebSocket.
pub const DEFAULT_TTP_PUBSUB_URL: &str = "ws://localhost:50001";

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Deployment settings for Peer A.
///
/// Every field has a default, so a TOML file only needs the keys it wants
/// to change:
///
/// ```toml
/// peer_b_url = "http://10.0.0.2:50000/nr"
/// step_timeout_ms = 5000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where challenges (type 1) are posted.
    pub peer_b_url: String,
    /// Where key disclosures (type 3) are posted.
    pub ttp_url: String,
    /// The TTP notification service.
    pub ttp_pubsub_url: String,
    /// RSA modulus size for this session's keypair.
    pub rsa_bits: usize,
    /// Timeout for each network step, in milliseconds.
    pub step_timeout_ms: u64,
    /// Accepted clock distance for received timestamps, in milliseconds.
    pub freshness_window_ms: u64,
    /// Reject responses signed by a key other than the first one seen
    /// for that peer.
    pub pin_peer_keys: bool,
    /// Subscribe to the TTP's `key` channel before running the exchange.
    pub watch_key_channel: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_b_url: DEFAULT_PEER_B_URL.to_string(),
            ttp_url: DEFAULT_TTP_URL.to_string(),
            ttp_pubsub_url: DEFAULT_TTP_PUBSUB_URL.to_string(),
            rsa_bits: DEFAULT_RSA_BITS,
            step_timeout_ms: DEFAULT_STEP_TIMEOUT.as_millis() as u64,
            freshness_window_ms: FRESHNESS_WINDOW_MS,
            pin_peer_keys: false,
            watch_key_channel: true,
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check invariants that the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&self.rsa_bits) {
            return Err(ConfigError::Invalid(format!(
                "rsa_bits must be between {MIN_RSA_BITS} and {MAX_RSA_BITS}, got {}",
                self.rsa_bits
            )));
        }
        if self.step_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "step_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.freshness_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "freshness_window_ms must be > 0".to_string(),
            ));
        }
        for (name, url, schemes) in [
            ("peer_b_url", &self.peer_b_url, ["http://", "https://"]),
            ("ttp_url", &self.ttp_url, ["http://", "https://"]),
            ("ttp_pubsub_url", &self.ttp_pubsub_url, ["ws://", "wss://"]),
        ] {
            if !schemes.iter().any(|s| url.starts_with(s)) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must start with {} or {}, got {url:?}",
                    schemes[0], schemes[1]
                )));
            }
        }
        Ok(())
    }

    /// Step timeout as a `Duration`.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

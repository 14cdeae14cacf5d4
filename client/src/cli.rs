//! # CLI Interface
//!
//! Command-line structure for `nr-client`, using `clap` derive. Every
//! connection setting can also come from an `NR_*` environment variable or
//! a TOML file passed with `--config`. Command-line values win over the
//! file.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use nr_protocol::config::{ClientConfig, ConfigError};

/// Peer A of the non-repudiation protocol.
///
/// Sends a message to Peer B so that neither side can later deny the
/// exchange, with a trusted third party publishing the decryption key.
#[derive(Parser, Debug)]
#[command(
    name = "nr-client",
    about = "Non-repudiation protocol client (Peer A)",
    version,
    propagate_version = true
)]
pub struct NrClientCli {
    /// Log format: pretty or json.
    #[arg(long, global = true, env = "NR_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Log level for nr_client and nr_protocol when RUST_LOG is unset.
    #[arg(long, global = true, env = "NR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full exchange for one message and print the evidence bundle.
    Send(SendArgs),
    /// Subscribe to the TTP's key channel and print every notification.
    Watch(WatchArgs),
    /// Check an evidence bundle offline and print the message it proves.
    Verify(VerifyArgs),
    /// Generate an RSA keypair and print its public half.
    Keygen(KeygenArgs),
    /// Obtain a blind signature from a signing service.
    BlindSign(BlindSignArgs),
    /// List secret key slices, or submit slices for recombination.
    SecretShare(SecretShareArgs),
    /// Print version information and exit.
    Version,
}

/// Connection settings shared by the networked subcommands.
#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// TOML configuration file.
    #[arg(long, short = 'c', env = "NR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Peer B's protocol endpoint.
    #[arg(long, env = "NR_PEER_B_URL")]
    pub peer_b_url: Option<String>,

    /// The TTP's protocol endpoint.
    #[arg(long, env = "NR_TTP_URL")]
    pub ttp_url: Option<String>,

    /// The TTP's WebSocket notification service.
    #[arg(long, env = "NR_TTP_PUBSUB_URL")]
    pub ttp_pubsub_url: Option<String>,

    /// Per-step network timeout in milliseconds.
    #[arg(long, env = "NR_STEP_TIMEOUT_MS")]
    pub step_timeout_ms: Option<u64>,

    /// RSA modulus size for the session keypair.
    #[arg(long, env = "NR_RSA_BITS")]
    pub rsa_bits: Option<usize>,

    /// Reject replies signed by a different key than the first seen per peer.
    #[arg(long, env = "NR_PIN_PEER_KEYS")]
    pub pin_peer_keys: bool,
}

impl ConnectionArgs {
    /// The file configuration (or defaults) with command-line overrides
    /// applied, validated.
    pub fn resolve(&self) -> Result<ClientConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        if let Some(url) = &self.peer_b_url {
            config.peer_b_url = url.clone();
        }
        if let Some(url) = &self.ttp_url {
            config.ttp_url = url.clone();
        }
        if let Some(url) = &self.ttp_pubsub_url {
            config.ttp_pubsub_url = url.clone();
        }
        if let Some(ms) = self.step_timeout_ms {
            config.step_timeout_ms = ms;
        }
        if let Some(bits) = self.rsa_bits {
            config.rsa_bits = bits;
        }
        if self.pin_peer_keys {
            config.pin_peer_keys = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// The plaintext to send.
    #[arg(long, short = 'm', conflicts_with = "file")]
    pub message: Option<String>,

    /// Read the plaintext from a file instead.
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Write the evidence bundle here as well as to stdout.
    #[arg(long, short = 'o')]
    pub evidence_out: Option<PathBuf>,

    /// Also announce the key disclosure on the TTP's key channel.
    #[arg(long)]
    pub publish: bool,

    /// Do not subscribe to the TTP's key channel during the exchange.
    #[arg(long, env = "NR_NO_WATCH")]
    pub no_watch: bool,
}

impl SendArgs {
    /// The resolved connection settings with `--no-watch` applied.
    pub fn config(&self) -> Result<ClientConfig, ConfigError> {
        let mut config = self.connection.resolve()?;
        if self.no_watch {
            config.watch_key_channel = false;
        }
        Ok(config)
    }
}

#[derive(Parser, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Channel to subscribe to.
    #[arg(long, default_value = nr_protocol::config::KEY_CHANNEL)]
    pub channel: String,
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Evidence bundle written by `send`.
    pub evidence: PathBuf,

    /// Only check the proofs; do not decrypt.
    #[arg(long)]
    pub no_reveal: bool,
}

#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// RSA modulus size in bits.
    #[arg(long, env = "NR_RSA_BITS", default_value_t = nr_protocol::config::DEFAULT_RSA_BITS)]
    pub bits: usize,
}

#[derive(Parser, Debug)]
pub struct BlindSignArgs {
    /// Base URL of the signing service (serves `/pubKey` and `/sign`).
    #[arg(long, env = "NR_SIGNER_URL", default_value = "http://localhost:50000")]
    pub signer_url: String,

    /// The message to have signed.
    #[arg(long, short = 'm')]
    pub message: String,
}

#[derive(Parser, Debug)]
pub struct SecretShareArgs {
    /// Base URL of the secret-sharing service (serves `/ss/...`).
    #[arg(long, env = "NR_SECRET_SHARING_URL", default_value = "http://localhost:50000")]
    pub service_url: String,

    /// Slice to submit. Repeat to submit several in order; without any,
    /// the available slices are listed.
    #[arg(long = "combine", value_name = "SLICE")]
    pub combine: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn verify_cli_structure() {
        NrClientCli::command().debug_assert();
    }

    #[test]
    fn test_send_args_parse() {
        let cli = NrClientCli::try_parse_from([
            "nr-client",
            "send",
            "-m",
            "hello",
            "--peer-b-url",
            "http://10.0.0.2:50000/nr",
            "--step-timeout-ms",
            "5000",
            "--publish",
        ])
        .unwrap();
        match cli.command {
            Commands::Send(args) => {
                assert_eq!(args.message.as_deref(), Some("hello"));
                assert!(args.publish);
                let config = args.config().unwrap();
                assert_eq!(config.peer_b_url, "http://10.0.0.2:50000/nr");
                assert_eq!(config.step_timeout_ms, 5000);
                assert!(config.watch_key_channel);
            }
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn test_no_watch_disables_key_channel() {
        let cli =
            NrClientCli::try_parse_from(["nr-client", "send", "-m", "hi", "--no-watch"]).unwrap();
        match cli.command {
            Commands::Send(args) => assert!(!args.config().unwrap().watch_key_channel),
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn test_secret_share_collects_slices() {
        let cli = NrClientCli::try_parse_from([
            "nr-client",
            "secret-share",
            "--combine",
            "01ab",
            "--combine",
            "02cd",
        ])
        .unwrap();
        match cli.command {
            Commands::SecretShare(args) => assert_eq!(args.combine, vec!["01ab", "02cd"]),
            other => panic!("expected secret-share, got {other:?}"),
        }
    }

    #[test]
    fn test_message_and_file_conflict() {
        assert!(NrClientCli::try_parse_from([
            "nr-client",
            "send",
            "-m",
            "hi",
            "-f",
            "msg.txt"
        ])
        .is_err());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ttp_url = \"http://ttp.example:50001/nr\"").unwrap();
        writeln!(file, "step_timeout_ms = 1000").unwrap();

        let args = ConnectionArgs {
            config: Some(file.path().to_path_buf()),
            step_timeout_ms: Some(2500),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.ttp_url, "http://ttp.example:50001/nr");
        assert_eq!(config.step_timeout_ms, 2500);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = ConnectionArgs {
            ttp_pubsub_url: Some("http://not-a-websocket".to_string()),
            ..Default::default()
        };
        assert!(args.resolve().is_err());
    }
}

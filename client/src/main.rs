// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # nr-client
//!
//! Entry point for the Peer A binary. Parses the command line, sets up
//! logging, and dispatches to one of:
//!
//! - `send`       run the exchange and print the evidence bundle
//! - `watch`      follow the TTP's key channel
//! - `verify`     check an evidence bundle offline
//! - `keygen`     generate and print an RSA public key
//! - `blind-sign` get a blind signature from a signing service
//! - `secret-share` list or recombine secret key slices
//! - `version`    print build information

mod cli;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use nr_protocol::config::KEY_CHANNEL;
use nr_protocol::crypto::RsaKeyPair;
use nr_protocol::nrp::{Envelope, Evidence, NonRepudiationClient};
use nr_protocol::transport::{
    pubsub, HttpPeerChannel, NotificationSource, PubSubClient, SecretSharingClient,
    SigningServiceClient,
};

use cli::{Commands, NrClientCli};
use logging::LogFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = NrClientCli::parse();
    logging::init_logging(
        &logging::default_directive(&cli.log_level),
        LogFormat::from_str_lossy(&cli.log_format),
    );

    match cli.command {
        Commands::Send(args) => send(args).await,
        Commands::Watch(args) => watch(args).await,
        Commands::Verify(args) => verify(args),
        Commands::Keygen(args) => keygen(args),
        Commands::BlindSign(args) => blind_sign(args).await,
        Commands::SecretShare(args) => secret_share(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Runs one exchange against Peer B and the TTP.
async fn send(args: cli::SendArgs) -> Result<()> {
    let config = args.config().context("invalid client configuration")?;

    let plaintext = match (&args.message, &args.file) {
        (Some(message), _) => message.clone().into_bytes(),
        (None, Some(path)) => std::fs::read(path)
            .with_context(|| format!("failed to read message from {}", path.display()))?,
        (None, None) => bail!("nothing to send: pass --message or --file"),
    };

    tracing::info!(
        peer_b = %config.peer_b_url,
        ttp = %config.ttp_url,
        bytes = plaintext.len(),
        "starting exchange"
    );

    let peer_b = HttpPeerChannel::new(config.peer_b_url.clone())?;
    let ttp = HttpPeerChannel::new(config.ttp_url.clone())?;
    let client = NonRepudiationClient::generate(&config, peer_b, ttp)
        .context("failed to set up session keys")?;

    if config.watch_key_channel {
        if let Err(e) = client.subscribe_key_channel(&config.ttp_pubsub_url).await {
            tracing::warn!(error = %e, "key channel unavailable, continuing without it");
        }
    }

    let evidence = client
        .send_message(&plaintext)
        .await
        .context("exchange failed")?;

    tracing::info!(
        run_id = %evidence.run_id,
        peer_b = %evidence.peer_key().fingerprint(),
        ttp = %evidence.ttp_key().fingerprint(),
        notifications = client.notifications_seen(),
        "exchange completed"
    );

    let json = serde_json::to_string_pretty(&evidence)?;
    if let Some(path) = &args.evidence_out {
        std::fs::write(path, &json)
            .with_context(|| format!("failed to write evidence to {}", path.display()))?;
        tracing::info!(path = %path.display(), "evidence written");
    }
    println!("{json}");

    if args.publish {
        let disclosure = Envelope::from(evidence.key_origin.clone());
        pubsub::publish(&config.ttp_pubsub_url, KEY_CHANNEL, disclosure.to_value())
            .await
            .context("failed to publish key disclosure")?;
    }

    Ok(())
}

/// Prints every frame on the key channel until Ctrl+C.
async fn watch(args: cli::WatchArgs) -> Result<()> {
    let config = args
        .connection
        .resolve()
        .context("invalid client configuration")?;

    let subscription = PubSubClient::connect(&config.ttp_pubsub_url, &args.channel)
        .await
        .with_context(|| format!("failed to subscribe at {}", config.ttp_pubsub_url))?;
    let mut rx = subscription.subscribe();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(notification) => {
                    println!("{}", serde_json::to_string(&notification.payload)?);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "dropped notifications");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("notification service closed the connection");
                    break;
                }
            },
            _ = signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

/// Re-checks a stored evidence bundle and prints the proven plaintext.
fn verify(args: cli::VerifyArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.evidence)
        .with_context(|| format!("failed to read {}", args.evidence.display()))?;
    let evidence: Evidence =
        serde_json::from_str(&text).context("file is not an evidence bundle")?;

    if args.no_reveal {
        evidence.verify().context("evidence does not verify")?;
        println!("evidence for run {} verifies", evidence.run_id);
        return Ok(());
    }

    let plaintext = evidence.reveal().context("evidence does not verify")?;
    tracing::info!(run_id = %evidence.run_id, "evidence verified");
    match String::from_utf8(plaintext) {
        Ok(text) => println!("{text}"),
        Err(e) => println!("{}", hex::encode(e.into_bytes())),
    }
    Ok(())
}

fn keygen(args: cli::KeygenArgs) -> Result<()> {
    let keypair = RsaKeyPair::generate(args.bits).context("key generation failed")?;
    let public = keypair.public_key();
    tracing::info!(fingerprint = %public.fingerprint(), bits = public.bits(), "keypair generated");
    println!("{}", serde_json::to_string_pretty(&public.to_hex())?);
    Ok(())
}

async fn blind_sign(args: cli::BlindSignArgs) -> Result<()> {
    let signer = SigningServiceClient::new(args.signer_url.clone())?;
    let (key, signature) = signer
        .blind_sign(args.message.as_bytes())
        .await
        .with_context(|| format!("blind signing at {} failed", args.signer_url))?;
    tracing::info!(signer = %key.fingerprint(), "blind signature verified");
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "message": args.message,
            "signature": signature.to_hex(),
            "pubKey": key.to_hex(),
        }))?
    );
    Ok(())
}

async fn secret_share(args: cli::SecretShareArgs) -> Result<()> {
    let service = SecretSharingClient::new(args.service_url.clone())?;

    if args.combine.is_empty() {
        let slices = service
            .slices()
            .await
            .with_context(|| format!("failed to fetch slices from {}", args.service_url))?;
        tracing::info!(count = slices.len(), "slices fetched");
        for slice in slices {
            println!("{slice}");
        }
        return Ok(());
    }

    let mut recovered = String::new();
    for slice in &args.combine {
        recovered = service
            .combine(slice)
            .await
            .with_context(|| format!("failed to submit slice to {}", args.service_url))?;
    }
    if recovered.is_empty() {
        tracing::warn!(submitted = args.combine.len(), "not enough slices to recover the secret");
    } else {
        println!("{recovered}");
    }
    Ok(())
}

fn print_version() {
    println!("nr-client {}", env!("CARGO_PKG_VERSION"));
    println!("rustc     {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

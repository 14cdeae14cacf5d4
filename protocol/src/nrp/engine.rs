//! # Protocol Engine
//!
//! [`NonRepudiationClient`] drives one run of the exchange per call to
//! [`run`](NonRepudiationClient::run) or
//! [`send_message`](NonRepudiationClient::send_message):
//!
//! ```text
//!   Idle ──encrypt, sign type 1──► AwaitingReception
//!        ──B's type 2 checks out──► AwaitingKeyPublication
//!        ──TTP's type 4 checks out──► Completed
//!
//!   any non-terminal state ──error──► Failed { step, error }
//! ```
//!
//! Each run is a single sequential task with one suspension point per
//! outbound request, and every request is bounded by the configured step
//! timeout. Runs share the keypair, the session key and the peer-key cache;
//! everything else lives in the [`ProtocolRun`] that the call returns.
//!
//! A reply is accepted only after, in this order:
//!
//! 1. it decodes as an envelope,
//! 2. its signature recovers the digest of its own body under the key it
//!    carries,
//! 3. its body is the expected type and acknowledges exactly what we sent,
//! 4. its timestamp is fresh,
//! 5. its key agrees with the cached key for that party (when pinning).
//!
//! Nothing is retried. A caller that wants another attempt starts a new run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, KEY_CHANNEL, PEER_A, PEER_B, TTP};
use crate::crypto::symmetric::{self, Iv, SessionKey};
use crate::crypto::{RsaKeyPair, RsaPublicKey};
use crate::transport::{NotificationSource, PeerChannel, PubSubClient, TransportError};

use super::error::{NrError, ProtocolStep};
use super::evidence::{Evidence, SignedProof};
use super::message::{CiphertextBody, Envelope, KeyBody, MessageBody};
use super::timestamp::{check_timestamp_at, now_millis};

// ---------------------------------------------------------------------------
// Run State
// ---------------------------------------------------------------------------

/// Where a run stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Challenge sent, waiting for B's receipt.
    AwaitingReception,
    /// Key disclosed, waiting for the TTP's publication.
    AwaitingKeyPublication,
    /// Terminal: all four proofs collected.
    Completed,
    /// Terminal: the run stopped at `step`.
    Failed { step: ProtocolStep, error: NrError },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingReception => "awaiting_reception",
            Self::AwaitingKeyPublication => "awaiting_key_publication",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// The state of one invocation of the exchange.
///
/// Owned by the task driving it; never shared with another run.
#[derive(Clone, Debug)]
pub struct ProtocolRun {
    id: Uuid,
    state: RunState,
    step: ProtocolStep,
    iv: Option<Iv>,
    ciphertext: Option<Vec<u8>>,
    proof_of_origin: Option<SignedProof>,
    proof_of_reception: Option<SignedProof>,
    proof_of_key_origin: Option<SignedProof>,
    proof_of_key_publication: Option<SignedProof>,
    peer_b_key: Option<RsaPublicKey>,
    ttp_key: Option<RsaPublicKey>,
}

impl ProtocolRun {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RunState::Idle,
            step: ProtocolStep::Origin,
            iv: None,
            ciphertext: None,
            proof_of_origin: None,
            proof_of_reception: None,
            proof_of_key_origin: None,
            proof_of_key_publication: None,
            peer_b_key: None,
            ttp_key: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// The step in progress, or the one the run stopped at.
    pub fn step(&self) -> ProtocolStep {
        self.step
    }

    /// The error that failed the run, if any.
    pub fn failure(&self) -> Option<&NrError> {
        match &self.state {
            RunState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn iv(&self) -> Option<&Iv> {
        self.iv.as_ref()
    }

    pub fn ciphertext(&self) -> Option<&[u8]> {
        self.ciphertext.as_deref()
    }

    pub fn proof_of_origin(&self) -> Option<&SignedProof> {
        self.proof_of_origin.as_ref()
    }

    pub fn proof_of_reception(&self) -> Option<&SignedProof> {
        self.proof_of_reception.as_ref()
    }

    pub fn proof_of_key_origin(&self) -> Option<&SignedProof> {
        self.proof_of_key_origin.as_ref()
    }

    pub fn proof_of_key_publication(&self) -> Option<&SignedProof> {
        self.proof_of_key_publication.as_ref()
    }

    pub fn peer_b_key(&self) -> Option<&RsaPublicKey> {
        self.peer_b_key.as_ref()
    }

    pub fn ttp_key(&self) -> Option<&RsaPublicKey> {
        self.ttp_key.as_ref()
    }

    /// The evidence bundle of a completed run, or the error of a failed one.
    pub fn into_evidence(self) -> Result<Evidence, NrError> {
        match self.state {
            RunState::Completed => {}
            RunState::Failed { error, .. } => return Err(error),
            other => {
                return Err(NrError::InvalidEvidence(format!(
                    "run is still {}",
                    other.name()
                )))
            }
        }
        match (
            self.proof_of_origin,
            self.proof_of_reception,
            self.proof_of_key_origin,
            self.proof_of_key_publication,
        ) {
            (Some(origin), Some(reception), Some(key_origin), Some(key_publication)) => {
                Ok(Evidence {
                    run_id: self.id,
                    origin,
                    reception,
                    key_origin,
                    key_publication,
                })
            }
            _ => Err(NrError::InvalidEvidence(
                "completed run is missing a proof".to_string(),
            )),
        }
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(!self.state.is_terminal(), "transition out of a terminal state");
        info!(
            run_id = %self.id,
            from = self.state.name(),
            to = next.name(),
            "run state transition"
        );
        self.state = next;
    }

    fn fail(&mut self, error: NrError) {
        warn!(run_id = %self.id, step = %self.step, error = %error, "run failed");
        self.state = RunState::Failed {
            step: self.step,
            error,
        };
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Peer A: runs the exchange against Peer B and the TTP.
pub struct NonRepudiationClient<B, T> {
    keypair: Arc<RsaKeyPair>,
    session_key: SessionKey,
    peer_b: B,
    ttp: T,
    peer_keys: RwLock<HashMap<&'static str, RsaPublicKey>>,
    step_timeout: Duration,
    freshness_window_ms: u64,
    pin_peer_keys: bool,
    notifications: Mutex<Option<JoinHandle<()>>>,
    notifications_seen: Arc<AtomicU64>,
    key_channel: Mutex<Option<PubSubClient>>,
}

impl<B: PeerChannel, T: PeerChannel> NonRepudiationClient<B, T> {
    /// Build a client around an existing keypair and session key.
    pub fn new(
        keypair: Arc<RsaKeyPair>,
        session_key: SessionKey,
        peer_b: B,
        ttp: T,
        config: &ClientConfig,
    ) -> Self {
        info!(
            fingerprint = %keypair.public_key().fingerprint(),
            bits = keypair.public_key().bits(),
            peer_b = peer_b.endpoint(),
            ttp = ttp.endpoint(),
            "non-repudiation client ready"
        );
        Self {
            keypair,
            session_key,
            peer_b,
            ttp,
            peer_keys: RwLock::new(HashMap::new()),
            step_timeout: config.step_timeout(),
            freshness_window_ms: config.freshness_window_ms,
            pin_peer_keys: config.pin_peer_keys,
            notifications: Mutex::new(None),
            notifications_seen: Arc::new(AtomicU64::new(0)),
            key_channel: Mutex::new(None),
        }
    }

    /// Generate a fresh RSA keypair (`config.rsa_bits`) and session key.
    pub fn generate(config: &ClientConfig, peer_b: B, ttp: T) -> Result<Self, NrError> {
        let keypair = RsaKeyPair::generate(config.rsa_bits)
            .map_err(|e| NrError::Crypto(e.to_string()))?;
        Ok(Self::new(
            Arc::new(keypair),
            SessionKey::generate(),
            peer_b,
            ttp,
            config,
        ))
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        self.keypair.public_key()
    }

    /// The cached public key of `party` (`"B"` or `"TTP"`).
    pub fn peer_key(&self, party: &str) -> Option<RsaPublicKey> {
        self.peer_keys.read().get(party).cloned()
    }

    /// Seed the cache with a known key for `party`. With pinning enabled,
    /// replies signed by any other key are rejected.
    pub fn pin_peer_key(&self, party: &'static str, key: RsaPublicKey) {
        info!(party, fingerprint = %key.fingerprint(), "peer key pinned");
        self.peer_keys.write().insert(party, key);
    }

    /// Encrypt `plaintext`, run the full exchange and return the evidence.
    pub async fn send_message(&self, plaintext: &[u8]) -> Result<Evidence, NrError> {
        self.run(plaintext).await.into_evidence()
    }

    /// Like [`send_message`](Self::send_message) but hands back the whole
    /// terminal run, proofs collected so far included.
    pub async fn run(&self, plaintext: &[u8]) -> ProtocolRun {
        let mut run = ProtocolRun::new();
        info!(run_id = %run.id, bytes = plaintext.len(), "starting non-repudiation run");

        match self.drive(&mut run, plaintext).await {
            Ok(()) => info!(run_id = %run.id, "run completed"),
            Err(error) => run.fail(error),
        }
        run
    }

    async fn drive(&self, run: &mut ProtocolRun, plaintext: &[u8]) -> Result<(), NrError> {
        // Step 1: challenge to B.
        run.step = ProtocolStep::Origin;
        let (iv, ciphertext) = symmetric::encrypt(&self.session_key, plaintext);
        let ciphertext_hex = hex::encode(&ciphertext);
        let challenge = Envelope::seal(
            &self.keypair,
            MessageBody::Challenge(CiphertextBody {
                src: PEER_A.to_string(),
                dst: PEER_B.to_string(),
                msg: ciphertext_hex.clone(),
                timestamp: now_millis(),
            }),
        )?;
        run.iv = Some(iv);
        run.ciphertext = Some(ciphertext);
        run.proof_of_origin = Some(challenge.clone().into());
        run.transition(RunState::AwaitingReception);

        // Step 2: B's receipt must acknowledge exactly our ciphertext.
        run.step = ProtocolStep::Reception;
        let reply = self
            .exchange(&self.peer_b, run.step, challenge.to_value())
            .await?;
        let receipt = self.accept_reply(run.step, PEER_B, &reply, |body| match body {
            MessageBody::Receipt(r) if r.msg.eq_ignore_ascii_case(&ciphertext_hex) => Ok(()),
            MessageBody::Receipt(_) => Err("receipt acknowledges a different ciphertext".into()),
            other => Err(format!("expected a type 2 receipt, got type {}", other.type_tag())),
        })?;
        run.peer_b_key = Some(receipt.sender.clone());
        run.proof_of_reception = Some(receipt.into());

        // Step 3: disclose key and IV to the TTP.
        run.step = ProtocolStep::KeyOrigin;
        let key_hex = self.session_key.to_hex();
        let iv_hex = iv.to_hex();
        let disclosure = Envelope::seal(
            &self.keypair,
            MessageBody::KeyDisclosure(KeyBody {
                src: PEER_A.to_string(),
                dst: TTP.to_string(),
                msg: key_hex.clone(),
                iv: iv_hex.clone(),
                timestamp: now_millis(),
            }),
        )?;
        run.proof_of_key_origin = Some(disclosure.clone().into());
        run.transition(RunState::AwaitingKeyPublication);

        // Step 4: the TTP's publication must carry the key we disclosed.
        run.step = ProtocolStep::KeyPublication;
        let reply = self
            .exchange(&self.ttp, run.step, disclosure.to_value())
            .await?;
        let publication = self.accept_reply(run.step, TTP, &reply, |body| match body {
            MessageBody::KeyPublication(k)
                if k.msg.eq_ignore_ascii_case(&key_hex) && k.iv.eq_ignore_ascii_case(&iv_hex) =>
            {
                Ok(())
            }
            MessageBody::KeyPublication(_) => {
                Err("publication does not match the disclosed key".into())
            }
            other => Err(format!(
                "expected a type 4 publication, got type {}",
                other.type_tag()
            )),
        })?;
        run.ttp_key = Some(publication.sender.clone());
        run.proof_of_key_publication = Some(publication.into());
        run.transition(RunState::Completed);
        Ok(())
    }

    /// One bounded request/response step.
    async fn exchange<C: PeerChannel>(
        &self,
        channel: &C,
        step: ProtocolStep,
        request: Value,
    ) -> Result<Value, NrError> {
        debug!(endpoint = channel.endpoint(), %step, "sending envelope");
        match tokio::time::timeout(self.step_timeout, channel.exchange(request)).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(NrError::Timeout {
                step,
                timeout_ms: self.step_timeout.as_millis() as u64,
            }),
        }
    }

    fn accept_reply(
        &self,
        step: ProtocolStep,
        party: &'static str,
        reply: &Value,
        expect: impl FnOnce(&MessageBody) -> Result<(), String>,
    ) -> Result<Envelope, NrError> {
        let reject = |reason: String| match step {
            ProtocolStep::KeyPublication => NrError::BadPublicationProof(reason),
            _ => NrError::BadReceptionProof(reason),
        };

        let envelope = Envelope::from_value(reply)?;
        envelope.check().map_err(|e| reject(e.to_string()))?;
        expect(&envelope.body).map_err(&reject)?;

        let now = now_millis();
        let timestamp = envelope.body.timestamp();
        if !check_timestamp_at(timestamp, now, self.freshness_window_ms) {
            return Err(NrError::StaleTimestamp {
                step,
                timestamp,
                now,
                window_ms: self.freshness_window_ms,
            });
        }

        self.remember_peer_key(party, &envelope.sender)
            .map_err(&reject)?;
        debug!(party, %step, digest = %envelope.body.digest(), "reply accepted");
        Ok(envelope)
    }

    fn remember_peer_key(&self, party: &'static str, key: &RsaPublicKey) -> Result<(), String> {
        let cache = self.peer_keys.upgradable_read();
        match cache.get(party) {
            Some(known) if known == key => return Ok(()),
            Some(known) if self.pin_peer_keys => {
                return Err(format!(
                    "{party} signed with key {} but {} is pinned",
                    key.fingerprint(),
                    known.fingerprint()
                ))
            }
            Some(known) => warn!(
                party,
                old = %known.fingerprint(),
                new = %key.fingerprint(),
                "peer key changed"
            ),
            None => info!(party, fingerprint = %key.fingerprint(), "learned peer key"),
        }
        RwLockUpgradableReadGuard::upgrade(cache).insert(party, key.clone());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Log every notification from `source` on a background task.
    ///
    /// Notifications never advance a run. Returns `false` if a source was
    /// already attached.
    pub fn attach_notifications(&self, source: &dyn NotificationSource) -> bool {
        let mut slot = self.notifications.lock();
        if slot.is_some() {
            warn!("notification source already attached");
            return false;
        }

        let mut rx = source.subscribe();
        let seen = Arc::clone(&self.notifications_seen);
        *slot = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        seen.fetch_add(1, Ordering::Relaxed);
                        info!(
                            channel = notification.channel.as_deref().unwrap_or("-"),
                            payload = %notification.payload,
                            "key channel notification"
                        );
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification receiver lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("notification source closed");
                        break;
                    }
                }
            }
        }));
        true
    }

    /// Open the TTP's notification service at `url`, subscribe to the
    /// `key` channel and log what arrives for the lifetime of the client.
    ///
    /// Runs do not depend on it; callers treat an error as a warning.
    pub async fn subscribe_key_channel(&self, url: &str) -> Result<(), TransportError> {
        let subscription = PubSubClient::connect(url, KEY_CHANNEL).await?;
        if self.attach_notifications(&subscription) {
            *self.key_channel.lock() = Some(subscription);
        }
        Ok(())
    }

    /// `true` while a key channel subscription is held and still open.
    pub fn key_channel_open(&self) -> bool {
        self.key_channel
            .lock()
            .as_ref()
            .is_some_and(|subscription| !subscription.is_closed())
    }

    /// Notifications logged so far.
    pub fn notifications_seen(&self) -> u64 {
        self.notifications_seen.load(Ordering::Relaxed)
    }
}

impl<B, T> Drop for NonRepudiationClient<B, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.notifications.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::AwaitingReception.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed {
            step: ProtocolStep::Reception,
            error: NrError::BadReceptionProof("x".into()),
        }
        .is_terminal());
    }

    #[test]
    fn test_unfinished_run_has_no_evidence() {
        let run = ProtocolRun::new();
        assert!(matches!(
            run.into_evidence(),
            Err(NrError::InvalidEvidence(_))
        ));
    }

    #[test]
    fn test_failed_run_returns_its_error() {
        let mut run = ProtocolRun::new();
        run.step = ProtocolStep::KeyPublication;
        run.fail(NrError::BadPublicationProof("forged".into()));

        assert_eq!(
            run.state(),
            &RunState::Failed {
                step: ProtocolStep::KeyPublication,
                error: NrError::BadPublicationProof("forged".into()),
            }
        );
        assert!(matches!(
            run.into_evidence(),
            Err(NrError::BadPublicationProof(_))
        ));
    }
}

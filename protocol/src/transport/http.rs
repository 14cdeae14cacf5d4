//! HTTP JSON transports.
//!
//! [`HttpPeerChannel`] posts an envelope and reads the reply envelope from
//! the response body. That is all Peer B's `/nr` and the TTP's `/nr` speak.
//!
//! [`SigningServiceClient`] talks to a counterpart's raw signing endpoints
//! (`GET /pubKey`, `POST /sign`) and runs the blind-signature round trip
//! against them.
//!
//! [`SecretSharingClient`] fetches Shamir key slices (`GET /ss/slices`) and
//! submits them for recombination (`POST /ss/combine`).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::crypto::blind;
use crate::crypto::{PublicKeyHex, RsaPublicKey, Signature};

use super::{PeerChannel, TransportError};

fn build_client(endpoint: &str) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .use_rustls_tls()
        .build()
        .map_err(|e| TransportError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
}

async fn read_json(endpoint: &str, resp: reqwest::Response) -> Result<Value, TransportError> {
    let status = resp.status();
    if status != StatusCode::OK {
        return Err(TransportError::BadStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        });
    }
    resp.json::<Value>()
        .await
        .map_err(|e| TransportError::InvalidPayload {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
}

fn connection_failed(endpoint: &str, err: reqwest::Error) -> TransportError {
    TransportError::ConnectionFailed {
        endpoint: endpoint.to_string(),
        reason: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Peer channel
// ---------------------------------------------------------------------------

/// A [`PeerChannel`] that POSTs JSON to one URL.
#[derive(Clone, Debug)]
pub struct HttpPeerChannel {
    url: String,
    client: reqwest::Client,
}

impl HttpPeerChannel {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let url = url.into();
        let client = build_client(&url)?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl PeerChannel for HttpPeerChannel {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn exchange(&self, request: Value) -> Result<Value, TransportError> {
        debug!(url = %self.url, "POST envelope");
        let resp = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| connection_failed(&self.url, e))?;
        read_json(&self.url, resp).await
    }
}

// ---------------------------------------------------------------------------
// Signing service
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SignRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

/// Client for a counterpart that signs arbitrary hex integers.
#[derive(Clone, Debug)]
pub struct SigningServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl SigningServiceClient {
    /// `base_url` without the trailing endpoint, e.g. `http://localhost:50000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = build_client(&base_url)?;
        Ok(Self { base_url, client })
    }

    /// The signer's public key.
    pub async fn public_key(&self) -> Result<RsaPublicKey, TransportError> {
        let url = format!("{}/pubKey", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| connection_failed(&url, e))?;
        let value = read_json(&url, resp).await?;
        let invalid = |reason: String| TransportError::InvalidPayload {
            endpoint: url.clone(),
            reason,
        };
        let hex: PublicKeyHex =
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        RsaPublicKey::from_hex(&hex.e, &hex.n).map_err(|e| invalid(e.to_string()))
    }

    /// Ask the signer to sign `message_hex` as-is.
    pub async fn sign_hex(&self, message_hex: &str) -> Result<Signature, TransportError> {
        let url = format!("{}/sign", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&SignRequest {
                message: message_hex,
            })
            .send()
            .await
            .map_err(|e| connection_failed(&url, e))?;
        let value = read_json(&url, resp).await?;
        let invalid = |reason: String| TransportError::InvalidPayload {
            endpoint: url.clone(),
            reason,
        };
        let body: SignResponse =
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        Signature::from_hex(&body.signature).map_err(|e| invalid(e.to_string()))
    }

    /// Blind `message`, have it signed, unblind and check the result.
    ///
    /// The signer only ever sees the blinded integer.
    pub async fn blind_sign(
        &self,
        message: &[u8],
    ) -> Result<(RsaPublicKey, Signature), TransportError> {
        let signer = self.public_key().await?;
        let invalid = |reason: String| TransportError::InvalidPayload {
            endpoint: self.base_url.clone(),
            reason,
        };

        let (blinded, factor) =
            blind::blind(&signer, message).map_err(|e| invalid(e.to_string()))?;
        let blind_signature = self.sign_hex(&blinded.to_str_radix(16)).await?;
        let signature = blind::unblind(&signer, &blind_signature, &factor)
            .map_err(|e| invalid(e.to_string()))?;

        if !blind::verify_message(&signer, message, &signature) {
            return Err(invalid(
                "unblinded signature does not verify against the message".to_string(),
            ));
        }
        Ok((signer, signature))
    }
}

// ---------------------------------------------------------------------------
// Secret sharing
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CombineRequest<'a> {
    slice: &'a str,
}

/// Client for a Shamir secret-sharing service.
#[derive(Clone, Debug)]
pub struct SecretSharingClient {
    base_url: String,
    client: reqwest::Client,
}

impl SecretSharingClient {
    /// `base_url` without the `/ss` prefix, e.g. `http://localhost:50000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = build_client(&base_url)?;
        Ok(Self { base_url, client })
    }

    /// The hex slices the service has handed out for the current secret.
    ///
    /// Accepts a bare JSON array or `{"slices": [...]}`.
    pub async fn slices(&self) -> Result<Vec<String>, TransportError> {
        let url = format!("{}/ss/slices", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| connection_failed(&url, e))?;
        let value = read_json(&url, resp).await?;
        let list = match &value {
            Value::Array(_) => &value,
            Value::Object(map) => map.get("slices").unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
        serde_json::from_value(list.clone()).map_err(|e| TransportError::InvalidPayload {
            endpoint: url.clone(),
            reason: format!("expected a list of hex slices: {e}"),
        })
    }

    /// Submit one slice and return what the service has recovered so far.
    /// The result stays empty until enough slices were combined.
    ///
    /// Accepts a bare JSON string or an object with a `recovered` or
    /// `secret` string field.
    pub async fn combine(&self, slice: &str) -> Result<String, TransportError> {
        let url = format!("{}/ss/combine", self.base_url);
        debug!(url = %url, "submitting slice");
        let resp = self
            .client
            .post(&url)
            .json(&CombineRequest { slice })
            .send()
            .await
            .map_err(|e| connection_failed(&url, e))?;
        let value = read_json(&url, resp).await?;
        let recovered = match &value {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => ["recovered", "secret"]
                .iter()
                .find_map(|field| map.get(*field).and_then(Value::as_str)),
            _ => None,
        };
        match recovered {
            Some(secret) => Ok(secret.to_string()),
            None => Err(TransportError::InvalidPayload {
                endpoint: url,
                reason: format!("no recovered secret in {value}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use num_bigint_dig::BigUint;
    use serde_json::json;

    use crate::crypto::RsaKeyPair;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_exchange_posts_and_returns_json() {
        let app = Router::new().route(
            "/nr",
            post(|Json(body): Json<Value>| async move { Json(json!({ "echo": body })) }),
        );
        let base = serve(app).await;

        let channel = HttpPeerChannel::new(format!("{base}/nr")).unwrap();
        let reply = channel.exchange(json!({"ping": 1})).await.unwrap();
        assert_eq!(reply, json!({"echo": {"ping": 1}}));
    }

    #[tokio::test]
    async fn test_non_200_is_bad_status() {
        let app = Router::new().route(
            "/nr",
            post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = serve(app).await;

        let channel = HttpPeerChannel::new(format!("{base}/nr")).unwrap();
        match channel.exchange(json!({})).await {
            Err(TransportError::BadStatus { status, body, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected BadStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_is_connection_failed() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = HttpPeerChannel::new(format!("http://{addr}/nr")).unwrap();
        assert!(matches!(
            channel.exchange(json!({})).await,
            Err(TransportError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_blind_sign_against_signing_service() {
        let signer = Arc::new(RsaKeyPair::generate(1024).unwrap());

        async fn pub_key(State(kp): State<Arc<RsaKeyPair>>) -> Json<PublicKeyHex> {
            Json(kp.public_key().to_hex())
        }

        async fn sign(
            State(kp): State<Arc<RsaKeyPair>>,
            Json(req): Json<Value>,
        ) -> Json<Value> {
            let m = BigUint::parse_bytes(req["message"].as_str().unwrap().as_bytes(), 16).unwrap();
            let s = kp.raw_sign(&m).unwrap();
            Json(json!({ "signature": s.to_str_radix(16) }))
        }

        let app = Router::new()
            .route("/pubKey", get(pub_key))
            .route("/sign", post(sign))
            .with_state(Arc::clone(&signer));
        let base = serve(app).await;

        let client = SigningServiceClient::new(format!("{base}/")).unwrap();
        let (key, signature) = client.blind_sign(b"anonymous ballot").await.unwrap();

        assert_eq!(&key, signer.public_key());
        assert!(blind::verify_message(&key, b"anonymous ballot", &signature));
    }

    #[tokio::test]
    async fn test_secret_sharing_slices_and_combine() {
        use parking_lot::Mutex;

        // Recovers the secret once two slices were submitted.
        async fn combine(
            State(received): State<Arc<Mutex<Vec<String>>>>,
            Json(req): Json<Value>,
        ) -> Json<Value> {
            let mut received = received.lock();
            received.push(req["slice"].as_str().unwrap().to_string());
            let recovered = if received.len() >= 2 { "c0ffee" } else { "" };
            Json(json!({ "recovered": recovered }))
        }

        let app = Router::new()
            .route(
                "/ss/slices",
                get(|| async { Json(json!(["01ab", "02cd", "03ef"])) }),
            )
            .route("/ss/combine", post(combine))
            .with_state(Arc::new(Mutex::new(Vec::new())));
        let base = serve(app).await;

        let client = SecretSharingClient::new(base).unwrap();
        let slices = client.slices().await.unwrap();
        assert_eq!(slices, vec!["01ab", "02cd", "03ef"]);

        assert_eq!(client.combine(&slices[0]).await.unwrap(), "");
        assert_eq!(client.combine(&slices[1]).await.unwrap(), "c0ffee");
    }

    #[tokio::test]
    async fn test_secret_sharing_accepts_wrapped_payloads() {
        let app = Router::new()
            .route(
                "/ss/slices",
                get(|| async { Json(json!({ "slices": ["0a"] })) }),
            )
            .route("/ss/combine", post(|| async { Json(json!("beef")) }));
        let base = serve(app).await;

        let client = SecretSharingClient::new(base).unwrap();
        assert_eq!(client.slices().await.unwrap(), vec!["0a"]);
        assert_eq!(client.combine("0a").await.unwrap(), "beef");
    }

    #[tokio::test]
    async fn test_secret_sharing_rejects_unexpected_payloads() {
        let app = Router::new()
            .route("/ss/slices", get(|| async { Json(json!({ "count": 3 })) }))
            .route("/ss/combine", post(|| async { Json(json!({ "ok": true })) }));
        let base = serve(app).await;

        let client = SecretSharingClient::new(base).unwrap();
        assert!(matches!(
            client.slices().await,
            Err(TransportError::InvalidPayload { .. })
        ));
        assert!(matches!(
            client.combine("0a").await,
            Err(TransportError::InvalidPayload { .. })
        ));
    }
}

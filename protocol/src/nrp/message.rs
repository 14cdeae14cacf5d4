//! # Message Bodies and Envelopes
//!
//! Everything the three parties exchange is an envelope:
//!
//! ```text
//! {
//!   "body":      { "type": 1, "src": "A", "dst": "B", "msg": "<hex>", "timestamp": 1700000000000 },
//!   "signature": "<hex>",
//!   "pubKey":    { "e": "<hex>", "n": "<hex>" }
//! }
//! ```
//!
//! The body is tagged by a numeric `type`, which serde's enum tagging
//! cannot express, so bodies go through a flat [`RawBody`] and are then
//! checked into the typed [`MessageBody`]. Unknown tags, missing fields,
//! unknown fields and a key body without `iv` are all rejected as
//! [`NrError::MalformedEnvelope`].
//!
//! The signature in an envelope is over [`MessageBody::digest`], the
//! SHA-256 of the body's canonical JSON. Fields the typed body does not
//! know about would silently drop out of that digest, which is why unknown
//! fields are an error rather than ignored.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::crypto::{digest_json, Digest, PublicKeyHex, RsaPublicKey, Signature};

use super::error::NrError;

// ---------------------------------------------------------------------------
// Body Types
// ---------------------------------------------------------------------------

/// Wire tag of a challenge (A → B).
pub const TYPE_CHALLENGE: u8 = 1;
/// Wire tag of a receipt (B → A).
pub const TYPE_RECEIPT: u8 = 2;
/// Wire tag of a key disclosure (A → TTP).
pub const TYPE_KEY_DISCLOSURE: u8 = 3;
/// Wire tag of a key publication (TTP → A).
pub const TYPE_KEY_PUBLICATION: u8 = 4;

/// Fields of a body whose `msg` is the challenge ciphertext (types 1, 2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CiphertextBody {
    pub src: String,
    pub dst: String,
    /// AES-256-CBC ciphertext, hex.
    pub msg: String,
    /// Creation time, Unix milliseconds.
    pub timestamp: u64,
}

/// Fields of a body whose `msg` is the session key (types 3, 4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyBody {
    pub src: String,
    pub dst: String,
    /// AES-256 session key, hex.
    pub msg: String,
    /// IV the challenge was encrypted under, hex.
    pub iv: String,
    /// Creation time, Unix milliseconds.
    pub timestamp: u64,
}

/// A protocol message body, discriminated by its wire `type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// Type 1: A sends the ciphertext to B.
    Challenge(CiphertextBody),
    /// Type 2: B acknowledges the ciphertext it received.
    Receipt(CiphertextBody),
    /// Type 3: A discloses key and IV to the TTP.
    KeyDisclosure(KeyBody),
    /// Type 4: the TTP confirms it published key and IV.
    KeyPublication(KeyBody),
}

impl MessageBody {
    /// The numeric wire tag.
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Challenge(_) => TYPE_CHALLENGE,
            Self::Receipt(_) => TYPE_RECEIPT,
            Self::KeyDisclosure(_) => TYPE_KEY_DISCLOSURE,
            Self::KeyPublication(_) => TYPE_KEY_PUBLICATION,
        }
    }

    pub fn src(&self) -> &str {
        match self {
            Self::Challenge(b) | Self::Receipt(b) => &b.src,
            Self::KeyDisclosure(b) | Self::KeyPublication(b) => &b.src,
        }
    }

    pub fn dst(&self) -> &str {
        match self {
            Self::Challenge(b) | Self::Receipt(b) => &b.dst,
            Self::KeyDisclosure(b) | Self::KeyPublication(b) => &b.dst,
        }
    }

    /// The `msg` field: ciphertext hex for types 1/2, key hex for 3/4.
    pub fn msg(&self) -> &str {
        match self {
            Self::Challenge(b) | Self::Receipt(b) => &b.msg,
            Self::KeyDisclosure(b) | Self::KeyPublication(b) => &b.msg,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Challenge(b) | Self::Receipt(b) => b.timestamp,
            Self::KeyDisclosure(b) | Self::KeyPublication(b) => b.timestamp,
        }
    }

    /// The JSON object that goes on the wire and into the digest.
    pub fn to_value(&self) -> Value {
        let tag = self.type_tag();
        match self {
            Self::Challenge(b) | Self::Receipt(b) => json!({
                "type": tag,
                "src": b.src,
                "dst": b.dst,
                "msg": b.msg,
                "timestamp": b.timestamp,
            }),
            Self::KeyDisclosure(b) | Self::KeyPublication(b) => json!({
                "type": tag,
                "src": b.src,
                "dst": b.dst,
                "msg": b.msg,
                "iv": b.iv,
                "timestamp": b.timestamp,
            }),
        }
    }

    /// Parse a body from its JSON object.
    pub fn from_value(value: &Value) -> Result<Self, NrError> {
        let raw: RawBody = serde_json::from_value(value.clone())
            .map_err(|e| NrError::MalformedEnvelope(format!("body: {e}")))?;
        Self::try_from(raw)
    }

    /// SHA-256 over the canonical JSON of this body. This is what every
    /// proof signs.
    pub fn digest(&self) -> Digest {
        digest_json(&self.to_value())
    }
}

/// Flat wire shape shared by all body types.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBody {
    #[serde(rename = "type")]
    kind: u8,
    src: String,
    dst: String,
    msg: String,
    /// `None` only when the key is absent; `"iv": null` is `Some(Null)`.
    #[serde(default, deserialize_with = "present")]
    iv: Option<Value>,
    timestamp: u64,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawBody> for MessageBody {
    type Error = NrError;

    fn try_from(raw: RawBody) -> Result<Self, Self::Error> {
        let ciphertext_body = |raw: RawBody| -> Result<CiphertextBody, NrError> {
            if raw.iv.is_some() {
                return Err(NrError::MalformedEnvelope(format!(
                    "type {} body must not carry an iv",
                    raw.kind
                )));
            }
            Ok(CiphertextBody {
                src: raw.src,
                dst: raw.dst,
                msg: raw.msg,
                timestamp: raw.timestamp,
            })
        };
        let key_body = |raw: RawBody| -> Result<KeyBody, NrError> {
            let iv = match raw.iv {
                Some(Value::String(iv)) => iv,
                Some(other) => {
                    return Err(NrError::MalformedEnvelope(format!(
                        "type {} body has a non-string iv: {other}",
                        raw.kind
                    )))
                }
                None => {
                    return Err(NrError::MalformedEnvelope(format!(
                        "type {} body is missing iv",
                        raw.kind
                    )))
                }
            };
            Ok(KeyBody {
                src: raw.src,
                dst: raw.dst,
                msg: raw.msg,
                iv,
                timestamp: raw.timestamp,
            })
        };

        match raw.kind {
            TYPE_CHALLENGE => ciphertext_body(raw).map(Self::Challenge),
            TYPE_RECEIPT => ciphertext_body(raw).map(Self::Receipt),
            TYPE_KEY_DISCLOSURE => key_body(raw).map(Self::KeyDisclosure),
            TYPE_KEY_PUBLICATION => key_body(raw).map(Self::KeyPublication),
            other => Err(NrError::MalformedEnvelope(format!(
                "unknown body type {other}"
            ))),
        }
    }
}

impl Serialize for MessageBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageBody {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawBody::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A signed body together with the key that signed it.
///
/// Decoding an envelope does not check the signature; see
/// [`check_proof`](super::proof::check_proof).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub body: MessageBody,
    pub signature: Signature,
    pub sender: RsaPublicKey,
}

#[derive(Deserialize)]
struct WireEnvelope {
    body: Value,
    signature: String,
    #[serde(rename = "pubKey")]
    pub_key: PublicKeyHex,
}

/// Build the wire form of an envelope.
pub fn encode(body: &MessageBody, signature: &Signature, sender: &RsaPublicKey) -> Value {
    let key = sender.to_hex();
    json!({
        "body": body.to_value(),
        "signature": signature.to_hex(),
        "pubKey": { "e": key.e, "n": key.n },
    })
}

/// Parse the wire form of an envelope.
pub fn decode(value: &Value) -> Result<Envelope, NrError> {
    let wire: WireEnvelope = serde_json::from_value(value.clone())
        .map_err(|e| NrError::MalformedEnvelope(e.to_string()))?;

    let body = MessageBody::from_value(&wire.body)?;
    let signature = Signature::from_hex(&wire.signature)
        .map_err(|e| NrError::MalformedEnvelope(format!("signature: {e}")))?;
    let sender = RsaPublicKey::from_hex(&wire.pub_key.e, &wire.pub_key.n)
        .map_err(|e| NrError::MalformedEnvelope(format!("pubKey: {e}")))?;

    Ok(Envelope {
        body,
        signature,
        sender,
    })
}

impl Envelope {
    pub fn to_value(&self) -> Value {
        encode(&self.body, &self.signature, &self.sender)
    }

    pub fn from_value(value: &Value) -> Result<Self, NrError> {
        decode(value)
    }

    /// Compact JSON bytes, as sent over a transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NrError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| NrError::MalformedEnvelope(format!("not JSON: {e}")))?;
        decode(&value)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        decode(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RsaKeyPair;
    use crate::nrp::proof::prove;

    fn challenge() -> MessageBody {
        MessageBody::Challenge(CiphertextBody {
            src: "A".into(),
            dst: "B".into(),
            msg: "00ff".into(),
            timestamp: 1_700_000_000_000,
        })
    }

    fn disclosure() -> MessageBody {
        MessageBody::KeyDisclosure(KeyBody {
            src: "A".into(),
            dst: "TTP".into(),
            msg: "ab".repeat(32),
            iv: "cd".repeat(16),
            timestamp: 1_700_000_000_000,
        })
    }

    fn receipt() -> MessageBody {
        MessageBody::Receipt(CiphertextBody {
            src: "B".into(),
            dst: "A".into(),
            msg: "00ff".into(),
            timestamp: 1_700_000_000_500,
        })
    }

    fn publication() -> MessageBody {
        MessageBody::KeyPublication(KeyBody {
            src: "TTP".into(),
            dst: "A".into(),
            msg: "ab".repeat(32),
            iv: "cd".repeat(16),
            timestamp: 1_700_000_000_900,
        })
    }

    #[test]
    fn test_body_wire_shape() {
        let value = disclosure().to_value();
        assert_eq!(value["type"], 3);
        assert_eq!(value["dst"], "TTP");
        assert_eq!(value["iv"], "cd".repeat(16));

        assert!(challenge().to_value().get("iv").is_none());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let kp = RsaKeyPair::generate(1024).unwrap();
        for body in [challenge(), receipt(), disclosure(), publication()] {
            let sig = prove(&kp, &body).unwrap();
            let wire = encode(&body, &sig, kp.public_key());
            let decoded = decode(&wire).unwrap();
            assert_eq!(decoded.body, body);
            assert_eq!(decoded.signature, sig);
            assert_eq!(&decoded.sender, kp.public_key());

            let from_bytes = Envelope::from_bytes(&decoded.to_bytes()).unwrap();
            assert_eq!(from_bytes, decoded);
            assert_eq!(decoded.to_value(), wire);
        }
    }

    #[test]
    fn test_rejects_unknown_type() {
        let value = json!({"type": 7, "src": "A", "dst": "B", "msg": "", "timestamp": 0});
        assert!(matches!(
            MessageBody::from_value(&value),
            Err(NrError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_key_body_requires_iv() {
        let value = json!({"type": 3, "src": "A", "dst": "TTP", "msg": "aa", "timestamp": 0});
        let err = MessageBody::from_value(&value).unwrap_err();
        assert!(err.to_string().contains("missing iv"));
    }

    #[test]
    fn test_ciphertext_body_rejects_iv() {
        let value =
            json!({"type": 1, "src": "A", "dst": "B", "msg": "aa", "iv": "bb", "timestamp": 0});
        assert!(MessageBody::from_value(&value).is_err());

        let null_iv =
            json!({"type": 2, "src": "B", "dst": "A", "msg": "aa", "iv": null, "timestamp": 0});
        assert!(matches!(
            MessageBody::from_value(&null_iv),
            Err(NrError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_key_body_rejects_null_iv() {
        let value =
            json!({"type": 4, "src": "TTP", "dst": "A", "msg": "aa", "iv": null, "timestamp": 0});
        let err = MessageBody::from_value(&value).unwrap_err();
        assert!(err.to_string().contains("non-string iv"));
    }

    #[test]
    fn test_rejects_unknown_and_missing_fields() {
        let extra =
            json!({"type": 2, "src": "B", "dst": "A", "msg": "", "timestamp": 0, "note": "x"});
        assert!(MessageBody::from_value(&extra).is_err());

        let missing = json!({"type": 2, "src": "B", "dst": "A", "timestamp": 0});
        assert!(MessageBody::from_value(&missing).is_err());
    }

    #[test]
    fn test_rejects_non_hex_signature_and_key() {
        let body = challenge().to_value();

        let bad_sig = json!({"body": body, "signature": "not-hex", "pubKey": {"e": "10001", "n": "ff"}});
        assert!(matches!(decode(&bad_sig), Err(NrError::MalformedEnvelope(_))));

        let bad_key = json!({"body": body, "signature": "ab", "pubKey": {"e": "10001", "n": "zz"}});
        assert!(matches!(decode(&bad_key), Err(NrError::MalformedEnvelope(_))));

        let no_key = json!({"body": body, "signature": "ab"});
        assert!(matches!(decode(&no_key), Err(NrError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_rejects_loosely_formatted_hex() {
        let kp = RsaKeyPair::generate(1024).unwrap();
        let body = challenge();
        let sig = prove(&kp, &body).unwrap();
        let wire = encode(&body, &sig, kp.public_key());
        assert!(decode(&wire).is_ok());

        let sig_hex = sig.to_hex();
        let loose_signatures = [
            format!("+{sig_hex}"),
            format!("{}_{}", &sig_hex[..4], &sig_hex[4..]),
            format!("0x{sig_hex}"),
            "0x".to_string(),
            String::new(),
        ];
        for loose in loose_signatures {
            let mut tampered = wire.clone();
            tampered["signature"] = json!(loose);
            assert!(
                matches!(decode(&tampered), Err(NrError::MalformedEnvelope(_))),
                "signature {loose:?} was accepted"
            );
        }

        for loose_e in ["+10001", "1_0001", "0x10001"] {
            let mut tampered = wire.clone();
            tampered["pubKey"]["e"] = json!(loose_e);
            assert!(
                matches!(decode(&tampered), Err(NrError::MalformedEnvelope(_))),
                "exponent {loose_e:?} was accepted"
            );
        }
    }

    #[test]
    fn test_digest_independent_of_field_order() {
        let a: Value = serde_json::from_str(
            r#"{"type":1,"src":"A","dst":"B","msg":"00ff","timestamp":1700000000000}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{"timestamp":1700000000000,"msg":"00ff","dst":"B","src":"A","type":1}"#,
        )
        .unwrap();
        let a = MessageBody::from_value(&a).unwrap();
        let b = MessageBody::from_value(&b).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest(), challenge().digest());
    }
}

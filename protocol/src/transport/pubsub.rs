//! WebSocket publish/subscribe client for the TTP's notification service.
//!
//! Every client→server frame has the same shape:
//!
//! ```text
//! { "request": "SUBSCRIBE" | "PUBLISH", "message": <any JSON>, "channel": "key" }
//! ```
//!
//! Server→client frames are arbitrary JSON. [`PubSubClient`] opens one
//! connection, subscribes, and forwards every text frame into a
//! `tokio::sync::broadcast` channel from a background reader task. Slow
//! receivers lose the oldest frames; the reader never waits for them.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::NOTIFICATION_CHANNEL_CAPACITY;
use crate::nrp::timestamp::now_millis;

use super::{NotificationSource, TransportError};

/// What a client→server frame asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PubSubRequest {
    Subscribe,
    Publish,
}

/// A client→server frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PubSubFrame {
    pub request: PubSubRequest,
    pub message: Value,
    pub channel: String,
}

impl PubSubFrame {
    pub fn subscribe(channel: &str) -> Self {
        Self {
            request: PubSubRequest::Subscribe,
            message: Value::String(String::new()),
            channel: channel.to_string(),
        }
    }

    pub fn publish(channel: &str, message: Value) -> Self {
        Self {
            request: PubSubRequest::Publish,
            message,
            channel: channel.to_string(),
        }
    }

    fn into_message(self) -> Message {
        Message::Text(Value::from(&self).to_string())
    }
}

impl From<&PubSubFrame> for Value {
    fn from(frame: &PubSubFrame) -> Self {
        serde_json::json!({
            "request": frame.request,
            "message": frame.message,
            "channel": frame.channel,
        })
    }
}

/// A server→client frame as handed to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// The frame's `channel` field, if it had one.
    pub channel: Option<String>,
    /// The whole frame. Non-JSON text arrives as a JSON string.
    pub payload: Value,
    /// When we read it (Unix ms).
    pub received_at: u64,
}

impl Notification {
    fn from_text(text: &str) -> Self {
        let payload =
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
        let channel = payload
            .get("channel")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            channel,
            payload,
            received_at: now_millis(),
        }
    }
}

fn ws_error(url: &str, err: impl std::fmt::Display) -> TransportError {
    TransportError::ConnectionFailed {
        endpoint: url.to_string(),
        reason: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// A long-lived subscription to one channel.
pub struct PubSubClient {
    url: String,
    channel: String,
    tx: broadcast::Sender<Notification>,
    reader: JoinHandle<()>,
}

impl PubSubClient {
    /// Connect to `url` and subscribe to `channel`.
    pub async fn connect(url: &str, channel: &str) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(url).await.map_err(|e| ws_error(url, e))?;
        let (mut write, mut read) = stream.split();

        write
            .send(PubSubFrame::subscribe(channel).into_message())
            .await
            .map_err(|e| ws_error(url, e))?;
        info!(url, channel, "subscribed to notification channel");

        let (tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let forward = tx.clone();
        let endpoint = url.to_string();
        let reader = tokio::spawn(async move {
            // Held so the server does not see a half-closed socket.
            let _write = write;
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let notification = Notification::from_text(&text);
                        debug!(channel = ?notification.channel, "notification received");
                        // No receivers is fine: notifications are advisory.
                        let _ = forward.send(notification);
                    }
                    Ok(Message::Close(_)) => {
                        debug!(url = %endpoint, "notification service closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(url = %endpoint, error = %e, "notification stream failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            url: url.to_string(),
            channel: channel.to_string(),
            tx,
            reader,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// `true` once the server closed the stream or it failed.
    pub fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }
}

impl NotificationSource for PubSubClient {
    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Drop for PubSubClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Open a connection, send one PUBLISH frame on `channel`, close.
pub async fn publish(url: &str, channel: &str, message: Value) -> Result<(), TransportError> {
    let (mut stream, _) = connect_async(url).await.map_err(|e| ws_error(url, e))?;
    stream
        .send(PubSubFrame::publish(channel, message).into_message())
        .await
        .map_err(|e| ws_error(url, e))?;
    stream.close(None).await.map_err(|e| ws_error(url, e))?;
    info!(url, channel, "published to notification channel");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;

    /// Accepts connections, reports every text frame, and pushes `replies`
    /// to each client after its first frame.
    async fn fake_ttp(replies: Vec<String>) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let seen = seen_tx.clone();
                let replies = replies.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(tcp).await.unwrap();
                    let mut first = true;
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Text(text) = msg {
                            seen.send(serde_json::from_str(&text).unwrap()).unwrap();
                            if first {
                                first = false;
                                for reply in &replies {
                                    ws.send(Message::Text(reply.clone())).await.unwrap();
                                }
                            }
                        }
                    }
                });
            }
        });

        (format!("ws://{addr}"), seen_rx)
    }

    #[test]
    fn test_frame_wire_shape() {
        let frame: Value = (&PubSubFrame::subscribe("key")).into();
        assert_eq!(
            frame,
            json!({"request": "SUBSCRIBE", "message": "", "channel": "key"})
        );

        let frame: Value = (&PubSubFrame::publish("key", json!({"k": 1}))).into();
        assert_eq!(frame["request"], "PUBLISH");
        assert_eq!(frame["message"], json!({"k": 1}));
    }

    #[tokio::test]
    async fn test_subscribe_and_forward() {
        let (url, mut seen) = fake_ttp(vec![
            r#"{"channel":"key","message":"published"}"#.to_string(),
            "not json".to_string(),
        ])
        .await;

        let client = PubSubClient::connect(&url, "key").await.unwrap();
        let mut rx = client.subscribe();

        let subscribe = seen.recv().await.unwrap();
        assert_eq!(subscribe["request"], "SUBSCRIBE");
        assert_eq!(subscribe["channel"], "key");

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.channel.as_deref(), Some("key"));
        assert_eq!(first.payload["message"], "published");

        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.channel, None);
        assert_eq!(second.payload, Value::String("not json".to_string()));
    }

    #[tokio::test]
    async fn test_publish_sends_frame() {
        let (url, mut seen) = fake_ttp(Vec::new()).await;

        publish(&url, "key", json!({"body": {"type": 3}})).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame["request"], "PUBLISH");
        assert_eq!(frame["channel"], "key");
        assert_eq!(frame["message"]["body"]["type"], 3);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            PubSubClient::connect(&format!("ws://{addr}"), "key").await,
            Err(TransportError::ConnectionFailed { .. })
        ));
    }
}

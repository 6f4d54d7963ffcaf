//! WebSocket signaling transport.
//!
//! Each frame is a JSON text message `{"room": "...", "signal": {...}}`.
//! The relay server is expected to forward frames to the other members of
//! the room and to replay `user-joined` for existing members to newcomers.

use super::{EventBus, SignalKind, SignalMessage, SignalingChannel, Subscription};
use crate::error::{CallError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, info, trace, warn};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub room: String,
    pub signal: SignalMessage,
}

pub fn encode_frame(room: &str, signal: &SignalMessage) -> Result<String> {
    Ok(serde_json::to_string(&Envelope {
        room: room.to_string(),
        signal: signal.clone(),
    })?)
}

/// `None` for frames of another room
pub fn decode_frame(room: &str, text: &str) -> Result<Option<SignalMessage>> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if envelope.room != room {
        return Ok(None);
    }
    Ok(Some(envelope.signal))
}

pub struct WebSocketChannel {
    room: String,
    outbound: mpsc::UnboundedSender<SignalMessage>,
    bus: Arc<EventBus>,
    tasks: Vec<JoinHandle<()>>,
}

impl WebSocketChannel {
    pub async fn connect(url: &str, room: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| CallError::Signaling(format!("websocket connect failed: {e}")))?;
        info!("Signaling websocket connected to {url} for room {room}");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let bus = Arc::new(EventBus::new());

        let writer_room = room.to_string();
        let writer = tokio::spawn(async move {
            while let Some(signal) = outbound_rx.recv().await {
                let text = match encode_frame(&writer_room, &signal) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unencodable {:?}: {e}", signal.kind());
                        continue;
                    }
                };
                if let Err(e) = ws_write.send(Message::Text(text)).await {
                    warn!("Signaling write failed: {e}");
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        let reader_room = room.to_string();
        let reader_bus = bus.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                    Err(e) => {
                        warn!("Signaling read failed: {e}");
                        break;
                    }
                };
                trace!("ws in: {} bytes", text.len());
                match decode_frame(&reader_room, &text) {
                    Ok(Some(signal)) => {
                        reader_bus.publish(signal);
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Ignoring malformed signaling frame: {e}"),
                }
            }
            info!("Signaling websocket closed");
        });

        Ok(Self {
            room: room.to_string(),
            outbound,
            bus,
            tasks: vec![writer, reader],
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn send(&self, message: SignalMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| CallError::Signaling("signaling socket is closed".into()))
    }

    fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    fn subscribe_to(&self, kinds: &[SignalKind]) -> Subscription {
        self.bus.subscribe_to(kinds)
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::UserLeft;

    #[test]
    fn frames_are_scoped_to_the_room() {
        let signal = SignalMessage::UserLeft(UserLeft { user_id: "x".into() });
        let text = encode_frame("room-1", &signal).unwrap();
        assert!(text.contains("\"room\":\"room-1\""));
        assert_eq!(decode_frame("room-1", &text).unwrap(), Some(signal));
        assert_eq!(decode_frame("room-2", &text).unwrap(), None);
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(decode_frame("room", "{not json").is_err());
    }

    #[tokio::test]
    async fn connect_to_nothing_fails_with_signaling_error() {
        let err = WebSocketChannel::connect("ws://127.0.0.1:9/", "room")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CallError::Signaling(_)));
    }
}
